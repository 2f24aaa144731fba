pub mod bookings;
pub mod directory;
pub mod lifecycle;
pub mod orchestrator;
pub mod postgrest;
pub mod store;

pub use bookings::StoreBookingSource;
pub use directory::{DirectoryLookup, HttpDirectoryClient, MEDECINS_SERVICE, PATIENTS_SERVICE};
pub use lifecycle::{check_transition, valid_transitions, Transition};
pub use orchestrator::{Applied, AppointmentOrchestrator};
pub use postgrest::{PostgrestAppointmentStore, PostgrestNotificationStore};
pub use store::{AppointmentStore, InMemoryAppointmentStore, InMemoryNotificationStore, NotificationStore};
