pub mod error;
pub mod events;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use error::{AppointmentError, DirectoryError, StoreError};
pub use events::appointment_dispatcher;
pub use models::*;
pub use router::{appointment_routes, AppointmentState};
pub use services::*;
