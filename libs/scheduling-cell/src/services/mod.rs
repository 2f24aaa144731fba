pub mod availability;
pub mod cache;
pub mod generator;
pub mod schedule_store;

pub use availability::{AvailabilityService, BookingSource};
pub use cache::{AvailabilityCache, InMemoryAvailabilityCache, RedisAvailabilityCache};
pub use generator::generate_slots;
pub use schedule_store::{InMemoryScheduleStore, PostgrestScheduleStore, ScheduleStore};
