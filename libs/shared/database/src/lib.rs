pub mod postgrest;

pub use postgrest::{ApiStatusError, SupabaseClient};
