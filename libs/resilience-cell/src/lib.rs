pub mod breaker;
pub mod handlers;
pub mod registry;
pub mod router;

pub use breaker::{
    BreakerMode, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError,
};
pub use registry::BreakerRegistry;
pub use router::monitoring_routes;
