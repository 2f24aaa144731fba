use std::sync::Arc;

use axum::{routing::get, Router};

use crate::handlers;
use crate::registry::BreakerRegistry;

pub fn monitoring_routes(registry: Arc<BreakerRegistry>) -> Router {
    Router::new()
        .route("/circuit-breakers", get(handlers::get_circuit_breakers))
        .with_state(registry)
}
