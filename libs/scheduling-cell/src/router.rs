use std::sync::Arc;

use axum::{
    middleware,
    routing::get,
    Router,
};

use messaging_cell::EventPublisher;
use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::AvailabilityService;

pub struct SchedulingState {
    pub config: Arc<AppConfig>,
    pub availability: Arc<AvailabilityService>,
    pub publisher: EventPublisher,
}

pub fn scheduling_routes(state: Arc<SchedulingState>) -> Router {
    let protected_routes = Router::new()
        .route("/available-slots", get(handlers::get_available_slots))
        .route(
            "/provider-schedule/{provider_id}",
            get(handlers::get_provider_schedule).put(handlers::update_provider_schedule),
        )
        .layer(middleware::from_fn_with_state(
            state.config.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
