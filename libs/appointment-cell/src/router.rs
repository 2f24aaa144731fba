use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::orchestrator::AppointmentOrchestrator;

pub struct AppointmentState {
    pub config: Arc<AppConfig>,
    pub orchestrator: Arc<AppointmentOrchestrator>,
}

pub fn appointment_routes(state: Arc<AppointmentState>) -> Router {
    // All appointment operations require authentication
    let protected_routes = Router::new()
        .route("/", post(handlers::create_appointment).get(handlers::list_appointments))
        .route(
            "/{appointment_id}",
            get(handlers::get_appointment)
                .put(handlers::update_appointment)
                .delete(handlers::delete_appointment),
        )
        .route("/{appointment_id}/respond", post(handlers::respond_to_appointment))
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/{appointment_id}/reminder", post(handlers::send_reminder))
        .layer(middleware::from_fn_with_state(
            state.config.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
