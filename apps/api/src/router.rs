use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use appointment_cell::{appointment_routes, AppointmentState};
use resilience_cell::{monitoring_routes, BreakerRegistry};
use scheduling_cell::{scheduling_routes, SchedulingState};

pub fn create_router(
    appointments: Arc<AppointmentState>,
    scheduling: Arc<SchedulingState>,
    breakers: Arc<BreakerRegistry>,
) -> Router {
    Router::new()
        .route("/", get(|| async { "Appointment service is running!" }))
        .nest("/appointments", appointment_routes(appointments))
        .nest("/scheduling", scheduling_routes(scheduling))
        .nest("/monitoring", monitoring_routes(breakers))
}
