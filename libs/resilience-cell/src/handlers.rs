use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::registry::BreakerRegistry;

pub async fn get_circuit_breakers(
    State(registry): State<Arc<BreakerRegistry>>,
) -> Json<Value> {
    let breakers = registry.snapshots().await;
    let open = breakers.iter().filter(|b| b.state_gauge != 0).count();

    Json(json!({
        "circuit_breakers": breakers,
        "total": breakers.len(),
        "not_closed": open,
    }))
}
