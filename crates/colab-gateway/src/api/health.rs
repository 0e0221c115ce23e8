//! `GET /health` (spec §6): a liveness probe listing workspace count.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "workspaces": state.registry.len(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
