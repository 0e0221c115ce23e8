//! `GET /workspace/:id` (spec §6): a read-only snapshot of a workspace's
//! connected members, for dashboards/ops tooling.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::state::AppState;

pub async fn workspace_info(
    Path(workspace_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let Some(ws) = state.registry.get(&workspace_id) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let session = ws.state.lock().await;
    let users: Vec<_> = session
        .members
        .values()
        .map(|m| {
            json!({
                "userId": m.user_id,
                "coords": m.cursor.map(|(x, y)| json!({"x": x, "y": y})),
            })
        })
        .collect();

    Json(json!({
        "workspaceId": workspace_id,
        "userCount": users.len(),
        "users": users,
    }))
    .into_response()
}
