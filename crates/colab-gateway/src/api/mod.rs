pub mod health;
pub mod workspace_info;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws::ws_upgrade;

/// Builds the full router: the `/ws` collaboration endpoint plus the
/// read-only HTTP boundary from spec §6.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health::health))
        .route("/workspace/:id", get(workspace_info::workspace_info))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
