use std::sync::Arc;

use colab_core::WorkspaceRegistry;
use colab_domain::config::Config;

/// Shared application state passed to all HTTP/WS handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<WorkspaceRegistry>,
    pub dispatcher: Arc<colab_core::Dispatcher>,
}
