use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Join-ticket admission
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Names of the environment variables consulted for the ticket-signing
/// secret, in priority order (spec §4.A): primary, then fallback. The
/// dev-fallback value itself is never read from config — it is
/// hard-coded in `colab-core::ticket` and gated on `production`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    #[serde(default = "d_primary_secret_env")]
    pub primary_secret_env: String,
    #[serde(default = "d_fallback_secret_env")]
    pub fallback_secret_env: String,
    /// Mirrors `NODE_ENV`; only `"production"` disables the dev fallback.
    #[serde(default = "d_node_env")]
    pub node_env: String,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            primary_secret_env: d_primary_secret_env(),
            fallback_secret_env: d_fallback_secret_env(),
            node_env: d_node_env(),
        }
    }
}

impl AdmissionConfig {
    pub fn is_production(&self) -> bool {
        self.node_env.eq_ignore_ascii_case("production")
    }
}

fn d_primary_secret_env() -> String {
    "COLAB_JOIN_TOKEN_SECRET".into()
}
fn d_fallback_secret_env() -> String {
    "CRON_SECRET".into()
}
fn d_node_env() -> String {
    std::env::var("NODE_ENV").unwrap_or_default()
}
