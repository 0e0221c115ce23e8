use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workspace registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// How long an empty workspace is kept alive before its maps are
    /// destroyed (spec §4.C). TOML-only (`[workspace] empty_retention_ms`);
    /// no environment variable overrides this value.
    #[serde(default = "d_retention_ms")]
    pub empty_retention_ms: u64,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            empty_retention_ms: d_retention_ms(),
        }
    }
}

fn d_retention_ms() -> u64 {
    120_000
}
