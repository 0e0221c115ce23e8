//! Entity kinds and the weak-ETag format used for optimistic
//! concurrency (spec §4.D, §5).

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kinds of mutable entities a workspace tracks a version for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    Block,
    Sprite,
    SpriteMetrics,
    WorkspaceSnapshot,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityKind::Block => "block",
            EntityKind::Sprite => "sprite",
            EntityKind::SpriteMetrics => "sprite-metrics",
            EntityKind::WorkspaceSnapshot => "workspace-snapshot",
        };
        f.write_str(s)
    }
}

/// Formats a weak ETag as `W/"<kind>:<id>:<version>"` (spec §5).
pub fn format_etag(kind: EntityKind, id: &str, version: u64) -> String {
    format!(r#"W/"{kind}:{id}:{version}""#)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_etag_matches_spec_shape() {
        assert_eq!(
            format_etag(EntityKind::Block, "b1", 3),
            r#"W/"block:b1:3""#
        );
    }

    #[test]
    fn entity_kind_display_matches_serde_rename() {
        for (kind, expected) in [
            (EntityKind::Block, "block"),
            (EntityKind::Sprite, "sprite"),
            (EntityKind::SpriteMetrics, "sprite-metrics"),
            (EntityKind::WorkspaceSnapshot, "workspace-snapshot"),
        ] {
            assert_eq!(kind.to_string(), expected);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{expected}\""));
        }
    }
}
