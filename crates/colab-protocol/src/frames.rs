//! Wire frame shapes (spec §4.D).
//!
//! Inbound frames are parsed per-kind rather than through one shared
//! enum: the client is not required to omit fields the server doesn't
//! recognize, and several kinds (`element_drag`, `block_move`,
//! `sprite_update`, `stack_move`, `action`, `create_element`,
//! `delete_element`) carry payloads whose element id is resolved by
//! probing several possible keys (spec §9) — those stay raw
//! `serde_json::Value` in the dispatcher rather than typed structs here.

use crate::permissions::{PermissionKey, PresetMode};
use serde::Deserialize;
use serde_json::Value;

/// `auth` — the first frame a client must send after connecting.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthFrame {
    pub token: String,
    #[serde(default)]
    pub workspace: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, rename = "userId")]
    pub user_id: Option<String>,
}

/// `update_username`
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateUsernameFrame {
    pub username: String,
}

/// `update_global_permission`
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateGlobalPermissionFrame {
    pub key: PermissionKey,
    pub value: bool,
}

/// `update_user_permission`
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateUserPermissionFrame {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub key: PermissionKey,
    pub value: bool,
}

/// `apply_preset_mode`
#[derive(Debug, Clone, Deserialize)]
pub struct ApplyPresetModeFrame {
    pub mode: PresetMode,
}

/// `request_lock`
#[derive(Debug, Clone, Deserialize)]
pub struct RequestLockFrame {
    #[serde(rename = "elementId")]
    pub element_id: String,
    #[serde(default, rename = "elementType")]
    pub element_type: Option<crate::permissions::ElementType>,
}

/// `release_lock`
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseLockFrame {
    #[serde(rename = "elementId")]
    pub element_id: String,
    #[serde(default, rename = "finalPosition")]
    pub final_position: Option<Value>,
}

/// `update_coords` — cursor position, unthrottled at the protocol level.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateCoordsFrame {
    pub x: f64,
    pub y: f64,
}

/// `workspace_snapshot` — a full-workspace-render submission, stored
/// keyed by sprite id (spec §4.D).
#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceSnapshotFrame {
    #[serde(rename = "spriteId")]
    pub sprite_id: String,
    pub snapshot: String,
    #[serde(default, rename = "ifMatch")]
    pub if_match: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_frame_parses_minimal_json() {
        let frame: AuthFrame = serde_json::from_str(r#"{"token":"abc.def"}"#).unwrap();
        assert_eq!(frame.token, "abc.def");
        assert!(frame.workspace.is_none());
    }

    #[test]
    fn auth_frame_tolerates_extra_fields() {
        let frame: AuthFrame =
            serde_json::from_str(r#"{"type":"auth","token":"t","extra":42}"#).unwrap();
        assert_eq!(frame.token, "t");
    }

    #[test]
    fn update_user_permission_frame_parses() {
        let frame: UpdateUserPermissionFrame =
            serde_json::from_str(r#"{"userId":"u1","key":"canDraw","value":true}"#).unwrap();
        assert_eq!(frame.user_id, "u1");
        assert_eq!(frame.key, PermissionKey::CanDraw);
        assert!(frame.value);
    }

    #[test]
    fn release_lock_frame_final_position_optional() {
        let frame: ReleaseLockFrame =
            serde_json::from_str(r#"{"elementId":"b1"}"#).unwrap();
        assert!(frame.final_position.is_none());
    }

    #[test]
    fn workspace_snapshot_frame_parses() {
        let frame: WorkspaceSnapshotFrame =
            serde_json::from_str(r#"{"spriteId":"s1","snapshot":"data:..."}"#).unwrap();
        assert_eq!(frame.sprite_id, "s1");
        assert!(frame.if_match.is_none());
    }
}
