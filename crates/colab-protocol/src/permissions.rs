//! The permission model: roles, the 24-key permission set, and the
//! named preset templates (spec §3, §4.B).

use serde::{Deserialize, Serialize};

/// Platform-asserted role. Distinct from the *effective* permission set,
/// which is derived from role + override + global (spec §4.B).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    Teacher,
    Student,
    Parent,
}

/// A named replacement of the global permission set (spec §4.B).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresetMode {
    Presentation,
    Work,
    Test,
    Restricted,
}

/// One of the 24 closed-set permission keys (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionKey {
    CanView,
    CanEditBlocks,
    CanAddBlocks,
    CanDeleteBlocks,
    CanEditSprites,
    CanAddSprites,
    CanDeleteSprites,
    CanEditVariables,
    CanAddVariables,
    CanDeleteVariables,
    CanRunCode,
    CanStopCode,
    CanChat,
    CanDraw,
    CanUploadAssets,
    CanEditCostumes,
    CanEditSounds,
    CanRecordAudio,
    CanUseCamera,
    CanShareProject,
    CanManageUsers,
    CanChangePermissions,
    CanKickUsers,
    CanLockWorkspace,
}

/// All 24 keys, in the order spec §3 lists them.
pub const ALL_PERMISSION_KEYS: [PermissionKey; 24] = [
    PermissionKey::CanView,
    PermissionKey::CanEditBlocks,
    PermissionKey::CanAddBlocks,
    PermissionKey::CanDeleteBlocks,
    PermissionKey::CanEditSprites,
    PermissionKey::CanAddSprites,
    PermissionKey::CanDeleteSprites,
    PermissionKey::CanEditVariables,
    PermissionKey::CanAddVariables,
    PermissionKey::CanDeleteVariables,
    PermissionKey::CanRunCode,
    PermissionKey::CanStopCode,
    PermissionKey::CanChat,
    PermissionKey::CanDraw,
    PermissionKey::CanUploadAssets,
    PermissionKey::CanEditCostumes,
    PermissionKey::CanEditSounds,
    PermissionKey::CanRecordAudio,
    PermissionKey::CanUseCamera,
    PermissionKey::CanShareProject,
    PermissionKey::CanManageUsers,
    PermissionKey::CanChangePermissions,
    PermissionKey::CanKickUsers,
    PermissionKey::CanLockWorkspace,
];

/// Total mapping from every permission key to a boolean (spec §3).
///
/// Serializes as a flat JSON object (`{"canView":true,...}`) matching
/// the wire shape used in `auth_success`/`permissions_updated` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSet {
    pub can_view: bool,
    pub can_edit_blocks: bool,
    pub can_add_blocks: bool,
    pub can_delete_blocks: bool,
    pub can_edit_sprites: bool,
    pub can_add_sprites: bool,
    pub can_delete_sprites: bool,
    pub can_edit_variables: bool,
    pub can_add_variables: bool,
    pub can_delete_variables: bool,
    pub can_run_code: bool,
    pub can_stop_code: bool,
    pub can_chat: bool,
    pub can_draw: bool,
    pub can_upload_assets: bool,
    pub can_edit_costumes: bool,
    pub can_edit_sounds: bool,
    pub can_record_audio: bool,
    pub can_use_camera: bool,
    pub can_share_project: bool,
    pub can_manage_users: bool,
    pub can_change_permissions: bool,
    pub can_kick_users: bool,
    pub can_lock_workspace: bool,
}

impl PermissionSet {
    /// All keys false.
    pub const fn none() -> Self {
        Self {
            can_view: false,
            can_edit_blocks: false,
            can_add_blocks: false,
            can_delete_blocks: false,
            can_edit_sprites: false,
            can_add_sprites: false,
            can_delete_sprites: false,
            can_edit_variables: false,
            can_add_variables: false,
            can_delete_variables: false,
            can_run_code: false,
            can_stop_code: false,
            can_chat: false,
            can_draw: false,
            can_upload_assets: false,
            can_edit_costumes: false,
            can_edit_sounds: false,
            can_record_audio: false,
            can_use_camera: false,
            can_share_project: false,
            can_manage_users: false,
            can_change_permissions: false,
            can_kick_users: false,
            can_lock_workspace: false,
        }
    }

    /// All keys true. The OWNER/ADMIN template.
    pub const fn all() -> Self {
        Self {
            can_view: true,
            can_edit_blocks: true,
            can_add_blocks: true,
            can_delete_blocks: true,
            can_edit_sprites: true,
            can_add_sprites: true,
            can_delete_sprites: true,
            can_edit_variables: true,
            can_add_variables: true,
            can_delete_variables: true,
            can_run_code: true,
            can_stop_code: true,
            can_chat: true,
            can_draw: true,
            can_upload_assets: true,
            can_edit_costumes: true,
            can_edit_sounds: true,
            can_record_audio: true,
            can_use_camera: true,
            can_share_project: true,
            can_manage_users: true,
            can_change_permissions: true,
            can_kick_users: true,
            can_lock_workspace: true,
        }
    }

    /// TEACHER template: edit + manage, no lock-workspace/share-project.
    pub const fn teacher() -> Self {
        Self {
            can_view: true,
            can_edit_blocks: true,
            can_add_blocks: true,
            can_delete_blocks: true,
            can_edit_sprites: true,
            can_add_sprites: true,
            can_delete_sprites: true,
            can_edit_variables: true,
            can_add_variables: true,
            can_delete_variables: true,
            can_run_code: true,
            can_stop_code: true,
            can_chat: true,
            can_draw: true,
            can_upload_assets: true,
            can_edit_costumes: true,
            can_edit_sounds: true,
            can_record_audio: true,
            can_use_camera: true,
            can_share_project: false,
            can_manage_users: true,
            can_change_permissions: true,
            can_kick_users: true,
            can_lock_workspace: false,
        }
    }

    /// STUDENT template: view + chat only.
    pub const fn student() -> Self {
        Self {
            can_view: true,
            can_chat: true,
            ..Self::none()
        }
    }

    /// Apply a named preset mode (spec §4.B). Presets *replace*, never
    /// merge with, the prior set — every other key reverts to false.
    pub fn preset(mode: PresetMode) -> Self {
        match mode {
            PresetMode::Presentation => Self {
                can_view: true,
                ..Self::none()
            },
            PresetMode::Work => Self {
                can_view: true,
                can_edit_blocks: true,
                can_add_blocks: true,
                can_edit_sprites: true,
                can_run_code: true,
                can_chat: true,
                ..Self::none()
            },
            PresetMode::Test => Self {
                can_view: true,
                can_run_code: true,
                ..Self::none()
            },
            PresetMode::Restricted => Self {
                can_view: true,
                ..Self::none()
            },
        }
    }

    pub fn get(&self, key: PermissionKey) -> bool {
        match key {
            PermissionKey::CanView => self.can_view,
            PermissionKey::CanEditBlocks => self.can_edit_blocks,
            PermissionKey::CanAddBlocks => self.can_add_blocks,
            PermissionKey::CanDeleteBlocks => self.can_delete_blocks,
            PermissionKey::CanEditSprites => self.can_edit_sprites,
            PermissionKey::CanAddSprites => self.can_add_sprites,
            PermissionKey::CanDeleteSprites => self.can_delete_sprites,
            PermissionKey::CanEditVariables => self.can_edit_variables,
            PermissionKey::CanAddVariables => self.can_add_variables,
            PermissionKey::CanDeleteVariables => self.can_delete_variables,
            PermissionKey::CanRunCode => self.can_run_code,
            PermissionKey::CanStopCode => self.can_stop_code,
            PermissionKey::CanChat => self.can_chat,
            PermissionKey::CanDraw => self.can_draw,
            PermissionKey::CanUploadAssets => self.can_upload_assets,
            PermissionKey::CanEditCostumes => self.can_edit_costumes,
            PermissionKey::CanEditSounds => self.can_edit_sounds,
            PermissionKey::CanRecordAudio => self.can_record_audio,
            PermissionKey::CanUseCamera => self.can_use_camera,
            PermissionKey::CanShareProject => self.can_share_project,
            PermissionKey::CanManageUsers => self.can_manage_users,
            PermissionKey::CanChangePermissions => self.can_change_permissions,
            PermissionKey::CanKickUsers => self.can_kick_users,
            PermissionKey::CanLockWorkspace => self.can_lock_workspace,
        }
    }

    pub fn set(&mut self, key: PermissionKey, value: bool) {
        let field = match key {
            PermissionKey::CanView => &mut self.can_view,
            PermissionKey::CanEditBlocks => &mut self.can_edit_blocks,
            PermissionKey::CanAddBlocks => &mut self.can_add_blocks,
            PermissionKey::CanDeleteBlocks => &mut self.can_delete_blocks,
            PermissionKey::CanEditSprites => &mut self.can_edit_sprites,
            PermissionKey::CanAddSprites => &mut self.can_add_sprites,
            PermissionKey::CanDeleteSprites => &mut self.can_delete_sprites,
            PermissionKey::CanEditVariables => &mut self.can_edit_variables,
            PermissionKey::CanAddVariables => &mut self.can_add_variables,
            PermissionKey::CanDeleteVariables => &mut self.can_delete_variables,
            PermissionKey::CanRunCode => &mut self.can_run_code,
            PermissionKey::CanStopCode => &mut self.can_stop_code,
            PermissionKey::CanChat => &mut self.can_chat,
            PermissionKey::CanDraw => &mut self.can_draw,
            PermissionKey::CanUploadAssets => &mut self.can_upload_assets,
            PermissionKey::CanEditCostumes => &mut self.can_edit_costumes,
            PermissionKey::CanEditSounds => &mut self.can_edit_sounds,
            PermissionKey::CanRecordAudio => &mut self.can_record_audio,
            PermissionKey::CanUseCamera => &mut self.can_use_camera,
            PermissionKey::CanShareProject => &mut self.can_share_project,
            PermissionKey::CanManageUsers => &mut self.can_manage_users,
            PermissionKey::CanChangePermissions => &mut self.can_change_permissions,
            PermissionKey::CanKickUsers => &mut self.can_kick_users,
            PermissionKey::CanLockWorkspace => &mut self.can_lock_workspace,
        };
        *field = value;
    }
}

impl Default for PermissionSet {
    fn default() -> Self {
        Self::none()
    }
}

/// The edit-permission kind required to hold/break a lock on an element
/// of a given type (spec §4.D lock arbitration).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Block,
    Sprite,
    Variable,
}

impl ElementType {
    pub fn required_permission(self) -> PermissionKey {
        match self {
            ElementType::Block => PermissionKey::CanEditBlocks,
            ElementType::Sprite => PermissionKey::CanEditSprites,
            ElementType::Variable => PermissionKey::CanEditVariables,
        }
    }
}
