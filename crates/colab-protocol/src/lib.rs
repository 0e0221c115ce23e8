//! Wire vocabulary shared between `colab-core` and `colab-gateway`:
//! permission model, entity/etag format, and frame shapes.

pub mod entity;
pub mod frames;
pub mod permissions;

pub use entity::{format_etag, EntityKind};
pub use frames::{
    ApplyPresetModeFrame, AuthFrame, ReleaseLockFrame, RequestLockFrame, UpdateCoordsFrame,
    UpdateGlobalPermissionFrame, UpdateUserPermissionFrame, UpdateUsernameFrame,
    WorkspaceSnapshotFrame,
};
pub use permissions::{
    ElementType, PermissionKey, PermissionSet, PresetMode, Role, ALL_PERMISSION_KEYS,
};
