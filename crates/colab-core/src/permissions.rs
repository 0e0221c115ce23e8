//! Permission resolver (spec §4.B): per-workspace permission state and
//! the role → override → global resolution order.

use colab_protocol::{PermissionKey, PermissionSet, PresetMode, Role};
use std::collections::HashMap;

/// Per-workspace permission state: the default set applied to members
/// without an override, per-user overrides, per-user role assignments
/// (distinct from a member's platform-asserted role — see
/// [`PermissionState::resolve`]), and the last-applied preset marker.
#[derive(Debug, Clone)]
pub struct PermissionState {
    pub global: PermissionSet,
    user_overrides: HashMap<String, PermissionSet>,
    user_roles: HashMap<String, Role>,
    pub preset_mode: Option<PresetMode>,
}

impl PermissionState {
    /// New workspace permission state: STUDENT globals (spec §4.C).
    pub fn new() -> Self {
        Self {
            global: PermissionSet::student(),
            user_overrides: HashMap::new(),
            user_roles: HashMap::new(),
            preset_mode: None,
        }
    }

    /// Computes the effective permission set for a user whose
    /// platform-asserted role is `base_role` (spec §4.B):
    /// 1. workspace role override == ADMIN → ADMIN template
    /// 2. role == TEACHER and no per-user override → TEACHER template
    /// 3. per-user override exists → that override
    /// 4. else → workspace global
    pub fn resolve(&self, user_id: &str, base_role: Role) -> PermissionSet {
        let role = self.user_roles.get(user_id).copied().unwrap_or(base_role);

        if role == Role::Admin {
            return PermissionSet::all();
        }
        if role == Role::Teacher && !self.user_overrides.contains_key(user_id) {
            return PermissionSet::teacher();
        }
        if let Some(over) = self.user_overrides.get(user_id) {
            return *over;
        }
        self.global
    }

    pub fn update_global_permission(&mut self, key: PermissionKey, value: bool) {
        self.global.set(key, value);
    }

    /// Lazily initializes the per-user override by copying the current
    /// global set, then applies `value` (spec §4.B).
    pub fn update_user_permission(&mut self, user_id: &str, key: PermissionKey, value: bool) {
        let entry = self
            .user_overrides
            .entry(user_id.to_string())
            .or_insert(self.global);
        entry.set(key, value);
    }

    pub fn set_user_as_admin(&mut self, user_id: &str) {
        self.user_roles.insert(user_id.to_string(), Role::Admin);
    }

    pub fn set_user_as_teacher(&mut self, user_id: &str) {
        self.user_roles.insert(user_id.to_string(), Role::Teacher);
    }

    /// Clears a user's role override and per-user permission override,
    /// reverting them to role-derived/global resolution.
    pub fn clear_user_permissions(&mut self, user_id: &str) {
        self.user_roles.remove(user_id);
        self.user_overrides.remove(user_id);
    }

    /// Replaces the global set with a named preset (spec §4.B). Presets
    /// replace, they never merge with the prior global.
    pub fn apply_preset_mode(&mut self, mode: PresetMode) {
        self.global = PermissionSet::preset(mode);
        self.preset_mode = Some(mode);
    }
}

impl Default for PermissionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_workspace_defaults_to_student_globals() {
        let state = PermissionState::new();
        let perms = state.resolve("u1", Role::Student);
        assert_eq!(perms, PermissionSet::student());
    }

    #[test]
    fn admin_role_always_gets_admin_template_even_with_override() {
        let mut state = PermissionState::new();
        state.update_user_permission("u1", PermissionKey::CanView, false);
        state.set_user_as_admin("u1");
        let perms = state.resolve("u1", Role::Student);
        assert_eq!(perms, PermissionSet::all());
    }

    #[test]
    fn teacher_role_without_override_gets_teacher_template() {
        let state = PermissionState::new();
        let perms = state.resolve("u1", Role::Teacher);
        assert_eq!(perms, PermissionSet::teacher());
    }

    #[test]
    fn teacher_role_with_override_uses_override() {
        let mut state = PermissionState::new();
        state.update_user_permission("u1", PermissionKey::CanChat, false);
        let perms = state.resolve("u1", Role::Teacher);
        assert_ne!(perms, PermissionSet::teacher());
        assert!(!perms.can_chat);
    }

    #[test]
    fn student_without_override_falls_back_to_global() {
        let mut state = PermissionState::new();
        state.update_global_permission(PermissionKey::CanDraw, true);
        let perms = state.resolve("u1", Role::Student);
        assert!(perms.can_draw);
    }

    #[test]
    fn update_user_permission_copies_current_global_first() {
        let mut state = PermissionState::new();
        state.update_global_permission(PermissionKey::CanChat, true);
        state.update_user_permission("u1", PermissionKey::CanDraw, true);
        let perms = state.resolve("u1", Role::Student);
        assert!(perms.can_chat, "override should inherit global at creation time");
        assert!(perms.can_draw);
    }

    #[test]
    fn clear_user_permissions_reverts_to_global() {
        let mut state = PermissionState::new();
        state.set_user_as_admin("u1");
        state.update_user_permission("u1", PermissionKey::CanDraw, true);
        state.clear_user_permissions("u1");
        let perms = state.resolve("u1", Role::Student);
        assert_eq!(perms, PermissionSet::student());
    }

    #[test]
    fn apply_preset_mode_replaces_not_merges() {
        let mut state = PermissionState::new();
        state.update_global_permission(PermissionKey::CanDraw, true);
        state.apply_preset_mode(PresetMode::Presentation);
        let perms = state.resolve("u1", Role::Student);
        assert!(perms.can_view);
        assert!(!perms.can_chat);
        assert!(!perms.can_draw, "preset must fully replace prior global");
        assert_eq!(state.preset_mode, Some(PresetMode::Presentation));
    }
}
