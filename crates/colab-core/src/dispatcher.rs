//! Message dispatcher (spec §4.D, §4.E, §4.G): parses inbound frames,
//! authorizes them against the resolver, mutates session state under
//! the workspace's single-writer lock, and emits outbound frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use colab_domain::config::AdmissionConfig;
use colab_domain::trace::TraceEvent;
use colab_protocol::{
    ApplyPresetModeFrame, AuthFrame, EntityKind, PermissionKey, ReleaseLockFrame, RequestLockFrame,
    Role, UpdateCoordsFrame, UpdateGlobalPermissionFrame, UpdateUserPermissionFrame,
    UpdateUsernameFrame, WorkspaceSnapshotFrame,
};
use serde_json::{json, Value};
use tracing::warn;

use crate::broadcast::{broadcast, send_to};
use crate::registry::WorkspaceRegistry;
use crate::session::{Member, Outbound};
use crate::ticket::{TicketVerifier, TicketError};

const MAX_SNAPSHOT_CHARS: usize = 2_000_000;

/// One live WebSocket connection's identity, tracked by the gateway and
/// mutated only by the dispatcher (spec §4.G).
pub struct Connection {
    pub outbound: Arc<Outbound>,
    pub skip_cleanup: Arc<AtomicBool>,
    pub user_id: Option<String>,
    pub workspace_id: Option<String>,
}

impl Connection {
    pub fn new() -> Self {
        Self {
            outbound: Outbound::new(),
            skip_cleanup: Arc::new(AtomicBool::new(false)),
            user_id: None,
            workspace_id: None,
        }
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Dispatcher {
    pub registry: Arc<WorkspaceRegistry>,
    pub ticket_verifier: TicketVerifier,
    pub admission_config: AdmissionConfig,
}

impl Dispatcher {
    pub fn new(registry: Arc<WorkspaceRegistry>, admission_config: AdmissionConfig) -> Self {
        Self {
            registry,
            ticket_verifier: TicketVerifier::new(),
            admission_config,
        }
    }

    /// Routes one inbound JSON frame (spec §4.D). Returns `Some(4003)`
    /// when the caller must close the socket with that application
    /// code (admission failure); `None` otherwise.
    pub async fn dispatch(&self, conn: &mut Connection, raw: Value) -> Option<u16> {
        let Some(msg_type) = raw.get("type").and_then(Value::as_str) else {
            self.error_direct(conn, "malformed", "missing or invalid type");
            return None;
        };

        if msg_type == "auth" {
            return self.handle_auth(conn, &raw).await;
        }

        let (Some(user_id), Some(workspace_id)) = (conn.user_id.clone(), conn.workspace_id.clone())
        else {
            self.error_direct(conn, "unauthenticated", "send auth first");
            return None;
        };

        let Some(ws) = self.registry.get(&workspace_id) else {
            self.error_direct(conn, "internal", "workspace no longer exists");
            return None;
        };

        let mut state = ws.state.lock().await;
        self.handle_authenticated(&mut state, &workspace_id, &user_id, msg_type, &raw);
        drop(state);
        None
    }

    async fn handle_auth(&self, conn: &mut Connection, raw: &Value) -> Option<u16> {
        let Ok(frame) = serde_json::from_value::<AuthFrame>(raw.clone()) else {
            self.error_direct(conn, "malformed", "auth frame missing token");
            return None;
        };
        let claimed_workspace = frame.workspace.as_deref();
        let claimed_user = frame.user_id.as_deref();
        let now = Utc::now().timestamp();

        let claims = match self.ticket_verifier.verify(
            &frame.token,
            &self.admission_config,
            claimed_workspace,
            claimed_user,
            now,
        ) {
            Ok(claims) => claims,
            Err(err) => {
                self.error_direct(conn, err.code(), &ticket_error_message(err));
                conn.outbound.close_with_code(4003, ticket_error_message(err));
                TraceEvent::AdmissionRejected {
                    workspace_id: claimed_workspace.map(String::from),
                    user_id: claimed_user.map(String::from),
                    reason: err.code().to_string(),
                }
                .emit();
                return Some(4003);
            }
        };

        let ws = self.registry.get_or_create(&claims.workspace_id);
        let username = frame
            .username
            .as_deref()
            .or(claims.username.as_deref())
            .unwrap_or(&claims.sub)
            .chars()
            .take(64)
            .collect::<String>();
        let role = claims.role.unwrap_or(Role::Student);

        let mut state = ws.state.lock().await;

        let replaced = state.members.remove(&claims.sub);
        if let Some(prior) = &replaced {
            prior.skip_cleanup.store(true, Ordering::Release);
            prior
                .outbound
                .close_with_code(4001, "Reconnected with same userId");
        }

        let member = Member {
            user_id: claims.sub.clone(),
            username: username.clone(),
            role,
            cursor: None,
            outbound: conn.outbound.clone(),
            skip_cleanup: conn.skip_cleanup.clone(),
        };
        state.members.insert(claims.sub.clone(), member);

        let permissions = state.effective_permissions(&claims.sub, role);
        let is_owner = role == Role::Admin;

        let users: Vec<Value> = state
            .members
            .values()
            .map(|m| {
                let perms = state.effective_permissions(&m.user_id, m.role);
                json!({
                    "userId": m.user_id,
                    "username": m.username,
                    "role": m.role,
                    "permissions": perms,
                    "isOwner": m.role == Role::Admin,
                })
            })
            .collect();

        let shared_state = shared_state_snapshot(&state);

        send_to(
            &state,
            &claims.sub,
            &json!({
                "type": "auth_success",
                "userId": claims.sub,
                "workspaceId": claims.workspace_id,
                "permissions": permissions,
                "role": role,
                "isOwner": is_owner,
                "sharedState": shared_state,
                "users": users,
            }),
        );

        if replaced.is_some() {
            broadcast(
                &state,
                Some(claims.sub.as_str()),
                &json!({"type": "user_updated", "userId": claims.sub, "username": username}),
            );
            TraceEvent::MemberReplaced {
                workspace_id: claims.workspace_id.clone(),
                user_id: claims.sub.clone(),
            }
            .emit();
        } else {
            broadcast(
                &state,
                Some(claims.sub.as_str()),
                &json!({"type": "user_joined", "userId": claims.sub, "username": username}),
            );
            TraceEvent::MemberJoined {
                workspace_id: claims.workspace_id.clone(),
                user_id: claims.sub.clone(),
            }
            .emit();
        }

        drop(state);
        conn.user_id = Some(claims.sub);
        conn.workspace_id = Some(claims.workspace_id);
        None
    }

    fn handle_authenticated(
        &self,
        state: &mut crate::session::SessionState,
        workspace_id: &str,
        user_id: &str,
        msg_type: &str,
        raw: &Value,
    ) {
        match msg_type {
            "request_shared_state" => {
                let snapshot = shared_state_snapshot(state);
                send_to(state, user_id, &json!({"type": "shared_state", "state": snapshot}));
            }
            "request_teacher_role" => self.handle_request_teacher_role(state, user_id),
            "update_username" => self.handle_update_username(state, user_id, raw),
            "update_global_permission" => self.handle_update_global_permission(state, user_id, raw),
            "update_user_permission" => self.handle_update_user_permission(state, user_id, raw),
            "apply_preset_mode" => self.handle_apply_preset_mode(state, user_id, raw),
            "request_lock" => self.handle_request_lock(state, workspace_id, user_id, raw),
            "release_lock" => self.handle_release_lock(state, user_id, raw),
            "update_coords" => self.handle_update_coords(state, user_id, raw),
            "element_drag" | "block_focus" | "stack_move" | "action" => {
                broadcast(state, Some(user_id), raw);
            }
            "block_move" => self.handle_block_move(state, workspace_id, user_id, raw),
            "sprite_update" => self.handle_sprite_update(state, workspace_id, user_id, raw),
            "create_element" => self.handle_create_element(state, workspace_id, user_id, raw),
            "delete_element" => self.handle_delete_element(state, workspace_id, user_id, raw),
            "workspace_snapshot" => self.handle_workspace_snapshot(state, workspace_id, user_id, raw),
            other => {
                warn!(msg_type = other, "dispatch: unrecognized message type");
                self.error_to(state, user_id, "malformed", "unrecognized type");
            }
        }
    }

    fn handle_request_teacher_role(&self, state: &mut crate::session::SessionState, user_id: &str) {
        let Some(member) = state.members.get(user_id) else { return };
        if !matches!(member.role, Role::Admin | Role::Teacher) {
            self.error_to(state, user_id, "authorization", "role escalation denied");
            return;
        }
        state.permissions.set_user_as_teacher(user_id);
        let perms = state.effective_permissions(user_id, member.role);
        send_to(state, user_id, &json!({"type": "permissions_updated", "permissions": perms}));
        broadcast(
            state,
            Some(user_id),
            &json!({"type": "user_updated", "userId": user_id}),
        );
    }

    fn handle_update_username(&self, state: &mut crate::session::SessionState, user_id: &str, raw: &Value) {
        let Ok(frame) = serde_json::from_value::<UpdateUsernameFrame>(raw.clone()) else { return };
        let trimmed: String = frame.username.trim().chars().take(64).collect();
        if let Some(member) = state.members.get_mut(user_id) {
            member.username = trimmed.clone();
        }
        broadcast(
            state,
            None,
            &json!({"type": "user_updated", "userId": user_id, "username": trimmed}),
        );
    }

    fn caller_has(&self, state: &crate::session::SessionState, user_id: &str, key: PermissionKey) -> bool {
        match state.members.get(user_id) {
            Some(member) => state.effective_permissions(user_id, member.role).get(key),
            None => false,
        }
    }

    fn handle_update_global_permission(
        &self,
        state: &mut crate::session::SessionState,
        user_id: &str,
        raw: &Value,
    ) {
        if !self.caller_has(state, user_id, PermissionKey::CanChangePermissions) {
            return;
        }
        let Ok(frame) = serde_json::from_value::<UpdateGlobalPermissionFrame>(raw.clone()) else {
            return;
        };
        state.permissions.update_global_permission(frame.key, frame.value);

        let member_ids: Vec<String> = state.members.keys().cloned().collect();
        for member_id in &member_ids {
            let role = state.members[member_id].role;
            let perms = state.effective_permissions(member_id, role);
            send_to(state, member_id, &json!({"type": "permissions_updated", "permissions": perms}));
            broadcast(state, None, &json!({"type": "user_updated", "userId": member_id}));
        }
    }

    fn handle_update_user_permission(
        &self,
        state: &mut crate::session::SessionState,
        user_id: &str,
        raw: &Value,
    ) {
        if !self.caller_has(state, user_id, PermissionKey::CanChangePermissions) {
            return;
        }
        let Ok(frame) = serde_json::from_value::<UpdateUserPermissionFrame>(raw.clone()) else {
            return;
        };
        let target = frame.user_id.as_str();
        state
            .permissions
            .update_user_permission(target, frame.key, frame.value);

        if let Some(role) = state.members.get(target).map(|m| m.role) {
            let perms = state.effective_permissions(target, role);
            send_to(state, target, &json!({"type": "permissions_updated", "permissions": perms}));
        }
        broadcast(state, None, &json!({"type": "user_updated", "userId": target}));
    }

    fn handle_apply_preset_mode(&self, state: &mut crate::session::SessionState, user_id: &str, raw: &Value) {
        if !self.caller_has(state, user_id, PermissionKey::CanChangePermissions) {
            return;
        }
        let Ok(frame) = serde_json::from_value::<ApplyPresetModeFrame>(raw.clone()) else {
            return;
        };
        let mode = frame.mode;
        state.permissions.apply_preset_mode(mode);

        let member_ids: Vec<String> = state.members.keys().cloned().collect();
        for member_id in &member_ids {
            let role = state.members[member_id].role;
            let perms = state.effective_permissions(member_id, role);
            send_to(
                state,
                member_id,
                &json!({
                    "type": "permissions_updated",
                    "source": "preset_update",
                    "mode": mode,
                    "permissions": perms,
                }),
            );
        }
    }

    fn handle_request_lock(
        &self,
        state: &mut crate::session::SessionState,
        workspace_id: &str,
        user_id: &str,
        raw: &Value,
    ) {
        let Ok(frame) = serde_json::from_value::<RequestLockFrame>(raw.clone()) else { return };
        let element_id = frame.element_id.as_str();
        let element_type = frame.element_type.unwrap_or(colab_protocol::ElementType::Block);

        if !self.caller_has(state, user_id, element_type.required_permission()) {
            send_to(
                state,
                user_id,
                &json!({"type": "lock_denied", "elementId": element_id, "reason": "forbidden", "lockedBy": Value::Null}),
            );
            return;
        }

        match state.request_lock(element_id, user_id) {
            Ok(lock) => {
                send_to(
                    state,
                    user_id,
                    &json!({"type": "lock_granted", "elementId": element_id, "version": lock.version}),
                );
                broadcast(
                    state,
                    Some(user_id),
                    &json!({
                        "type": "element_locked",
                        "elementId": element_id,
                        "lockedBy": user_id,
                        "version": lock.version,
                    }),
                );
                TraceEvent::LockGranted {
                    workspace_id: workspace_id.to_string(),
                    element_id: element_id.to_string(),
                    holder: user_id.to_string(),
                    version: lock.version,
                }
                .emit();
            }
            Err(holder) => {
                send_to(
                    state,
                    user_id,
                    &json!({"type": "lock_denied", "elementId": element_id, "lockedBy": holder}),
                );
                TraceEvent::LockDenied {
                    workspace_id: workspace_id.to_string(),
                    element_id: element_id.to_string(),
                    requester: user_id.to_string(),
                    reason: format!("held by {holder}"),
                }
                .emit();
            }
        }
    }

    fn handle_release_lock(&self, state: &mut crate::session::SessionState, user_id: &str, raw: &Value) {
        let Ok(frame) = serde_json::from_value::<ReleaseLockFrame>(raw.clone()) else { return };
        if state.release_lock(&frame.element_id, user_id) {
            let mut msg = json!({"type": "element_unlocked", "elementId": frame.element_id});
            if let Some(pos) = frame.final_position {
                msg["finalPosition"] = pos;
            }
            broadcast(state, None, &msg);
        }
    }

    fn handle_update_coords(&self, state: &mut crate::session::SessionState, user_id: &str, raw: &Value) {
        let Ok(frame) = serde_json::from_value::<UpdateCoordsFrame>(raw.clone()) else { return };
        let (x, y) = (frame.x, frame.y);
        if let Some(member) = state.members.get_mut(user_id) {
            member.cursor = Some((x, y));
        }
        broadcast(
            state,
            Some(user_id),
            &json!({"type": "coords_update", "userId": user_id, "x": x, "y": y}),
        );
    }

    fn handle_block_move(
        &self,
        state: &mut crate::session::SessionState,
        workspace_id: &str,
        user_id: &str,
        raw: &Value,
    ) {
        let Some(block_id) = resolve_element_id(raw, EntityKind::Block) else { return };
        // Lock-check, then permission, then version (spec §9 unification).
        if !state.may_mutate(&block_id, user_id) {
            return;
        }
        if !self.caller_has(state, user_id, PermissionKey::CanEditBlocks) {
            return;
        }
        if !self.check_if_match(state, workspace_id, EntityKind::Block, &block_id, user_id, raw_if_match(raw)) {
            return;
        }

        let payload = raw.get("payload").cloned().unwrap_or_else(|| raw.clone());
        let record = state.upsert_entity(EntityKind::Block, &block_id, payload, user_id, Utc::now());
        let mut msg = raw.clone();
        msg["etag"] = json!(record.etag(EntityKind::Block, &block_id));
        msg["version"] = json!(record.version);
        msg["firstEditedBy"] = json!(record.first_edited_by);
        msg["firstEditedAt"] = json!(record.first_edited_at.to_rfc3339());
        broadcast(state, Some(user_id), &msg);
    }

    fn handle_sprite_update(
        &self,
        state: &mut crate::session::SessionState,
        workspace_id: &str,
        user_id: &str,
        raw: &Value,
    ) {
        let Some(sprite_id) = resolve_element_id(raw, EntityKind::Sprite) else { return };
        if !state.may_mutate(&sprite_id, user_id) {
            return;
        }
        if !self.caller_has(state, user_id, PermissionKey::CanEditSprites) {
            return;
        }
        let if_match = raw_if_match(raw);
        if !self.check_if_match(state, workspace_id, EntityKind::Sprite, &sprite_id, user_id, if_match)
            || !self.check_if_match(state, workspace_id, EntityKind::SpriteMetrics, &sprite_id, user_id, if_match)
        {
            return;
        }

        let payload = raw.get("payload").cloned().unwrap_or_else(|| raw.clone());
        let now = Utc::now();
        state.upsert_entity(EntityKind::Sprite, &sprite_id, payload.clone(), user_id, now);
        let metrics = state.upsert_entity(EntityKind::SpriteMetrics, &sprite_id, payload, user_id, now);

        let mut msg = raw.clone();
        msg["metricsEtag"] = json!(metrics.etag(EntityKind::SpriteMetrics, &sprite_id));
        msg["version"] = json!(metrics.version);
        broadcast(state, Some(user_id), &msg);
    }

    fn handle_create_element(
        &self,
        state: &mut crate::session::SessionState,
        workspace_id: &str,
        user_id: &str,
        raw: &Value,
    ) {
        let Some(kind) = raw
            .get("elementType")
            .and_then(Value::as_str)
            .and_then(parse_entity_kind)
        else {
            return;
        };
        let Some(id) = resolve_element_id(raw, kind) else {
            broadcast(state, Some(user_id), raw);
            return;
        };
        if !self.check_if_match(state, workspace_id, kind, &id, user_id, raw_if_match(raw)) {
            return;
        }

        let payload = raw
            .get("elementData")
            .or_else(|| raw.get("payload"))
            .cloned()
            .unwrap_or_else(|| raw.clone());
        let record = state.upsert_entity(kind, &id, payload, user_id, Utc::now());

        let mut msg = raw.clone();
        msg["type"] = json!("element_created");
        msg["etag"] = json!(record.etag(kind, &id));
        msg["version"] = json!(record.version);
        broadcast(state, Some(user_id), &msg);
    }

    fn handle_delete_element(
        &self,
        state: &mut crate::session::SessionState,
        workspace_id: &str,
        user_id: &str,
        raw: &Value,
    ) {
        let Some(kind) = raw
            .get("elementType")
            .and_then(Value::as_str)
            .and_then(parse_entity_kind)
        else {
            return;
        };
        let Some(id) = resolve_element_id(raw, kind) else {
            broadcast(state, Some(user_id), raw);
            return;
        };
        if !self.check_if_match(state, workspace_id, kind, &id, user_id, raw_if_match(raw)) {
            return;
        }

        state.delete_entity(kind, &id);
        state.delete_entity(EntityKind::SpriteMetrics, &id);
        state.delete_entity(EntityKind::WorkspaceSnapshot, &id);

        broadcast(
            state,
            Some(user_id),
            &json!({"type": "element_deleted", "elementType": kind, "elementId": id}),
        );
    }

    fn handle_workspace_snapshot(
        &self,
        state: &mut crate::session::SessionState,
        workspace_id: &str,
        user_id: &str,
        raw: &Value,
    ) {
        if !self.caller_has(state, user_id, PermissionKey::CanEditBlocks) {
            return;
        }
        let Ok(frame) = serde_json::from_value::<WorkspaceSnapshotFrame>(raw.clone()) else { return };
        if frame.snapshot.chars().count() > MAX_SNAPSHOT_CHARS {
            self.error_to(state, user_id, "over-limit", "workspace snapshot too large");
            return;
        }
        if !self.check_if_match(
            state,
            workspace_id,
            EntityKind::WorkspaceSnapshot,
            &frame.sprite_id,
            user_id,
            frame.if_match.as_deref(),
        ) {
            return;
        }

        let record = state.upsert_entity(
            EntityKind::WorkspaceSnapshot,
            &frame.sprite_id,
            json!(frame.snapshot),
            user_id,
            Utc::now(),
        );
        broadcast(
            state,
            Some(user_id),
            &json!({
                "type": "workspace_snapshot",
                "spriteId": frame.sprite_id,
                "etag": record.etag(EntityKind::WorkspaceSnapshot, &frame.sprite_id),
                "version": record.version,
            }),
        );
    }

    /// If-Match gate (spec §4.D): missing value or `"*"` always passes.
    /// On mismatch, sends a `conflict` frame and returns `false`.
    fn check_if_match(
        &self,
        state: &crate::session::SessionState,
        workspace_id: &str,
        kind: EntityKind,
        id: &str,
        user_id: &str,
        if_match: Option<&str>,
    ) -> bool {
        let Some(if_match) = if_match else { return true };
        if if_match == "*" {
            return true;
        }

        let current = state.entity(kind, id);
        let current_etag = current.map(|e| e.etag(kind, id));
        if current_etag.as_deref() == Some(if_match) {
            return true;
        }

        send_to(
            state,
            user_id,
            &json!({
                "type": "conflict",
                "reason": "etag_mismatch",
                "entityType": kind,
                "entityId": id,
                "ifMatch": if_match,
                "currentEtag": current_etag,
                "firstEditedBy": current.map(|e| e.first_edited_by.clone()),
                "firstEditedAt": current.map(|e| e.first_edited_at.to_rfc3339()),
            }),
        );
        TraceEvent::ConflictDetected {
            workspace_id: workspace_id.to_string(),
            entity_type: kind.to_string(),
            entity_id: id.to_string(),
        }
        .emit();
        false
    }

    /// Handles socket closure (spec §4.G). No-op if `skip_cleanup` was
    /// set by a reconnect takeover.
    pub async fn handle_disconnect(&self, conn: &Connection) {
        if conn.skip_cleanup.load(Ordering::Acquire) {
            return;
        }
        let (Some(user_id), Some(workspace_id)) = (&conn.user_id, &conn.workspace_id) else {
            return;
        };
        let Some(ws) = self.registry.get(workspace_id) else { return };

        let mut state = ws.state.lock().await;
        if state.members.get(user_id).map(|m| Arc::ptr_eq(&m.outbound, &conn.outbound)) != Some(true) {
            // This connection was already replaced by a reconnect.
            return;
        }
        state.members.remove(user_id);
        let released = state.release_locks_of(user_id);
        for element_id in released {
            broadcast(&state, None, &json!({"type": "element_unlocked", "elementId": element_id}));
        }
        broadcast(&state, None, &json!({"type": "user_left", "userId": user_id}));
        TraceEvent::MemberLeft {
            workspace_id: workspace_id.clone(),
            user_id: user_id.clone(),
        }
        .emit();
        drop(state);

        self.registry.remove_if_empty(&ws);
    }

    fn error_direct(&self, conn: &Connection, code: &str, message: &str) {
        conn.outbound.push(json!({"type": "error", "code": code, "message": message}));
    }

    fn error_to(&self, state: &crate::session::SessionState, user_id: &str, code: &str, message: &str) {
        send_to(state, user_id, &json!({"type": "error", "code": code, "message": message}));
    }
}

fn ticket_error_message(err: TicketError) -> String {
    format!("admission rejected: {err}")
}

fn shared_state_snapshot(state: &crate::session::SessionState) -> Value {
    let mut elements = Vec::new();
    let mut sprite_metrics = Vec::new();
    let mut workspace_snapshots = Vec::new();

    for ((kind, id), record) in &state.entities {
        let entry = json!({
            "entityType": kind,
            "entityId": id,
            "payload": record.payload,
            "version": record.version,
            "etag": record.etag(*kind, id),
            "firstEditedBy": record.first_edited_by,
            "firstEditedAt": record.first_edited_at.to_rfc3339(),
            "updatedBy": record.updated_by,
            "updatedAt": record.updated_at.to_rfc3339(),
        });
        match kind {
            EntityKind::SpriteMetrics => sprite_metrics.push(entry),
            EntityKind::WorkspaceSnapshot => workspace_snapshots.push(entry),
            EntityKind::Block | EntityKind::Sprite => elements.push(entry),
        }
    }

    json!({
        "elements": elements,
        "spriteMetrics": sprite_metrics,
        "workspaceSnapshots": workspace_snapshots,
    })
}

/// Extracts an If-Match value for frame kinds with no typed struct
/// (`block_move`, `sprite_update`, `create_element`, `delete_element`);
/// `workspace_snapshot` carries this as a typed field instead, see
/// `WorkspaceSnapshotFrame::if_match`.
fn raw_if_match(raw: &Value) -> Option<&str> {
    raw.get("ifMatch")
        .or_else(|| raw.get("etag"))
        .and_then(Value::as_str)
}

/// Element-id resolution for `create_element`/`delete_element` (spec
/// §4.D, §9): explicit `elementId` first, then a fixed probe order,
/// falling back to `name` for sprites.
fn resolve_element_id(raw: &Value, kind: EntityKind) -> Option<String> {
    if let Some(id) = raw.get("elementId").and_then(Value::as_str) {
        if !id.is_empty() {
            return Some(id.to_string());
        }
    }
    for key in ["id", "spriteId", "blockId", "variableId"] {
        if let Some(id) = raw.get(key).and_then(Value::as_str) {
            if !id.is_empty() {
                return Some(id.to_string());
            }
        }
    }
    if kind == EntityKind::Sprite {
        if let Some(name) = raw.get("name").and_then(Value::as_str) {
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
    }
    None
}

fn parse_entity_kind(s: &str) -> Option<EntityKind> {
    serde_json::from_value(json!(s)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::{sign_for_test, TicketClaims};

    fn admission_config() -> AdmissionConfig {
        std::env::set_var("COLAB_DISPATCH_TEST_SECRET", "dispatch-secret");
        AdmissionConfig {
            primary_secret_env: "COLAB_DISPATCH_TEST_SECRET".into(),
            fallback_secret_env: "COLAB_DISPATCH_TEST_SECRET_FALLBACK".into(),
            node_env: "test".into(),
        }
    }

    fn auth_frame(sub: &str, ws: &str, jti: &str, role: Option<Role>) -> Value {
        let claims = TicketClaims {
            sub: sub.into(),
            workspace_id: ws.into(),
            aud: "colab-backend".into(),
            jti: jti.into(),
            exp: 9_999_999_999,
            username: Some(sub.into()),
            role,
        };
        let token = sign_for_test(&claims, "dispatch-secret");
        json!({"type": "auth", "token": token})
    }

    #[tokio::test]
    async fn basic_join_flow_grants_auth_success() {
        let registry = WorkspaceRegistry::new(60_000);
        let dispatcher = Dispatcher::new(registry, admission_config());

        let mut a = Connection::new();
        dispatcher
            .dispatch(&mut a, auth_frame("u1", "w1", "j1", Some(Role::Admin)))
            .await;
        assert_eq!(a.user_id.as_deref(), Some("u1"));
        let frame = a.outbound.try_recv().unwrap();
        assert_eq!(frame["type"], json!("auth_success"));
        assert_eq!(frame["isOwner"], json!(true));
        assert_eq!(frame["users"].as_array().unwrap().len(), 1);

        let mut b = Connection::new();
        dispatcher
            .dispatch(&mut b, auth_frame("u2", "w1", "j2", Some(Role::Student)))
            .await;
        let b_frame = b.outbound.try_recv().unwrap();
        assert_eq!(b_frame["users"].as_array().unwrap().len(), 2);
        assert_eq!(b_frame["permissions"]["canEditBlocks"], json!(false));

        let a_notice = a.outbound.try_recv().unwrap();
        assert_eq!(a_notice["type"], json!("user_joined"));
        assert_eq!(a_notice["userId"], json!("u2"));
    }

    #[tokio::test]
    async fn lock_contention_denies_second_requester() {
        let registry = WorkspaceRegistry::new(60_000);
        let dispatcher = Dispatcher::new(registry, admission_config());

        let mut a = Connection::new();
        dispatcher
            .dispatch(&mut a, auth_frame("u1", "w1", "j1", Some(Role::Admin)))
            .await;
        a.outbound.try_recv();
        let mut b = Connection::new();
        dispatcher
            .dispatch(&mut b, auth_frame("u2", "w1", "j2", Some(Role::Student)))
            .await;
        b.outbound.try_recv();
        a.outbound.try_recv();

        dispatcher
            .dispatch(&mut a, json!({"type": "request_lock", "elementId": "b1", "elementType": "block"}))
            .await;
        let granted = a.outbound.try_recv().unwrap();
        assert_eq!(granted["type"], json!("lock_granted"));
        assert_eq!(granted["version"], json!(1));
        let locked = b.outbound.try_recv().unwrap();
        assert_eq!(locked["type"], json!("element_locked"));
        assert_eq!(locked["lockedBy"], json!("u1"));

        dispatcher
            .dispatch(&mut b, json!({"type": "request_lock", "elementId": "b1", "elementType": "block"}))
            .await;
        let denied = b.outbound.try_recv().unwrap();
        assert_eq!(denied["type"], json!("lock_denied"));
        assert_eq!(denied["lockedBy"], json!("u1"));
    }

    #[tokio::test]
    async fn etag_conflict_blocks_mutation_and_broadcast() {
        let registry = WorkspaceRegistry::new(60_000);
        let dispatcher = Dispatcher::new(registry, admission_config());

        let mut a = Connection::new();
        dispatcher
            .dispatch(&mut a, auth_frame("u1", "w1", "j1", Some(Role::Admin)))
            .await;
        a.outbound.try_recv();
        let mut b = Connection::new();
        dispatcher
            .dispatch(&mut b, auth_frame("u2", "w1", "j2", Some(Role::Student)))
            .await;
        b.outbound.try_recv();
        a.outbound.try_recv();

        dispatcher
            .dispatch(
                &mut a,
                json!({"type": "create_element", "elementType": "block", "elementData": {"id": "b2"}, "elementId": "b2"}),
            )
            .await;
        let created = b.outbound.try_recv().unwrap();
        assert_eq!(created["type"], json!("element_created"));
        assert_eq!(created["etag"], json!(r#"W/"block:b2:1""#));

        dispatcher
            .dispatch(
                &mut b,
                json!({
                    "type": "block_move",
                    "blockId": "b2",
                    "position": {"x": 5, "y": 5},
                    "ifMatch": "W/\"block:b2:999\"",
                }),
            )
            .await;
        let conflict = b.outbound.try_recv().unwrap();
        assert_eq!(conflict["type"], json!("conflict"));
        assert_eq!(conflict["entityId"], json!("b2"));
        assert_eq!(conflict["currentEtag"], json!(r#"W/"block:b2:1""#));
        assert!(a.outbound.try_recv().is_none(), "no block_move broadcast should occur");
    }

    #[tokio::test]
    async fn reconnect_replaces_prior_connection_without_user_left() {
        let registry = WorkspaceRegistry::new(60_000);
        let dispatcher = Dispatcher::new(registry, admission_config());

        let mut a1 = Connection::new();
        dispatcher
            .dispatch(&mut a1, auth_frame("u1", "w1", "j1", Some(Role::Admin)))
            .await;
        a1.outbound.try_recv();
        let mut b = Connection::new();
        dispatcher
            .dispatch(&mut b, auth_frame("u2", "w1", "j2", Some(Role::Student)))
            .await;
        b.outbound.try_recv();
        a1.outbound.try_recv();

        let mut a2 = Connection::new();
        dispatcher
            .dispatch(&mut a2, auth_frame("u1", "w1", "j3", Some(Role::Admin)))
            .await;

        let (code, reason) = a1.outbound.take_close_code().unwrap();
        assert_eq!(code, 4001);
        assert_eq!(reason, "Reconnected with same userId");
        assert!(a1.skip_cleanup.load(Ordering::Acquire));

        let notice = b.outbound.try_recv().unwrap();
        assert_eq!(notice["type"], json!("user_updated"));
        assert_eq!(notice["userId"], json!("u1"));
    }

    #[tokio::test]
    async fn empty_workspace_is_destroyed_after_retention() {
        let registry = WorkspaceRegistry::new(20);
        let dispatcher = Dispatcher::new(registry.clone(), admission_config());

        let mut a = Connection::new();
        dispatcher
            .dispatch(&mut a, auth_frame("u1", "w1", "j1", Some(Role::Admin)))
            .await;
        a.outbound.try_recv();

        dispatcher.handle_disconnect(&a).await;
        assert!(registry.contains("w1"));
        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        assert!(!registry.contains("w1"));
    }

    #[tokio::test]
    async fn preset_mode_replaces_global_for_non_admin_members() {
        let registry = WorkspaceRegistry::new(60_000);
        let dispatcher = Dispatcher::new(registry, admission_config());

        let mut a = Connection::new();
        dispatcher
            .dispatch(&mut a, auth_frame("u1", "w1", "j1", Some(Role::Admin)))
            .await;
        a.outbound.try_recv();
        let mut b = Connection::new();
        dispatcher
            .dispatch(&mut b, auth_frame("u2", "w1", "j2", Some(Role::Student)))
            .await;
        b.outbound.try_recv();
        a.outbound.try_recv();

        dispatcher
            .dispatch(&mut a, json!({"type": "apply_preset_mode", "mode": "presentation"}))
            .await;

        let a_perms = a.outbound.try_recv().unwrap();
        assert_eq!(a_perms["source"], json!("preset_update"));
        let b_perms = b.outbound.try_recv().unwrap();
        assert_eq!(b_perms["permissions"]["canView"], json!(true));
        assert_eq!(b_perms["permissions"]["canChat"], json!(false));

        dispatcher
            .dispatch(&mut b, json!({"type": "update_global_permission", "key": "canView", "value": false}))
            .await;
        assert!(a.outbound.try_recv().is_none(), "student lacking canChangePermissions must be silently dropped");
    }

    #[tokio::test]
    async fn global_permission_change_notifies_every_member() {
        let registry = WorkspaceRegistry::new(60_000);
        let dispatcher = Dispatcher::new(registry, admission_config());

        let mut a = Connection::new();
        dispatcher
            .dispatch(&mut a, auth_frame("u1", "w1", "j1", Some(Role::Admin)))
            .await;
        a.outbound.try_recv();
        let mut b = Connection::new();
        dispatcher
            .dispatch(&mut b, auth_frame("u2", "w1", "j2", Some(Role::Student)))
            .await;
        b.outbound.try_recv();
        a.outbound.try_recv();

        dispatcher
            .dispatch(&mut a, json!({"type": "update_global_permission", "key": "canEditBlocks", "value": false}))
            .await;

        let a_msgs: Vec<Value> = std::iter::from_fn(|| a.outbound.try_recv()).collect();
        let b_msgs: Vec<Value> = std::iter::from_fn(|| b.outbound.try_recv()).collect();

        let expected_ids = vec!["u1".to_string(), "u2".to_string()];

        assert!(a_msgs.iter().any(|m| m["type"] == json!("permissions_updated")));
        let mut a_updated_ids: Vec<String> = a_msgs
            .iter()
            .filter(|m| m["type"] == json!("user_updated"))
            .map(|m| m["userId"].as_str().unwrap().to_string())
            .collect();
        a_updated_ids.sort();
        assert_eq!(a_updated_ids, expected_ids, "u1 must see a user_updated for every member");

        assert!(b_msgs.iter().any(|m| m["type"] == json!("permissions_updated")));
        let mut b_updated_ids: Vec<String> = b_msgs
            .iter()
            .filter(|m| m["type"] == json!("user_updated"))
            .map(|m| m["userId"].as_str().unwrap().to_string())
            .collect();
        b_updated_ids.sort();
        assert_eq!(b_updated_ids, expected_ids, "u2 must see a user_updated for every member");
    }

    #[tokio::test]
    async fn admission_rejection_closes_with_4003() {
        let registry = WorkspaceRegistry::new(60_000);
        let dispatcher = Dispatcher::new(registry, admission_config());

        let mut conn = Connection::new();
        let code = dispatcher
            .dispatch(&mut conn, json!({"type": "auth", "token": "not-a-valid-token"}))
            .await;
        assert_eq!(code, Some(4003));

        conn.outbound.try_recv();
        let (close_code, _reason) = conn.outbound.take_close_code().unwrap();
        assert_eq!(close_code, 4003);
    }
}
