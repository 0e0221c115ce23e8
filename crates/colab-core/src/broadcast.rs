//! Fan-out broadcaster (spec §4.F): delivers frames to all members of a
//! workspace, or all but the sender.

use serde_json::Value;
use tracing::warn;

use crate::session::SessionState;

/// Sends `message` to every member of `state` whose user id isn't
/// `exclude` (`None` means "include everyone"). Never awaits I/O: each
/// member's outbound queue is a non-blocking bounded push (spec §9).
pub fn broadcast(state: &SessionState, exclude: Option<&str>, message: &Value) {
    for (user_id, member) in &state.members {
        if Some(user_id.as_str()) == exclude {
            continue;
        }
        member.outbound.push(message.clone());
    }
}

/// Sends `message` to exactly one member, if present. Used for direct
/// replies (`auth_success`, `lock_granted`, `conflict`, ...).
pub fn send_to(state: &SessionState, user_id: &str, message: &Value) {
    match state.members.get(user_id) {
        Some(member) => member.outbound.push(message.clone()),
        None => warn!(user_id, "send_to: member not present"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Member, Outbound};
    use colab_protocol::Role;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn member(user_id: &str) -> Member {
        Member {
            user_id: user_id.to_string(),
            username: user_id.to_string(),
            role: Role::Student,
            cursor: None,
            outbound: Outbound::new(),
            skip_cleanup: Arc::new(AtomicBool::new(false)),
        }
    }

    #[test]
    fn broadcast_excludes_sender() {
        let mut state = SessionState::new();
        state.members.insert("u1".into(), member("u1"));
        state.members.insert("u2".into(), member("u2"));

        broadcast(&state, Some("u1"), &serde_json::json!({"type": "ping"}));

        assert!(state.members["u1"].outbound.try_recv().is_none());
        assert!(state.members["u2"].outbound.try_recv().is_some());
    }

    #[test]
    fn broadcast_none_includes_everyone() {
        let mut state = SessionState::new();
        state.members.insert("u1".into(), member("u1"));
        state.members.insert("u2".into(), member("u2"));

        broadcast(&state, None, &serde_json::json!({"type": "ping"}));

        assert!(state.members["u1"].outbound.try_recv().is_some());
        assert!(state.members["u2"].outbound.try_recv().is_some());
    }

    #[test]
    fn send_to_delivers_only_to_target() {
        let mut state = SessionState::new();
        state.members.insert("u1".into(), member("u1"));
        state.members.insert("u2".into(), member("u2"));

        send_to(&state, "u2", &serde_json::json!({"type": "lock_granted"}));

        assert!(state.members["u2"].outbound.try_recv().is_some());
        assert!(state.members["u1"].outbound.try_recv().is_none());
    }
}
