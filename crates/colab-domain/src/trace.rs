use serde::Serialize;

/// Structured trace events emitted by the workspace session engine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    WorkspaceCreated {
        workspace_id: String,
    },
    WorkspaceDestroyed {
        workspace_id: String,
    },
    MemberJoined {
        workspace_id: String,
        user_id: String,
    },
    MemberReplaced {
        workspace_id: String,
        user_id: String,
    },
    MemberLeft {
        workspace_id: String,
        user_id: String,
    },
    LockGranted {
        workspace_id: String,
        element_id: String,
        holder: String,
        version: u64,
    },
    LockDenied {
        workspace_id: String,
        element_id: String,
        requester: String,
        reason: String,
    },
    ConflictDetected {
        workspace_id: String,
        entity_type: String,
        entity_id: String,
    },
    AdmissionRejected {
        workspace_id: Option<String>,
        user_id: Option<String>,
        reason: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "colab_event");
    }
}
