//! Workspace registry (spec §4.C): lazy creation, lookup, and
//! empty-workspace garbage collection.

use parking_lot::{Mutex as SyncMutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use colab_domain::trace::TraceEvent;
use crate::session::SessionState;

/// A registered workspace: its serialized session state plus the
/// single-shot cleanup timer armed when it goes empty.
pub struct Workspace {
    pub id: String,
    pub state: AsyncMutex<SessionState>,
    cleanup: SyncMutex<Option<JoinHandle<()>>>,
}

impl Workspace {
    fn new(id: String) -> Self {
        Self {
            id,
            state: AsyncMutex::new(SessionState::new()),
            cleanup: SyncMutex::new(None),
        }
    }

    /// Aborts any armed cleanup timer (spec §4.C: "on new admission
    /// before fire, cancel the timer"). At most one timer per workspace.
    fn cancel_cleanup(&self) {
        if let Some(handle) = self.cleanup.lock().take() {
            handle.abort();
        }
    }
}

/// Owns all live workspaces. Cross-workspace operations (lookup,
/// creation, GC arming) synchronize on the registry's own lock; mutation
/// of a single workspace's state synchronizes on that workspace's own
/// mutex (spec §5).
pub struct WorkspaceRegistry {
    workspaces: RwLock<HashMap<String, Arc<Workspace>>>,
    retention: Duration,
}

impl WorkspaceRegistry {
    pub fn new(retention_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            workspaces: RwLock::new(HashMap::new()),
            retention: Duration::from_millis(retention_ms),
        })
    }

    /// Returns the workspace, creating it (with STUDENT globals, spec
    /// §4.C) if absent, and cancelling any pending cleanup timer.
    pub fn get_or_create(self: &Arc<Self>, workspace_id: &str) -> Arc<Workspace> {
        if let Some(ws) = self.workspaces.read().get(workspace_id) {
            ws.cancel_cleanup();
            return ws.clone();
        }

        let mut map = self.workspaces.write();
        if let Some(ws) = map.get(workspace_id) {
            ws.cancel_cleanup();
            return ws.clone();
        }

        let ws = Arc::new(Workspace::new(workspace_id.to_string()));
        map.insert(workspace_id.to_string(), ws.clone());
        TraceEvent::WorkspaceCreated {
            workspace_id: workspace_id.to_string(),
        }
        .emit();
        ws
    }

    pub fn get(&self, workspace_id: &str) -> Option<Arc<Workspace>> {
        self.workspaces.read().get(workspace_id).cloned()
    }

    pub fn contains(&self, workspace_id: &str) -> bool {
        self.workspaces.read().contains_key(workspace_id)
    }

    pub fn len(&self) -> usize {
        self.workspaces.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Arms a deferred teardown if `workspace`'s member map is empty
    /// (spec §4.C). Called after a member is removed from session
    /// state, with the `state` lock already released by the caller.
    pub fn remove_if_empty(self: &Arc<Self>, workspace: &Arc<Workspace>) {
        let is_empty = match workspace.state.try_lock() {
            Ok(state) => state.is_empty(),
            // Someone else is mutating right now; a fresh admission or
            // mutation will supersede this GC attempt either way.
            Err(_) => return,
        };
        if !is_empty {
            return;
        }

        let registry = Arc::downgrade(self);
        let workspace_id = workspace.id.clone();
        let workspace_weak = Arc::downgrade(workspace);
        let retention = self.retention;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            let (Some(registry), Some(workspace)) = (registry.upgrade(), workspace_weak.upgrade())
            else {
                return;
            };
            let still_empty = workspace.state.lock().await.is_empty();
            if !still_empty {
                return;
            }
            registry.workspaces.write().remove(&workspace_id);
            TraceEvent::WorkspaceDestroyed { workspace_id }.emit();
        });

        *workspace.cleanup.lock() = Some(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_returns_same_workspace_for_same_id() {
        let registry = WorkspaceRegistry::new(60_000);
        let a = registry.get_or_create("w1");
        let b = registry.get_or_create("w1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn get_or_create_creates_distinct_workspaces() {
        let registry = WorkspaceRegistry::new(60_000);
        let a = registry.get_or_create("w1");
        let b = registry.get_or_create("w2");
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn remove_if_empty_destroys_after_retention() {
        let registry = WorkspaceRegistry::new(20);
        let ws = registry.get_or_create("w1");
        registry.remove_if_empty(&ws);
        assert!(registry.contains("w1"));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!registry.contains("w1"));
    }

    #[tokio::test]
    async fn new_admission_cancels_pending_cleanup() {
        let registry = WorkspaceRegistry::new(20);
        let ws = registry.get_or_create("w1");
        registry.remove_if_empty(&ws);
        // Re-admission before the timer fires cancels it.
        let _ws_again = registry.get_or_create("w1");
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(registry.contains("w1"), "cleanup should have been cancelled");
    }

    #[tokio::test]
    async fn remove_if_empty_is_noop_when_members_present() {
        use crate::session::{Member, Outbound};
        use colab_protocol::Role;
        use std::sync::atomic::AtomicBool;

        let registry = WorkspaceRegistry::new(20);
        let ws = registry.get_or_create("w1");
        {
            let mut state = ws.state.lock().await;
            state.members.insert(
                "u1".into(),
                Member {
                    user_id: "u1".into(),
                    username: "Ada".into(),
                    role: Role::Student,
                    cursor: None,
                    outbound: Outbound::new(),
                    skip_cleanup: Arc::new(AtomicBool::new(false)),
                },
            );
        }
        registry.remove_if_empty(&ws);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(registry.contains("w1"));
    }
}
