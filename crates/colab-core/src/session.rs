//! Per-workspace session state (spec §4.D, §3): members, locks, entity
//! versions, and the permission state that backs the resolver.

use chrono::{DateTime, Utc};
use colab_protocol::{EntityKind, PermissionSet, Role};
use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::permissions::PermissionState;

/// Bound on the per-member outbound queue (spec §9: bounded, drop-oldest
/// under backpressure). A slow peer loses its oldest unsent frames
/// rather than stalling the workspace's single-writer critical section.
const OUTBOUND_CAPACITY: usize = 256;

/// A bounded, drop-oldest outbound frame queue for one member's socket
/// writer. Pushing never blocks and never waits on I/O; the gateway's
/// writer task drains it with [`Outbound::recv`].
#[derive(Debug)]
pub struct Outbound {
    queue: SyncMutex<VecDeque<Value>>,
    notify: Notify,
    closed: AtomicBool,
    close_code: SyncMutex<Option<(u16, String)>>,
}

impl Outbound {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: SyncMutex::new(VecDeque::with_capacity(16)),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            close_code: SyncMutex::new(None),
        })
    }

    /// Enqueues a frame, dropping the oldest queued frame if full.
    /// Never blocks; safe to call from inside a mutation critical
    /// section (spec §9).
    pub fn push(&self, message: Value) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut queue = self.queue.lock();
        if queue.len() >= OUTBOUND_CAPACITY {
            queue.pop_front();
        }
        queue.push_back(message);
        drop(queue);
        self.notify.notify_one();
    }

    /// Non-blocking pop, for callers that only want "is anything
    /// queued right now" without awaiting the writer-task notify loop.
    pub fn try_recv(&self) -> Option<Value> {
        self.queue.lock().pop_front()
    }

    /// Awaits the next queued frame. Returns `None` once closed and
    /// drained, signalling the writer task to exit.
    pub async fn recv(&self) -> Option<Value> {
        loop {
            {
                let mut queue = self.queue.lock();
                if let Some(msg) = queue.pop_front() {
                    return Some(msg);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// Closes the queue and records a WebSocket close code/reason (spec
    /// §4.A, §4.E). The gateway's writer task sends a real `Close` frame
    /// carrying this code once the queue has drained, via
    /// [`Outbound::take_close_code`].
    pub fn close_with_code(&self, code: u16, reason: impl Into<String>) {
        *self.close_code.lock() = Some((code, reason.into()));
        self.close();
    }

    /// Takes the close code/reason recorded by [`Outbound::close_with_code`],
    /// if any. Called by the writer task after `recv` returns `None`.
    pub fn take_close_code(&self) -> Option<(u16, String)> {
        self.close_code.lock().take()
    }
}

impl Default for Outbound {
    fn default() -> Self {
        Self {
            queue: SyncMutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            close_code: SyncMutex::new(None),
        }
    }
}

/// One authenticated connection in a workspace (spec §3).
#[derive(Debug)]
pub struct Member {
    pub user_id: String,
    pub username: String,
    /// Platform-asserted role at join time; the *effective* role used
    /// by the resolver may differ after `setUserAsAdmin`/`setUserAsTeacher`.
    pub role: Role,
    pub cursor: Option<(f64, f64)>,
    pub outbound: Arc<Outbound>,
    /// Set on the prior connection during a reconnect takeover (spec
    /// §4.E) so its close handler skips lock release / `user_left`.
    pub skip_cleanup: Arc<AtomicBool>,
}

impl Member {
    pub fn is_owner(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Exclusive edit reservation on an element id (spec §3).
#[derive(Debug, Clone)]
pub struct Lock {
    pub holder: String,
    pub version: u64,
}

/// Versioned shared entity: a block, sprite, sprite-metrics record, or
/// workspace snapshot (spec §3).
#[derive(Debug, Clone)]
pub struct EntityRecord {
    pub version: u64,
    pub payload: Value,
    pub first_edited_by: String,
    pub first_edited_at: DateTime<Utc>,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

impl EntityRecord {
    pub fn etag(&self, kind: EntityKind, id: &str) -> String {
        colab_protocol::format_etag(kind, id, self.version)
    }
}

/// All mutable state for one workspace. Callers must serialize access
/// (spec §5: single-writer-per-workspace) — see `colab-core::registry`,
/// which wraps each instance in a `tokio::sync::Mutex`.
pub struct SessionState {
    pub members: HashMap<String, Member>,
    pub locks: HashMap<String, Lock>,
    pub entities: HashMap<(EntityKind, String), EntityRecord>,
    pub permissions: PermissionState,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            members: HashMap::new(),
            locks: HashMap::new(),
            entities: HashMap::new(),
            permissions: PermissionState::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn effective_permissions(&self, user_id: &str, base_role: Role) -> PermissionSet {
        self.permissions.resolve(user_id, base_role)
    }

    /// Releases every lock held by `user_id`, returning the released
    /// element ids (for emitting `element_unlocked`, spec §4.G).
    pub fn release_locks_of(&mut self, user_id: &str) -> Vec<String> {
        let mut released = Vec::new();
        self.locks.retain(|element_id, lock| {
            if lock.holder == user_id {
                released.push(element_id.clone());
                false
            } else {
                true
            }
        });
        released
    }

    /// Grants or re-grants a lock to `user_id` (spec §4.D lock
    /// arbitration). Returns the new lock on success, or the current
    /// holder's id if held by someone else.
    pub fn request_lock(&mut self, element_id: &str, user_id: &str) -> Result<Lock, String> {
        match self.locks.get(element_id) {
            None => {
                let lock = Lock {
                    holder: user_id.to_string(),
                    version: 1,
                };
                self.locks.insert(element_id.to_string(), lock.clone());
                Ok(lock)
            }
            Some(existing) if existing.holder == user_id => {
                let lock = Lock {
                    holder: user_id.to_string(),
                    version: existing.version + 1,
                };
                self.locks.insert(element_id.to_string(), lock.clone());
                Ok(lock)
            }
            Some(existing) => Err(existing.holder.clone()),
        }
    }

    pub fn release_lock(&mut self, element_id: &str, user_id: &str) -> bool {
        match self.locks.get(element_id) {
            Some(lock) if lock.holder == user_id => {
                self.locks.remove(element_id);
                true
            }
            _ => false,
        }
    }

    /// `true` if the element has no lock, or is locked by `user_id`
    /// (spec §4.D lock-holder discipline: silently drop mutations from
    /// a non-holder when a lock exists).
    pub fn may_mutate(&self, element_id: &str, user_id: &str) -> bool {
        match self.locks.get(element_id) {
            None => true,
            Some(lock) => lock.holder == user_id,
        }
    }

    pub fn entity(&self, kind: EntityKind, id: &str) -> Option<&EntityRecord> {
        self.entities.get(&(kind, id.to_string()))
    }

    pub fn current_etag(&self, kind: EntityKind, id: &str) -> Option<String> {
        self.entity(kind, id).map(|e| e.etag(kind, id))
    }

    /// Creates or replaces an entity, bumping its version (spec §3,
    /// §4.D). `first_edited_*` is sticky across updates but restarts on
    /// a fresh create after deletion.
    pub fn upsert_entity(
        &mut self,
        kind: EntityKind,
        id: &str,
        payload: Value,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> EntityRecord {
        let key = (kind, id.to_string());
        let record = match self.entities.get(&key) {
            Some(existing) => EntityRecord {
                version: existing.version + 1,
                payload,
                first_edited_by: existing.first_edited_by.clone(),
                first_edited_at: existing.first_edited_at,
                updated_by: user_id.to_string(),
                updated_at: now,
            },
            None => EntityRecord {
                version: 1,
                payload,
                first_edited_by: user_id.to_string(),
                first_edited_at: now,
                updated_by: user_id.to_string(),
                updated_at: now,
            },
        };
        self.entities.insert(key, record.clone());
        record
    }

    pub fn delete_entity(&mut self, kind: EntityKind, id: &str) -> Option<EntityRecord> {
        self.entities.remove(&(kind, id.to_string()))
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
