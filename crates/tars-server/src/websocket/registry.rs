//! Session registry: the single owner of live sessions.
//!
//! Each entry holds the session's [`PushChannel`], its topic set and at most
//! one background task slot. A single `RwLock` guards the map: pushes happen
//! under the read lock and teardown under the write lock, so a push never sees
//! a half-removed session.
//!
//! A session key may outlive one connection when the duplicate policy is
//! `replace`. Anything scoped to a connection (dispatcher replies, session
//! cleanup, background tasks) carries a [`SessionHandle`] and is ignored once
//! the key belongs to a newer connection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use parking_lot::RwLock;
use tars_core::SessionKey;
use tars_settings::DuplicateSessionPolicy;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::channel::{PushChannel, PushOutcome, encode};
use super::protocol::ServerMessage;
use crate::errors::RegistryError;
use crate::metrics::{BACKGROUND_TASKS_SUPERSEDED_TOTAL, TOPIC_DELIVERIES_TOTAL, WS_SEND_DROPS_TOTAL};

/// A session key bound to one specific connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionHandle {
    /// Session key.
    pub key: SessionKey,
    /// [`PushChannel::id`] of the connection.
    pub connection_id: u64,
}

/// A started background task, as seen by its runner.
#[derive(Clone, Debug)]
pub struct TaskTicket {
    /// Owning session.
    pub key: SessionKey,
    /// Generation; newer tasks have larger ids.
    pub id: u64,
    /// Cancelled on supersession or teardown.
    pub cancel: CancellationToken,
}

struct TaskSlot {
    id: u64,
    cancel: CancellationToken,
}

struct Session {
    channel: Arc<PushChannel>,
    topics: HashSet<String>,
    task: Option<TaskSlot>,
}

impl Session {
    fn new(channel: Arc<PushChannel>) -> Self {
        Self {
            channel,
            topics: HashSet::new(),
            task: None,
        }
    }

    fn teardown(self) {
        if let Some(task) = self.task {
            task.cancel.cancel();
        }
        self.channel.close();
    }
}

/// Live sessions keyed by [`SessionKey`].
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionKey, Session>>,
    policy: DuplicateSessionPolicy,
    next_task_id: AtomicU64,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new(policy: DuplicateSessionPolicy) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            policy,
            next_task_id: AtomicU64::new(1),
        }
    }

    /// Duplicate key policy in effect.
    pub fn policy(&self) -> DuplicateSessionPolicy {
        self.policy
    }

    // ── Lifecycle ──

    /// Add a session with no topics and no task.
    pub fn register(&self, key: SessionKey, channel: Arc<PushChannel>) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&key) {
            if self.policy == DuplicateSessionPolicy::Reject {
                return Err(RegistryError::DuplicateSession(key.into_inner()));
            }
            if let Some(old) = sessions.remove(&key) {
                info!(session_id = %key, "replacing existing session");
                old.teardown();
            }
        }
        let _ = sessions.insert(key, Session::new(channel));
        Ok(())
    }

    /// Remove a session, closing its channel and cancelling its task.
    ///
    /// Unknown keys are ignored.
    pub fn unregister(&self, key: &str) {
        let removed = self.sessions.write().remove(key);
        if let Some(session) = removed {
            debug!(session_id = key, "session unregistered");
            session.teardown();
        }
    }

    /// [`unregister`](Self::unregister), but only while `key` still belongs to
    /// connection `connection_id`.
    pub fn unregister_connection(&self, key: &str, connection_id: u64) {
        let mut sessions = self.sessions.write();
        let owned = sessions
            .get(key)
            .is_some_and(|s| s.channel.id() == connection_id);
        if owned {
            if let Some(session) = sessions.remove(key) {
                debug!(session_id = key, connection_id, "session unregistered");
                session.teardown();
            }
        }
    }

    /// Remove every session. Used on shutdown.
    pub fn clear(&self) {
        let drained: Vec<Session> = self.sessions.write().drain().map(|(_, s)| s).collect();
        for session in drained {
            session.teardown();
        }
    }

    // ── Queries ──

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether there are no live sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Whether `key` is registered.
    pub fn contains(&self, key: &str) -> bool {
        self.sessions.read().contains_key(key)
    }

    /// Whether `handle` still owns its key.
    pub fn is_current(&self, handle: &SessionHandle) -> bool {
        self.sessions
            .read()
            .get(handle.key.as_str())
            .is_some_and(|s| s.channel.id() == handle.connection_id)
    }

    /// Sorted topics of one session, or `None` if it is not registered.
    pub fn topics(&self, key: &str) -> Option<Vec<String>> {
        self.sessions.read().get(key).map(|s| {
            let mut topics: Vec<String> = s.topics.iter().cloned().collect();
            topics.sort();
            topics
        })
    }

    /// Union of all sessions' topics.
    pub fn active_topics(&self) -> HashSet<String> {
        self.sessions
            .read()
            .values()
            .flat_map(|s| s.topics.iter().cloned())
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn has_subscribers(&self, topic: &str) -> bool {
        self.sessions.read().values().any(|s| s.topics.contains(topic))
    }

    // ── Subscriptions ──

    /// Add `topic` to a session. Idempotent; unknown keys are ignored.
    pub fn subscribe(&self, key: &str, topic: &str) {
        if let Some(session) = self.sessions.write().get_mut(key) {
            let _ = session.topics.insert(topic.to_string());
        }
    }

    /// Remove `topic` from a session. Absent topics and unknown keys are ignored.
    pub fn unsubscribe(&self, key: &str, topic: &str) {
        if let Some(session) = self.sessions.write().get_mut(key) {
            let _ = session.topics.remove(topic);
        }
    }

    // ── Delivery ──

    /// Push to whichever connection currently owns `key`.
    ///
    /// Returns whether the message was queued. Absent keys drop silently.
    pub fn send(&self, key: &str, msg: &ServerMessage) -> bool {
        let Some(text) = encode(msg) else {
            return false;
        };
        let pushed = {
            let sessions = self.sessions.read();
            sessions
                .get(key)
                .map(|s| (s.channel.id(), s.channel.push(text)))
        };
        match pushed {
            Some((connection_id, outcome)) => self.settle(key, connection_id, outcome),
            None => false,
        }
    }

    /// Push to `handle`'s connection only.
    pub fn reply(&self, handle: &SessionHandle, msg: &ServerMessage) -> bool {
        let Some(text) = encode(msg) else {
            return false;
        };
        let outcome = {
            let sessions = self.sessions.read();
            match sessions.get(handle.key.as_str()) {
                Some(s) if s.channel.id() == handle.connection_id => s.channel.push(text),
                _ => return false,
            }
        };
        self.settle(handle.key.as_str(), handle.connection_id, outcome)
    }

    /// Push to every subscriber of `topic`, returning how many were queued.
    ///
    /// The message is encoded once. One subscriber failing never affects the
    /// others.
    pub fn publish(&self, topic: &str, msg: &ServerMessage) -> usize {
        let Some(text) = encode(msg) else {
            return 0;
        };
        let outcomes: Vec<(SessionKey, u64, PushOutcome)> = {
            let sessions = self.sessions.read();
            sessions
                .iter()
                .filter(|(_, s)| s.topics.contains(topic))
                .map(|(k, s)| (k.clone(), s.channel.id(), s.channel.push(Arc::clone(&text))))
                .collect()
        };
        let delivered = self.settle_all(outcomes);
        counter!(TOPIC_DELIVERIES_TOTAL, "topic" => topic.to_string()).increment(delivered as u64);
        delivered
    }

    /// Push to each listed key, returning how many were queued.
    pub fn send_to_many<K: AsRef<str>>(&self, keys: &[K], msg: &ServerMessage) -> usize {
        let Some(text) = encode(msg) else {
            return 0;
        };
        let outcomes: Vec<(SessionKey, u64, PushOutcome)> = {
            let sessions = self.sessions.read();
            keys.iter()
                .filter_map(|k| sessions.get_key_value(k.as_ref()))
                .map(|(k, s)| (k.clone(), s.channel.id(), s.channel.push(Arc::clone(&text))))
                .collect()
        };
        self.settle_all(outcomes)
    }

    fn settle_all(&self, outcomes: Vec<(SessionKey, u64, PushOutcome)>) -> usize {
        outcomes
            .into_iter()
            .filter(|(key, connection_id, outcome)| self.settle(key, *connection_id, *outcome))
            .count()
    }

    /// Apply the disconnect policy to a push outcome. Must be called without
    /// holding the map lock.
    ///
    /// Any failed push makes the client unreachable: a dropped message would
    /// otherwise leave it waiting forever for a reply or a terminal result.
    fn settle(&self, key: &str, connection_id: u64, outcome: PushOutcome) -> bool {
        match outcome {
            PushOutcome::Delivered => true,
            PushOutcome::Full => {
                counter!(WS_SEND_DROPS_TOTAL).increment(1);
                warn!(session_id = key, connection_id, "outbound queue full, disconnecting");
                self.unregister_connection(key, connection_id);
                false
            }
            PushOutcome::Closed => {
                debug!(session_id = key, "transport closed, unregistering");
                self.unregister_connection(key, connection_id);
                false
            }
        }
    }

    // ── Background tasks ──

    /// Start a new task for `handle`, cancelling the previous one.
    ///
    /// Returns `None` if `handle` no longer owns its key.
    pub fn begin_task(&self, handle: &SessionHandle) -> Option<TaskTicket> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(handle.key.as_str())?;
        if session.channel.id() != handle.connection_id {
            return None;
        }
        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let previous = session.task.replace(TaskSlot {
            id,
            cancel: cancel.clone(),
        });
        if let Some(previous) = previous {
            previous.cancel.cancel();
            counter!(BACKGROUND_TASKS_SUPERSEDED_TOTAL).increment(1);
            debug!(session_id = %handle.key, old_task = previous.id, new_task = id, "task superseded");
        }
        Some(TaskTicket {
            key: handle.key.clone(),
            id,
            cancel,
        })
    }

    /// Push on behalf of a task, only while it is still the session's current
    /// task. A `terminal` push also clears the slot.
    ///
    /// Returns `false` when the result is suppressed.
    pub fn deliver_from_task(&self, ticket: &TaskTicket, msg: &ServerMessage, terminal: bool) -> bool {
        let Some(text) = encode(msg) else {
            return false;
        };
        let pushed = if terminal {
            let mut sessions = self.sessions.write();
            sessions.get_mut(ticket.key.as_str()).and_then(|s| {
                if s.task.as_ref().is_some_and(|t| t.id == ticket.id) {
                    s.task = None;
                    Some((s.channel.id(), s.channel.push(text)))
                } else {
                    None
                }
            })
        } else {
            let sessions = self.sessions.read();
            sessions.get(ticket.key.as_str()).and_then(|s| {
                s.task
                    .as_ref()
                    .is_some_and(|t| t.id == ticket.id)
                    .then(|| (s.channel.id(), s.channel.push(text)))
            })
        };
        match pushed {
            Some((connection_id, outcome)) => self.settle(ticket.key.as_str(), connection_id, outcome),
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn task_active(&self, key: &str) -> bool {
        self.sessions.read().get(key).is_some_and(|s| s.task.is_some())
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DuplicateSessionPolicy::default())
    }
}
