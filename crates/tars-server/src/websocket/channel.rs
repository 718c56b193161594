//! Per-session outbound queue.
//!
//! A [`PushChannel`] is the only way anything writes to a client. Pushes never
//! block: a full queue or a closed one is reported to the caller, which treats
//! the client as unreachable. A slow or broken client can never stall the
//! dispatcher or a topic broadcast to other sessions.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::error;

use super::protocol::ServerMessage;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Result of one [`PushChannel::push`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// Queued for the writer.
    Delivered,
    /// Queue full; the message was dropped.
    Full,
    /// The writer is gone or the channel was closed.
    Closed,
}

/// Outbound half of one WebSocket connection.
pub struct PushChannel {
    id: u64,
    tx: mpsc::Sender<Arc<String>>,
    closed: CancellationToken,
    is_alive: AtomicBool,
    last_seen: Mutex<tokio::time::Instant>,
    connected_at: Instant,
}

impl PushChannel {
    /// Wrap the sending side of the writer's queue.
    pub fn new(tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            tx,
            closed: CancellationToken::new(),
            is_alive: AtomicBool::new(true),
            last_seen: Mutex::new(tokio::time::Instant::now()),
            connected_at: Instant::now(),
        }
    }

    /// A channel plus the receiver its writer drains.
    pub fn pair(buffer: usize) -> (Self, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx), rx)
    }

    /// Process-unique connection id.
    ///
    /// Distinguishes two connections that used the same session key.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue pre-encoded text without waiting.
    pub fn push(&self, text: Arc<String>) -> PushOutcome {
        if self.closed.is_cancelled() {
            return PushOutcome::Closed;
        }
        match self.tx.try_send(text) {
            Ok(()) => PushOutcome::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => PushOutcome::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => PushOutcome::Closed,
        }
    }

    /// Encode and queue one message.
    pub fn send(&self, msg: &ServerMessage) -> PushOutcome {
        match encode(msg) {
            Some(text) => self.push(text),
            None => PushOutcome::Delivered,
        }
    }

    /// Ask the writer to flush and send a Close frame. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled by [`close`](Self::close).
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Record client activity (Pong, Ping or any frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = tokio::time::Instant::now();
    }

    /// Read and reset the activity flag.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last recorded activity, on the tokio clock.
    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Serialize a message once for delivery to one or more channels.
///
/// Serialization of these types cannot fail in practice; if it ever does the
/// message is logged and skipped.
pub fn encode(msg: &ServerMessage) -> Option<Arc<String>> {
    match msg.to_json() {
        Ok(json) => Some(Arc::new(json)),
        Err(e) => {
            error!(error = %e, "failed to serialize server message");
            None
        }
    }
}
