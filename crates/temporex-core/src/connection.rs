//! Live player connections.
//!
//! A [`PlayerConnection`] wraps the transport's write half for one player.
//! Writes go through an async mutex, so two fan-outs that hit the same
//! recipient never interleave and reach it in the order they queued.

use crate::player::PlayerId;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::SystemTime;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Source of process-unique connection ids.
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Connection errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Connection was closed.
    #[error("Connection closed")]
    Closed,

    /// A newer connection replaced this one.
    #[error("Connection superseded")]
    Superseded,

    /// The transport failed to write.
    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// Write side of a transport connection.
///
/// Implemented by the server for its WebSocket sink; the core only ever
/// writes whole frames and closes.
#[async_trait]
pub trait ConnectionHandle: Send + Sync {
    /// Write one framed payload.
    async fn send(&mut self, payload: Bytes) -> Result<(), ConnectionError>;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), ConnectionError>;
}

/// The current connection of a player.
pub struct PlayerConnection {
    player_id: PlayerId,
    connection_id: u64,
    created_at: SystemTime,
    handle: Mutex<Box<dyn ConnectionHandle>>,
    superseded: AtomicBool,
    closed: AtomicBool,
}

impl PlayerConnection {
    /// Wrap a transport handle for `player_id`.
    #[must_use]
    pub fn new(player_id: impl Into<PlayerId>, handle: Box<dyn ConnectionHandle>) -> Self {
        Self {
            player_id: player_id.into(),
            connection_id: CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed),
            created_at: SystemTime::now(),
            handle: Mutex::new(handle),
            superseded: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// The owning player.
    #[must_use]
    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    /// Process-unique id of this connection.
    #[must_use]
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// When this connection was bound.
    #[must_use]
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Whether this is still the player's live connection.
    #[must_use]
    pub fn is_current(&self) -> bool {
        !self.superseded.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    /// Mark this connection as replaced. Later writes fail with
    /// [`ConnectionError::Superseded`].
    pub fn supersede(&self) {
        if !self.superseded.swap(true, Ordering::SeqCst) {
            debug!(player = %self.player_id, connection = self.connection_id, "Connection superseded");
        }
    }

    /// Write a payload.
    ///
    /// # Errors
    ///
    /// Fails if the connection was closed or superseded before the write lock
    /// was acquired, or if the transport write fails.
    pub async fn send(&self, payload: Bytes) -> Result<(), ConnectionError> {
        let mut handle = self.handle.lock().await;

        // Checked under the lock: a replacement that lands while we wait wins.
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }
        if self.superseded.load(Ordering::SeqCst) {
            return Err(ConnectionError::Superseded);
        }

        trace!(player = %self.player_id, bytes = payload.len(), "Writing payload");
        handle.send(payload).await
    }

    /// Close the underlying handle. Only the first call reaches the transport.
    ///
    /// # Errors
    ///
    /// Returns the transport's close error.
    pub async fn close(&self) -> Result<(), ConnectionError> {
        let mut handle = self.handle.lock().await;
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        debug!(player = %self.player_id, connection = self.connection_id, "Closing connection");
        handle.close().await
    }
}

impl fmt::Debug for PlayerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayerConnection")
            .field("player_id", &self.player_id)
            .field("connection_id", &self.connection_id)
            .field("created_at", &self.created_at)
            .field("current", &self.is_current())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorded {
        sent: std::sync::Mutex<Vec<Bytes>>,
        closes: AtomicUsize,
    }

    /// Handle that records writes and can be told to fail them.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingHandle {
        recorded: Arc<Recorded>,
        fail_sends: bool,
    }

    impl RecordingHandle {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn failing() -> Self {
            Self {
                fail_sends: true,
                ..Self::default()
            }
        }

        pub(crate) fn boxed(&self) -> Box<dyn ConnectionHandle> {
            Box::new(self.clone())
        }

        pub(crate) fn sent(&self) -> Vec<Bytes> {
            self.recorded.sent.lock().unwrap().clone()
        }

        pub(crate) fn close_count(&self) -> usize {
            self.recorded.closes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ConnectionHandle for RecordingHandle {
        async fn send(&mut self, payload: Bytes) -> Result<(), ConnectionError> {
            if self.fail_sends {
                return Err(ConnectionError::SendFailed("broken pipe".into()));
            }
            self.recorded.sent.lock().unwrap().push(payload);
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ConnectionError> {
            self.recorded.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
