//! Player id to live connection lookup.

use crate::connection::{ConnectionHandle, PlayerConnection};
use crate::player::PlayerId;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Directory errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    /// No live connection for the player.
    #[error("No connection for player: {0}")]
    NotFound(PlayerId),
}

/// The process-wide table of current player connections.
///
/// At most one connection per player is current. Binding a new one
/// supersedes the old record in the same map operation.
#[derive(Debug, Default)]
pub struct ConnectionDirectory {
    connections: DashMap<PlayerId, Arc<PlayerConnection>>,
}

impl ConnectionDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `handle` the player's current connection.
    ///
    /// A previous connection is superseded at once and its handle is closed
    /// on the Tokio runtime, if one is running.
    pub fn bind(&self, player_id: &str, handle: Box<dyn ConnectionHandle>) -> Arc<PlayerConnection> {
        let connection = Arc::new(PlayerConnection::new(player_id, handle));

        let previous = self
            .connections
            .insert(player_id.to_string(), Arc::clone(&connection));

        if let Some(previous) = previous {
            previous.supersede();
            debug!(
                player = %player_id,
                old = previous.connection_id(),
                new = connection.connection_id(),
                "Replacing connection"
            );
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move {
                        if let Err(e) = previous.close().await {
                            debug!(player = %previous.player_id(), error = %e, "Closing superseded connection failed");
                        }
                    });
                }
                Err(_) => {
                    warn!(player = %player_id, "No runtime to close superseded connection");
                }
            }
        } else {
            debug!(player = %player_id, connection = connection.connection_id(), "Bound connection");
        }

        connection
    }

    /// The player's current connection.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::NotFound`] if the player has none.
    pub fn lookup(&self, player_id: &str) -> Result<Arc<PlayerConnection>, DirectoryError> {
        self.connections
            .get(player_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| DirectoryError::NotFound(player_id.to_string()))
    }

    /// Remove the player's entry without closing its handle.
    ///
    /// The transport layer owns closing; closing here as well would close
    /// the handle twice.
    pub fn unbind(&self, player_id: &str) -> Option<Arc<PlayerConnection>> {
        let removed = self.connections.remove(player_id).map(|(_, c)| c);
        if removed.is_some() {
            debug!(player = %player_id, "Unbound connection");
        }
        removed
    }

    /// Remove the player's entry only if it is still `connection_id`.
    ///
    /// Returns `true` if the entry was removed.
    pub fn unbind_if_current(&self, player_id: &str, connection_id: u64) -> bool {
        let removed = self
            .connections
            .remove_if(player_id, |_, c| c.connection_id() == connection_id)
            .is_some();
        if removed {
            debug!(player = %player_id, connection = connection_id, "Unbound connection");
        }
        removed
    }

    #[must_use]
    pub fn contains(&self, player_id: &str) -> bool {
        self.connections.contains_key(player_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
