//! Group message fan-out.
//!
//! The router resolves a group's members under the session lock, releases
//! it, then writes to every live member connection concurrently. One failed
//! or missing recipient never stops delivery to the rest.

use crate::directory::ConnectionDirectory;
use crate::player::PlayerId;
use crate::registry::SessionRegistry;
use bytes::Bytes;
use futures_util::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Router errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// No session with this id.
    #[error("Session not found: {0}")]
    SessionNotFound(String),
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Members the payload was written to.
    pub delivered: Vec<PlayerId>,
    /// Members without a live connection.
    pub skipped: Vec<PlayerId>,
    /// Members whose write failed.
    pub failed: Vec<PlayerId>,
}

impl DeliveryReport {
    #[must_use]
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }

    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Number of group members considered.
    #[must_use]
    pub fn recipients(&self) -> usize {
        self.delivered.len() + self.skipped.len() + self.failed.len()
    }
}

/// Routes payloads to the members of a session group.
#[derive(Debug, Clone)]
pub struct Router {
    sessions: Arc<SessionRegistry>,
    directory: Arc<ConnectionDirectory>,
}

impl Router {
    /// Create a router over a shared registry and directory.
    #[must_use]
    pub fn new(sessions: Arc<SessionRegistry>, directory: Arc<ConnectionDirectory>) -> Self {
        Self {
            sessions,
            directory,
        }
    }

    /// The session registry this router reads.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// The connection directory this router writes through.
    #[must_use]
    pub fn directory(&self) -> &Arc<ConnectionDirectory> {
        &self.directory
    }

    /// Deliver `payload` to every connected member of `group_id`.
    ///
    /// An empty or unknown group delivers to nobody and succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::SessionNotFound`] if the session does not
    /// exist. Per-recipient failures are reported, not returned.
    pub async fn route(
        &self,
        session_id: &str,
        group_id: &str,
        payload: Bytes,
    ) -> Result<DeliveryReport, RouterError> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| RouterError::SessionNotFound(session_id.to_string()))?;

        // Snapshot taken under the session lock, which is released here.
        let members = session.group_members(group_id);
        drop(session);

        let mut report = DeliveryReport::default();
        let mut targets = Vec::with_capacity(members.len());
        for member in members {
            match self.directory.lookup(&member) {
                Ok(connection) => targets.push(connection),
                Err(_) => report.skipped.push(member),
            }
        }

        let writes = targets.into_iter().map(|connection| {
            let payload = payload.clone();
            async move {
                let result = connection.send(payload).await;
                (connection, result)
            }
        });

        for (connection, result) in join_all(writes).await {
            match result {
                Ok(()) => report.delivered.push(connection.player_id().to_string()),
                Err(e) => {
                    warn!(
                        session = %session_id,
                        group = %group_id,
                        player = %connection.player_id(),
                        error = %e,
                        "Delivery failed"
                    );
                    report.failed.push(connection.player_id().to_string());
                }
            }
        }

        trace!(
            session = %session_id,
            group = %group_id,
            delivered = report.delivered_count(),
            skipped = report.skipped_count(),
            failed = report.failed_count(),
            "Routed message"
        );

        Ok(report)
    }

    /// Remove a session and close its members' live connections.
    ///
    /// Returns the number of connections closed.
    pub async fn close_session(&self, session_id: &str) -> usize {
        let Some(session) = self.sessions.remove_session(session_id) else {
            return 0;
        };

        let connections: Vec<_> = session
            .player_ids()
            .into_iter()
            .filter_map(|player| self.directory.lookup(&player).ok())
            .collect();

        let mut closed = 0;
        for connection in connections {
            // Drop the entry first so no fan-out picks it up mid-close.
            self.directory
                .unbind_if_current(connection.player_id(), connection.connection_id());
            match connection.close().await {
                Ok(()) => closed += 1,
                Err(e) => {
                    debug!(player = %connection.player_id(), error = %e, "Close failed");
                }
            }
        }

        debug!(session = %session_id, closed, "Closed session");
        closed
    }
}
