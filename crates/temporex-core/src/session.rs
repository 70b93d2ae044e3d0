//! Match sessions.
//!
//! A session holds its players and a group map from group id to member ids.
//! Groups may overlap. Every group member is also a session player, and
//! empty groups stay addressable until the session is cleared.

use crate::player::{Player, PlayerId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;
use thiserror::Error;
use tracing::debug;

/// A session identifier.
pub type SessionId = String;

/// A group identifier, scoped to its session.
pub type GroupId = String;

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Group assignment for a player that has not joined the session.
    #[error("Player {player} is not a member of session {session}")]
    NotAMember {
        session: SessionId,
        player: PlayerId,
    },

    /// The session already holds its maximum number of players.
    #[error("Session {session} is full ({capacity} players)")]
    SessionFull { session: SessionId, capacity: usize },
}

#[derive(Debug, Default)]
struct Membership {
    players: BTreeMap<PlayerId, Player>,
    groups: HashMap<GroupId, BTreeSet<PlayerId>>,
}

/// A named match instance.
///
/// All mutation goes through one lock per session; no method holds it
/// across an await.
pub struct Session {
    id: SessionId,
    created_at: SystemTime,
    membership: Mutex<Membership>,
}

impl Session {
    /// Create an empty session.
    #[must_use]
    pub fn new(id: impl Into<SessionId>) -> Self {
        Self {
            id: id.into(),
            created_at: SystemTime::now(),
            membership: Mutex::new(Membership::default()),
        }
    }

    fn membership(&self) -> MutexGuard<'_, Membership> {
        // Every critical section leaves the maps consistent, so a poisoned
        // lock still guards valid data.
        self.membership
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The session identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// When the session was created.
    #[must_use]
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Add a player. Returns `false` if the player was already present.
    pub fn add_player(&self, player_id: &str) -> bool {
        let mut membership = self.membership();
        if membership.players.contains_key(player_id) {
            return false;
        }
        membership
            .players
            .insert(player_id.to_string(), Player::new(player_id));
        debug!(session = %self.id, player = %player_id, players = membership.players.len(), "Player joined");
        true
    }

    /// Add a player unless the session already holds `capacity` players.
    ///
    /// A capacity of zero means unlimited. Rejoining players are never
    /// turned away.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionFull`] when a new player would exceed
    /// the capacity.
    pub fn try_add_player(&self, player_id: &str, capacity: usize) -> Result<bool, SessionError> {
        let mut membership = self.membership();
        if membership.players.contains_key(player_id) {
            return Ok(false);
        }
        if capacity > 0 && membership.players.len() >= capacity {
            return Err(SessionError::SessionFull {
                session: self.id.clone(),
                capacity,
            });
        }
        membership
            .players
            .insert(player_id.to_string(), Player::new(player_id));
        debug!(session = %self.id, player = %player_id, players = membership.players.len(), "Player joined");
        Ok(true)
    }

    /// Remove a player from the session and from every group.
    ///
    /// Groups left empty are kept. Returns `false` if the player was absent.
    pub fn remove_player(&self, player_id: &str) -> bool {
        let mut membership = self.membership();
        let Some(player) = membership.players.remove(player_id) else {
            return false;
        };
        for group_id in player.groups() {
            if let Some(members) = membership.groups.get_mut(group_id) {
                members.remove(player_id);
            }
        }
        debug!(session = %self.id, player = %player_id, "Player left");
        true
    }

    /// Put a joined player into a group, creating the group on first use.
    ///
    /// Returns `false` if the player was already in the group.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotAMember`] if the player has not joined.
    pub fn assign_player_to_group(
        &self,
        player_id: &str,
        group_id: &str,
    ) -> Result<bool, SessionError> {
        let mut membership = self.membership();
        let Membership { players, groups } = &mut *membership;

        let player = players
            .get_mut(player_id)
            .ok_or_else(|| SessionError::NotAMember {
                session: self.id.clone(),
                player: player_id.to_string(),
            })?;

        player.join_group(group_id);
        let added = groups
            .entry(group_id.to_string())
            .or_default()
            .insert(player_id.to_string());

        if added {
            debug!(session = %self.id, player = %player_id, group = %group_id, "Assigned to group");
        }
        Ok(added)
    }

    /// Current members of a group. Unknown groups are empty.
    #[must_use]
    pub fn group_members(&self, group_id: &str) -> BTreeSet<PlayerId> {
        self.membership()
            .groups
            .get(group_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether `player_id` has joined.
    #[must_use]
    pub fn is_member(&self, player_id: &str) -> bool {
        self.membership().players.contains_key(player_id)
    }

    /// Snapshot of one player's membership.
    #[must_use]
    pub fn player(&self, player_id: &str) -> Option<Player> {
        self.membership().players.get(player_id).cloned()
    }

    /// All player ids, sorted.
    #[must_use]
    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.membership().players.keys().cloned().collect()
    }

    /// All group ids, sorted, including empty groups.
    #[must_use]
    pub fn group_ids(&self) -> Vec<GroupId> {
        let mut ids: Vec<GroupId> = self.membership().groups.keys().cloned().collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn player_count(&self) -> usize {
        self.membership().players.len()
    }

    #[must_use]
    pub fn group_count(&self) -> usize {
        self.membership().groups.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.membership().players.is_empty()
    }

    /// Drop all players and groups, keeping id and creation time.
    pub(crate) fn clear(&self) {
        let mut membership = self.membership();
        membership.players.clear();
        membership.groups.clear();
        debug!(session = %self.id, "Session cleared");
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("players", &self.player_count())
            .field("groups", &self.group_count())
            .finish()
    }
}
