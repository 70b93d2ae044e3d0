//! Player membership records.

use std::collections::BTreeSet;

/// A player identifier, unique across the process.
pub type PlayerId = String;

/// A player's membership inside one session.
///
/// The group set mirrors the session's group map and is only changed by the
/// owning [`Session`](crate::Session) while it holds its lock. The player's
/// live connection is looked up in the
/// [`ConnectionDirectory`](crate::ConnectionDirectory).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    id: PlayerId,
    groups: BTreeSet<String>,
}

impl Player {
    /// Create a player with no groups.
    #[must_use]
    pub fn new(id: impl Into<PlayerId>) -> Self {
        Self {
            id: id.into(),
            groups: BTreeSet::new(),
        }
    }

    /// The player identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Groups the player belongs to.
    #[must_use]
    pub fn groups(&self) -> &BTreeSet<String> {
        &self.groups
    }

    /// Whether the player is in `group_id`.
    #[must_use]
    pub fn in_group(&self, group_id: &str) -> bool {
        self.groups.contains(group_id)
    }

    pub(crate) fn join_group(&mut self, group_id: &str) -> bool {
        self.groups.insert(group_id.to_string())
    }
}
