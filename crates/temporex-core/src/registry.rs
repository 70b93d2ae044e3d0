//! Process-wide session table.

use crate::session::{Session, SessionId};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Maps session ids to live sessions.
///
/// The map only locks for lookup and insert; session mutation happens under
/// each session's own lock after the map shard is released.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the session for `session_id`, creating an empty one if absent.
    ///
    /// Concurrent callers with the same id all receive the same instance.
    pub fn join_or_create(&self, session_id: &str) -> Arc<Session> {
        let entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                info!(session = %session_id, "Creating session");
                Arc::new(Session::new(session_id))
            });
        Arc::clone(entry.value())
    }

    /// Look up an existing session.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_id).map(|e| Arc::clone(e.value()))
    }

    /// Remove a session. Absent ids are a no-op.
    ///
    /// Closing the members' connections is left to the caller; see
    /// [`Router::close_session`](crate::Router::close_session).
    pub fn remove_session(&self, session_id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(session_id).map(|(_, s)| s);
        if removed.is_some() {
            info!(session = %session_id, "Removed session");
        }
        removed
    }

    /// Reset a session to empty in place so it can be reused.
    pub fn clear_session(&self, session: &Session) {
        session.clear();
        debug!(session = %session.id(), "Recycled session");
    }

    /// Remove a player from every session it belongs to.
    ///
    /// Returns the ids of the sessions it was removed from, sorted.
    pub fn remove_player_everywhere(&self, player_id: &str) -> Vec<SessionId> {
        // Collect first so no map shard is held while taking session locks.
        let sessions: Vec<Arc<Session>> =
            self.sessions.iter().map(|e| Arc::clone(e.value())).collect();

        let mut left: Vec<SessionId> = sessions
            .iter()
            .filter(|s| s.remove_player(player_id))
            .map(|s| s.id().to_string())
            .collect();
        left.sort();
        left
    }

    #[must_use]
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// All session ids, sorted.
    #[must_use]
    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let sessions: Vec<Arc<Session>> =
            self.sessions.iter().map(|e| Arc::clone(e.value())).collect();
        RegistryStats {
            session_count: sessions.len(),
            player_count: sessions.iter().map(|s| s.player_count()).sum(),
            group_count: sessions.iter().map(|s| s.group_count()).sum(),
        }
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of live sessions.
    pub session_count: usize,
    /// Players summed over all sessions.
    pub player_count: usize,
    /// Groups summed over all sessions.
    pub group_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_or_create_returns_same_instance() {
        let registry = SessionRegistry::new();
        let first = registry.join_or_create("s1");
        let second = registry.join_or_create("s1");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert!(first.is_empty());
    }

    #[test]
    fn test_concurrent_join_or_create_single_instance() {
        let registry = Arc::new(SessionRegistry::new());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.join_or_create("race"))
            })
            .collect();

        let sessions: Vec<Arc<Session>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        for session in &sessions[1..] {
            assert!(Arc::ptr_eq(&sessions[0], session));
        }
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_joins_all_land_in_one_session() {
        let registry = Arc::new(SessionRegistry::new());

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    registry.join_or_create("arena").add_player(&format!("p{i}"));
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.get("arena").unwrap().player_count(), 32);
    }

    #[test]
    fn test_remove_session_is_idempotent() {
        let registry = SessionRegistry::new();
        registry.join_or_create("s1");

        assert!(registry.remove_session("s1").is_some());
        assert!(registry.remove_session("s1").is_none());
        assert!(!registry.contains("s1"));
        assert!(registry.get("s1").is_none());
    }

    #[test]
    fn test_clear_session_keeps_registration() {
        let registry = SessionRegistry::new();
        let session = registry.join_or_create("s1");
        session.add_player("a");
        session.assign_player_to_group("a", "g").unwrap();

        registry.clear_session(&session);

        let again = registry.join_or_create("s1");
        assert!(Arc::ptr_eq(&session, &again));
        assert!(again.is_empty());
        assert!(again.group_members("g").is_empty());
    }

    #[test]
    fn test_remove_player_everywhere() {
        let registry = SessionRegistry::new();
        let s1 = registry.join_or_create("s1");
        let s2 = registry.join_or_create("s2");
        let s3 = registry.join_or_create("s3");
        s1.add_player("a");
        s2.add_player("a");
        s2.add_player("b");
        s3.add_player("b");
        s2.assign_player_to_group("a", "g").unwrap();

        assert_eq!(
            registry.remove_player_everywhere("a"),
            vec!["s1".to_string(), "s2".to_string()]
        );
        assert!(!s1.is_member("a"));
        assert!(s2.group_members("g").is_empty());
        assert!(s3.is_member("b"));
        assert!(registry.remove_player_everywhere("a").is_empty());
    }

    #[test]
    fn test_stats() {
        let registry = SessionRegistry::new();
        let s1 = registry.join_or_create("s1");
        let s2 = registry.join_or_create("s2");
        s1.add_player("a");
        s1.add_player("b");
        s2.add_player("c");
        s1.assign_player_to_group("a", "g").unwrap();

        assert_eq!(
            registry.stats(),
            RegistryStats {
                session_count: 2,
                player_count: 3,
                group_count: 1,
            }
        );
        assert_eq!(registry.session_ids(), vec!["s1".to_string(), "s2".to_string()]);
    }
}
