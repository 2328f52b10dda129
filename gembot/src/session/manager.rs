//! Session manager: the conversation-history contract on top of a
//! storage backend.

use super::storage::{SessionStorage, Turn};
use crate::error::StorageResult;
use std::sync::Arc;
use tracing::{debug, info};

/// Configuration for session management.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Maximum number of turns to keep per session. Oldest turns are
    /// evicted from the front when the bound is exceeded.
    pub max_turns: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        // 100 turns = 50 user/assistant exchanges.
        Self { max_turns: 100 }
    }
}

/// A loaded conversation session for one user id.
#[derive(Debug, Clone)]
pub struct Session {
    user_id: String,
    turns: Vec<Turn>,
}

impl Session {
    /// Create an empty session for a user.
    fn empty(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            turns: Vec::new(),
        }
    }

    /// The user id this session belongs to.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The turn history, oldest first.
    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Whether the session has no history yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Manager for loading, appending to, and clearing sessions.
///
/// Appends are whole-file read-modify-write operations; concurrent writers
/// for the same user race and the last writer's full sequence wins.
pub struct SessionManager {
    storage: Arc<dyn SessionStorage>,
    config: SessionConfig,
}

impl Clone for SessionManager {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            config: self.config,
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a new session manager with the given storage backend.
    pub fn new(storage: impl SessionStorage + 'static) -> Self {
        Self {
            storage: Arc::new(storage),
            config: SessionConfig::default(),
        }
    }

    /// Create a session manager with custom config.
    pub fn with_config(storage: impl SessionStorage + 'static, config: SessionConfig) -> Self {
        Self {
            storage: Arc::new(storage),
            config,
        }
    }

    /// Load the session for a user. A user with no stored history gets an
    /// empty session; storage absence is never an error.
    pub async fn load(&self, user_id: &str) -> StorageResult<Session> {
        match self.storage.load(user_id).await? {
            Some(turns) => {
                debug!(user_id = %user_id, turns = turns.len(), "loaded session");
                Ok(Session {
                    user_id: user_id.to_string(),
                    turns,
                })
            }
            None => {
                debug!(user_id = %user_id, "no stored session, starting empty");
                Ok(Session::empty(user_id))
            }
        }
    }

    /// Append one turn to the user's history and persist the full updated
    /// sequence, evicting the oldest turns past the configured bound.
    pub async fn append(&self, user_id: &str, turn: Turn) -> StorageResult<()> {
        let mut turns = self.storage.load(user_id).await?.unwrap_or_default();
        turns.push(turn);

        if turns.len() > self.config.max_turns {
            let excess = turns.len() - self.config.max_turns;
            turns.drain(0..excess);
        }

        self.storage.save(user_id, &turns).await
    }

    /// Reset the user's history to empty and persist it.
    pub async fn clear(&self, user_id: &str) -> StorageResult<()> {
        self.storage.clear(user_id).await?;
        info!(user_id = %user_id, "session cleared");
        Ok(())
    }

    /// Get the session configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::super::storage::MemoryStorage;
    use super::*;

    #[tokio::test]
    async fn test_load_append_round_trip() {
        let manager = SessionManager::new(MemoryStorage::new());

        let session = manager.load("U1").await.unwrap();
        assert!(session.is_empty());

        manager.append("U1", Turn::user("hello")).await.unwrap();
        manager
            .append("U1", Turn::assistant("hi there"))
            .await
            .unwrap();

        let session = manager.load("U1").await.unwrap();
        assert_eq!(session.turns().len(), 2);
        assert_eq!(session.turns()[0].text, "hello");
        assert_eq!(session.turns()[1].text, "hi there");
    }

    #[tokio::test]
    async fn test_bounded_growth_keeps_most_recent() {
        let config = SessionConfig { max_turns: 3 };
        let manager = SessionManager::with_config(MemoryStorage::new(), config);

        for i in 1..=5 {
            manager
                .append("U1", Turn::user(format!("{i}")))
                .await
                .unwrap();
        }

        let session = manager.load("U1").await.unwrap();
        let texts: Vec<&str> = session.turns().iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, ["3", "4", "5"]);
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let manager = SessionManager::new(MemoryStorage::new());

        // Clearing a user with no history succeeds...
        manager.clear("U1").await.unwrap();
        assert!(manager.load("U1").await.unwrap().is_empty());

        // ...with the same observable effect as clearing one with history.
        manager.append("U1", Turn::user("hello")).await.unwrap();
        manager.clear("U1").await.unwrap();
        assert!(manager.load("U1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_user_isolation() {
        let manager = SessionManager::new(MemoryStorage::new());

        manager.append("A", Turn::user("for A")).await.unwrap();
        manager.append("B", Turn::user("for B")).await.unwrap();

        let b = manager.load("B").await.unwrap();
        assert_eq!(b.turns().len(), 1);
        assert_eq!(b.turns()[0].text, "for B");
    }

    #[tokio::test]
    async fn test_append_then_load_last_matches() {
        let manager = SessionManager::new(MemoryStorage::new());

        let turn = Turn::assistant("the reply");
        manager.append("U1", turn.clone()).await.unwrap();

        let session = manager.load("U1").await.unwrap();
        assert_eq!(session.turns().last(), Some(&turn));
    }
}
