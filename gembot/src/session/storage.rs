//! Session storage backends.
//!
//! A session is the ordered conversation history for one user id,
//! persisted as a JSON array of turns in a file per user.

use crate::error::StorageResult;
use crate::util::timestamp_ms;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A message from the user.
    User,
    /// A reply from the bot.
    Assistant,
}

impl Role {
    /// Wire-format name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single turn in a conversation history. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Who produced the turn.
    pub role: Role,
    /// Turn text.
    pub text: String,
    /// Timestamp (Unix milliseconds).
    pub timestamp: u64,
}

impl Turn {
    /// Create a new turn stamped with the current time.
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: timestamp_ms(),
        }
    }

    /// Create a user turn.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// Create an assistant turn.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }
}

/// Trait for session storage backends.
///
/// Absence is not an error: `load` returns `None` for a user with no
/// stored history, and callers treat that as an empty session.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Load the stored turn sequence for a user.
    async fn load(&self, user_id: &str) -> StorageResult<Option<Vec<Turn>>>;

    /// Persist the full turn sequence for a user, replacing any previous
    /// contents.
    async fn save(&self, user_id: &str, turns: &[Turn]) -> StorageResult<()>;

    /// Reset the user's sequence to empty and persist it. Idempotent.
    async fn clear(&self, user_id: &str) -> StorageResult<()> {
        self.save(user_id, &[]).await
    }
}

/// In-memory session storage.
///
/// Fast but not persistent across restarts; used in tests and as a
/// fallback.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    sessions: RwLock<HashMap<String, Vec<Turn>>>,
}

impl MemoryStorage {
    /// Create a new memory storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStorage for MemoryStorage {
    async fn load(&self, user_id: &str) -> StorageResult<Option<Vec<Turn>>> {
        Ok(self.sessions.read().await.get(user_id).cloned())
    }

    async fn save(&self, user_id: &str, turns: &[Turn]) -> StorageResult<()> {
        self.sessions
            .write()
            .await
            .insert(user_id.to_string(), turns.to_vec());
        Ok(())
    }
}

/// File-based session storage: one JSON file per user id.
///
/// Reads and writes are not synchronized across callers; the last writer's
/// full sequence wins.
#[derive(Debug)]
pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    /// Create a new file storage rooted at the given directory.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Create file storage in the default location (`~/.gembot/sessions`).
    #[must_use]
    pub fn default_path() -> Self {
        Self::new(crate::util::sessions_dir())
    }

    /// Get the file path for a user id.
    fn session_path(&self, user_id: &str) -> PathBuf {
        // Sanitize the id for use as a filename
        let safe_id = user_id.replace([':', '/', '\\', '.'], "_");
        self.base_path.join(format!("{safe_id}.json"))
    }

    /// Ensure the storage directory exists.
    async fn ensure_dir(&self) -> StorageResult<()> {
        tokio::fs::create_dir_all(&self.base_path).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStorage for FileStorage {
    async fn load(&self, user_id: &str) -> StorageResult<Option<Vec<Turn>>> {
        let path = self.session_path(user_id);

        if !path.exists() {
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&path).await?;
        match serde_json::from_str::<Vec<Turn>>(&content) {
            Ok(turns) => {
                debug!(user_id = %user_id, turns = turns.len(), "loaded session file");
                Ok(Some(turns))
            }
            Err(e) => {
                // A corrupted session file is recovered as empty history,
                // never surfaced to the caller.
                warn!(
                    user_id = %user_id,
                    path = %path.display(),
                    error = %e,
                    "malformed session file, treating as empty history"
                );
                Ok(None)
            }
        }
    }

    async fn save(&self, user_id: &str, turns: &[Turn]) -> StorageResult<()> {
        self.ensure_dir().await?;

        let path = self.session_path(user_id);
        let content = serde_json::to_string_pretty(turns)?;
        tokio::fs::write(&path, content).await?;
        debug!(user_id = %user_id, turns = turns.len(), "saved session file");
        Ok(())
    }
}
