//! Shared utilities: timestamps, message ids, and default paths.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as Unix milliseconds.
#[must_use]
pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Current time as Unix seconds.
#[must_use]
pub fn timestamp_secs() -> u64 {
    timestamp_ms() / 1000
}

/// Generate a process-unique message id.
///
/// Combines the current millisecond timestamp with a monotonic counter so
/// ids stay unique even when generated within the same millisecond.
#[must_use]
pub fn generate_message_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("msg-{}-{seq}", timestamp_ms())
}

/// The user's home directory, falling back to the current directory.
#[must_use]
pub fn home_dir() -> PathBuf {
    dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Root directory for gembot state (`~/.gembot`).
#[must_use]
pub fn config_dir() -> PathBuf {
    home_dir().join(".gembot")
}

/// Default path of the configuration file.
#[must_use]
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Default directory for per-user session files.
#[must_use]
pub fn sessions_dir() -> PathBuf {
    config_dir().join("sessions")
}

/// Truncate a string to at most `max_chars` characters, appending an
/// ellipsis when truncation happened.
#[must_use]
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_is_recent() {
        // Anything after 2020 is plausible; zero would mean a broken clock path.
        assert!(timestamp_ms() > 1_577_836_800_000);
    }

    #[test]
    fn test_message_id_uniqueness() {
        let a = generate_message_id();
        let b = generate_message_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate_str("hello", 10), "hello");
        assert_eq!(truncate_str("hello world", 5), "hello…");
    }

    #[test]
    fn test_default_paths() {
        assert!(config_path().ends_with("config.json"));
        assert!(sessions_dir().ends_with("sessions"));
    }
}
