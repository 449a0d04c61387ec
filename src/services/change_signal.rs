//! Change-signal file.
//!
//! A small file adjacent to the state store whose content is a monotonic
//! decimal revision token. Every successful mutation truncates-and-writes
//! a new token; the notifier (in this process and in any other server
//! process sharing the store) watches the file to learn that state
//! changed without polling the database.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Writer/reader for the shared revision cookie.
///
/// Revisions are monotonic across cooperating processes: each bump takes
/// `max(file, memory) + 1`, so two servers sharing a store can interleave
/// bumps without going backwards.
pub struct ChangeSignal {
    path: PathBuf,
    last: AtomicU64,
}

impl ChangeSignal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let last = AtomicU64::new(read_revision(&path).unwrap_or(0));
        Self { path, last }
    }

    /// Path other components (the notifier's watcher) observe.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the next revision. Failures are logged and swallowed: a lost
    /// bump is recovered by the notifier's fallback poll.
    pub fn bump(&self) -> u64 {
        let on_disk = read_revision(&self.path).unwrap_or(0);
        let mem = self.last.load(Ordering::Acquire);
        let next = on_disk.max(mem) + 1;
        self.last.store(next, Ordering::Release);

        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(err) = std::fs::write(&self.path, next.to_string()) {
            tracing::warn!(path = %self.path.display(), error = %err, "Failed to write change signal");
        }
        next
    }

    /// Current revision as visible on disk.
    pub fn current(&self) -> u64 {
        read_revision(&self.path).unwrap_or(0)
    }
}

fn read_revision(path: &Path) -> Option<u64> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_is_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let signal = ChangeSignal::new(dir.path().join("state.signal"));

        let a = signal.bump();
        let b = signal.bump();
        let c = signal.bump();
        assert!(a < b && b < c);
        assert_eq!(signal.current(), c);
    }

    #[test]
    fn test_two_writers_share_monotonicity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.signal");
        let one = ChangeSignal::new(&path);
        let two = ChangeSignal::new(&path);

        let a = one.bump();
        let b = two.bump();
        let c = one.bump();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_missing_file_reads_zero() {
        let dir = tempfile::tempdir().unwrap();
        let signal = ChangeSignal::new(dir.path().join("absent.signal"));
        assert_eq!(signal.current(), 0);
        assert_eq!(signal.bump(), 1);
    }
}
