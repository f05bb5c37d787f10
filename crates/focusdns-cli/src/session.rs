//! Focus session collaborators for the engine

use colored::Colorize;
use focusdns_core::{BlockNotifier, SessionMonitor};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

/// A focus session that ends at a deadline or on interrupt
pub struct TimedSession {
    started: Instant,
    deadline: Option<Instant>,
    running: Arc<AtomicBool>,
    interruptions: AtomicU64,
}

impl TimedSession {
    /// Session lasting `minutes` (0 = until `running` is cleared)
    pub fn new(minutes: u64, running: Arc<AtomicBool>) -> Self {
        let started = Instant::now();
        let deadline = (minutes > 0)
            .then(|| started.checked_add(Duration::from_secs(minutes.saturating_mul(60))))
            .flatten();
        Self {
            started,
            deadline,
            running,
            interruptions: AtomicU64::new(0),
        }
    }

    /// Number of blocked attempts recorded so far
    pub fn interruptions(&self) -> u64 {
        self.interruptions.load(Ordering::Relaxed)
    }

    /// Time since the session started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left, if the session has a deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

impl SessionMonitor for TimedSession {
    fn should_remain_active(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && self.deadline.map_or(true, |deadline| Instant::now() < deadline)
    }

    fn record_interruption(&self, domain: &str) {
        let count = self.interruptions.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(domain, count, "Recorded interruption");
    }
}

/// Prints block notices to the terminal
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl BlockNotifier for ConsoleNotifier {
    fn show_blocked_notice(&self, domain: &str, reason: &str) {
        println!("{} {} {}", "BLOCKED".red().bold(), domain.bold(), format!("({reason})").dimmed());
    }

    fn blocking_unavailable(&self, reason: &str) {
        eprintln!("{} {}", "Website blocking unavailable:".red().bold(), reason);
    }
}

/// Detects modifications of a rules file by its mtime
pub struct RulesWatcher {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl RulesWatcher {
    /// Watch `path`, treating its current state as seen
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let last_modified = modified(&path);
        Self {
            path,
            last_modified,
        }
    }

    /// Watched path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file changed since the last call
    pub fn changed(&mut self) -> bool {
        let current = modified(&self.path);
        if current.is_none() && self.last_modified.is_some() {
            warn!(path = %self.path.display(), "Rules file disappeared, keeping current rules");
        }
        if current.is_some() && current != self.last_modified {
            self.last_modified = current;
            return true;
        }
        false
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_session_follows_flag() {
        let running = Arc::new(AtomicBool::new(true));
        let session = TimedSession::new(0, Arc::clone(&running));
        assert!(session.should_remain_active());
        assert!(session.remaining().is_none());

        running.store(false, Ordering::SeqCst);
        assert!(!session.should_remain_active());
    }

    #[test]
    fn test_timed_session_has_deadline() {
        let session = TimedSession::new(25, Arc::new(AtomicBool::new(true)));
        assert!(session.should_remain_active());
        let remaining = session.remaining().unwrap();
        assert!(remaining <= Duration::from_secs(25 * 60));
        assert!(remaining > Duration::from_secs(24 * 60));
    }

    #[test]
    fn test_interruptions_counted() {
        let session = TimedSession::new(0, Arc::new(AtomicBool::new(true)));
        session.record_interruption("video.example");
        session.record_interruption("video.example");
        assert_eq!(session.interruptions(), 2);
    }

    #[test]
    fn test_rules_watcher_detects_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, "[]").unwrap();

        let mut watcher = RulesWatcher::new(&path);
        assert!(!watcher.changed());

        let later = SystemTime::now() + Duration::from_secs(5);
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(later).unwrap();
        assert!(watcher.changed());
        assert!(!watcher.changed());
    }

    #[test]
    fn test_rules_watcher_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = RulesWatcher::new(dir.path().join("absent.json"));
        assert!(!watcher.changed());
    }
}
