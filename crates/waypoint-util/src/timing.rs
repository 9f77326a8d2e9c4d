//! RAII timing for long-running workspace operations.
//!
//! ```rust,ignore
//! use waypoint_util::timing::{Operation, TimingGuard};
//!
//! async fn rollback(message_id: &str) {
//!     let timing = TimingGuard::new(Operation::Rollback, message_id);
//!     // ... apply file operations ...
//!     if failed {
//!         timing.fail();
//!     }
//!     // Duration and outcome are logged when `timing` is dropped
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Operations measured by [`TimingGuard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Snapshot,
    Restore,
    Backup,
    BackupRestore,
    Rollback,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Snapshot => "snapshot",
            Operation::Restore => "restore",
            Operation::Backup => "backup",
            Operation::BackupRestore => "backup_restore",
            Operation::Rollback => "rollback",
        }
    }

    /// Completions faster than this are logged at debug level.
    fn quiet_below(&self) -> Duration {
        match self {
            // Rollbacks are rare and user-initiated; always report them.
            Operation::Rollback => Duration::ZERO,
            _ => Duration::from_millis(100),
        }
    }
}

/// Logs how long an operation took when dropped.
///
/// Completions slower than the slow threshold (5s by default) are logged
/// at warn level, failures always are.
pub struct TimingGuard {
    operation: Operation,
    /// Entity the operation works on (a message, snapshot or backup id).
    subject: String,
    start: Instant,
    slow_after: Duration,
    failed: AtomicBool,
}

impl TimingGuard {
    pub fn new(operation: Operation, subject: impl Into<String>) -> Self {
        let subject = subject.into();
        debug!(operation = operation.as_str(), subject = %subject, "Starting operation");
        Self {
            operation,
            subject,
            start: Instant::now(),
            slow_after: Duration::from_secs(5),
            failed: AtomicBool::new(false),
        }
    }

    /// Override the slow-operation threshold.
    pub fn slow_after(mut self, threshold: Duration) -> Self {
        self.slow_after = threshold;
        self
    }

    /// Record that the operation failed.
    pub fn fail(&self) {
        self.failed.store(true, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let operation = self.operation.as_str();
        let subject = self.subject.as_str();

        if self.failed.load(Ordering::Relaxed) {
            warn!(operation, subject, duration_ms, "Operation failed");
        } else if elapsed >= self.slow_after {
            warn!(operation, subject, duration_ms, "Slow operation completed");
        } else if elapsed >= self.operation.quiet_below() {
            info!(operation, subject, duration_ms, "Operation completed");
        } else {
            debug!(operation, subject, duration_ms, "Operation completed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_elapsed_advances() {
        let guard = TimingGuard::new(Operation::Snapshot, "msg_1");
        sleep(Duration::from_millis(10));
        assert!(guard.elapsed_ms() >= 10);
        assert!(guard.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_failed_flag() {
        let guard = TimingGuard::new(Operation::Rollback, "msg_1").slow_after(Duration::from_secs(1));
        assert!(!guard.failed.load(Ordering::Relaxed));
        guard.fail();
        assert!(guard.failed.load(Ordering::Relaxed));
    }

    #[test]
    fn test_operation_names() {
        assert_eq!(Operation::BackupRestore.as_str(), "backup_restore");
        assert_eq!(Operation::Rollback.quiet_below(), Duration::ZERO);
        assert_eq!(Operation::Restore.quiet_below(), Duration::from_millis(100));
    }
}
