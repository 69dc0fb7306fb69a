//! Cooperative timeout terminator
//!
//! Checked before a segment read is issued and again when a suspended read
//! resumes. A suspended disk read races the deadline, so a timed-out caller
//! gets `Timeout` without waiting for the I/O to finish.

use std::time::Duration;

use tokio::time::Instant;

/// Deadline shared by every read of one logical request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutTerminator {
    deadline: Instant,
}

impl TimeoutTerminator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_timeout(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Time left before the deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}
