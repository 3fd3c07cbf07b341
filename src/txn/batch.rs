//! Deferred Commit
//!
//! Groups several logical transactions into one physical commit. Each
//! finished batch either commits right away or pushes the deadline of the
//! next commit no later than its own delay.

use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct CommitSchedule {
    deadline: Option<Instant>,
}

impl CommitSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the end of a batch; returns true when a commit is due now
    pub fn end_batch(&mut self, max_delay: Duration, now: Instant) -> bool {
        if max_delay.is_zero() || self.deadline.is_some_and(|deadline| deadline <= now) {
            return true;
        }
        let due = now + max_delay;
        self.deadline = Some(match self.deadline {
            Some(deadline) => deadline.min(due),
            None => due,
        });
        false
    }

    /// Forget the deadline once a commit happened
    pub fn clear(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}
