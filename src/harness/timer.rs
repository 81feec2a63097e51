//! Deadline tracking for readiness polls

use std::time::{Duration, Instant};

/// A deadline that latches once reached
///
/// `expired` turns true once the deadline passes and stays true until
/// [`Timer::reset`] starts a fresh period.
#[derive(Debug)]
pub struct Timer {
    duration: Duration,
    /// `None` once expired
    deadline: Option<Instant>,
}

impl Timer {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            deadline: Some(Instant::now() + duration),
        }
    }

    /// Start a new period of the same duration from now
    pub fn reset(&mut self) {
        self.deadline = Some(Instant::now() + self.duration);
    }

    pub fn expired(&mut self) -> bool {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                self.deadline = None;
            }
        }
        self.deadline.is_none()
    }
}
