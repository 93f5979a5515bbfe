//! Process-level guard against crash-restart loops
//!
//! Transient storage failures never count towards the budget. Everything else
//! is recorded inside a rolling window and the process is told to exit only
//! once the number of failures inside that window exceeds the threshold.

use crate::error::HubError;
use crate::storage::retry::RetryClassifier;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// Outcome of recording a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalDecision {
    /// Keep running
    Continue,
    /// The failure budget has been exhausted
    Exit,
}

/// Bounded consecutive-fatal-error counter
pub struct FatalErrorGuard {
    max_errors: usize,
    window: Duration,
    recent: Mutex<VecDeque<Instant>>,
}

impl FatalErrorGuard {
    pub fn new(max_errors: usize, window: Duration) -> Self {
        Self {
            max_errors,
            window,
            recent: Mutex::new(VecDeque::new()),
        }
    }

    /// Record an uncaught failure and decide whether the process should exit
    pub fn record(&self, err: &HubError) -> FatalDecision {
        if RetryClassifier::global().is_retryable(err) {
            warn!(
                category = err.category(),
                error = %err,
                "Transient storage error reached the top level, continuing"
            );
            return FatalDecision::Continue;
        }
        self.record_at(Instant::now(), err)
    }

    fn record_at(&self, now: Instant, err: &HubError) -> FatalDecision {
        let mut recent = match self.recent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        while let Some(front) = recent.front() {
            if now.duration_since(*front) > self.window {
                recent.pop_front();
            } else {
                break;
            }
        }
        recent.push_back(now);

        let count = recent.len();
        if count > self.max_errors {
            error!(
                count,
                window_secs = self.window.as_secs(),
                error = %err,
                "Too many fatal errors inside the window, exiting"
            );
            FatalDecision::Exit
        } else {
            error!(
                count,
                max_errors = self.max_errors,
                category = err.category(),
                error = %err,
                "Fatal error recorded"
            );
            FatalDecision::Continue
        }
    }
}
