//! Wall-clock deadline for one reconciliation pass
//!
//! Git invocations race their child process against [`Deadline::instant`]
//! and kill the child themselves when the deadline wins (see
//! [`crate::git::GitCli`]). [`Deadline::run`] bounds everything else in the
//! pass, such as tracker API calls, with the same instant plus a short grace
//! so an in-flight kill can finish reaping its child first.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::{Error, Result};

/// Time allowed after the deadline for a killed git child to be reaped
pub const REAP_GRACE: Duration = Duration::from_secs(2);

/// Longest budget a pass may be given
pub const MAX_BUDGET: Duration = Duration::from_secs(24 * 60 * 60);

/// A fixed point in time by which the current pass must finish
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    /// A deadline `budget` from now, capped at [`MAX_BUDGET`]
    pub fn after(budget: Duration) -> Self {
        let budget = budget.min(MAX_BUDGET);
        let now = Instant::now();
        Self {
            at: now.checked_add(budget).unwrap_or(now),
            budget,
        }
    }

    /// The instant the deadline expires
    pub fn instant(&self) -> Instant {
        self.at
    }

    /// The total budget this deadline was created with
    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// The error reported when this deadline expires
    pub fn error(&self) -> Error {
        Error::Timeout(self.budget)
    }

    /// Run `work` to completion or fail with [`Error::Timeout`]
    pub async fn run<T, F>(&self, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_expired() {
            return Err(self.error());
        }

        match tokio::time::timeout_at(self.at.checked_add(REAP_GRACE).unwrap_or(self.at), work).await {
            Ok(result) => result,
            Err(_) => Err(self.error()),
        }
    }
}
