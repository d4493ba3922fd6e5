//! Aggregation of partial reconcile outcomes
//!
//! Independent sub-steps of one pass each produce a [`ReconcileResult`];
//! merging keeps the first error while still letting every step run.

use std::time::Duration;

use kube::runtime::controller::Action;

use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub struct ReconcileResult {
    pub error: Option<Error>,
    pub requeue_now: bool,
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn error(err: Error) -> Self {
        Self {
            error: Some(err),
            ..Default::default()
        }
    }

    pub fn requeue_now() -> Self {
        Self {
            requeue_now: true,
            ..Default::default()
        }
    }

    pub fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue_after: Some(delay),
            ..Default::default()
        }
    }

    /// Combine two outcomes: first error wins, requeue-now is sticky, and the
    /// shorter delay wins unless requeue-now makes delays moot.
    pub fn merge(self, other: ReconcileResult) -> ReconcileResult {
        let requeue_now = self.requeue_now || other.requeue_now;
        let requeue_after = if requeue_now {
            None
        } else {
            match (self.requeue_after, other.requeue_after) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            }
        };
        ReconcileResult {
            error: self.error.or(other.error),
            requeue_now,
            requeue_after,
        }
    }

    /// Record an error in place, keeping any earlier one
    pub fn merge_error(&mut self, err: Error) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Translate into what a kube-runtime reconciler returns
    pub fn into_action(self) -> Result<Action> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if self.requeue_now {
            return Ok(Action::requeue(Duration::ZERO));
        }
        Ok(match self.requeue_after {
            Some(delay) => Action::requeue(delay),
            None => Action::await_change(),
        })
    }
}

impl From<Result<()>> for ReconcileResult {
    fn from(res: Result<()>) -> Self {
        match res {
            Ok(()) => ReconcileResult::ok(),
            Err(err) => ReconcileResult::error(err),
        }
    }
}

/// Accumulates the outcomes of a sequence of sub-steps
#[derive(Debug, Default)]
pub struct Builder {
    result: ReconcileResult,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, other: impl Into<ReconcileResult>) -> &mut Self {
        let current = std::mem::take(&mut self.result);
        self.result = current.merge(other.into());
        self
    }

    pub fn finish(self) -> ReconcileResult {
        self.result
    }
}
