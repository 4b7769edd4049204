//! Per-call cancellation and priority.

use crate::error::{CancelCause, Error, Result};
use std::future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// A validated scheduling priority. Larger is more urgent.
///
/// Priority only orders admission to the OLAP engine; it never changes what
/// a query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(u32);

impl Priority {
    /// The lowest priority.
    pub const LOWEST: Priority = Priority(0);

    /// Validate a caller-supplied priority against `max`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPriority` if `value` is negative or above `max`.
    pub fn new(value: i64, max: u32) -> Result<Self> {
        u32::try_from(value)
            .ok()
            .filter(|v| *v <= max)
            .map(Priority)
            .ok_or(Error::InvalidPriority(value))
    }

    /// The numeric value.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

/// The caller's cancellation signal and optional deadline for one call.
///
/// Cloning shares the signal. A context created with
/// [`QueryContext::background`] is never cancelled.
#[derive(Debug, Clone)]
pub struct QueryContext {
    cancelled: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

/// Cancels the [`QueryContext`] it was created with. Dropping the handle
/// without calling [`CancelHandle::cancel`] leaves the context live.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancel the context and all its clones.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl QueryContext {
    /// A context that is never cancelled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self {
            cancelled: rx,
            deadline: None,
        }
    }

    /// A context plus the handle that cancels it.
    #[must_use]
    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let ctx = Self {
            cancelled: rx,
            deadline: None,
        };
        (ctx, CancelHandle { tx })
    }

    /// Expire `timeout` from now (or earlier if a deadline is already set).
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Expire at `deadline` (or earlier if a deadline is already set).
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(self.deadline.map_or(deadline, |d| d.min(deadline)));
        self
    }

    /// The deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fail fast if the context is already done.
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` with the cause.
    pub fn check(&self) -> Result<()> {
        if *self.cancelled.borrow() {
            return Err(Error::Cancelled(CancelCause::Cancelled));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Error::Cancelled(CancelCause::DeadlineExceeded));
        }
        Ok(())
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> CancelCause {
        let mut rx = self.cancelled.clone();
        let cancelled = async move {
            if rx.wait_for(|c| *c).await.is_err() {
                // Handle dropped without cancelling: never fires
                future::pending::<()>().await;
            }
        };

        match self.deadline {
            Some(deadline) => tokio::select! {
                () = cancelled => CancelCause::Cancelled,
                () = tokio::time::sleep_until(deadline) => CancelCause::DeadlineExceeded,
            },
            None => {
                cancelled.await;
                CancelCause::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, true)]
    #[case(10, true)]
    #[case(100, true)]
    #[case(101, false)]
    #[case(-1, false)]
    fn test_priority_range(#[case] value: i64, #[case] ok: bool) {
        let result = Priority::new(value, 100);
        assert_eq!(result.is_ok(), ok);
        if !ok {
            assert!(matches!(result, Err(Error::InvalidPriority(v)) if v == value));
        }
    }

    #[tokio::test]
    async fn test_background_is_live() {
        let ctx = QueryContext::background();
        assert!(ctx.check().is_ok());
        let fired = tokio::time::timeout(Duration::from_millis(20), ctx.done()).await;
        assert!(fired.is_err());
    }

    #[tokio::test]
    async fn test_cancel_fires_done() {
        let (ctx, handle) = QueryContext::with_cancel();
        let clone = ctx.clone();
        handle.cancel();

        assert_eq!(clone.done().await, CancelCause::Cancelled);
        assert!(matches!(
            ctx.check(),
            Err(Error::Cancelled(CancelCause::Cancelled))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires_done() {
        let ctx = QueryContext::background().with_timeout(Duration::from_secs(5));
        assert!(ctx.check().is_ok());
        assert_eq!(ctx.done().await, CancelCause::DeadlineExceeded);
        assert!(matches!(
            ctx.check(),
            Err(Error::Cancelled(CancelCause::DeadlineExceeded))
        ));
    }

    #[test]
    fn test_earlier_deadline_wins() {
        let now = Instant::now();
        let ctx = QueryContext::background()
            .with_deadline(now + Duration::from_secs(1))
            .with_deadline(now + Duration::from_secs(10));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(1)));
    }
}
