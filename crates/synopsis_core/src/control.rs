//! Cooperative cancellation and time budgets for long operations.
//!
//! Batch import and assembly check the control between records or
//! groupings. Work committed before the check remains valid.

use crate::error::{CoreError, CoreResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A cooperative cancellation token shared between the caller and a worker.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancellation token plus optional deadline.
#[derive(Debug, Clone, Default)]
pub struct OperationControl {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl OperationControl {
    pub fn new(token: CancellationToken, deadline: Option<Instant>) -> Self {
        Self { token, deadline }
    }

    /// Control with a deadline `timeout` from now.
    pub fn with_timeout(token: CancellationToken, timeout: Duration) -> Self {
        Self::new(token, Some(Instant::now() + timeout))
    }

    /// Control derived from an optional millisecond budget.
    pub fn from_budget_ms(token: CancellationToken, timeout_ms: Option<u64>) -> Self {
        match timeout_ms {
            Some(ms) => Self::with_timeout(token, Duration::from_millis(ms)),
            None => Self::new(token, None),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Fails with `Cancelled` or `Timeout` when the operation must stop.
    pub fn checkpoint(&self, processed: usize) -> CoreResult<()> {
        if self.token.is_cancelled() {
            return Err(CoreError::Cancelled { processed });
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(CoreError::Timeout { processed });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{CancellationToken, OperationControl};
    use crate::error::CoreError;
    use std::time::{Duration, Instant};

    #[test]
    fn cloned_token_shares_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn checkpoint_reports_cancellation_with_progress() {
        let token = CancellationToken::new();
        let control = OperationControl::new(token.clone(), None);
        control.checkpoint(0).unwrap();
        token.cancel();
        assert!(matches!(
            control.checkpoint(3),
            Err(CoreError::Cancelled { processed: 3 })
        ));
    }

    #[test]
    fn elapsed_deadline_times_out() {
        let control = OperationControl::new(
            CancellationToken::new(),
            Some(Instant::now() - Duration::from_millis(1)),
        );
        assert!(matches!(
            control.checkpoint(7),
            Err(CoreError::Timeout { processed: 7 })
        ));
    }
}
