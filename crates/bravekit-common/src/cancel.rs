//! Cooperative cancellation shared between the interrupt watcher and the
//! deployment pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{BraveError, Result};

/// A cloneable flag observed by every pipeline step.
///
/// All clones share one flag. Cancelling is idempotent: only the first call
/// flips it, later calls report `false`.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates an uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token. Returns `true` only for the call that flipped it.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst)
    }

    /// Whether the token has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns [`BraveError::Cancelled`] for `operation` if cancelled.
    ///
    /// # Errors
    ///
    /// Fails when the token has been cancelled.
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(BraveError::Cancelled {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }

    /// Folds an operation result with the token state.
    ///
    /// A call that nominally succeeded is still a failure when the token was
    /// cancelled while it ran.
    ///
    /// # Errors
    ///
    /// Returns the operation's error, or [`BraveError::Cancelled`].
    pub fn settle<T>(&self, operation: &str, result: Result<T>) -> Result<T> {
        let value = result?;
        self.check(operation)?;
        Ok(value)
    }
}

/// Installs the process-wide SIGINT/SIGTERM watcher for `token`.
///
/// The watcher is owned by the `ctrlc` handler thread for the lifetime of the
/// process. The first signal cancels the token and logs; repeated signals
/// are no-ops.
///
/// # Errors
///
/// Returns [`BraveError::Validation`] if a handler is already installed.
pub fn install_interrupt_handler(token: &CancellationToken) -> Result<()> {
    let token = token.clone();
    ctrlc::set_handler(move || {
        if token.cancel() {
            tracing::warn!("interrupt received, cancelling and cleaning up artefacts");
        }
    })
    .map_err(|e| BraveError::validation(format!("failed to install interrupt handler: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        assert!(token.cancel());
        assert!(clone.is_cancelled());
    }

    #[test]
    fn cancel_triggers_once() {
        let token = CancellationToken::new();
        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(!token.clone().cancel());
    }

    #[test]
    fn settle_turns_success_into_cancellation() {
        let token = CancellationToken::new();
        assert_eq!(token.settle("launch", Ok(7)).expect("ok"), 7);
        let _ = token.cancel();
        let err = token.settle("launch", Ok(7)).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn settle_keeps_original_error() {
        let token = CancellationToken::new();
        let _ = token.cancel();
        let err = token
            .settle::<()>("launch", Err(BraveError::validation("boom")))
            .unwrap_err();
        assert!(matches!(err, BraveError::Validation { .. }));
    }
}
