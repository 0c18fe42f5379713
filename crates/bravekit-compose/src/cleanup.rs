//! Deferred cleanups of a compose run, unwound last-in first-out.

use std::fmt;

use crate::orchestrator::ComposeDriver;

/// Something a compose run created and may have to remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupAction {
    /// Delete an image from the local store.
    DeleteImage(String),
    /// Delete a deployed unit.
    DeleteUnit(String),
}

impl fmt::Display for CleanupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeleteImage(image) => write!(f, "delete image {image}"),
            Self::DeleteUnit(unit) => write!(f, "delete unit {unit}"),
        }
    }
}

/// When a cleanup runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum When {
    /// Only if the run failed.
    OnFailure,
    /// Whatever the outcome.
    Always,
}

/// Cleanups in acquisition order.
#[derive(Debug, Default)]
pub struct CleanupStack {
    entries: Vec<(CleanupAction, When)>,
}

impl CleanupStack {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a cleanup.
    pub fn push(&mut self, action: CleanupAction, when: When) {
        tracing::debug!(action = %action, ?when, "cleanup registered");
        self.entries.push((action, when));
    }

    /// Number of registered cleanups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs the cleanups that apply, newest first. Failures are logged and
    /// do not stop the unwind. Returns the actions that ran.
    pub fn unwind<D: ComposeDriver + ?Sized>(self, driver: &D, failed: bool) -> Vec<CleanupAction> {
        let mut ran = Vec::new();
        for (action, when) in self.entries.into_iter().rev() {
            if when == When::OnFailure && !failed {
                continue;
            }
            let result = match &action {
                CleanupAction::DeleteImage(image) => driver.delete_image(image),
                CleanupAction::DeleteUnit(unit) => driver.delete_unit(unit),
            };
            match result {
                Ok(()) => tracing::info!(action = %action, "cleanup done"),
                Err(e) => tracing::warn!(action = %action, error = %e, "cleanup failed"),
            }
            ran.push(action);
        }
        ran
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::testing::RecordingDriver;

    fn stack() -> CleanupStack {
        let mut stack = CleanupStack::new();
        stack.push(CleanupAction::DeleteImage("base/1.0".into()), When::Always);
        stack.push(CleanupAction::DeleteImage("web/1.0".into()), When::OnFailure);
        stack.push(CleanupAction::DeleteUnit("web".into()), When::OnFailure);
        stack
    }

    #[test]
    fn failure_unwinds_everything_newest_first() {
        let driver = RecordingDriver::default();
        let ran = stack().unwind(&driver, true);
        assert_eq!(
            ran,
            [
                CleanupAction::DeleteUnit("web".into()),
                CleanupAction::DeleteImage("web/1.0".into()),
                CleanupAction::DeleteImage("base/1.0".into()),
            ]
        );
        assert_eq!(
            driver.calls(),
            ["delete_unit web", "delete_image web/1.0", "delete_image base/1.0"]
        );
    }

    #[test]
    fn success_runs_only_always_entries() {
        let driver = RecordingDriver::default();
        let ran = stack().unwind(&driver, false);
        assert_eq!(ran, [CleanupAction::DeleteImage("base/1.0".into())]);
    }

    #[test]
    fn failed_cleanup_does_not_stop_unwind() {
        let driver = RecordingDriver {
            failing_cleanups: true,
            ..RecordingDriver::default()
        };
        let ran = stack().unwind(&driver, true);
        assert_eq!(ran.len(), 3);
    }
}
