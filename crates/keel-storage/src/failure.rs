use keel_core::{FailurePolicy, StoreError};
use tracing::warn;

/// Applies the configured [`FailurePolicy`] to read-path decryption and decode failures.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FailureHandler {
    policy: FailurePolicy,
}

impl FailureHandler {
    pub(crate) fn new(policy: FailurePolicy) -> Self {
        Self { policy }
    }

    /// Resolve a failed read. Errors outside the policy's scope (storage I/O, for example)
    /// always propagate. `purge` deletes the offending entry and is only invoked for
    /// [`FailurePolicy::DeleteAndReturnEmpty`]; its own failure is logged and swallowed.
    pub(crate) fn recover<T>(
        &self,
        err: StoreError,
        purge: impl FnOnce() -> Result<(), StoreError>,
    ) -> Result<Option<T>, StoreError> {
        if !err.is_recoverable_read() {
            return Err(err);
        }

        match self.policy {
            FailurePolicy::Raise => Err(err),
            FailurePolicy::ReturnEmpty => {
                warn!(kind = ?err.kind(), "unreadable entry treated as absent");
                Ok(None)
            }
            FailurePolicy::DeleteAndReturnEmpty => {
                warn!(kind = ?err.kind(), "unreadable entry deleted");
                if let Err(purge_err) = purge() {
                    warn!(error = %purge_err, "failed to delete unreadable entry");
                }
                Ok(None)
            }
        }
    }
}
