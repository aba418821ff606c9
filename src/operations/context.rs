//! Operation Context
//!
//! What a unit of work sees of the manager: a progress reporter and a
//! cooperative cancellation query.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::error::OperationError;
use super::manager::Registry;

/// Handed to every unit of work started through the progress-aware APIs
///
/// Cloning is cheap; clones report into the same operation.
#[derive(Clone)]
pub struct OperationContext {
    id: Arc<str>,
    serial: u64,
    registry: Arc<Registry>,
    cancel_token: CancellationToken,
}

impl OperationContext {
    pub(crate) fn new(
        id: &str,
        serial: u64,
        registry: Arc<Registry>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            id: Arc::from(id),
            serial,
            registry,
            cancel_token,
        }
    }

    /// ID of the operation this context belongs to
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Report progress in [0, 1]; out-of-range values are clamped
    ///
    /// Reports after the operation has finished or been cancelled are ignored.
    pub fn report(&self, progress: f64) {
        self.registry.report_progress(&self.id, self.serial, progress);
    }

    /// Poll point for cooperative cancellation
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Fails with `OperationError::Cancelled` once cancellation was requested
    pub fn check_cancelled(&self) -> anyhow::Result<()> {
        if self.is_cancelled() {
            return Err(OperationError::Cancelled.into());
        }
        Ok(())
    }

    /// Resolves when cancellation is requested
    pub async fn cancelled(&self) {
        self.cancel_token.cancelled().await
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel_token
    }
}

impl std::fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationContext")
            .field("id", &self.id)
            .field("serial", &self.serial)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
