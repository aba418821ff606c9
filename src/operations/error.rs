//! Operation Error Types

use thiserror::Error;

/// Errors surfaced by the operation manager
///
/// `DuplicateOperation` is returned synchronously by the `execute*` family.
/// Every other variant arrives through the completion channel.
#[derive(Error, Debug)]
pub enum OperationError {
    #[error("Operation already running: {0}")]
    DuplicateOperation(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    WorkFailure(#[source] anyhow::Error),

    #[error("Retries exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("Batch item {id} failed: {source}")]
    BatchItemFailed {
        id: String,
        #[source]
        source: Box<OperationError>,
    },
}

impl OperationError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Short name of the outcome, used in events and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateOperation(_) => "duplicate",
            Self::Cancelled => "cancelled",
            Self::WorkFailure(_) => "failed",
            Self::RetryExhausted { .. } => "retry_exhausted",
            Self::BatchItemFailed { .. } => "batch_item_failed",
        }
    }

    /// The error raised by the unit of work itself, if any
    pub fn work_error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::WorkFailure(err) | Self::RetryExhausted { source: err, .. } => Some(err),
            Self::BatchItemFailed { source, .. } => source.work_error(),
            Self::DuplicateOperation(_) | Self::Cancelled => None,
        }
    }
}

impl From<OperationError> for String {
    fn from(err: OperationError) -> String {
        err.to_string()
    }
}

/// Result type alias for operation outcomes
pub type OperationResult<T> = Result<T, OperationError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::ToolError;

    #[test]
    fn test_work_failure_displays_inner_error() {
        let err = OperationError::WorkFailure(anyhow::anyhow!("boom"));
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.kind(), "failed");
    }

    #[test]
    fn test_work_error_downcasts() {
        let err = OperationError::BatchItemFailed {
            id: "resize-3".into(),
            source: Box::new(OperationError::RetryExhausted {
                attempts: 3,
                source: ToolError::Timeout("upload".into()).into(),
            }),
        };

        let inner = err.work_error().unwrap();
        assert_eq!(
            inner.downcast_ref::<ToolError>(),
            Some(&ToolError::Timeout("upload".into()))
        );
        assert!(err.to_string().contains("resize-3"));
    }
}
