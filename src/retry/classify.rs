//! Tool Error Classification
//!
//! Error vocabulary for toolbox units of work and the retry wrappers that
//! decide, per domain, which of those errors are worth another attempt.

use std::future::Future;
use std::io;
use thiserror::Error;

use super::config::RetryConfiguration;
use super::executor::retry;

/// Errors raised by individual tools (encryption, conversions, network calls, file IO)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    // Caller errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    // Transient errors
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("File busy: {0}")]
    FileBusy(String),

    // Tool logic errors
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Which kind of work a retry wrapper guards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDomain {
    Tool,
    Network,
    File,
}

impl RetryDomain {
    /// Fixed retry policy for this domain
    pub fn configuration(self) -> RetryConfiguration {
        match self {
            Self::Tool => RetryConfiguration::default(),
            Self::Network => RetryConfiguration::aggressive(),
            Self::File => RetryConfiguration::conservative(),
        }
    }
}

impl ToolError {
    /// Whether another attempt could succeed when the work belongs to `domain`
    pub fn is_retryable_for(&self, domain: RetryDomain) -> bool {
        match self {
            Self::InvalidInput(_)
            | Self::UnsupportedFormat(_)
            | Self::PermissionDenied(_)
            | Self::FileNotFound(_)
            | Self::ProcessingFailed(_) => false,
            Self::ResourceUnavailable(_) => true,
            Self::NetworkUnavailable(_) | Self::Timeout(_) => {
                matches!(domain, RetryDomain::Tool | RetryDomain::Network)
            }
            Self::FileBusy(_) => matches!(domain, RetryDomain::Tool | RetryDomain::File),
        }
    }
}

impl From<io::Error> for ToolError {
    fn from(err: io::Error) -> Self {
        let message = err.to_string();
        match err.kind() {
            io::ErrorKind::NotFound => ToolError::FileNotFound(message),
            io::ErrorKind::PermissionDenied => ToolError::PermissionDenied(message),
            io::ErrorKind::TimedOut => ToolError::Timeout(message),
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => ToolError::FileBusy(message),
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::BrokenPipe => ToolError::NetworkUnavailable(message),
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => {
                ToolError::InvalidInput(message)
            }
            io::ErrorKind::Unsupported => ToolError::UnsupportedFormat(message),
            io::ErrorKind::OutOfMemory => ToolError::ResourceUnavailable(message),
            _ => ToolError::ProcessingFailed(message),
        }
    }
}

/// Retry `operation` with `config`, classifying errors as `domain` does
pub async fn retry_in_domain<T, F, Fut>(
    domain: RetryDomain,
    config: &RetryConfiguration,
    operation: F,
) -> Result<T, ToolError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ToolError>>,
{
    retry(config, move |e: &ToolError| e.is_retryable_for(domain), operation).await
}

/// Retry a tool invocation with the default policy
pub async fn retry_tool_operation<T, F, Fut>(operation: F) -> Result<T, ToolError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ToolError>>,
{
    let domain = RetryDomain::Tool;
    retry_in_domain(domain, &domain.configuration(), operation).await
}

/// Retry a network call with the aggressive policy
pub async fn retry_network_operation<T, F, Fut>(operation: F) -> Result<T, ToolError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ToolError>>,
{
    let domain = RetryDomain::Network;
    retry_in_domain(domain, &domain.configuration(), operation).await
}

/// Retry a file operation with the conservative policy
pub async fn retry_file_operation<T, F, Fut>(operation: F) -> Result<T, ToolError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ToolError>>,
{
    let domain = RetryDomain::File;
    retry_in_domain(domain, &domain.configuration(), operation).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[test]
    fn test_caller_errors_never_retry() {
        let errors = [
            ToolError::InvalidInput("bad key".into()),
            ToolError::UnsupportedFormat("tiff".into()),
            ToolError::PermissionDenied("/etc/shadow".into()),
            ToolError::FileNotFound("missing.png".into()),
            ToolError::ProcessingFailed("decoder crashed".into()),
        ];
        for err in &errors {
            for domain in [RetryDomain::Tool, RetryDomain::Network, RetryDomain::File] {
                assert!(!err.is_retryable_for(domain), "{:?} in {:?}", err, domain);
            }
        }
    }

    #[test]
    fn test_transient_errors_by_domain() {
        let unavailable = ToolError::ResourceUnavailable("gpu".into());
        let network = ToolError::NetworkUnavailable("dns".into());
        let busy = ToolError::FileBusy("locked".into());

        assert!(unavailable.is_retryable_for(RetryDomain::File));
        assert!(network.is_retryable_for(RetryDomain::Network));
        assert!(!network.is_retryable_for(RetryDomain::File));
        assert!(busy.is_retryable_for(RetryDomain::File));
        assert!(!busy.is_retryable_for(RetryDomain::Network));
        assert!(ToolError::Timeout("slow".into()).is_retryable_for(RetryDomain::Tool));
    }

    #[test]
    fn test_domain_configurations() {
        assert_eq!(RetryDomain::Tool.configuration(), RetryConfiguration::default());
        assert_eq!(RetryDomain::Network.configuration(), RetryConfiguration::aggressive());
        assert_eq!(RetryDomain::File.configuration(), RetryConfiguration::conservative());
    }

    #[test]
    fn test_from_io_error() {
        let err: ToolError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, ToolError::FileNotFound(_)));

        let err: ToolError = io::Error::new(io::ErrorKind::ConnectionRefused, "refused").into();
        assert!(matches!(err, ToolError::NetworkUnavailable(_)));

        let err: ToolError = io::Error::new(io::ErrorKind::WouldBlock, "locked").into();
        assert!(matches!(err, ToolError::FileBusy(_)));

        let err: ToolError = io::Error::new(io::ErrorKind::InvalidData, "garbage").into();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_retry_in_domain_retries_transient() {
        let calls = AtomicU32::new(0);
        let config = RetryConfiguration::fixed(3, Duration::from_millis(1));

        let result = retry_in_domain(RetryDomain::Network, &config, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ToolError::Timeout("first try".into()))
                } else {
                    Ok("payload")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("payload"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_wrappers_fail_fast_on_invalid_input() {
        let calls = AtomicU32::new(0);
        let result: Result<(), ToolError> = retry_network_operation(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ToolError::InvalidInput("not a url".into())) }
        })
        .await;

        assert!(matches!(result, Err(ToolError::InvalidInput(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let result = retry_file_operation(|| async {
            Err::<(), _>(ToolError::UnsupportedFormat("heic".into()))
        })
        .await;
        assert!(matches!(result, Err(ToolError::UnsupportedFormat(_))));

        let result = retry_tool_operation(|| async { Ok::<_, ToolError>(7) }).await;
        assert_eq!(result, Ok(7));
    }
}
