// Toolbox operations core
//
// Tracks long-running units of work (encryption, batch conversions, network
// calls) with progress, cooperative cancellation and retry-with-backoff.

pub mod config;
pub mod logging;
pub mod operations;
pub mod retry;

pub use config::{ConfigError, CoreConfig, RetrySettings};
pub use operations::{
    BatchItem, ManagerStats, OperationContext, OperationError, OperationEvent, OperationInfo,
    OperationManager, OperationResult, OperationStatus, OperationTicket,
};
pub use retry::{
    retry, retry_always, retry_file_operation, retry_network_operation, retry_tool_operation,
    RetryConfiguration, RetryDomain, RetryExecutor, ToolError,
};
