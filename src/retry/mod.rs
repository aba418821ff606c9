//! Retry Module
//!
//! Retry-with-backoff for transient failures:
//! - Validated retry policies with default/aggressive/conservative presets
//! - Exponential backoff with multiplicative jitter
//! - Predicate-driven retry executor with cooperative cancellation
//! - Domain wrappers for tool, network and file operations

pub mod classify;
pub mod config;
pub mod executor;

pub use classify::{
    retry_file_operation, retry_in_domain, retry_network_operation, retry_tool_operation,
    RetryDomain, ToolError,
};
pub use config::RetryConfiguration;
pub use executor::{retry, retry_always, RetryExecutor, RetryFailure};
