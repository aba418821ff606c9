//! Operations Module
//!
//! Background operation tracking for the toolbox.
//! Handles async execution, progress tracking, cooperative cancellation,
//! retries and order-preserving batches.

pub mod batch;
pub mod context;
pub mod error;
pub mod events;
pub mod manager;
pub mod ticket;
pub mod types;

pub use batch::BatchItem;
pub use context::OperationContext;
pub use error::{OperationError, OperationResult};
pub use events::OperationEvent;
pub use manager::OperationManager;
pub use ticket::OperationTicket;
pub use types::{ManagerStats, OperationInfo, OperationStatus};
