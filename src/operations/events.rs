//! Operation Events
//!
//! Lifecycle events broadcast by the operation manager so a UI toast layer or
//! performance logger can observe outcomes without touching the registry.

use serde::{Deserialize, Serialize};

/// Events emitted over the manager's broadcast channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OperationEvent {
    /// Operation registered and started
    Registered { operation_id: String },

    /// Progress reported by the unit of work
    Progress { operation_id: String, progress: f64 },

    /// Operation finished with a value
    Completed {
        operation_id: String,
        duration_ms: u64,
    },

    /// Operation finished with an error
    Failed {
        operation_id: String,
        error: String,
        duration_ms: u64,
    },

    /// Operation was cancelled
    Cancelled {
        operation_id: String,
        duration_ms: u64,
    },
}

impl OperationEvent {
    /// Get the operation ID from any event
    pub fn operation_id(&self) -> &str {
        match self {
            Self::Registered { operation_id } => operation_id,
            Self::Progress { operation_id, .. } => operation_id,
            Self::Completed { operation_id, .. } => operation_id,
            Self::Failed { operation_id, .. } => operation_id,
            Self::Cancelled { operation_id, .. } => operation_id,
        }
    }

    /// Whether this event closes the operation's lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }

    /// Duration carried by terminal events
    pub fn duration_ms(&self) -> Option<u64> {
        match self {
            Self::Completed { duration_ms, .. }
            | Self::Failed { duration_ms, .. }
            | Self::Cancelled { duration_ms, .. } => Some(*duration_ms),
            Self::Registered { .. } | Self::Progress { .. } => None,
        }
    }

    /// Get the global event name (for broadcast)
    pub fn global_event_name(&self) -> &'static str {
        match self {
            Self::Registered { .. } => "operation-registered",
            Self::Progress { .. } => "operation-progress",
            Self::Completed { .. } => "operation-completed",
            Self::Failed { .. } => "operation-failed",
            Self::Cancelled { .. } => "operation-cancelled",
        }
    }

    /// Get the per-operation event name
    pub fn event_name(&self) -> String {
        format!("{}:{}", self.global_event_name(), self.operation_id())
    }

    /// JSON payload for forwarding to a frontend
    pub fn payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({ "operation_id": self.operation_id() })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let event = OperationEvent::Completed {
            operation_id: "encrypt-42".to_string(),
            duration_ms: 12,
        };

        assert_eq!(event.event_name(), "operation-completed:encrypt-42");
        assert_eq!(event.global_event_name(), "operation-completed");
        assert_eq!(event.operation_id(), "encrypt-42");
        assert!(event.is_terminal());
        assert_eq!(event.duration_ms(), Some(12));
    }

    #[test]
    fn test_payload_shape() {
        let event = OperationEvent::Progress {
            operation_id: "qr".to_string(),
            progress: 0.5,
        };

        let payload = event.payload();
        assert_eq!(payload["type"], "progress");
        assert_eq!(payload["operation_id"], "qr");
        assert_eq!(payload["progress"], 0.5);
        assert!(!event.is_terminal());
    }
}
