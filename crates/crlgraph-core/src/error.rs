use thiserror::Error;

use crate::NodeId;

#[derive(Error, Debug)]
pub enum CrlGraphError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    #[error("Unknown type discriminator: {0}")]
    UnknownType(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timed out after {waited_ms}ms waiting for lock on node {node}")]
    LockTimeout { node: NodeId, waited_ms: u64 },

    #[error("Lock on node {node} is contended below a lock this transaction holds; release and retry")]
    LockOrder { node: NodeId },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Reactive callback failed: {0}")]
    CallbackFailed(String),
}

impl CrlGraphError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        CrlGraphError::InvalidArgument(msg.into())
    }

    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        CrlGraphError::InvalidOperation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, CrlGraphError>;
