//! Error types for container manager operations

use crate::engine::EngineError;
use std::fmt;

/// Result type for manager operations
pub type Result<T> = std::result::Result<T, ManagerError>;

/// Mutating operation guarded by a pending set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Start,
    Stop,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Start => write!(f, "start"),
            Operation::Stop => write!(f, "stop"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// Another start/stop for the same key has not finished yet
    #[error("Operation in progress: {operation} already running for {key}")]
    OperationInProgress { operation: Operation, key: String },

    /// The label scheme admits at most one match; more means tampering
    #[error("Multiple results found: expected at most one container, got {count}")]
    MultipleResultsFound { count: usize },

    #[error("Engine error during {operation} of {target}: {source}")]
    Engine {
        operation: &'static str,
        target: String,
        #[source]
        source: EngineError,
    },

    #[error("Cannot resolve endpoint of container {container_id}: {reason}")]
    EndpointResolution { container_id: String, reason: String },
}

impl ManagerError {
    /// Adapter for `map_err` that tags an engine failure with its context.
    pub(crate) fn engine(
        operation: &'static str,
        target: impl Into<String>,
    ) -> impl FnOnce(EngineError) -> ManagerError {
        let target = target.into();
        move |source| ManagerError::Engine {
            operation,
            target,
            source,
        }
    }

    /// True when the engine reported the image or container as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ManagerError::Engine { source, .. } if source.is_not_found())
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, ManagerError::OperationInProgress { .. })
    }
}
