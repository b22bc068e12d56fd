//! Dispatch Errors

use std::any::Any;
use std::error::Error as StdError;
use std::sync::Arc;

/// Result alias used throughout the dispatch runtime
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors surfaced at the work item / sync boundary
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    /// The work item was cancelled before it delivered a result
    #[error("Work item was cancelled")]
    Cancelled,

    /// The block returned an error
    #[error("Block failed: {0}")]
    Failed(Arc<dyn StdError + Send + Sync>),

    /// The block panicked
    #[error("Block panicked: {0}")]
    Panicked(String),

    /// A bounded wait elapsed
    #[error("Timed out waiting for completion")]
    TimedOut,

    /// The OS refused to create a worker thread
    #[error("Failed to spawn thread: {0}")]
    Spawn(Arc<std::io::Error>),
}

impl DispatchError {
    /// Wrap a block's error
    pub fn failed<E>(error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self::Failed(Arc::from(error.into()))
    }

    /// Build from a caught panic payload
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::Panicked(panic_message(payload.as_ref()))
    }

    /// Check for cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<std::io::Error> for DispatchError {
    fn from(error: std::io::Error) -> Self {
        Self::Spawn(Arc::new(error))
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
