//! Error types for the intent tracker

use thiserror::Error;

/// Main error type for the tracker
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Settlement source error for intent {id}: {message}")]
    Source { id: String, message: String },

    #[error("Intent {id} is not tracked")]
    UnknownIntent { id: String },

    #[error("Watcher for intent {id} has stopped")]
    WatcherGone { id: String },

    #[error("Watcher for intent {id} does not accept event {tag} in its current state")]
    EventRejected { id: String, tag: String },

    #[error("Malformed stage value: {0}")]
    MalformedStage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TrackerError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, TrackerError::Source { .. })
    }
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;
