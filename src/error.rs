//! Error handling for the acquisition bridge
//!
//! This module defines custom error types and a Result alias for use
//! throughout the crate. Errors are split into two classes:
//!
//! - **Recoverable** errors affect a single event (a malformed coordinate,
//!   a frame arriving while no sequence runs). The engine reports them and
//!   keeps processing.
//! - **Fatal** errors end the active session (channel overflow, buffer growth
//!   failure, a hardware-reported error). The session moves to `Errored` and
//!   its buffer stays readable.

use crate::session::SessionId;
use crate::types::Coordinate;
use thiserror::Error;

/// Errors produced while resolving a coordinate against a shape
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// The coordinate names a dimension the active shape does not declare
    #[error("unknown dimension '{name}'")]
    UnknownDimension { name: String },

    /// The index lies beyond a bounded dimension's declared length
    #[error("index {index} out of range for dimension '{dimension}' (length {length})")]
    OutOfRange {
        dimension: String,
        index: usize,
        length: usize,
    },

    /// The index is too large for any buffer extent to hold it
    #[error("index {index} for dimension '{dimension}' exceeds the addressable extent")]
    ExtentOverflow { dimension: String, index: usize },
}

/// Main error type for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A frame could not be enqueued because the event channel stayed full
    #[error("Event channel overflow (capacity {capacity}): frame data would be lost")]
    ChannelOverflow { capacity: usize },

    /// A non-frame event could not be enqueued within the configured timeout
    #[error("Event channel full (capacity {capacity})")]
    ChannelFull { capacity: usize },

    /// The other end of a channel was dropped
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// A coordinate did not fit the active acquisition shape
    #[error("Malformed coordinate: {0}")]
    MalformedCoordinate(#[from] IndexError),

    /// The frame buffer could not grow to hold a coordinate
    #[error("Buffer growth failure: cannot allocate {requested} slots: {reason}")]
    BufferGrowthFailure { requested: usize, reason: String },

    /// A write targeted a coordinate whose capacity was never reserved
    #[error("No capacity reserved for coordinate {0}")]
    CapacityNotReserved(Coordinate),

    /// No registered session has this id
    #[error("Unknown session {0}")]
    UnknownSession(SessionId),

    /// The hardware layer reported an acquisition error
    #[error("Hardware reported error: {0}")]
    HardwareReportedError(String),

    /// An acquisition shape violated its invariants
    #[error("Invalid acquisition shape: {0}")]
    InvalidShape(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<BridgeError>,
    },
}

/// Coarse classification of an error, carried by notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ChannelOverflow,
    MalformedCoordinate,
    BufferGrowthFailure,
    HardwareReportedError,
    /// A frame arrived that the current session state cannot accept
    UnexpectedEvent,
    /// The overwrite policy flagged a re-acquisition
    OverwriteAnomaly,
    /// A finished session could not be written to disk
    PersistenceFailure,
    Other,
}

impl ErrorKind {
    /// Whether this kind of error ends the active session
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorKind::ChannelOverflow
                | ErrorKind::BufferGrowthFailure
                | ErrorKind::HardwareReportedError
        )
    }
}

impl BridgeError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        BridgeError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::ChannelOverflow { .. } => ErrorKind::ChannelOverflow,
            BridgeError::MalformedCoordinate(_) => ErrorKind::MalformedCoordinate,
            BridgeError::BufferGrowthFailure { .. } => ErrorKind::BufferGrowthFailure,
            BridgeError::HardwareReportedError(_) => ErrorKind::HardwareReportedError,
            BridgeError::WithContext { source, .. } => source.kind(),
            _ => ErrorKind::Other,
        }
    }

    /// Whether this error ends the active session
    pub fn is_fatal(&self) -> bool {
        self.kind().is_fatal()
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Serialization(err.to_string())
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BridgeError::HardwareReportedError("camera timeout".to_string());
        assert_eq!(err.to_string(), "Hardware reported error: camera timeout");
    }

    #[test]
    fn test_error_with_context() {
        let err = BridgeError::Config("bad".to_string());
        let with_ctx = err.with_context("Failed to load config");
        assert!(with_ctx.to_string().contains("Failed to load config"));
    }

    #[test]
    fn test_index_error_wraps_as_malformed() {
        let err: BridgeError = IndexError::OutOfRange {
            dimension: "c".to_string(),
            index: 3,
            length: 2,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::MalformedCoordinate);
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("dimension 'c'"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(BridgeError::ChannelOverflow { capacity: 4 }.is_fatal());
        assert!(BridgeError::BufferGrowthFailure {
            requested: 10,
            reason: "limit".into()
        }
        .is_fatal());
        assert!(BridgeError::HardwareReportedError("x".into()).is_fatal());
        assert!(!BridgeError::Config("x".into()).is_fatal());
    }

    #[test]
    fn test_context_preserves_kind() {
        let err = BridgeError::ChannelOverflow { capacity: 1 }.with_context("frame t=3");
        assert_eq!(err.kind(), ErrorKind::ChannelOverflow);
    }
}
