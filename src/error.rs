//! Error types for the observation engine.
//!
//! All errors are strongly typed using thiserror and grouped by the layer
//! that raises them: pattern construction, blocking observation, the capture
//! store and the inbound transport.

use std::time::Duration;

use thiserror::Error;

use crate::event::SubscriberKey;
use crate::value::ValueKind;

/// Errors raised while constructing a pattern.
///
/// These are always reported before any event is scanned.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid field path '{path}': {reason}")]
    InvalidFieldPath {
        path: String,
        reason: String,
    },

    #[error("Invalid regex '{pattern}': {reason}")]
    InvalidRegex {
        pattern: String,
        reason: String,
    },

    #[error("Field '{path}' is declared as {declared}, pattern expects {expected}")]
    KindMismatch {
        path: String,
        declared: ValueKind,
        expected: ValueKind,
    },

    #[error("Field '{path}' is not part of template {template}")]
    UnknownField {
        template: String,
        path: String,
    },

    #[error("Values of kind {kind} cannot be ordered")]
    NotOrderable {
        kind: ValueKind,
    },

    #[error("Regex clauses require a textual field, '{path}' is {kind}")]
    NotTextual {
        path: String,
        kind: ValueKind,
    },

    #[error("Invalid template id '{value}': expected Module:Entity")]
    InvalidTemplateId {
        value: String,
    },

    #[error("Capture key cannot be empty")]
    EmptyCaptureKey,

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Errors returned by blocking and negative observations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ObservationError {
    #[error("No event matching {pattern} observed for '{key}' within {}ms", .timeout.as_millis())]
    Timeout {
        key: SubscriberKey,
        pattern: String,
        timeout: Duration,
    },

    #[error("Unexpected event #{sequence} for '{key}' matched {pattern}")]
    UnexpectedMatch {
        key: SubscriberKey,
        pattern: String,
        sequence: u64,
    },

    #[error("Observation of {pattern} for '{key}' was cancelled")]
    Cancelled {
        key: SubscriberKey,
        pattern: String,
    },

    #[error("Channel for '{key}' was closed")]
    ChannelClosed {
        key: SubscriberKey,
    },
}

/// Errors raised by the capture store.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CaptureError {
    #[error("Capture key '{key}' not found")]
    KeyNotFound {
        key: String,
    },

    #[error("Capture '{key}' holds {actual}, requested {requested}")]
    TypeMismatch {
        key: String,
        requested: ValueKind,
        actual: ValueKind,
    },
}

/// Failures reported by the inbound transport.
///
/// These are logged by the dispatcher and never thrown into blocked observers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("Subscription failed: {message}")]
    SubscriptionFailed {
        message: String,
    },

    #[error("Subscription completed unexpectedly")]
    UnexpectedCompletion,

    #[error("Transport disconnected: {path}")]
    Disconnected {
        path: String,
    },
}

/// Top-level error type for the engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ObserveError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Observation error: {0}")]
    Observation(#[from] ObservationError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl ObserveError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Observation(ObservationError::Timeout { .. }))
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Observation(ObservationError::Cancelled { .. }))
    }

    #[must_use]
    pub const fn is_capture(&self) -> bool {
        matches!(self, Self::Capture(_))
    }

    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns true if re-issuing the call may succeed.
    ///
    /// Only timeouts qualify: more events may arrive later. Authoring mistakes
    /// (validation, capture) never change on retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Observation(e) => matches!(e, ObservationError::Timeout { .. }),
            Self::Transport(e) => matches!(e, TransportError::Disconnected { .. }),
            Self::Validation(_) | Self::Capture(_) | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for engine operations.
pub type ObserveResult<T> = Result<T, ObserveError>;
