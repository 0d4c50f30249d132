//! Error taxonomy shared by every component of the pipeline.
//!
//! Each variant maps onto an [`ErrorKind`] and, when the failure came from
//! another service, carries that service's logical name so callers can match
//! on it instead of inspecting message text.

use std::fmt::{Display, Formatter};

use serde_json::Value as JsonValue;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("{what} not found")]
    NotFound { what: String },

    #[error("service discovery unavailable while resolving '{service}': {message}")]
    DiscoveryUnavailable { service: String, message: String },

    #[error("request to '{service}' failed: {message}")]
    ServiceUnavailable { service: String, message: String },

    #[error("request to '{service}' timed out after {timeout_ms}ms")]
    Timeout { service: String, timeout_ms: u64 },

    #[error("circuit breaker open for {service}")]
    CircuitOpen { service: String },

    /// A structured error response from another service, kept verbatim.
    #[error("'{service}' responded with HTTP {status}")]
    Downstream {
        service: String,
        status: u16,
        body: JsonValue,
    },

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("{0}")]
    Validation(String),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("status store error: {0}")]
    Store(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    ServiceUnavailable,
    CircuitOpen,
    MalformedMessage,
    ValidationError,
    Internal,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::ServiceUnavailable => write!(f, "service_unavailable"),
            ErrorKind::CircuitOpen => write!(f, "circuit_open"),
            ErrorKind::MalformedMessage => write!(f, "malformed_message"),
            ErrorKind::ValidationError => write!(f, "validation_error"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

impl PipelineError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn unavailable(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn circuit_open(service: impl Into<String>) -> Self {
        Self::CircuitOpen {
            service: service.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedMessage(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::DiscoveryUnavailable { .. }
            | Self::ServiceUnavailable { .. }
            | Self::Timeout { .. } => ErrorKind::ServiceUnavailable,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Downstream { status, .. } => match status {
                404 => ErrorKind::NotFound,
                400 | 422 => ErrorKind::ValidationError,
                s if *s >= 500 => ErrorKind::ServiceUnavailable,
                _ => ErrorKind::Internal,
            },
            Self::MalformedMessage(_) => ErrorKind::MalformedMessage,
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::Broker(_) | Self::Store(_) | Self::Delivery(_) | Self::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Logical name of the service the failure originated from, if any.
    pub fn service(&self) -> Option<&str> {
        match self {
            Self::DiscoveryUnavailable { service, .. }
            | Self::ServiceUnavailable { service, .. }
            | Self::Timeout { service, .. }
            | Self::CircuitOpen { service }
            | Self::Downstream { service, .. } => Some(service),
            _ => None,
        }
    }

    /// Whether this outcome counts toward a circuit breaker's failure rate.
    /// Client-side errors (4xx, not found, bad input) pass through uncounted.
    pub fn trips_breaker(&self) -> bool {
        match self {
            Self::DiscoveryUnavailable { .. }
            | Self::ServiceUnavailable { .. }
            | Self::Timeout { .. }
            | Self::Delivery(_)
            | Self::Internal(_) => true,
            Self::Downstream { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Operational errors are safe to show to a client as-is.
    pub fn is_operational(&self) -> bool {
        match self.kind() {
            ErrorKind::NotFound
            | ErrorKind::ValidationError
            | ErrorKind::MalformedMessage
            | ErrorKind::ServiceUnavailable
            | ErrorKind::CircuitOpen => true,
            ErrorKind::Internal => matches!(self, Self::Downstream { .. }),
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedMessage(err.to_string())
    }
}

impl From<redis::RedisError> for PipelineError {
    fn from(err: redis::RedisError) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<lapin::Error> for PipelineError {
    fn from(err: lapin::Error) -> Self {
        Self::Broker(err.to_string())
    }
}
