use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::transport::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input, rejected before any network call.
    Validation,
    /// Operation not allowed in the session's current state.
    InvalidState,
    /// Credential rejected.
    Auth,
    NotFound,
    /// Transient transport failure.
    Network,
    /// Server response violates the offset or manifest contract.
    Protocol,
    /// Decode or pipeline fault.
    Media,
    /// Unrecoverable; the session must be restarted.
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "Validation Error"),
            Self::InvalidState => write!(f, "Invalid State"),
            Self::Auth => write!(f, "Auth Error"),
            Self::NotFound => write!(f, "Not Found"),
            Self::Network => write!(f, "Network Error"),
            Self::Protocol => write!(f, "Protocol Error"),
            Self::Media => write!(f, "Media Fault"),
            Self::Fatal => write!(f, "Fatal Error"),
        }
    }
}

/// A classified failure surfaced by an upload or playback session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct SessionError {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl SessionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            message: message.into(),
            status_code: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    pub fn with_status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    /// Classifies a transport failure and keeps its status code.
    pub fn from_transport(err: &TransportError) -> Self {
        let error = Self::new(err.error_kind(), err.to_string());
        match err.status_code() {
            Some(code) => error.with_status_code(code),
            None => error,
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        Self::from_transport(&err)
    }
}
