use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of an acquisition failure, used by retry tables and run summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Auth,
    RateLimit,
    TransientNetwork,
    MalformedResponse,
    NotFound,
    UnexpectedStatus,
    Unclassified,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Auth => "auth",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::NotFound => "not_found",
            ErrorKind::UnexpectedStatus => "unexpected_status",
            ErrorKind::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single external call (search API or job board).
///
/// `origin` names the remote surface, e.g. `serpapi` or `greenhouse`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquisitionError {
    #[error("{origin}: credentials rejected (http {status})")]
    Auth { origin: String, status: u16 },
    #[error("{origin}: rate limited (http {status})")]
    RateLimit { origin: String, status: u16 },
    #[error("{origin}: transient network failure: {message}")]
    TransientNetwork { origin: String, message: String },
    #[error("{origin}: malformed response: {message}")]
    MalformedResponse { origin: String, message: String },
    #[error("{origin}: nothing found at {url}")]
    NotFound { origin: String, url: String },
    #[error("{origin}: unexpected http status {status}")]
    UnexpectedStatus { origin: String, status: u16 },
    #[error("{origin}: {message}")]
    Unclassified { origin: String, message: String },
}

impl AcquisitionError {
    pub fn transient(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransientNetwork {
            origin: origin.into(),
            message: message.into(),
        }
    }

    pub fn malformed(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            origin: origin.into(),
            message: message.into(),
        }
    }

    pub fn unclassified(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unclassified {
            origin: origin.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth { .. } => ErrorKind::Auth,
            Self::RateLimit { .. } => ErrorKind::RateLimit,
            Self::TransientNetwork { .. } => ErrorKind::TransientNetwork,
            Self::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::UnexpectedStatus { .. } => ErrorKind::UnexpectedStatus,
            Self::Unclassified { .. } => ErrorKind::Unclassified,
        }
    }

    pub fn origin(&self) -> &str {
        match self {
            Self::Auth { origin, .. }
            | Self::RateLimit { origin, .. }
            | Self::TransientNetwork { origin, .. }
            | Self::MalformedResponse { origin, .. }
            | Self::NotFound { origin, .. }
            | Self::UnexpectedStatus { origin, .. }
            | Self::Unclassified { origin, .. } => origin,
        }
    }

    /// Only errors the classification layer could not place abort a whole run.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Unclassified
    }
}
