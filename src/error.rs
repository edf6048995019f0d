use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Classification of a failed Lark API call.
///
/// The executor decides retry behaviour from the variant alone: rate limits,
/// server faults and transport failures are transient, everything else is
/// returned to the caller on the first occurrence.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limited by server: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Field error: {0}")]
    Field(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error (status {status}): {message}")]
    Server { status: u16, message: String },

    #[error("API error: {0}")]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authentication,
    RateLimit,
    FieldError,
    Network,
    Server,
    Unknown,
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Authentication(_) => ErrorKind::Authentication,
            Self::RateLimit { .. } => ErrorKind::RateLimit,
            Self::Field(_) => ErrorKind::FieldError,
            Self::Network(_) => ErrorKind::Network,
            Self::Server { .. } => ErrorKind::Server,
            Self::Unknown(_) => ErrorKind::Unknown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RateLimit | ErrorKind::Network | ErrorKind::Server
        )
    }

    /// Server-suggested delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum StoryMapError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid Lark URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Circular parent reference detected: {path}")]
    StructuralCycle { path: String },

    #[error("Tree depth exceeds maximum of {max_depth} at record {record_id}")]
    DepthLimitExceeded { record_id: String, max_depth: usize },
}

impl StoryMapError {
    /// True for faults that mean the source table is internally inconsistent.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::StructuralCycle { .. } | Self::DepthLimitExceeded { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, StoryMapError>;
