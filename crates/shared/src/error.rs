use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    NotFound,
    Validation,
    Internal,
}

impl ErrorCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Unauthorized,
            404 => Self::NotFound,
            400..=499 => Self::Validation,
            _ => Self::Internal,
        }
    }
}

/// Error as reported by the console API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Body of the control endpoints: `{"message": "ok"}` or `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApiResponse {
    Status { message: String },
    Error { error: String },
}

impl ApiResponse {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Status { message } if message == "ok")
    }

    /// Best-effort parse; anything unrecognised counts as a failure.
    pub fn parse_lenient(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_else(|_| Self::Error {
            error: body.trim().to_string(),
        })
    }

    pub fn into_api_error(self, status: u16) -> Option<ApiError> {
        match self {
            Self::Error { error } => Some(ApiError::new(ErrorCode::from_status(status), error)),
            Self::Status { .. } => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid timestamp: {0:?}")]
    Timestamp(String),
    #[error("unknown media type {0}")]
    MediaType(u8),
}
