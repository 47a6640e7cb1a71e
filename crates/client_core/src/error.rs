use shared::error::DecodeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not authorized; sign in again")]
    Unauthorized,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed server payload: {0}")]
    Decode(#[from] DecodeError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("realtime connection is closed")]
    NotConnected,
    #[error("message was not sent: {0}")]
    SendFailed(String),
    #[error("client state store failed: {0}")]
    Storage(#[from] anyhow::Error),
}

impl ClientError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn requires_reauth(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
