use shared::error::{ApiException, ErrorCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with an error body.
    #[error(transparent)]
    Api(#[from] ApiException),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid server url: {0}")]
    Url(#[from] url::ParseError),
    #[error("server url must use http or https, got {0}")]
    Scheme(String),
}

impl ClientError {
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Api(exception) => Some(exception.code),
            _ => None,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
