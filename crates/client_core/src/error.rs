use shared::{
    domain::InstanceMode,
    error::{ApiError, ErrorCode},
};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

/// Typed failure surface of every request-path operation. Background
/// transport failures never appear here; they feed the reconnect loop.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("rate limited")]
    RateLimited,
    #[error("host unreachable: {0}")]
    Unreachable(String),
    #[error("server error: {0}")]
    Server(String),
    #[error("invalid response payload: {0}")]
    InvalidPayload(String),
    #[error("invalid instance url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("host already registered: {0}")]
    DuplicateHost(String),
    #[error("instance mode {0:?} cannot be joined")]
    UnsupportedInstance(InstanceMode),
}

impl ClientError {
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn from_status(status: reqwest::StatusCode) -> Self {
        use reqwest::StatusCode;
        match status {
            StatusCode::UNAUTHORIZED => Self::Unauthorized,
            StatusCode::FORBIDDEN => Self::Forbidden,
            StatusCode::NOT_FOUND => Self::NotFound,
            StatusCode::CONFLICT => Self::Conflict(status.to_string()),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                Self::Validation(status.to_string())
            }
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited,
            _ => Self::Server(format!("http status {status}")),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

impl From<ApiError> for ClientError {
    fn from(err: ApiError) -> Self {
        match err.code {
            ErrorCode::Unauthorized => Self::Unauthorized,
            ErrorCode::Forbidden => Self::Forbidden,
            ErrorCode::NotFound => Self::NotFound,
            ErrorCode::Conflict => Self::Conflict(err.message),
            ErrorCode::Validation => Self::Validation(err.message),
            ErrorCode::RateLimited => Self::RateLimited,
            ErrorCode::Internal => Self::Server(err.message),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidPayload(err.to_string())
        } else {
            Self::Unreachable(err.to_string())
        }
    }
}
