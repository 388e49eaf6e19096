// Error handling module
// Defines the error taxonomy shared by the session layer and the request gateway

use thiserror::Error;

/// Errors raised while establishing or refreshing a session
///
/// `Clone` so a single coalesced refresh can hand the same failure to every waiter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    /// Backend rejected the credentials or the refresh token
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Backend could not be reached
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Backend answered with an unexpected error status
    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    /// Backend answered 2xx with a body we could not use
    #[error("Invalid auth response: {0}")]
    InvalidResponse(String),

    /// No session (or no refresh token) to work with
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Input rejected before contacting the backend
    #[error("Validation error: {0}")]
    Validation(String),

    /// Durable session storage failed
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        AuthError::Storage(err.to_string())
    }
}

/// Errors surfaced by the request gateway
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    /// 401 could not be recovered because the session refresh failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// 401 returned again by the retried request
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Access forbidden")]
    Forbidden,

    #[error("Rate limit exceeded")]
    RateLimited,

    /// Any other non-2xx status
    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    /// Connection-level failure, distinct from HTTP errors
    #[error("Network error: {0}")]
    NetworkError(String),

    /// 2xx response whose body did not decode
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Failure of the single retry issued after a successful refresh
    #[error("{0} (after retry)")]
    AfterRetry(Box<RequestError>),
}

impl RequestError {
    /// Whether the gateway already retried the call once
    pub fn retried(&self) -> bool {
        matches!(self, RequestError::AfterRetry(_))
    }

    /// The underlying classification, with any retry marker removed
    pub fn kind(&self) -> &RequestError {
        match self {
            RequestError::AfterRetry(inner) => inner.kind(),
            other => other,
        }
    }

    /// HTTP status associated with the error, if any
    pub fn status(&self) -> Option<u16> {
        match self.kind() {
            RequestError::Unauthorized => Some(401),
            RequestError::Forbidden => Some(403),
            RequestError::RateLimited => Some(429),
            RequestError::HttpError { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn after_retry(self) -> Self {
        match self {
            RequestError::AfterRetry(_) => self,
            other => RequestError::AfterRetry(Box::new(other)),
        }
    }
}

/// Errors produced by a transport before any HTTP status is available
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Other(String),
}

impl From<TransportError> for RequestError {
    fn from(err: TransportError) -> Self {
        RequestError::NetworkError(err.to_string())
    }
}

impl From<TransportError> for AuthError {
    fn from(err: TransportError) -> Self {
        AuthError::NetworkError(err.to_string())
    }
}

/// Errors from durable session storage
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt value for {key}: {message}")]
    Corrupt { key: String, message: String },
}
