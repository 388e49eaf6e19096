// Authentication module
// Owns the session lifecycle: login, refresh, proactive renewal and logout

mod backend;
pub mod jwt;
mod manager;
mod scheduler;
pub mod storage;
mod types;

use async_trait::async_trait;

pub use backend::AuthBackend;
pub use manager::{TokenManager, TokenManagerConfig};
pub use scheduler::{refresh_delay, RefreshTimer, DEFAULT_REFRESH_LEAD};
pub use storage::{MemoryStore, SessionStore, SqliteStore};
pub use types::{
    AuthResponse, AuthState, BackendErrorBody, Credentials, Registration, Session, User, UserPatch,
    DEFAULT_EXPIRES_IN,
};

use crate::error::AuthError;

/// What the request gateway needs from the session owner
///
/// The gateway reads credentials and asks for refresh/logout, but never
/// mutates the session itself.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Current access token, if signed in
    async fn access_token(&self) -> Option<String>;

    /// Refresh the session (coalesced with any refresh already in flight)
    async fn refresh(&self) -> Result<Session, AuthError>;

    /// Drop the session
    async fn logout(&self);
}

#[async_trait]
impl Authenticator for TokenManager {
    async fn access_token(&self) -> Option<String> {
        TokenManager::access_token(self).await
    }

    async fn refresh(&self) -> Result<Session, AuthError> {
        TokenManager::refresh(self).await
    }

    async fn logout(&self) {
        TokenManager::logout(self).await
    }
}
