// Authentication types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Default access token lifetime when the backend omits `expiresIn`
pub const DEFAULT_EXPIRES_IN: u64 = 3600;

/// Authenticated principal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Partial user update; `None` fields are left untouched
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<String>,
}

/// Login request body
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Registration request body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub full_name: String,
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Refresh request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Login / register / refresh response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub user: Option<User>,
}

/// Machine-readable error body returned by the backend on non-2xx
#[derive(Debug, Default, Deserialize)]
pub struct BackendErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl BackendErrorBody {
    /// Best human-readable message from a raw error body
    pub fn describe(body: &str) -> String {
        match serde_json::from_str::<BackendErrorBody>(body) {
            Ok(parsed) => parsed
                .message
                .or(parsed.error)
                .unwrap_or_else(|| body.to_string()),
            Err(_) => body.to_string(),
        }
    }
}

/// Credentials and identity for the signed-in principal
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: Option<User>,
}

impl Session {
    /// Build a session from a backend response issued at `now`
    ///
    /// A response without a refresh token keeps `previous_refresh`, and a
    /// response without a user keeps `previous_user`.
    pub fn from_response(
        response: AuthResponse,
        previous_refresh: Option<String>,
        previous_user: Option<User>,
        now: DateTime<Utc>,
    ) -> Result<Self, AuthError> {
        let refresh_token = response
            .refresh_token
            .filter(|t| !t.is_empty())
            .or(previous_refresh)
            .ok_or_else(|| {
                AuthError::InvalidResponse("response does not contain refreshToken".to_string())
            })?;
        let expires_in = response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);

        Ok(Self {
            access_token: response.access_token,
            refresh_token,
            expires_at: expiry_after(now, expires_in)?,
            user: response.user.or(previous_user),
        })
    }

    /// True strictly before `expires_at`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// `now + expires_in` seconds, rejecting lifetimes chrono cannot represent
fn expiry_after(now: DateTime<Utc>, expires_in: u64) -> Result<DateTime<Utc>, AuthError> {
    i64::try_from(expires_in)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| {
            AuthError::InvalidResponse(format!("expiresIn out of range: {}", expires_in))
        })
}

/// Token manager lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    RefreshPending,
    LoggedOut,
}

impl AuthState {
    /// `Unauthenticated` and `LoggedOut` both mean "needs login"
    pub fn is_signed_out(&self) -> bool {
        matches!(self, AuthState::Unauthenticated | AuthState::LoggedOut)
    }
}
