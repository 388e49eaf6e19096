// Auth backend exchanges: login, register, refresh

use serde::Serialize;
use std::sync::Arc;

use super::types::{AuthResponse, BackendErrorBody, Credentials, RefreshRequest, Registration};
use crate::error::AuthError;
use crate::transport::{HttpMethod, HttpRequest, Transport};

/// Client for the `/auth/*` endpoints
#[derive(Clone)]
pub struct AuthBackend {
    transport: Arc<dyn Transport>,
    base_url: String,
}

impl AuthBackend {
    /// `base_url` is the auth root, e.g. `https://api.payflow.com/v1/auth`
    pub fn new(transport: Arc<dyn Transport>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<AuthResponse, AuthError> {
        tracing::info!(email = %credentials.email, "Logging in...");
        self.exchange("login", credentials).await
    }

    pub async fn register(&self, registration: &Registration) -> Result<AuthResponse, AuthError> {
        tracing::info!(email = %registration.email, "Registering account...");
        self.exchange("register", registration).await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse, AuthError> {
        tracing::info!("Refreshing access token...");
        self.exchange("refresh", &RefreshRequest { refresh_token })
            .await
    }

    async fn exchange<B: Serialize>(&self, action: &str, body: &B) -> Result<AuthResponse, AuthError> {
        let url = format!("{}/{}", self.base_url, action);
        let payload = serde_json::to_value(body)
            .map_err(|e| AuthError::Validation(format!("Unserializable {} body: {}", action, e)))?;

        let request = HttpRequest::new(HttpMethod::Post, &url)
            .header("Accept", "application/json")
            .json_body(&payload);

        let response = self.transport.send(request).await.map_err(|e| {
            tracing::error!(action = action, error = %e, "Auth request could not be sent");
            AuthError::from(e)
        })?;

        if !response.is_success() {
            let message = BackendErrorBody::describe(&response.body);
            tracing::error!(
                action = action,
                status = response.status,
                body = %response.body,
                "Auth request failed"
            );
            return Err(match response.status {
                400 | 401 | 403 => AuthError::InvalidCredentials(message),
                status => AuthError::ServerError { status, message },
            });
        }

        let data: AuthResponse = serde_json::from_str(&response.body).map_err(|e| {
            AuthError::InvalidResponse(format!("Failed to parse {} response: {}", action, e))
        })?;

        if data.access_token.is_empty() {
            return Err(AuthError::InvalidResponse(format!(
                "{} response does not contain accessToken",
                action
            )));
        }

        tracing::debug!(
            action = action,
            expires_in = ?data.expires_in,
            "Auth exchange succeeded"
        );
        Ok(data)
    }
}
