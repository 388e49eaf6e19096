use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, Request, StatusCode},
    middleware::{self as axum_middleware, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::data::DemoData;
use super::{DEMO_EMAIL, DEMO_NAME, DEMO_PASSWORD, DEMO_TOKEN_TTL};
use crate::auth::jwt::{self, Claims};
use crate::auth::User;
use crate::models::{ActivityFeed, HealthStatus, TransactionFilters, TransferRequest, UserProfile};
use crate::validation;

/// Errors returned by the demo backend, rendered as `{"error", "message"}`
#[derive(Error, Debug)]
pub enum DemoError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid grant: {0}")]
    InvalidGrant(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl IntoResponse for DemoError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            DemoError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            DemoError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "invalid_credentials",
                "Invalid email or password".to_string(),
            ),
            DemoError::InvalidGrant(msg) => (StatusCode::UNAUTHORIZED, "invalid_grant", msg),
            DemoError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
            DemoError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
        };

        let body = Json(json!({
            "error": error_type,
            "message": message,
        }));

        (status, body).into_response()
    }
}

struct Account {
    user: User,
    password: String,
    last_login: Option<String>,
}

/// Shared backend state plus the hooks tests use to steer it
pub(crate) struct DemoState {
    data: Mutex<DemoData>,

    /// Accounts by lowercase email
    accounts: DashMap<String, Account>,

    /// Issued access tokens -> account email
    access_tokens: DashMap<String, String>,

    /// Live refresh tokens -> account email
    refresh_tokens: DashMap<String, String>,

    forced_unauthorized: AtomicUsize,
    refresh_calls: AtomicUsize,
}

impl DemoState {
    pub(crate) fn new() -> Self {
        let accounts = DashMap::new();
        accounts.insert(
            DEMO_EMAIL.to_string(),
            Account {
                user: User {
                    id: "user_001".to_string(),
                    name: DEMO_NAME.to_string(),
                    email: DEMO_EMAIL.to_string(),
                    avatar: Some(
                        "https://via.placeholder.com/40x40/2563eb/ffffff?text=JD".to_string(),
                    ),
                },
                password: DEMO_PASSWORD.to_string(),
                last_login: None,
            },
        );

        Self {
            data: Mutex::new(DemoData::seed(Utc::now())),
            accounts,
            access_tokens: DashMap::new(),
            refresh_tokens: DashMap::new(),
            forced_unauthorized: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
        }
    }

    fn data(&self) -> MutexGuard<'_, DemoData> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn fail_next_with_401(&self, count: usize) {
        self.forced_unauthorized.store(count, Ordering::SeqCst);
    }

    pub(crate) fn revoke_refresh_tokens(&self) {
        self.refresh_tokens.clear();
    }

    pub(crate) fn refresh_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Consume one forced 401, if any are pending
    fn take_forced_unauthorized(&self) -> bool {
        self.forced_unauthorized
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Forget access tokens whose `exp` has passed
    fn prune_expired_access_tokens(&self, now: DateTime<Utc>) {
        self.access_tokens
            .retain(|token, _| jwt::expiry(token).is_some_and(|exp| exp > now));
    }

    /// Mint a token pair for `user` and build the auth response body
    fn issue_tokens(&self, user: &User) -> serde_json::Value {
        let now = Utc::now();
        let ttl = DEMO_TOKEN_TTL;

        let access_token = jwt::encode_unsigned(&Claims {
            sub: Some(user.id.clone()),
            name: Some(user.name.clone()),
            iat: Some(now.timestamp()),
            exp: Some(now.timestamp() + ttl as i64),
            jti: Some(uuid::Uuid::new_v4().to_string()),
        });
        let refresh_token = format!("rt_{}", uuid::Uuid::new_v4().simple());

        self.prune_expired_access_tokens(now);
        self.access_tokens
            .insert(access_token.clone(), user.email.clone());
        self.refresh_tokens
            .insert(refresh_token.clone(), user.email.clone());

        json!({
            "accessToken": access_token,
            "refreshToken": refresh_token,
            "expiresIn": ttl,
            "user": user,
        })
    }
}

// ==================================================================================================
// Auth endpoints
// ==================================================================================================

#[derive(Debug, Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterBody {
    full_name: String,
    email: String,
    password: String,
    #[serde(default)]
    #[allow(dead_code)]
    phone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody {
    refresh_token: String,
}

async fn login(
    State(state): State<Arc<DemoState>>,
    Json(body): Json<LoginBody>,
) -> Result<Json<serde_json::Value>, DemoError> {
    let key = body.email.to_lowercase();
    let user = {
        let mut account = state
            .accounts
            .get_mut(&key)
            .filter(|a| a.password == body.password)
            .ok_or(DemoError::InvalidCredentials)?;
        account.last_login = Some(Utc::now().to_rfc3339());
        account.user.clone()
    };

    tracing::info!(email = %key, "Demo login");
    Ok(Json(state.issue_tokens(&user)))
}

async fn register(
    State(state): State<Arc<DemoState>>,
    Json(body): Json<RegisterBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), DemoError> {
    if body.full_name.trim().is_empty() {
        return Err(DemoError::Validation("Full name is required".to_string()));
    }
    if !validation::validate_email(&body.email) {
        return Err(DemoError::Validation("Invalid email address".to_string()));
    }
    let check = validation::validate_password(&body.password);
    if !check.is_valid() {
        return Err(DemoError::Validation(check.problems().join(", ")));
    }

    let key = body.email.to_lowercase();
    let user = User {
        id: format!("user_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
        name: body.full_name.trim().to_string(),
        email: key.clone(),
        avatar: None,
    };

    match state.accounts.entry(key.clone()) {
        dashmap::mapref::entry::Entry::Occupied(_) => {
            return Err(DemoError::Conflict("Email already registered".to_string()));
        }
        dashmap::mapref::entry::Entry::Vacant(slot) => {
            slot.insert(Account {
                user: user.clone(),
                password: body.password,
                last_login: Some(Utc::now().to_rfc3339()),
            });
        }
    }

    tracing::info!(email = %key, "Demo account registered");
    Ok((StatusCode::CREATED, Json(state.issue_tokens(&user))))
}

async fn refresh(
    State(state): State<Arc<DemoState>>,
    Json(body): Json<RefreshBody>,
) -> Result<Json<serde_json::Value>, DemoError> {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);

    // Refresh tokens rotate: the presented one is spent either way
    let (_, email) = state
        .refresh_tokens
        .remove(&body.refresh_token)
        .ok_or_else(|| DemoError::InvalidGrant("Refresh token is invalid or revoked".to_string()))?;

    let user = state
        .accounts
        .get(&email)
        .map(|a| a.user.clone())
        .ok_or_else(|| DemoError::InvalidGrant("Account no longer exists".to_string()))?;

    tracing::info!(email = %email, "Demo token refresh");
    Ok(Json(state.issue_tokens(&user)))
}

async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy".to_string(),
        timestamp: Some(Utc::now().to_rfc3339()),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
    })
}

// ==================================================================================================
// Resource endpoints
// ==================================================================================================

/// Email of the account behind the presented access token
#[derive(Debug, Clone)]
struct SessionUser(String);

/// Bearer check for resource routes
///
/// Honors forced 401s first, then requires a token this server issued
/// whose `exp` has not passed.
async fn require_session(
    State(state): State<Arc<DemoState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, DemoError> {
    let path = request.uri().path().to_string();

    if state.take_forced_unauthorized() {
        tracing::warn!(path = %path, "Forcing 401 for demo");
        return Err(DemoError::Unauthorized("Token expired".to_string()));
    }

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .ok_or_else(|| DemoError::Unauthorized("Missing bearer token".to_string()))?;

    let email = state
        .access_tokens
        .get(&token)
        .map(|e| e.value().clone())
        .ok_or_else(|| DemoError::Unauthorized("Unknown access token".to_string()))?;

    if jwt::expiry(&token).is_some_and(|exp| exp <= Utc::now()) {
        tracing::debug!(path = %path, "Rejecting expired access token");
        state.access_tokens.remove(&token);
        return Err(DemoError::Unauthorized("Token expired".to_string()));
    }

    request.extensions_mut().insert(SessionUser(email));
    Ok(next.run(request).await)
}

async fn wallet_balance(State(state): State<Arc<DemoState>>) -> impl IntoResponse {
    Json(state.data().wallet.clone())
}

#[derive(Debug, Deserialize)]
struct TransactionQuery {
    limit: Option<usize>,
    offset: Option<usize>,
    #[serde(rename = "type")]
    kind: Option<String>,
    status: Option<String>,
}

async fn transactions(
    State(state): State<Arc<DemoState>>,
    Query(query): Query<TransactionQuery>,
) -> impl IntoResponse {
    let filters = TransactionFilters {
        kind: query.kind,
        status: query.status,
    };
    let page = state.data().transaction_page(
        query.limit.unwrap_or(20),
        query.offset.unwrap_or(0),
        &filters,
    );
    Json(page)
}

async fn dashboard_stats(State(state): State<Arc<DemoState>>) -> impl IntoResponse {
    Json(state.data().stats.clone())
}

#[derive(Debug, Deserialize)]
struct ActivityQuery {
    limit: Option<usize>,
}

async fn recent_activity(
    State(state): State<Arc<DemoState>>,
    Query(query): Query<ActivityQuery>,
) -> impl IntoResponse {
    Json(ActivityFeed {
        activities: state.data().recent_activity(query.limit.unwrap_or(10)),
    })
}

async fn user_profile(
    State(state): State<Arc<DemoState>>,
    Extension(SessionUser(email)): Extension<SessionUser>,
) -> Result<Json<UserProfile>, DemoError> {
    let account = state
        .accounts
        .get(&email)
        .ok_or_else(|| DemoError::Unauthorized("Account no longer exists".to_string()))?;

    Ok(Json(UserProfile {
        id: account.user.id.clone(),
        name: account.user.name.clone(),
        email: account.user.email.clone(),
        avatar: account.user.avatar.clone(),
        last_login: account.last_login.clone(),
    }))
}

async fn send_money(
    State(state): State<Arc<DemoState>>,
    Extension(SessionUser(email)): Extension<SessionUser>,
    Json(transfer): Json<TransferRequest>,
) -> Result<impl IntoResponse, DemoError> {
    validation::validate_transfer(&transfer.recipient_email, transfer.amount)
        .map_err(DemoError::Validation)?;

    let receipt = state.data().apply_transfer(&transfer, Utc::now());
    tracing::info!(
        from = %email,
        to = %transfer.recipient_email,
        amount = transfer.amount,
        "Demo transfer"
    );
    Ok(Json(receipt))
}

/// CORS layer allowing any origin, method and header
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Build the demo API router, mounted under `/v1`
pub(crate) fn router(state: Arc<DemoState>) -> Router {
    let resources = Router::new()
        .route("/wallet/balance", get(wallet_balance))
        .route("/transactions", get(transactions))
        .route("/dashboard/stats", get(dashboard_stats))
        .route("/activity/recent", get(recent_activity))
        .route("/user/profile", get(user_profile))
        .route("/transfers/send", post(send_money))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ));

    let api = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/auth/refresh", post(refresh))
        .route("/health", get(health))
        .merge(resources);

    Router::new()
        .nest("/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}
