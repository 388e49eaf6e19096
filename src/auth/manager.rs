use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, RwLock};

use super::backend::AuthBackend;
use super::jwt;
use super::scheduler::{self, RefreshTimer, DEFAULT_REFRESH_LEAD};
use super::storage::{self, SessionStore};
use super::types::{AuthResponse, AuthState, Credentials, Registration, Session, User, UserPatch};
use crate::error::AuthError;
use crate::validation;

type SharedRefresh = Shared<BoxFuture<'static, Result<Session, AuthError>>>;

/// Token manager configuration
#[derive(Debug, Clone)]
pub struct TokenManagerConfig {
    /// How long before expiry the proactive refresh fires (default: 5 minutes)
    pub refresh_lead: Duration,
}

impl Default for TokenManagerConfig {
    fn default() -> Self {
        Self {
            refresh_lead: DEFAULT_REFRESH_LEAD,
        }
    }
}

/// Session lifecycle manager
///
/// Sole owner and writer of the session. Cloning yields another handle to
/// the same state.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

struct Inner {
    backend: AuthBackend,
    store: Arc<dyn SessionStore>,
    config: TokenManagerConfig,

    /// Current session
    session: RwLock<Option<Session>>,

    /// Bumped whenever the session is replaced or cleared; a refresh that
    /// started under an older epoch must not commit its result
    epoch: AtomicU64,

    state: watch::Sender<AuthState>,

    /// The single refresh in flight, joined by late callers
    in_flight: Mutex<Option<SharedRefresh>>,

    /// Armed proactive refresh
    timer: Mutex<RefreshTimer>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Empties the in-flight refresh slot when dropped
struct InFlightSlot<'a>(&'a Mutex<Option<SharedRefresh>>);

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        lock(self.0).take();
    }
}

fn token_prefix(token: &str) -> String {
    token.chars().take(8).collect()
}

impl TokenManager {
    pub fn new(
        backend: AuthBackend,
        store: Arc<dyn SessionStore>,
        config: TokenManagerConfig,
    ) -> Self {
        let (state, _) = watch::channel(AuthState::Unauthenticated);
        Self {
            inner: Arc::new(Inner {
                backend,
                store,
                config,
                session: RwLock::new(None),
                epoch: AtomicU64::new(0),
                state,
                in_flight: Mutex::new(None),
                timer: Mutex::new(RefreshTimer::new()),
            }),
        }
    }

    /// Pick up a persisted session at startup
    ///
    /// A still-valid session is adopted as-is; an expired one is refreshed.
    pub async fn restore(&self) -> Result<Option<Session>, AuthError> {
        let Some(session) = storage::load_session(self.inner.store.as_ref())? else {
            tracing::debug!("No persisted session found");
            return Ok(None);
        };

        let now = Utc::now();
        // Client-side hint only: the claim is read without signature verification
        let claim_expired = jwt::expiry(&session.access_token).is_some_and(|exp| exp <= now);

        {
            let mut guard = self.inner.session.write().await;
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            *guard = Some(session.clone());
        }

        if session.is_valid_at(now) && !claim_expired {
            self.inner.arm_timer(&session);
            self.inner.set_state(AuthState::Authenticated);
            tracing::info!(
                expires_at = %session.expires_at.to_rfc3339(),
                "Existing authentication found and valid"
            );
            return Ok(Some(session));
        }

        tracing::info!("Persisted session has expired, refreshing...");
        self.refresh().await.map(Some)
    }

    /// Exchange credentials for a new session
    pub async fn login(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        if !validation::validate_email(&credentials.email) {
            return Err(AuthError::Validation(format!(
                "Invalid email address: {}",
                credentials.email
            )));
        }
        if credentials.password.is_empty() {
            return Err(AuthError::Validation("Password is required".to_string()));
        }

        let previous = self.state();
        self.inner.set_state(AuthState::Authenticating);
        let result = self.inner.backend.login(credentials).await;
        self.establish(result, previous, "Login").await
    }

    /// Create an account and sign in to it
    pub async fn register(&self, registration: &Registration) -> Result<Session, AuthError> {
        if registration.full_name.trim().is_empty() {
            return Err(AuthError::Validation("Full name is required".to_string()));
        }
        if !validation::validate_email(&registration.email) {
            return Err(AuthError::Validation(format!(
                "Invalid email address: {}",
                registration.email
            )));
        }
        let check = validation::validate_password(&registration.password);
        if !check.is_valid() {
            return Err(AuthError::Validation(format!(
                "Password must contain {}",
                check.problems().join(", ")
            )));
        }

        let previous = self.state();
        self.inner.set_state(AuthState::Authenticating);
        let result = self.inner.backend.register(registration).await;
        self.establish(result, previous, "Registration").await
    }

    async fn establish(
        &self,
        result: Result<AuthResponse, AuthError>,
        previous: AuthState,
        action: &str,
    ) -> Result<Session, AuthError> {
        let session =
            result.and_then(|response| Session::from_response(response, None, None, Utc::now()));

        let session = match session {
            Ok(session) => session,
            Err(e) => {
                tracing::error!("{} failed: {}", action, e);
                self.inner.set_state(previous);
                return Err(e);
            }
        };

        self.inner.commit(&session).await;
        tracing::info!(
            token = %token_prefix(&session.access_token),
            "{} successful",
            action
        );
        Ok(session)
    }

    /// Exchange the refresh token for a new session
    ///
    /// Concurrent callers share one backend call and observe the same result.
    /// Any failure clears the session; the caller is expected to log out.
    pub async fn refresh(&self) -> Result<Session, AuthError> {
        let refresh = {
            let mut slot = lock(&self.inner.in_flight);
            match slot.as_ref() {
                Some(existing) => {
                    tracing::debug!("Joining in-flight token refresh");
                    existing.clone()
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    let refresh = async move {
                        // Cleared on unwind too, so a panicked refresh is not rejoined
                        let _slot = InFlightSlot(&inner.in_flight);
                        inner.run_refresh().await
                    }
                    .boxed()
                    .shared();
                    *slot = Some(refresh.clone());
                    refresh
                }
            }
        };

        refresh.await
    }

    /// True iff a session exists and has not reached its expiry
    pub async fn is_valid(&self) -> bool {
        self.inner
            .session
            .read()
            .await
            .as_ref()
            .is_some_and(|s| s.is_valid_at(Utc::now()))
    }

    /// Clear the session and cancel the scheduled refresh; idempotent
    pub async fn logout(&self) {
        self.inner.clear(None).await;
        tracing::info!("Logout successful");
    }

    /// (Re)arm the proactive refresh for the current session
    pub async fn schedule_proactive_refresh(&self) {
        let session = self.inner.session.read().await.clone();
        match session {
            Some(session) => self.inner.arm_timer(&session),
            None => lock(&self.inner.timer).cancel(),
        }
    }

    /// True while a proactive refresh is waiting to fire
    pub fn has_scheduled_refresh(&self) -> bool {
        lock(&self.inner.timer).is_armed()
    }

    pub async fn access_token(&self) -> Option<String> {
        self.inner
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    pub async fn session(&self) -> Option<Session> {
        self.inner.session.read().await.clone()
    }

    pub async fn current_user(&self) -> Option<User> {
        self.inner
            .session
            .read()
            .await
            .as_ref()
            .and_then(|s| s.user.clone())
    }

    /// Merge `patch` into the signed-in user and persist it
    pub async fn update_user(&self, patch: UserPatch) -> Result<User, AuthError> {
        let mut guard = self.inner.session.write().await;
        let user = guard
            .as_mut()
            .and_then(|s| s.user.as_mut())
            .ok_or(AuthError::NotAuthenticated)?;

        if let Some(name) = patch.name.filter(|v| !v.trim().is_empty()) {
            user.name = name;
        }
        if let Some(email) = patch.email.filter(|v| !v.trim().is_empty()) {
            if !validation::validate_email(&email) {
                return Err(AuthError::Validation(format!("Invalid email address: {}", email)));
            }
            user.email = email;
        }
        if let Some(avatar) = patch.avatar.filter(|v| !v.trim().is_empty()) {
            user.avatar = Some(avatar);
        }

        storage::save_user(self.inner.store.as_ref(), user)?;
        Ok(user.clone())
    }

    pub fn state(&self) -> AuthState {
        *self.inner.state.borrow()
    }

    /// Observe lifecycle changes, e.g. to route the UI back to login on `LoggedOut`
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }
}

impl Inner {
    fn set_state(&self, state: AuthState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = ?previous, to = ?state, "Auth state changed");
        }
    }

    /// Install a new session, persist it and arm its refresh timer
    async fn commit(self: &Arc<Self>, session: &Session) {
        {
            let mut guard = self.session.write().await;
            self.epoch.fetch_add(1, Ordering::SeqCst);
            *guard = Some(session.clone());
        }
        self.persist(session);
        self.arm_timer(session);
        self.set_state(AuthState::Authenticated);
    }

    fn persist(&self, session: &Session) {
        if let Err(e) = storage::save_session(self.store.as_ref(), session) {
            tracing::error!("Failed to persist session: {}", e);
        }
    }

    async fn run_refresh(self: &Arc<Self>) -> Result<Session, AuthError> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let Some(current) = self.session.read().await.clone() else {
            tracing::warn!("Token refresh requested without a session");
            return Err(AuthError::NotAuthenticated);
        };

        self.set_state(AuthState::RefreshPending);

        let outcome = self
            .backend
            .refresh(&current.refresh_token)
            .await
            .and_then(|response| {
                Session::from_response(
                    response,
                    Some(current.refresh_token.clone()),
                    None,
                    Utc::now(),
                )
            });

        match outcome {
            Ok(mut session) => {
                {
                    let mut guard = self.session.write().await;
                    if self.epoch.load(Ordering::SeqCst) != epoch {
                        tracing::debug!("Session replaced during refresh, discarding result");
                        return guard.clone().ok_or(AuthError::NotAuthenticated);
                    }
                    if session.user.is_none() {
                        session.user = guard.as_ref().and_then(|s| s.user.clone());
                    }
                    self.epoch.fetch_add(1, Ordering::SeqCst);
                    *guard = Some(session.clone());
                }
                self.persist(&session);
                self.arm_timer(&session);
                self.set_state(AuthState::Authenticated);

                tracing::info!(
                    expires_at = %session.expires_at.to_rfc3339(),
                    "Token refreshed successfully"
                );
                Ok(session)
            }
            Err(e) => {
                tracing::error!("Token refresh failed: {}", e);
                if !self.clear(Some(epoch)).await {
                    // A newer session was installed while refreshing; it stands
                    if let Some(session) = self.session.read().await.clone() {
                        return Ok(session);
                    }
                }
                Err(e)
            }
        }
    }

    /// Drop the session everywhere; with `expected` set, only if no newer
    /// session was installed since that epoch. Returns whether it cleared.
    async fn clear(self: &Arc<Self>, expected: Option<u64>) -> bool {
        {
            let mut guard = self.session.write().await;
            if let Some(epoch) = expected {
                if self.epoch.load(Ordering::SeqCst) != epoch {
                    return false;
                }
            }
            self.epoch.fetch_add(1, Ordering::SeqCst);
            *guard = None;
            if let Err(e) = storage::clear_session(self.store.as_ref()) {
                tracing::error!("Failed to clear persisted session: {}", e);
            }
            lock(&self.timer).cancel();
        }
        self.set_state(AuthState::LoggedOut);
        true
    }

    /// Arm a one-shot refresh at `expires_at - lead`, replacing any armed one
    fn arm_timer(self: &Arc<Self>, session: &Session) {
        let delay = scheduler::refresh_delay(session.expires_at, Utc::now(), self.config.refresh_lead);
        tracing::debug!(
            delay_secs = delay.as_secs(),
            "Scheduling proactive token refresh"
        );

        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            // Detached: a successful refresh re-arms the timer, which aborts this task
            tokio::spawn(async move {
                let manager = TokenManager { inner };
                if let Err(e) = manager.refresh().await {
                    tracing::warn!("Proactive token refresh failed: {}", e);
                }
            });
        });

        lock(&self.timer).replace(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::MemoryStore;
    use crate::transport::mock::MockTransport;
    use crate::transport::Transport;
    use serde_json::json;

    const REFRESH_PATH: &str = "/auth/refresh";

    fn auth_body(access: &str, refresh: Option<&str>, expires_in: u64, with_user: bool) -> String {
        let mut body = json!({ "accessToken": access, "expiresIn": expires_in });
        if let Some(refresh) = refresh {
            body["refreshToken"] = json!(refresh);
        }
        if with_user {
            body["user"] = json!({
                "id": "user_001",
                "name": "John Doe",
                "email": "john.doe@example.com"
            });
        }
        body.to_string()
    }

    fn setup() -> (TokenManager, Arc<MockTransport>, Arc<MemoryStore>) {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryStore::new());
        let backend = AuthBackend::new(
            transport.clone() as Arc<dyn Transport>,
            "http://backend.test/auth",
        );
        let manager = TokenManager::new(
            backend,
            store.clone() as Arc<dyn SessionStore>,
            TokenManagerConfig::default(),
        );
        (manager, transport, store)
    }

    fn credentials() -> Credentials {
        Credentials::new("john.doe@example.com", "Password123!")
    }

    async fn logged_in(expires_in: u64) -> (TokenManager, Arc<MockTransport>, Arc<MemoryStore>) {
        let (manager, transport, store) = setup();
        transport.push_for(
            "/auth/login",
            200,
            &auth_body("access-1", Some("refresh-1"), expires_in, true),
        );
        manager.login(&credentials()).await.unwrap();
        (manager, transport, store)
    }

    #[tokio::test]
    async fn test_login_persists_and_schedules() {
        let (manager, _transport, store) = logged_in(3600).await;

        assert!(manager.is_valid().await);
        assert_eq!(manager.state(), AuthState::Authenticated);
        assert!(manager.has_scheduled_refresh());
        assert_eq!(manager.access_token().await.as_deref(), Some("access-1"));
        assert_eq!(manager.current_user().await.unwrap().id, "user_001");

        let persisted = storage::load_session(store.as_ref()).unwrap().unwrap();
        assert_eq!(persisted.refresh_token, "refresh-1");
    }

    #[tokio::test]
    async fn test_failed_login_keeps_existing_session() {
        let (manager, transport, _store) = logged_in(3600).await;
        transport.push_for("/auth/login", 401, r#"{"message":"Wrong password"}"#);

        let err = manager.login(&credentials()).await.unwrap_err();

        assert_eq!(err, AuthError::InvalidCredentials("Wrong password".to_string()));
        assert_eq!(manager.state(), AuthState::Authenticated);
        assert_eq!(manager.access_token().await.as_deref(), Some("access-1"));
    }

    #[tokio::test]
    async fn test_login_validation_skips_backend() {
        let (manager, transport, _store) = setup();

        let err = manager
            .login(&Credentials::new("not-an-email", "x"))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::Validation(_)));
        assert!(transport.requests().is_empty());
        assert_eq!(manager.state(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_register_checks_password_strength() {
        let (manager, transport, _store) = setup();
        let weak = Registration {
            full_name: "Jane Roe".to_string(),
            email: "jane@example.com".to_string(),
            password: "password".to_string(),
            phone: None,
        };
        assert!(matches!(
            manager.register(&weak).await,
            Err(AuthError::Validation(_))
        ));

        transport.push_for("/auth/register", 201, &auth_body("a", Some("r"), 3600, true));
        let strong = Registration {
            password: "Password123!".to_string(),
            ..weak
        };
        let session = manager.register(&strong).await.unwrap();
        assert_eq!(session.access_token, "a");
        assert_eq!(transport.count("/auth/register"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refresh_coalesces() {
        let (manager, transport, _store) = logged_in(3600).await;
        transport.set_delay(Duration::from_millis(200));
        transport.push_for(REFRESH_PATH, 200, &auth_body("access-2", Some("refresh-2"), 3600, false));

        let results =
            futures::future::join_all((0..5).map(|_| manager.refresh())).await;

        assert_eq!(transport.count(REFRESH_PATH), 1);
        let first = results[0].clone().unwrap();
        assert_eq!(first.access_token, "access-2");
        for result in &results {
            assert_eq!(result.as_ref().unwrap(), &first);
        }
        // User carried over from the login response
        assert_eq!(first.user.unwrap().id, "user_001");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refresh_failure_is_shared_and_clears_session() {
        let (manager, transport, store) = logged_in(3600).await;
        transport.set_delay(Duration::from_millis(200));
        transport.push_for(REFRESH_PATH, 401, r#"{"error":"invalid_grant"}"#);
        let mut states = manager.subscribe();

        let results =
            futures::future::join_all((0..3).map(|_| manager.refresh())).await;

        assert_eq!(transport.count(REFRESH_PATH), 1);
        for result in results {
            assert_eq!(
                result.unwrap_err(),
                AuthError::InvalidCredentials("invalid_grant".to_string())
            );
        }
        assert!(!manager.is_valid().await);
        assert!(!manager.has_scheduled_refresh());
        assert_eq!(*states.borrow_and_update(), AuthState::LoggedOut);
        assert!(storage::load_session(store.as_ref()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_login_rejects_out_of_range_expiry() {
        let (manager, transport, store) = setup();
        transport.push_for(
            "/auth/login",
            200,
            &auth_body("access-1", Some("refresh-1"), 100_000_000_000_000, true),
        );

        let err = manager.login(&credentials()).await.unwrap_err();

        assert!(matches!(err, AuthError::InvalidResponse(_)));
        assert_eq!(manager.state(), AuthState::Unauthenticated);
        assert!(storage::load_session(store.as_ref()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bad_refresh_reply_does_not_wedge_later_refreshes() {
        let (manager, transport, _store) = logged_in(3600).await;
        transport.push_for(
            REFRESH_PATH,
            200,
            &auth_body("access-2", Some("refresh-2"), u64::MAX, false),
        );

        let err = manager.refresh().await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidResponse(_)));
        assert_eq!(manager.state(), AuthState::LoggedOut);

        transport.push_for("/auth/login", 200, &auth_body("access-3", Some("refresh-3"), 3600, true));
        transport.push_for(REFRESH_PATH, 200, &auth_body("access-4", Some("refresh-4"), 3600, false));
        manager.login(&credentials()).await.unwrap();

        let session = manager.refresh().await.unwrap();
        assert_eq!(session.access_token, "access-4");
        assert_eq!(transport.count(REFRESH_PATH), 2);
    }

    #[tokio::test]
    async fn test_refresh_keeps_refresh_token_when_not_rotated() {
        let (manager, transport, _store) = logged_in(3600).await;
        transport.push_for(REFRESH_PATH, 200, &auth_body("access-2", None, 3600, false));

        let session = manager.refresh().await.unwrap();

        assert_eq!(session.refresh_token, "refresh-1");
        let body = transport.requests().last().unwrap().body.clone().unwrap();
        assert_eq!(body, r#"{"refreshToken":"refresh-1"}"#);
    }

    #[tokio::test]
    async fn test_refresh_without_session() {
        let (manager, transport, _store) = setup();
        assert_eq!(manager.refresh().await, Err(AuthError::NotAuthenticated));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_sequential_refreshes_each_call_backend() {
        let (manager, transport, _store) = logged_in(3600).await;
        transport.push_for(REFRESH_PATH, 200, &auth_body("access-2", Some("refresh-2"), 3600, false));
        transport.push_for(REFRESH_PATH, 200, &auth_body("access-3", Some("refresh-3"), 3600, false));

        manager.refresh().await.unwrap();
        let second = manager.refresh().await.unwrap();

        assert_eq!(second.access_token, "access-3");
        assert_eq!(transport.count(REFRESH_PATH), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_cancels_timer() {
        let (manager, transport, store) = logged_in(3600).await;

        manager.logout().await;
        manager.logout().await;

        assert!(!manager.is_valid().await);
        assert!(!manager.has_scheduled_refresh());
        assert_eq!(manager.state(), AuthState::LoggedOut);
        assert!(storage::load_session(store.as_ref()).unwrap().is_none());

        tokio::time::sleep(Duration::from_secs(2 * 3600)).await;
        assert_eq!(transport.count(REFRESH_PATH), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_during_refresh_discards_result() {
        let (manager, transport, _store) = logged_in(3600).await;
        transport.set_delay(Duration::from_millis(500));
        transport.push_for(REFRESH_PATH, 200, &auth_body("access-2", Some("refresh-2"), 3600, false));

        let pending = tokio::spawn({
            let manager = manager.clone();
            async move { manager.refresh().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        manager.logout().await;

        assert_eq!(pending.await.unwrap(), Err(AuthError::NotAuthenticated));
        assert!(!manager.is_valid().await);
        assert!(!manager.has_scheduled_refresh());
    }

    #[tokio::test(start_paused = true)]
    async fn test_proactive_refresh_fires_before_expiry() {
        // expires in 400s, lead 300s -> refresh after ~100s
        let (manager, transport, _store) = logged_in(400).await;
        transport.push_for(REFRESH_PATH, 200, &auth_body("access-2", Some("refresh-2"), 3600, false));

        tokio::time::sleep(Duration::from_secs(90)).await;
        assert_eq!(transport.count(REFRESH_PATH), 0);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(transport.count(REFRESH_PATH), 1);
        assert_eq!(manager.access_token().await.as_deref(), Some("access-2"));
        assert_eq!(manager.state(), AuthState::Authenticated);
        assert!(manager.has_scheduled_refresh());
    }

    #[tokio::test(start_paused = true)]
    async fn test_relogin_replaces_timer() {
        let (manager, transport, _store) = logged_in(400).await;
        transport.push_for("/auth/login", 200, &auth_body("access-9", Some("refresh-9"), 3600, true));
        manager.login(&credentials()).await.unwrap();

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(transport.count(REFRESH_PATH), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_inside_lead_window_refreshes_immediately() {
        let (manager, transport, _store) = setup();
        transport.push_for("/auth/login", 200, &auth_body("access-1", Some("refresh-1"), 120, true));
        transport.push_for(REFRESH_PATH, 200, &auth_body("access-2", Some("refresh-2"), 3600, false));

        manager.login(&credentials()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(transport.count(REFRESH_PATH), 1);
        assert_eq!(manager.access_token().await.as_deref(), Some("access-2"));
    }

    #[tokio::test]
    async fn test_restore_valid_session_without_network() {
        let (manager, transport, store) = setup();
        let session = Session {
            access_token: "opaque-access".to_string(),
            refresh_token: "refresh-1".to_string(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            user: None,
        };
        storage::save_session(store.as_ref(), &session).unwrap();

        let restored = manager.restore().await.unwrap().unwrap();

        assert_eq!(restored.access_token, "opaque-access");
        assert_eq!(manager.state(), AuthState::Authenticated);
        assert!(manager.has_scheduled_refresh());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_restore_expired_session_refreshes() {
        let (manager, transport, store) = setup();
        let session = Session {
            access_token: "opaque-access".to_string(),
            refresh_token: "refresh-1".to_string(),
            expires_at: Utc::now() - chrono::Duration::minutes(1),
            user: None,
        };
        storage::save_session(store.as_ref(), &session).unwrap();
        transport.push_for(REFRESH_PATH, 200, &auth_body("access-2", Some("refresh-2"), 3600, false));

        let restored = manager.restore().await.unwrap().unwrap();

        assert_eq!(restored.access_token, "access-2");
        assert_eq!(transport.count(REFRESH_PATH), 1);
    }

    #[tokio::test]
    async fn test_restore_trusts_expired_claim_over_stored_expiry() {
        let (manager, transport, store) = setup();
        let stale = jwt::encode_unsigned(&jwt::Claims {
            exp: Some(Utc::now().timestamp() - 60),
            ..Default::default()
        });
        let session = Session {
            access_token: stale,
            refresh_token: "refresh-1".to_string(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            user: None,
        };
        storage::save_session(store.as_ref(), &session).unwrap();
        transport.push_for(REFRESH_PATH, 401, r#"{"error":"revoked"}"#);

        assert!(manager.restore().await.is_err());
        assert_eq!(transport.count(REFRESH_PATH), 1);
        assert_eq!(manager.state(), AuthState::LoggedOut);
    }

    #[tokio::test]
    async fn test_restore_nothing_persisted() {
        let (manager, _transport, _store) = setup();
        assert_eq!(manager.restore().await.unwrap(), None);
        assert_eq!(manager.state(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_update_user_merges_and_persists() {
        let (manager, _transport, store) = logged_in(3600).await;

        let user = manager
            .update_user(UserPatch {
                name: Some("Johnny Doe".to_string()),
                email: Some(String::new()),
                avatar: Some("https://img.example.com/jd.png".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(user.name, "Johnny Doe");
        assert_eq!(user.email, "john.doe@example.com");
        let persisted = storage::load_session(store.as_ref()).unwrap().unwrap();
        assert_eq!(persisted.user, Some(user));
    }

    #[tokio::test]
    async fn test_update_user_requires_session() {
        let (manager, _transport, _store) = setup();
        let result = manager.update_user(UserPatch::default()).await;
        assert_eq!(result, Err(AuthError::NotAuthenticated));
    }
}
