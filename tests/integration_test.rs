// Integration tests for the PayFlow client
//
// These run the full stack (reqwest transport, SQLite session store, token
// manager, gateway and typed API) against the in-process demo backend.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use payflow_client::{
    api::PayFlowApi,
    auth::{
        storage, AuthBackend, AuthState, Authenticator, Credentials, SessionStore, SqliteStore,
        TokenManager, TokenManagerConfig,
    },
    demo::{DemoServer, DEMO_EMAIL, DEMO_PASSWORD},
    error::{AuthError, RequestError},
    http_client::ApiGateway,
    models::TransferRequest,
    transport::{ReqwestTransport, Transport},
};

// ==================================================================================================
// Test Helpers
// ==================================================================================================

struct Client {
    manager: TokenManager,
    api: PayFlowApi,
}

fn client(server: &DemoServer, db: &Path) -> Client {
    client_for(&server.api_base(), db)
}

fn client_for(api_base: &str, db: &Path) -> Client {
    let transport: Arc<dyn Transport> =
        Arc::new(ReqwestTransport::new(5, 10).expect("Failed to create transport"));
    let store = SqliteStore::open(db).expect("Failed to open session store");

    let manager = TokenManager::new(
        AuthBackend::new(transport.clone(), format!("{}/auth", api_base)),
        Arc::new(store),
        TokenManagerConfig::default(),
    );
    let gateway = ApiGateway::new(
        transport,
        Arc::new(manager.clone()) as Arc<dyn Authenticator>,
        api_base,
        Duration::from_secs(30),
    );

    Client {
        manager,
        api: PayFlowApi::new(Arc::new(gateway)),
    }
}

async fn setup() -> (DemoServer, TempDir, Client) {
    let server = DemoServer::start(0).await.expect("Failed to start demo server");
    let dir = TempDir::new().expect("Failed to create temp dir");
    let client = client(&server, &dir.path().join("session.db"));
    (server, dir, client)
}

async fn login(client: &Client) {
    client
        .manager
        .login(&Credentials::new(DEMO_EMAIL, DEMO_PASSWORD))
        .await
        .expect("Demo login failed");
}

// ==================================================================================================
// Session lifecycle
// ==================================================================================================

#[tokio::test]
async fn test_login_then_dashboard() {
    let (_server, _dir, client) = setup().await;

    login(&client).await;
    assert_eq!(client.manager.state(), AuthState::Authenticated);
    assert!(client.manager.is_valid().await);
    assert!(client.manager.has_scheduled_refresh());
    assert_eq!(
        client.manager.current_user().await.map(|u| u.email),
        Some(DEMO_EMAIL.to_string())
    );

    let snapshot = client.api.refresh_dashboard().await.unwrap();
    assert!(snapshot.is_complete());
    assert_eq!(snapshot.balance.unwrap().currency, "USD");
    assert_eq!(snapshot.transactions.unwrap().total, 8);

    let profile = client.api.user_profile().await.unwrap();
    assert_eq!(profile.name, "John Doe");
    assert!(profile.last_login.is_some());
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let (_server, _dir, client) = setup().await;

    let err = client
        .manager
        .login(&Credentials::new(DEMO_EMAIL, "WrongPass1!"))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        AuthError::InvalidCredentials("Invalid email or password".to_string())
    );
    assert!(client.manager.state().is_signed_out());
}

#[tokio::test]
async fn test_session_survives_restart() {
    let (server, dir, client) = setup().await;
    let db = dir.path().join("session.db");

    login(&client).await;
    let token = client.manager.access_token().await;
    drop(client);

    let restarted = self::client(&server, &db);
    let restored = restarted.manager.restore().await.unwrap().unwrap();

    assert_eq!(Some(restored.access_token), token);
    assert_eq!(restarted.manager.state(), AuthState::Authenticated);
    assert_eq!(server.refresh_count(), 0);
    assert!(restarted.api.wallet_balance().await.is_ok());
}

#[tokio::test]
async fn test_expired_session_is_refreshed_on_restore() {
    let (server, dir, client) = setup().await;
    let db = dir.path().join("session.db");

    login(&client).await;
    drop(client);

    // Backdate the persisted expiry
    let store = SqliteStore::open(&db).unwrap();
    let past = chrono::Utc::now() - chrono::Duration::minutes(1);
    store
        .set(storage::TOKEN_EXPIRY_KEY, &past.timestamp_millis().to_string())
        .unwrap();
    drop(store);

    let restarted = self::client(&server, &db);
    let restored = restarted.manager.restore().await.unwrap().unwrap();

    assert_eq!(server.refresh_count(), 1);
    assert!(restored.expires_at > chrono::Utc::now());
    assert_eq!(restarted.manager.state(), AuthState::Authenticated);
    assert!(restarted.api.wallet_balance().await.is_ok());
}

#[tokio::test]
async fn test_logout_forgets_persisted_session() {
    let (server, dir, client) = setup().await;
    let db = dir.path().join("session.db");

    login(&client).await;
    client.manager.logout().await;
    assert_eq!(client.manager.state(), AuthState::LoggedOut);
    assert!(!client.manager.has_scheduled_refresh());

    let restarted = self::client(&server, &db);
    assert!(restarted.manager.restore().await.unwrap().is_none());
}

// ==================================================================================================
// Request gateway
// ==================================================================================================

#[tokio::test]
async fn test_401_is_recovered_with_one_refresh() {
    let (server, _dir, client) = setup().await;
    login(&client).await;
    let before = client.manager.access_token().await;

    server.fail_next_with_401(1);
    let wallet = client.api.wallet_balance().await.unwrap();

    assert_eq!(wallet.currency, "USD");
    assert_eq!(server.refresh_count(), 1);
    assert_ne!(client.manager.access_token().await, before);
    assert_eq!(client.manager.state(), AuthState::Authenticated);
}

#[tokio::test]
async fn test_second_401_is_surfaced_after_retry() {
    let (server, _dir, client) = setup().await;
    login(&client).await;

    server.fail_next_with_401(2);
    let err = client.api.dashboard_stats().await.unwrap_err();

    assert!(err.retried());
    assert_eq!(err.kind(), &RequestError::Unauthorized);
    assert_eq!(server.refresh_count(), 1);
    // The refreshed session is still good
    assert_eq!(client.manager.state(), AuthState::Authenticated);
    assert!(client.api.dashboard_stats().await.is_ok());
}

#[tokio::test]
async fn test_revoked_refresh_token_logs_out() {
    let (server, _dir, client) = setup().await;
    login(&client).await;
    let mut states = client.manager.subscribe();

    server.revoke_refresh_tokens();
    server.fail_next_with_401(1);
    let err = client.api.wallet_balance().await.unwrap_err();

    assert!(matches!(err, RequestError::AuthenticationFailed(_)));
    assert_eq!(client.manager.state(), AuthState::LoggedOut);
    assert!(client.manager.access_token().await.is_none());
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), AuthState::LoggedOut);
}

#[tokio::test]
async fn test_send_money_invalidates_cached_reads() {
    let (_server, _dir, client) = setup().await;
    login(&client).await;

    let before = client.api.wallet_balance().await.unwrap();
    let page = client
        .api
        .transactions(20, 0, &Default::default())
        .await
        .unwrap();

    let receipt = client
        .api
        .send_money(&TransferRequest::new("sarah@example.com", 100.0).with_message("Rent share"))
        .await
        .unwrap();
    assert_eq!(receipt.status, "completed");

    let after = client.api.wallet_balance().await.unwrap();
    assert!((before.balance - after.balance - 100.0).abs() < 1e-6);

    let updated = client
        .api
        .transactions(20, 0, &Default::default())
        .await
        .unwrap();
    assert_eq!(updated.total, page.total + 1);
    assert_eq!(updated.transactions[0].id, receipt.transaction_id);
}

#[tokio::test]
async fn test_invalid_transfer_is_rejected_by_backend() {
    let (_server, _dir, client) = setup().await;
    login(&client).await;

    let err = client
        .api
        .send_money(&TransferRequest::new("not-an-email", 10.0))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(400));
    assert!(!err.retried());
}

#[tokio::test]
async fn test_health() {
    let (_server, _dir, client) = setup().await;

    assert!(client.api.health().await);
    let status = tokio_test::assert_ok!(client.api.health_status().await);
    assert_eq!(status.status, "healthy");
}

#[tokio::test]
async fn test_unreachable_backend() {
    // Reserve a port, then free it so nothing is listening there
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let dir = TempDir::new().unwrap();
    let client = client_for(&format!("http://127.0.0.1:{}/v1", port), &dir.path().join("s.db"));

    assert!(!client.api.health().await);

    let err = tokio_test::assert_err!(client.api.wallet_balance().await);
    assert!(matches!(err, RequestError::NetworkError(_)));

    let err = client
        .manager
        .login(&Credentials::new(DEMO_EMAIL, DEMO_PASSWORD))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::NetworkError(_)));
    assert_eq!(client.manager.state(), AuthState::Unauthenticated);
}
