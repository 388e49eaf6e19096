use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use super::routes::{router, DemoState};

/// Demo backend bound to loopback
pub struct DemoServer {
    state: Arc<DemoState>,
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl DemoServer {
    /// Start serving on `port` (0 picks a free one)
    pub async fn start(port: u16) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .with_context(|| format!("Failed to bind demo server on port {}", port))?;
        let addr = listener.local_addr()?;

        let state = Arc::new(DemoState::new());
        let app = router(state.clone());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Demo server stopped with error");
            }
        });

        tracing::info!(addr = %addr, "Demo server listening");

        Ok(Self {
            state,
            addr,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Server root, e.g. `http://127.0.0.1:4321`
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Resource API base (`<url>/v1`)
    pub fn api_base(&self) -> String {
        format!("{}/v1", self.url())
    }

    /// Auth API base (`<url>/v1/auth`)
    pub fn auth_base(&self) -> String {
        format!("{}/auth", self.api_base())
    }

    /// Answer the next `count` resource requests with 401, whatever the token
    pub fn fail_next_with_401(&self, count: usize) {
        self.state.fail_next_with_401(count);
    }

    /// Invalidate every outstanding refresh token
    pub fn revoke_refresh_tokens(&self) {
        self.state.revoke_refresh_tokens();
    }

    /// Number of `/auth/refresh` calls received so far
    pub fn refresh_count(&self) -> usize {
        self.state.refresh_count()
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::info!(addr = %self.addr, "Demo server stopped");
        }
    }
}

impl Drop for DemoServer {
    fn drop(&mut self) {
        self.stop();
    }
}
