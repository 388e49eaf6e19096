// Typed PayFlow resource API
// Read endpoints go through the gateway cache; writes invalidate it

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use url::form_urlencoded;

use crate::error::RequestError;
use crate::http_client::{ApiGateway, RequestOptions};
use crate::models::{
    ActivityFeed, DashboardSnapshot, DashboardStats, HealthStatus, TransactionFilters,
    TransactionPage, TransferReceipt, TransferRequest, UserProfile, Wallet,
};

/// Page size used by the dashboard transaction list
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Number of activity items shown on the dashboard
pub const DEFAULT_ACTIVITY_LIMIT: usize = 10;

/// PayFlow API client
#[derive(Clone)]
pub struct PayFlowApi {
    gateway: Arc<ApiGateway>,
    refreshing: Arc<AtomicBool>,
}

impl PayFlowApi {
    pub fn new(gateway: Arc<ApiGateway>) -> Self {
        Self {
            gateway,
            refreshing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn gateway(&self) -> &ApiGateway {
        &self.gateway
    }

    pub async fn wallet_balance(&self) -> Result<Wallet, RequestError> {
        self.gateway
            .cached_json("wallet_balance", "/wallet/balance")
            .await
    }

    pub async fn transactions(
        &self,
        limit: usize,
        offset: usize,
        filters: &TransactionFilters,
    ) -> Result<TransactionPage, RequestError> {
        let key = format!(
            "transactions_{}_{}_{}",
            limit,
            offset,
            filters.cache_fragment()
        );

        let endpoint = transactions_endpoint(limit, offset, filters);
        self.gateway.cached_json(&key, &endpoint).await
    }

    pub async fn dashboard_stats(&self) -> Result<DashboardStats, RequestError> {
        self.gateway
            .cached_json("dashboard_stats", "/dashboard/stats")
            .await
    }

    pub async fn recent_activity(&self, limit: usize) -> Result<ActivityFeed, RequestError> {
        self.gateway
            .cached_json(
                &format!("recent_activity_{}", limit),
                &format!("/activity/recent?limit={}", limit),
            )
            .await
    }

    pub async fn user_profile(&self) -> Result<UserProfile, RequestError> {
        self.gateway.cached_json("user_profile", "/user/profile").await
    }

    /// Submit a transfer; on success every cached read is dropped
    pub async fn send_money(
        &self,
        transfer: &TransferRequest,
    ) -> Result<TransferReceipt, RequestError> {
        let body = serde_json::to_value(transfer)
            .map_err(|e| RequestError::InvalidResponse(format!("Unserializable transfer: {}", e)))?;

        let receipt = self
            .gateway
            .request("/transfers/send", RequestOptions::post(body))
            .await?
            .json::<TransferReceipt>()?;

        self.gateway.invalidate_all();
        tracing::info!(
            transaction_id = %receipt.transaction_id,
            status = %receipt.status,
            "Transfer submitted"
        );
        Ok(receipt)
    }

    pub async fn health_status(&self) -> Result<HealthStatus, RequestError> {
        self.gateway.get_json("/health").await
    }

    /// Whether the backend answers its health check; never fails
    pub async fn health(&self) -> bool {
        match self.health_status().await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Health check failed");
                false
            }
        }
    }

    /// Fetch the four dashboard reads concurrently
    ///
    /// Each read settles on its own; a failure leaves its slot empty.
    /// Returns `None` without fetching when another refresh is running.
    pub async fn refresh_dashboard(&self) -> Option<DashboardSnapshot> {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Dashboard refresh already in progress, skipping");
            return None;
        }
        let _flag = FlagGuard(&self.refreshing);

        let filters = TransactionFilters::default();
        let (balance, transactions, stats, activity) = tokio::join!(
            self.wallet_balance(),
            self.transactions(DEFAULT_PAGE_SIZE, 0, &filters),
            self.dashboard_stats(),
            self.recent_activity(DEFAULT_ACTIVITY_LIMIT),
        );

        let snapshot = DashboardSnapshot {
            balance: settled("wallet_balance", balance),
            transactions: settled("transactions", transactions),
            stats: settled("dashboard_stats", stats),
            activity: settled("recent_activity", activity),
        };

        tracing::info!(complete = snapshot.is_complete(), "Dashboard data refreshed");
        Some(snapshot)
    }

    /// Refresh the dashboard every `interval`, publishing each snapshot
    pub fn spawn_dashboard_poller(&self, interval: Duration) -> DashboardPoller {
        let (tx, rx) = watch::channel(None);
        let api = self.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if let Some(snapshot) = api.refresh_dashboard().await {
                    if tx.send(Some(snapshot)).is_err() {
                        break;
                    }
                }
            }
        });

        tracing::debug!(interval_secs = interval.as_secs(), "Dashboard poller started");
        DashboardPoller { handle, rx }
    }
}

// The serializer is not Send, so it must not live across an await
fn transactions_endpoint(limit: usize, offset: usize, filters: &TransactionFilters) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    query
        .append_pair("limit", &limit.to_string())
        .append_pair("offset", &offset.to_string());
    for (name, value) in filters.query_pairs() {
        query.append_pair(name, value);
    }
    format!("/transactions?{}", query.finish())
}

fn settled<T>(what: &str, result: Result<T, RequestError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(resource = what, error = %e, "Dashboard read failed");
            None
        }
    }
}

/// Clears the in-flight flag even if the refresh future is dropped
struct FlagGuard<'a>(&'a AtomicBool);

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Handle to a running dashboard poller; dropping it stops the task
pub struct DashboardPoller {
    handle: JoinHandle<()>,
    rx: watch::Receiver<Option<DashboardSnapshot>>,
}

impl DashboardPoller {
    pub fn subscribe(&self) -> watch::Receiver<Option<DashboardSnapshot>> {
        self.rx.clone()
    }

    pub fn latest(&self) -> Option<DashboardSnapshot> {
        self.rx.borrow().clone()
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for DashboardPoller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
