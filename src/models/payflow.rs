use serde::{Deserialize, Serialize};

// ==================================================================================================
// Wallet
// ==================================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub balance: f64,
    pub currency: String,
    #[serde(default)]
    pub last_updated: Option<String>,
}

// ==================================================================================================
// Transactions
// ==================================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    /// `income`, `expense` or `transfer`
    #[serde(rename = "type")]
    pub kind: String,
    /// Signed: negative amounts leave the wallet
    pub amount: f64,
    pub status: String,
    #[serde(default)]
    pub recipient_name: Option<String>,
    #[serde(default)]
    pub recipient_email: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: String,
}

impl Transaction {
    /// Name to show for the counterparty
    pub fn counterparty(&self) -> &str {
        self.recipient_name
            .as_deref()
            .or(self.recipient_email.as_deref())
            .unwrap_or("Unknown")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPage {
    pub transactions: Vec<Transaction>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

/// Optional server-side filters for the transaction history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionFilters {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl TransactionFilters {
    /// Stable text form used in cache keys, e.g. `{}` or `{"type":"income"}`
    pub fn cache_fragment(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Query pairs in field order
    pub fn query_pairs(&self) -> Vec<(&'static str, &str)> {
        let mut pairs = Vec::new();
        if let Some(kind) = &self.kind {
            pairs.push(("type", kind.as_str()));
        }
        if let Some(status) = &self.status {
            pairs.push(("status", status.as_str()));
        }
        pairs
    }
}

// ==================================================================================================
// Dashboard
// ==================================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_income: f64,
    pub total_expenses: f64,
    pub transaction_count: u64,
    pub monthly_growth: f64,
    pub expense_growth: f64,
    pub transaction_growth: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub amount: Option<f64>,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityFeed {
    pub activities: Vec<Activity>,
}

/// One all-settled dashboard refresh; a failed read leaves its slot empty
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardSnapshot {
    pub balance: Option<Wallet>,
    pub transactions: Option<TransactionPage>,
    pub stats: Option<DashboardStats>,
    pub activity: Option<ActivityFeed>,
}

impl DashboardSnapshot {
    pub fn is_complete(&self) -> bool {
        self.balance.is_some()
            && self.transactions.is_some()
            && self.stats.is_some()
            && self.activity.is_some()
    }
}

// ==================================================================================================
// Profile, transfers, health
// ==================================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub last_login: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub recipient_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_name: Option<String>,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TransferRequest {
    pub fn new(recipient_email: impl Into<String>, amount: f64) -> Self {
        Self {
            recipient_email: recipient_email.into(),
            recipient_name: None,
            amount,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReceipt {
    pub transaction_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}
