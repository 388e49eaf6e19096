// Canned resource data served by the demo backend

use chrono::{DateTime, Duration, Utc};

use crate::models::{
    Activity, DashboardStats, Transaction, TransactionFilters, TransactionPage, TransferReceipt,
    TransferRequest, Wallet,
};

/// Mutable resource state for the demo backend
#[derive(Debug, Clone)]
pub struct DemoData {
    pub wallet: Wallet,
    pub transactions: Vec<Transaction>,
    pub stats: DashboardStats,
    pub activity: Vec<Activity>,
    next_id: u64,
}

fn ago(now: DateTime<Utc>, hours: i64) -> String {
    (now - Duration::hours(hours)).to_rfc3339()
}

#[allow(clippy::too_many_arguments)]
fn transaction(
    id: &str,
    kind: &str,
    amount: f64,
    status: &str,
    name: &str,
    email: &str,
    description: &str,
    created_at: String,
) -> Transaction {
    Transaction {
        id: id.to_string(),
        kind: kind.to_string(),
        amount,
        status: status.to_string(),
        recipient_name: Some(name.to_string()),
        recipient_email: Some(email.to_string()),
        description: Some(description.to_string()),
        created_at,
    }
}

fn activity(
    id: &str,
    kind: &str,
    title: &str,
    description: &str,
    amount: Option<f64>,
    timestamp: String,
) -> Activity {
    Activity {
        id: id.to_string(),
        kind: kind.to_string(),
        title: title.to_string(),
        description: description.to_string(),
        amount,
        timestamp,
    }
}

impl DemoData {
    /// Seed data with timestamps relative to `now`
    pub fn seed(now: DateTime<Utc>) -> Self {
        let transactions = vec![
            transaction("txn_001", "income", 150.00, "completed", "Sarah Johnson", "sarah@example.com", "Payment received for freelance work", ago(now, 2)),
            transaction("txn_002", "expense", -15.99, "pending", "Netflix Subscription", "billing@netflix.com", "Monthly subscription payment", ago(now, 3)),
            transaction("txn_003", "transfer", -500.00, "completed", "Savings Account", "savings@bank.com", "Transfer to savings account", ago(now, 5)),
            transaction("txn_004", "income", 75.50, "completed", "Mike Wilson", "mike@example.com", "Reimbursement for lunch", ago(now, 8)),
            transaction("txn_005", "expense", -89.99, "completed", "Amazon Purchase", "orders@amazon.com", "Electronics purchase", ago(now, 12)),
            transaction("txn_006", "income", 200.00, "completed", "Emily Davis", "emily@example.com", "Consultation fee", ago(now, 24)),
            transaction("txn_007", "expense", -45.75, "completed", "Gas Station", "gas@station.com", "Fuel purchase", ago(now, 36)),
            transaction("txn_008", "transfer", 1000.00, "completed", "Checking Account", "checking@bank.com", "Transfer from savings", ago(now, 48)),
        ];

        let activity = vec![
            activity("act_001", "payment", "Payment Received", "From: Sarah Johnson", Some(150.00), ago(now, 2)),
            activity("act_002", "transfer", "Payment Pending", "To: Netflix Subscription", Some(-15.99), ago(now, 3)),
            activity("act_003", "transfer", "Transfer Completed", "To: Savings Account", Some(-500.00), ago(now, 5)),
            activity("act_004", "card_added", "Card Added", "Visa ending in 1234", None, ago(now, 24)),
        ];

        Self {
            wallet: Wallet {
                balance: 24567.89,
                currency: "USD".to_string(),
                last_updated: Some(now.to_rfc3339()),
            },
            transactions,
            stats: DashboardStats {
                total_income: 45230.00,
                total_expenses: 20662.11,
                transaction_count: 1247,
                monthly_growth: 12.5,
                expense_growth: -3.1,
                transaction_growth: 15.3,
            },
            activity,
            next_id: 1,
        }
    }

    /// Filter then paginate the transaction history
    pub fn transaction_page(
        &self,
        limit: usize,
        offset: usize,
        filters: &TransactionFilters,
    ) -> TransactionPage {
        let matching: Vec<&Transaction> = self
            .transactions
            .iter()
            .filter(|t| filters.kind.as_ref().map_or(true, |k| &t.kind == k))
            .filter(|t| filters.status.as_ref().map_or(true, |s| &t.status == s))
            .collect();

        let total = matching.len();
        TransactionPage {
            transactions: matching
                .into_iter()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect(),
            total,
            limit,
            offset,
            has_more: offset.saturating_add(limit) < total,
        }
    }

    pub fn recent_activity(&self, limit: usize) -> Vec<Activity> {
        self.activity.iter().take(limit).cloned().collect()
    }

    /// Record an outgoing transfer and debit the wallet
    pub fn apply_transfer(&mut self, transfer: &TransferRequest, now: DateTime<Utc>) -> TransferReceipt {
        let id = format!("txn_{}_{}", now.timestamp_millis(), self.next_id);
        self.next_id += 1;

        let recipient = transfer
            .recipient_name
            .clone()
            .unwrap_or_else(|| transfer.recipient_email.clone());

        self.transactions.insert(
            0,
            Transaction {
                id: id.clone(),
                kind: "transfer".to_string(),
                amount: -transfer.amount,
                status: "completed".to_string(),
                recipient_name: Some(recipient.clone()),
                recipient_email: Some(transfer.recipient_email.clone()),
                description: Some(
                    transfer
                        .message
                        .clone()
                        .unwrap_or_else(|| "Money transfer".to_string()),
                ),
                created_at: now.to_rfc3339(),
            },
        );

        self.wallet.balance -= transfer.amount;
        self.wallet.last_updated = Some(now.to_rfc3339());

        self.activity.insert(
            0,
            activity(
                &format!("act_{}", id.trim_start_matches("txn_")),
                "transfer",
                "Money Sent",
                &format!("To: {}", recipient),
                Some(-transfer.amount),
                now.to_rfc3339(),
            ),
        );

        TransferReceipt {
            transaction_id: id,
            status: "completed".to_string(),
            message: "Transfer completed successfully".to_string(),
        }
    }
}
