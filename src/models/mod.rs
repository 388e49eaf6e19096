// Data models for the PayFlow resource API

pub mod payflow;

pub use payflow::{
    Activity, ActivityFeed, DashboardSnapshot, DashboardStats, HealthStatus, Transaction,
    TransactionFilters, TransactionPage, TransferReceipt, TransferRequest, UserProfile, Wallet,
};
