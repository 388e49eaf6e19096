//! In-process PayFlow backend with canned data.
//!
//! Serves the auth and resource endpoints under `/v1` so the client can be
//! exercised end to end without a real deployment.

pub mod data;
mod routes;
mod server;

pub use routes::DemoError;
pub use server::DemoServer;

/// Demo account credentials
pub const DEMO_EMAIL: &str = "john.doe@example.com";
pub const DEMO_PASSWORD: &str = "Password123!";
pub const DEMO_NAME: &str = "John Doe";

/// Access token lifetime in seconds
pub const DEMO_TOKEN_TTL: u64 = 3600;
