use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Default PayFlow API root
pub const DEFAULT_API_URL: &str = "https://api.payflow.com/v1";

/// PayFlow - command-line client for the PayFlow wallet
#[derive(Parser, Debug)]
#[command(name = "payflow", author, version, about, long_about = None)]
pub struct CliArgs {
    /// PayFlow API base URL
    #[arg(long, env = "PAYFLOW_API_URL", default_value = DEFAULT_API_URL, global = true)]
    pub api_url: String,

    /// Auth API base URL (defaults to <api-url>/auth)
    #[arg(long, env = "PAYFLOW_AUTH_URL", global = true)]
    pub auth_url: Option<String>,

    /// Path to the session database
    #[arg(short = 'd', long, env = "PAYFLOW_SESSION_DB", global = true)]
    pub session_db: Option<String>,

    /// Response cache lifetime in seconds
    #[arg(long, env = "PAYFLOW_CACHE_TTL", default_value = "30", global = true)]
    pub cache_ttl: u64,

    /// Seconds before token expiry at which the session is refreshed
    #[arg(long, env = "PAYFLOW_REFRESH_LEAD", default_value = "300", global = true)]
    pub refresh_lead: u64,

    /// Dashboard polling interval in seconds
    #[arg(long, env = "PAYFLOW_POLL_INTERVAL", default_value = "30", global = true)]
    pub poll_interval: u64,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "PAYFLOW_CONNECT_TIMEOUT", default_value = "10", global = true)]
    pub connect_timeout: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "PAYFLOW_HTTP_TIMEOUT", default_value = "30", global = true)]
    pub http_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "PAYFLOW_LOG_LEVEL", default_value = "warn", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Sign in with email and password
    Login {
        #[arg(short, long)]
        email: String,

        /// Prompted for when omitted
        #[arg(short, long, env = "PAYFLOW_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Create an account and sign in
    Register {
        /// Full name
        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        email: String,

        #[arg(long)]
        phone: Option<String>,

        /// Prompted for when omitted
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Sign out and forget the saved session
    Logout,

    /// Show the current session
    Status,

    /// Show wallet, statistics, transactions and activity
    Dashboard {
        /// Keep refreshing every poll interval until interrupted
        #[arg(short, long)]
        watch: bool,
    },

    /// Send money to another PayFlow user
    Send {
        /// Recipient email
        #[arg(long)]
        to: String,

        #[arg(long)]
        amount: f64,

        /// Recipient display name
        #[arg(long)]
        name: Option<String>,

        /// Message attached to the transfer
        #[arg(long)]
        note: Option<String>,
    },

    /// Check whether the API is reachable
    Health,

    /// Run the in-process demo backend
    DemoServer {
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
}

#[derive(Clone, Debug)]
pub struct Config {
    // Endpoints
    pub api_base_url: String,
    pub auth_base_url: String,

    // Session persistence
    pub session_db: PathBuf,

    // Timing
    pub cache_ttl: Duration,
    pub refresh_lead: Duration,
    pub poll_interval: Duration,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    pub log_level: String,
}

impl Config {
    /// Load configuration with priority: CLI > ENV (.env included) > defaults
    pub fn load() -> Result<(Self, Command)> {
        dotenvy::dotenv().ok();
        Ok(Self::from_args(CliArgs::parse()))
    }

    pub fn from_args(args: CliArgs) -> (Self, Command) {
        let api_base_url = args.api_url.trim_end_matches('/').to_string();
        let auth_base_url = args
            .auth_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("{}/auth", api_base_url));

        let config = Config {
            api_base_url,
            auth_base_url,
            session_db: args
                .session_db
                .map(|s| expand_tilde(&s))
                .unwrap_or_else(default_session_db),
            cache_ttl: Duration::from_secs(args.cache_ttl),
            refresh_lead: Duration::from_secs(args.refresh_lead),
            poll_interval: Duration::from_secs(args.poll_interval),
            http_connect_timeout: args.connect_timeout,
            http_request_timeout: args.http_timeout,
            log_level: args.log_level,
        };

        (config, args.command)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        check_base_url("PAYFLOW_API_URL", &self.api_base_url)?;
        check_base_url("PAYFLOW_AUTH_URL", &self.auth_base_url)?;

        if self.cache_ttl.is_zero() {
            anyhow::bail!("PAYFLOW_CACHE_TTL must be greater than zero");
        }
        if self.poll_interval.is_zero() {
            anyhow::bail!("PAYFLOW_POLL_INTERVAL must be greater than zero");
        }
        if self.http_connect_timeout == 0 || self.http_request_timeout == 0 {
            anyhow::bail!("HTTP timeouts must be greater than zero");
        }

        Ok(())
    }
}

fn check_base_url(name: &str, value: &str) -> Result<()> {
    let url = url::Url::parse(value).with_context(|| format!("{} is not a valid URL: {}", name, value))?;
    if !matches!(url.scheme(), "http" | "https") {
        anyhow::bail!("{} must use http or https: {}", name, value);
    }
    Ok(())
}

fn default_session_db() -> PathBuf {
    expand_tilde("~/.payflow/session.db")
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
