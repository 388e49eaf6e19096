use anyhow::{Context, Result};
use dialoguer::Password;
use std::sync::Arc;

use payflow_client::api::PayFlowApi;
use payflow_client::auth::{
    AuthBackend, Authenticator, Credentials, Registration, SqliteStore, TokenManager,
    TokenManagerConfig,
};
use payflow_client::config::{Command, Config};
use payflow_client::demo::{DemoServer, DEMO_EMAIL, DEMO_PASSWORD};
use payflow_client::http_client::ApiGateway;
use payflow_client::models::{DashboardSnapshot, TransferRequest};
use payflow_client::transport::{ReqwestTransport, Transport};
use payflow_client::validation;

#[tokio::main]
async fn main() -> Result<()> {
    let (config, command) = Config::load()?;
    config.validate()?;

    // Initialize logging with the configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(
        api = %config.api_base_url,
        auth = %config.auth_base_url,
        session_db = %config.session_db.display(),
        "Configuration loaded"
    );

    if let Command::DemoServer { port } = command {
        return run_demo_server(port).await;
    }

    let client = Client::build(&config)?;
    client.run(command, &config).await
}

/// Session owner plus the typed API on top of it
struct Client {
    manager: TokenManager,
    api: PayFlowApi,
}

impl Client {
    fn build(config: &Config) -> Result<Self> {
        let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(
            config.http_connect_timeout,
            config.http_request_timeout,
        )?);

        let store = SqliteStore::open(&config.session_db).with_context(|| {
            format!(
                "Failed to open session database: {}",
                config.session_db.display()
            )
        })?;

        let manager = TokenManager::new(
            AuthBackend::new(transport.clone(), config.auth_base_url.clone()),
            Arc::new(store),
            TokenManagerConfig {
                refresh_lead: config.refresh_lead,
            },
        );

        let gateway = ApiGateway::new(
            transport,
            Arc::new(manager.clone()) as Arc<dyn Authenticator>,
            config.api_base_url.clone(),
            config.cache_ttl,
        );

        Ok(Self {
            manager,
            api: PayFlowApi::new(Arc::new(gateway)),
        })
    }

    async fn run(&self, command: Command, config: &Config) -> Result<()> {
        match command {
            Command::Login { email, password } => {
                let password = match password {
                    Some(p) => p,
                    None => Password::new()
                        .with_prompt("Password")
                        .interact()
                        .context("Failed to read password")?,
                };

                let session = self
                    .manager
                    .login(&Credentials::new(email, password))
                    .await
                    .context("Login failed")?;

                match &session.user {
                    Some(user) => println!("Signed in as {} <{}>", user.name, user.email),
                    None => println!("Signed in"),
                }
                println!("Session valid until {}", session.expires_at.to_rfc3339());
            }

            Command::Register {
                name,
                email,
                phone,
                password,
            } => {
                let password = match password {
                    Some(p) => p,
                    None => Password::new()
                        .with_prompt("Password")
                        .with_confirmation("Confirm password", "Passwords do not match")
                        .interact()
                        .context("Failed to read password")?,
                };

                let check = validation::validate_password(&password);
                if !check.is_valid() {
                    anyhow::bail!("Password is too weak: {}", check.problems().join(", "));
                }

                let session = self
                    .manager
                    .register(&Registration {
                        full_name: name,
                        email,
                        password,
                        phone,
                    })
                    .await
                    .context("Registration failed")?;

                let who = session
                    .user
                    .as_ref()
                    .map(|u| u.email.clone())
                    .unwrap_or_default();
                println!("Account created, signed in as {}", who);
            }

            Command::Logout => {
                if let Err(e) = self.manager.restore().await {
                    tracing::debug!(error = %e, "No usable session to sign out of");
                }
                self.manager.logout().await;
                println!("Signed out");
            }

            Command::Status => match self.manager.restore().await {
                Ok(Some(session)) => {
                    if let Some(user) = &session.user {
                        println!("Signed in as {} <{}>", user.name, user.email);
                    }
                    println!("State:        {:?}", self.manager.state());
                    println!("Expires at:   {}", session.expires_at.to_rfc3339());
                }
                Ok(None) => println!("Not signed in"),
                Err(e) => println!("Not signed in (saved session could not be renewed: {})", e),
            },

            Command::Dashboard { watch } => {
                self.require_session().await?;

                if !watch {
                    let snapshot = self
                        .api
                        .refresh_dashboard()
                        .await
                        .context("Dashboard refresh already running")?;
                    print_snapshot(&snapshot);
                    return Ok(());
                }

                let poller = self.api.spawn_dashboard_poller(config.poll_interval);
                let mut snapshots = poller.subscribe();
                loop {
                    tokio::select! {
                        changed = snapshots.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            let latest = snapshots.borrow_and_update().clone();
                            if let Some(snapshot) = latest {
                                print_snapshot(&snapshot);
                            }
                        }
                        _ = shutdown_signal() => break,
                    }
                }
                poller.stop();
            }

            Command::Send {
                to,
                amount,
                name,
                note,
            } => {
                validation::validate_transfer(&to, amount).map_err(anyhow::Error::msg)?;
                self.require_session().await?;

                let mut transfer = TransferRequest::new(to, amount);
                transfer.recipient_name = name;
                transfer.message = note;

                let receipt = self
                    .api
                    .send_money(&transfer)
                    .await
                    .context("Transfer failed")?;
                println!("{} ({}): {}", receipt.transaction_id, receipt.status, receipt.message);
            }

            Command::Health => {
                if let Err(e) = self.manager.restore().await {
                    tracing::debug!(error = %e, "Continuing health check without a session");
                }
                if self.api.health().await {
                    println!("PayFlow API is healthy ({})", config.api_base_url);
                } else {
                    anyhow::bail!("PayFlow API is unreachable ({})", config.api_base_url);
                }
            }

            Command::DemoServer { port } => run_demo_server(port).await?,
        }

        Ok(())
    }

    async fn require_session(&self) -> Result<()> {
        match self
            .manager
            .restore()
            .await
            .context("Saved session could not be renewed; run `payflow login`")?
        {
            Some(_) => Ok(()),
            None => anyhow::bail!("Not signed in; run `payflow login` first"),
        }
    }
}

fn print_snapshot(snapshot: &DashboardSnapshot) {
    println!();
    match &snapshot.balance {
        Some(wallet) => println!("Balance:       {:.2} {}", wallet.balance, wallet.currency),
        None => println!("Balance:       unavailable"),
    }

    if let Some(stats) = &snapshot.stats {
        println!(
            "Income:        {:.2} ({:+.1}%)",
            stats.total_income, stats.monthly_growth
        );
        println!(
            "Expenses:      {:.2} ({:+.1}%)",
            stats.total_expenses, stats.expense_growth
        );
        println!(
            "Transactions:  {} ({:+.1}%)",
            stats.transaction_count, stats.transaction_growth
        );
    }

    if let Some(page) = &snapshot.transactions {
        println!();
        println!("Recent transactions ({} of {}):", page.transactions.len(), page.total);
        for tx in &page.transactions {
            println!(
                "  {:<10} {:>10.2}  {:<9} {}",
                tx.kind,
                tx.amount,
                tx.status,
                tx.counterparty()
            );
        }
    }

    if let Some(feed) = &snapshot.activity {
        println!();
        println!("Activity:");
        for item in &feed.activities {
            match item.amount {
                Some(amount) => println!("  {} - {} ({:.2})", item.title, item.description, amount),
                None => println!("  {} - {}", item.title, item.description),
            }
        }
    }

    if !snapshot.is_complete() {
        println!();
        println!("Some sections could not be loaded; see logs for details.");
    }
}

async fn run_demo_server(port: u16) -> Result<()> {
    let mut server = DemoServer::start(port).await?;

    println!();
    println!("  PayFlow demo backend");
    println!("  API:          {}", server.api_base());
    println!("  Auth:         {}", server.auth_base());
    println!("  Credentials:  {} / {}", DEMO_EMAIL, DEMO_PASSWORD);
    println!();
    println!("  Try: payflow --api-url {} login -e {}", server.api_base(), DEMO_EMAIL);
    println!();

    shutdown_signal().await;
    server.stop();
    Ok(())
}

/// Handle graceful shutdown signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, shutting down...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, shutting down...");
        },
    }
}
