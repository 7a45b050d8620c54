use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use appstore_auth::AuthService;
use appstore_auth::config::{self, AccountMode, ConfigBuilder};
use appstore_auth::observability::{init_observability, shutdown_observability};
use appstore_auth::transport::run_http;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "appstore-auth")]
#[command(about = "Authentication and session service for an app store", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database file (in memory when omitted)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Account mode (sso or local)
    #[arg(short, long, default_value = "sso")]
    mode: AccountMode,

    /// HTTP bind host
    #[arg(long, default_value = "127.0.0.1")]
    http_host: IpAddr,

    /// HTTP bind port
    #[arg(long, default_value = "8080")]
    http_port: u16,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable JSON logging output
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // CLI values are the base; file and environment override them
    let mut base = ConfigBuilder::new()
        .database(args.database)
        .mode(args.mode)
        .http_host(args.http_host)
        .http_port(args.http_port)
        .json_logs(args.json_logs);

    if args.verbose {
        base = base.log_level("debug".to_string());
    }

    let builder = if let Some(ref path) = args.config {
        config::load_config_from_path(path, base)?
    } else {
        config::load_config(base)?
    };

    let config = builder.build()?;

    init_observability(&config.telemetry)?;

    tracing::info!("Starting appstore-auth");
    tracing::info!("Account mode: {}", config.mode);
    tracing::info!(
        "Rate limit: {} attempts per {:?}",
        config.rate_limit.threshold,
        config.rate_limit.window
    );
    tracing::info!("Upstream timeout: {:?}", config.upstream_timeout);
    tracing::info!("Storage timeout: {:?}", config.storage_timeout);

    let service = Arc::new(AuthService::from_config(&config).await?);
    if config.mode == AccountMode::Sso && service.providers().is_empty() {
        tracing::error!("No identity provider could be brought up; SSO logins will fail");
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
    };

    let result = run_http(service, &config.transport, shutdown).await;

    shutdown_observability();

    result.map_err(Into::into)
}
