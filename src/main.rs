//! drcom - keep-alive client for Dr.COM campus captive portals
//!
//! Logs in through the portal's ePortal endpoints, reports account traffic,
//! and in daemon mode keeps the device online and alerts through a webhook.

mod config;
mod daemon;
mod error;
mod http;
mod models;
mod notify;
mod panel;
mod parser;
mod portal;
mod probe;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use daemon::{Daemon, DaemonSettings};
use notify::WebhookNotifier;
use portal::{DrcomPortal, PortalApi, Session};
use probe::{InternetProbe, Reachability, DEFAULT_PROBE_URL};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "drcom")]
#[command(about = "Dr.COM campus network client", long_about = None)]
struct Args {
    /// Config file path (default: search config.toml, /etc/drcom, ~/.config/drcom)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in once and verify internet access
    Login,
    /// Log out of the portal
    Logout,
    /// Show account traffic and balance
    Status,
    /// Keep the connection alive and send alerts
    Daemon,
    /// Inspect configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the effective configuration (password masked)
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = config::Config::load(args.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.logging.level)),
        )
        .init();
    cfg.report_source();

    match args.command {
        Command::Login => run_login(&cfg).await,
        Command::Logout => run_logout(&cfg).await,
        Command::Status => run_status(&cfg).await,
        Command::Daemon => run_daemon(&cfg).await,
        Command::Config(ConfigCommand::Show) => {
            print!("{}", cfg.to_masked_toml()?);
            Ok(())
        }
    }
}

fn build_portal(cfg: &config::Config) -> Result<DrcomPortal> {
    let session = Session::new(&cfg.auth.host, &cfg.auth.username, &cfg.auth.password)
        .with_account_prefix(&cfg.auth.account_prefix);
    let portal = DrcomPortal::new(session).context("Failed to build HTTP client")?;
    Ok(portal.with_local_ip(&cfg.auth.ip))
}

async fn run_login(cfg: &config::Config) -> Result<()> {
    cfg.validate_credentials()?;
    let portal = build_portal(cfg)?;

    tracing::info!("Logging in as {} via {}", cfg.auth.username, portal.session().host);
    let outcome = portal.login().await.context("Login request failed")?;

    if !outcome.is_connected() {
        tracing::error!("Login failed: {} (result: {})", outcome.msg, outcome.result);
        return Ok(());
    }
    tracing::info!("Portal accepted login: {}", outcome.msg);

    tracing::info!("Verifying internet access...");
    tokio::time::sleep(Duration::from_secs(1)).await;
    let probe = InternetProbe::new(DEFAULT_PROBE_URL)?;
    if probe.check().await {
        tracing::info!("Internet reachable ({})", DEFAULT_PROBE_URL);
    } else {
        tracing::warn!("Internet unreachable, check network settings or account balance");
    }
    Ok(())
}

async fn run_logout(cfg: &config::Config) -> Result<()> {
    let portal = build_portal(cfg)?;
    portal.logout().await.context("Logout failed")?;
    tracing::info!("Logout request sent");
    Ok(())
}

async fn run_status(cfg: &config::Config) -> Result<()> {
    let portal = build_portal(cfg)?;
    match portal.status().await {
        Ok(record) => {
            println!("{}", panel::render(&record, cfg.alert.traffic_threshold));
            Ok(())
        }
        Err(error::PortalError::EmptyStatus) => {
            tracing::warn!("No usable status returned, check that this device is logged in");
            Ok(())
        }
        Err(e) => Err(e).context("Failed to fetch status"),
    }
}

async fn run_daemon(cfg: &config::Config) -> Result<()> {
    cfg.validate_credentials()?;

    let portal: Arc<dyn PortalApi> = Arc::new(build_portal(cfg)?);
    let probe: Arc<dyn Reachability> = Arc::new(InternetProbe::new(DEFAULT_PROBE_URL)?);
    let notifier = WebhookNotifier::new(&cfg.alert.webhook_url)?;
    if !notifier.is_enabled() {
        tracing::info!("No webhook configured, alerts are logged only");
    }

    let mut daemon = Daemon::new(
        portal,
        probe,
        Arc::new(notifier),
        DaemonSettings::from_config(cfg),
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    daemon.run(shutdown).await;
    Ok(())
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Shutdown requested");
    shutdown.cancel();
}
