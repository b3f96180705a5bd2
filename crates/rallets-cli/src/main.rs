//! Rallets CLI
//!
//! Log in to the provisioning service, list the offered proxy endpoints and
//! run a local SOCKS5 tunnel that follows the roster.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use rallets_cli::api::ServiceClient;
use rallets_cli::commands;
use rallets_cli::tunnel::ShadowsocksEngine;
use rallets_core::tracing_init::{default_filter, init_tracing};
use rallets_core::{ClientConfig, SessionStore};

const USAGE_EXAMPLES: &str = "\
Examples:
  rallets login alice@example.com hunter2
  rallets ls
      ebf14aed Tokyo 01
      7b0f1ce4 Hong Kong 02
  rallets connect 7b       # any unique prefix of the short id";

#[derive(Parser, Debug)]
#[command(name = "rallets")]
#[command(version, about = "Rallets command line client", after_help = USAGE_EXAMPLES)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Enable debug logging.
    #[arg(long, global = true)]
    verbose: bool,

    /// Output logs as JSON.
    #[arg(long, global = true, env = "RALLETS_LOG_JSON")]
    log_json: bool,

    /// Provisioning service base URL.
    #[arg(long, global = true, env = "RALLETS_API_HOST")]
    api_host: Option<String>,

    /// Seconds between background heartbeats.
    #[arg(
        long,
        global = true,
        env = "RALLETS_HEARTBEAT_SECS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    heartbeat_secs: Option<u64>,

    /// Timeout for a single service call, in seconds.
    #[arg(
        long,
        global = true,
        env = "RALLETS_REQUEST_TIMEOUT_SECS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    request_timeout_secs: Option<u64>,

    /// Host the local SOCKS5 listener binds to.
    #[arg(long, global = true, env = "RALLETS_LISTEN_HOST")]
    listen_host: Option<String>,

    /// Session file (default: ~/.config/rallets-cli/config.json).
    #[arg(long, global = true, env = "RALLETS_SESSION_FILE")]
    session_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and list the available servers.
    Login {
        /// Username or email.
        username: String,
        password: String,
    },
    /// List the available servers.
    Ls,
    /// Start the local tunnel to a server.
    Connect {
        /// Short id (or any prefix of it) as shown by `ls`.
        id: String,
    },
}

impl Cli {
    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::default().with_session_file(self.session_file.clone());
        if let Some(host) = &self.api_host {
            config = config.with_api_host(host);
        }
        if let Some(secs) = self.heartbeat_secs {
            config = config.with_heartbeat_interval(Duration::from_secs(secs));
        }
        if let Some(secs) = self.request_timeout_secs {
            config = config.with_request_timeout(Duration::from_secs(secs));
        }
        if let Some(host) = &self.listen_host {
            config = config.with_listen_host(host.clone());
        }
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&default_filter(cli.verbose), cli.log_json);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let _ = writeln!(io::stderr(), "Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let Some(command) = cli.command.as_ref() else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let config = cli.client_config();
    info!(api_host = %config.api_host, version = %config.client_version, "Starting rallets");

    let store = match &config.session_file {
        Some(path) => SessionStore::new(path.clone()),
        None => SessionStore::default_location()?,
    };
    let service = ServiceClient::new(config.clone())?;
    let mut out = io::stdout();

    match command {
        Command::Login { username, password } => {
            commands::login(&service, &store, username, password, &mut out).await
        }
        Command::Ls => commands::list(&service, &store, &mut out).await,
        Command::Connect { id } => {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                wait_for_signal().await;
                let _ = shutdown_tx.send(true);
                // Keep the sender alive so receivers see `true`, not a closed channel.
                std::future::pending::<()>().await;
            });
            let engine = ShadowsocksEngine::new(config.listen_host.clone());
            commands::connect(service, &store, &engine, id, &config, shutdown_rx).await
        }
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    let mut sigterm =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(error = %e, "Cannot listen for SIGTERM");
                None
            }
        };

    #[cfg(unix)]
    let sigterm_future = async {
        match sigterm.as_mut() {
            Some(s) => {
                s.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        () = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }
}
