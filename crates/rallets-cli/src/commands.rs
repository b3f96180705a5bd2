//! Subcommands: login, ls, connect.
//!
//! User-facing output uses writeln! to the given writer (stdout in the binary).

use std::io::{self, Write};

use anyhow::Context;
use tokio::sync::watch;
use tracing::info;

use rallets_core::{ClientConfig, Roster, SessionStore};

use crate::api::RemoteService;
use crate::controller::{Controller, IntervalTicker};
use crate::tunnel::TunnelEngine;

/// Log in, remember the session, then list the roster like `ls`.
pub async fn login<S, W>(
    service: &S,
    store: &SessionStore,
    username: &str,
    password: &str,
    out: &mut W,
) -> anyhow::Result<()>
where
    S: RemoteService,
    W: Write,
{
    let session = service.authenticate(username, password).await?;
    store
        .save(&session)
        .with_context(|| format!("Failed to save session to {}", store.path().display()))?;
    info!(path = %store.path().display(), "Session saved");
    list(service, store, out).await
}

/// Heartbeat with the saved session and print the roster.
pub async fn list<S, W>(service: &S, store: &SessionStore, out: &mut W) -> anyhow::Result<()>
where
    S: RemoteService,
    W: Write,
{
    let session = store.load()?;
    let report = service.heartbeat(&session).await?;
    print_roster(&report.roster, out)?;
    Ok(())
}

/// One line per endpoint: `<short id> <remarks>`, in roster order.
pub fn print_roster<W: Write>(roster: &Roster, out: &mut W) -> io::Result<()> {
    for endpoint in roster {
        writeln!(out, "{} {}", endpoint.short_id(), endpoint.display_name)?;
    }
    out.flush()
}

/// Start the tunnel to the endpoint matching `id_prefix` and keep it
/// pointed at a live endpoint until `shutdown` fires.
pub async fn connect<S, E>(
    service: S,
    store: &SessionStore,
    engine: &E,
    id_prefix: &str,
    config: &ClientConfig,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()>
where
    S: RemoteService + 'static,
    E: TunnelEngine,
{
    let session = store.load()?;
    let report = service.heartbeat(&session).await?;
    let endpoint = report.roster.find_by_id_prefix(id_prefix)?.clone();
    info!(
        id = %endpoint.short_id(),
        remarks = %endpoint.display_name,
        remote = %endpoint.remote_address(),
        "Connecting"
    );

    let (controller, targets) =
        Controller::new(service, session, config.client_version.clone(), endpoint);
    let mut engine_task = engine.start(targets).await?;

    let ticker = IntervalTicker::new(config.heartbeat_interval);
    let mut poll_task = tokio::spawn(controller.run(ticker, io::stdout(), shutdown.clone()));

    let mut shutdown = shutdown;
    // A failed poll also stops the engine cleanly, so the poll result is
    // checked first.
    tokio::select! {
        biased;
        joined = &mut poll_task => {
            engine_task.abort();
            joined.context("Heartbeat task panicked")??;
        }
        joined = &mut engine_task => {
            if let Err(e) = joined.context("Tunnel task panicked")? {
                poll_task.abort();
                return Err(e.into());
            }
            // The engine only stops cleanly once the controller is gone.
            poll_task.await.context("Heartbeat task panicked")??;
        }
        _ = shutdown.changed() => {
            info!("Shutting down");
            let _ = poll_task.await;
            engine_task.abort();
        }
    }
    Ok(())
}
