//! Failover controller.
//!
//! Owns the active endpoint and runs the periodic heartbeat. Each poll
//! surfaces service notices and, when the active endpoint has drifted out of
//! the roster, publishes the roster's first entry as the new tunnel target.
//! Any heartbeat failure ends the loop with an error; there is no retry.

use std::fmt;
use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use rallets_core::{EndpointDescriptor, Session};

use crate::api::{HeartbeatReport, RemoteService, ServiceError};

/// Errors that stop the controller.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("Failed to write notice: {0}")]
    Output(#[from] std::io::Error),
}

/// Source of poll ticks.
#[async_trait]
pub trait Ticker: Send {
    /// Wait for the next tick.
    async fn tick(&mut self);
}

/// Shortest period an [`IntervalTicker`] accepts; shorter periods are raised to it.
pub const MIN_TICK_PERIOD: Duration = Duration::from_millis(1);

/// Fixed-period ticker whose first tick fires one period from now.
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let period = period.max(MIN_TICK_PERIOD);
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// Controller-owned connection state.
#[derive(Debug, Clone)]
pub struct ActiveConnectionState {
    pub endpoint: EndpointDescriptor,
    /// Set once the "new version available" notice has been printed.
    pub upgrade_notice_shown: bool,
}

/// Operator-facing output from one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    NewVersion {
        version: String,
        download_link: String,
    },
    Message {
        message: String,
        link: Option<String>,
    },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NewVersion {
                version,
                download_link,
            } => {
                writeln!(f, "A new version is available - {version}")?;
                write!(f, "Download at: {download_link}")
            }
            Self::Message { message, link } => {
                write!(f, "{message}")?;
                if let Some(link) = link {
                    write!(f, "\n{link}")?;
                }
                Ok(())
            }
        }
    }
}

/// What one poll did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollOutcome {
    pub notices: Vec<Notice>,
    /// The new active endpoint, if the poll switched endpoints.
    pub retargeted: Option<EndpointDescriptor>,
}

/// The failover state machine.
pub struct Controller<S> {
    service: S,
    session: Session,
    client_version: String,
    state: ActiveConnectionState,
    target_tx: watch::Sender<EndpointDescriptor>,
}

impl<S: RemoteService> Controller<S> {
    /// Create a controller already connected to `initial`.
    ///
    /// The returned receiver always holds the current tunnel target; the
    /// tunnel engine reads it and never writes.
    pub fn new(
        service: S,
        session: Session,
        client_version: impl Into<String>,
        initial: EndpointDescriptor,
    ) -> (Self, watch::Receiver<EndpointDescriptor>) {
        let (target_tx, target_rx) = watch::channel(initial.clone());
        let controller = Self {
            service,
            session,
            client_version: client_version.into(),
            state: ActiveConnectionState {
                endpoint: initial,
                upgrade_notice_shown: false,
            },
            target_tx,
        };
        (controller, target_rx)
    }

    pub const fn state(&self) -> &ActiveConnectionState {
        &self.state
    }

    pub const fn active(&self) -> &EndpointDescriptor {
        &self.state.endpoint
    }

    /// Apply one heartbeat report to the controller state.
    pub fn apply_report(&mut self, report: HeartbeatReport) -> PollOutcome {
        let mut outcome = PollOutcome::default();
        let notification = &report.notification;

        if !self.state.upgrade_notice_shown && notification.offers_upgrade(&self.client_version)
        {
            outcome.notices.push(Notice::NewVersion {
                version: notification.version.clone(),
                download_link: notification.download_link.clone(),
            });
            self.state.upgrade_notice_shown = true;
        }

        // Repeats on every poll while `show` is set, unlike the upgrade notice.
        if notification.show {
            outcome.notices.push(Notice::Message {
                message: notification.message.clone(),
                link: notification.display_link().map(str::to_string),
            });
        }

        if report.roster.contains_profile(&self.state.endpoint) {
            debug!(id = %self.state.endpoint.id, "Active endpoint still offered");
        } else if let Some(next) = report.roster.first() {
            info!(
                from = %self.state.endpoint.remote_address(),
                to = %next.remote_address(),
                remarks = %next.display_name,
                "Active endpoint left the roster, switching"
            );
            self.state.endpoint = next.clone();
            self.target_tx.send_replace(next.clone());
            outcome.retargeted = Some(next.clone());
        } else {
            // Empty roster: keep the current tunnel rather than tearing it down.
            warn!(
                id = %self.state.endpoint.id,
                "Roster is empty, keeping current endpoint"
            );
        }

        outcome
    }

    /// Issue one heartbeat and apply it.
    pub async fn poll_once(&mut self) -> Result<PollOutcome, ControllerError> {
        let report = self.service.heartbeat(&self.session).await?;
        debug!(endpoints = report.roster.len(), "Heartbeat ok");
        Ok(self.apply_report(report))
    }

    /// Poll on every tick until `shutdown` fires or a poll fails.
    ///
    /// Notices are written to `out`. Polls never overlap: the next tick is
    /// awaited only after the previous poll has been applied.
    pub async fn run<T, W>(
        mut self,
        mut ticker: T,
        mut out: W,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ControllerError>
    where
        T: Ticker,
        W: Write + Send,
    {
        if *shutdown.borrow() {
            return Ok(());
        }
        loop {
            tokio::select! {
                () = ticker.tick() => {
                    let outcome = self.poll_once().await?;
                    for notice in &outcome.notices {
                        writeln!(out, "{notice}")?;
                    }
                    out.flush()?;
                }
                _ = shutdown.changed() => {
                    info!("Heartbeat loop shutting down");
                    return Ok(());
                }
            }
        }
    }
}
