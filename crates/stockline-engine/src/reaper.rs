//! # Expiry Reaper
//!
//! Background task that returns abandoned holds to availability.
//!
//! ## Sweep Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          ExpiryReaper                                   │
//! │                                                                         │
//! │  tick (every 60s) / sweep_now()                                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  find_expired(now, batch)  ── status = 'held' AND expires_at < now     │
//! │       │                       (index on status, expires_at)            │
//! │       ▼                                                                 │
//! │  for each: manager.expire(id)   one transaction per reservation        │
//! │       ├── Ok              → expired += 1                               │
//! │       ├── AlreadyTerminal → lost_race += 1 (shopper got there first)   │
//! │       └── other error     → failed += 1, retried next sweep            │
//! │       │                                                                 │
//! │       └── full batch? fetch the next one                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! No lock is held between reservations, so a sweep never blocks checkout
//! longer than a single ledger update.

use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use stockline_core::Reservation;

use crate::config::ReaperSettings;
use crate::error::{EngineError, EngineResult};
use crate::reservation::ReservationManager;

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Held reservations found past their TTL.
    pub scanned: usize,
    pub expired: usize,
    /// Committed or released by someone else between scan and expiry.
    pub lost_race: usize,
    pub failed: usize,
}

impl SweepReport {
    fn merge(&mut self, other: SweepReport) {
        self.scanned += other.scanned;
        self.expired += other.expired;
        self.lost_race += other.lost_race;
        self.failed += other.failed;
    }
}

enum ReaperCommand {
    SweepNow(oneshot::Sender<SweepReport>),
}

/// Periodically expires held reservations past their TTL.
pub struct ExpiryReaper {
    manager: ReservationManager,
    interval: Duration,
    batch_size: i64,
    command_rx: mpsc::Receiver<ReaperCommand>,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for controlling a running reaper.
#[derive(Debug, Clone)]
pub struct ReaperHandle {
    command_tx: mpsc::Sender<ReaperCommand>,
    shutdown_tx: mpsc::Sender<()>,
}

impl ReaperHandle {
    /// Runs a sweep now and waits for its report.
    pub async fn sweep_now(&self) -> EngineResult<SweepReport> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(ReaperCommand::SweepNow(tx))
            .await
            .map_err(|_| EngineError::ChannelError("Reaper is not running".to_string()))?;
        rx.await
            .map_err(|_| EngineError::ChannelError("Reaper stopped mid-sweep".to_string()))
    }

    /// Stops the loop after the current sweep.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| EngineError::ChannelError("Failed to send shutdown".to_string()))
    }
}

impl ExpiryReaper {
    pub fn new(manager: ReservationManager, settings: &ReaperSettings) -> (Self, ReaperHandle) {
        let (command_tx, command_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let reaper = ExpiryReaper {
            manager,
            interval: Duration::from_secs(settings.interval_secs.max(1)),
            batch_size: settings.batch_size.max(1),
            command_rx,
            shutdown_rx,
        };

        (reaper, ReaperHandle { command_tx, shutdown_tx })
    }

    /// Starts the loop on the current runtime.
    pub fn spawn(
        manager: ReservationManager,
        settings: &ReaperSettings,
    ) -> (ReaperHandle, JoinHandle<()>) {
        let (reaper, handle) = Self::new(manager, settings);
        let task = tokio::spawn(reaper.run());
        (handle, task)
    }

    /// Runs the reaper loop until shutdown.
    pub async fn run(mut self) {
        info!(
            interval_secs = self.interval.as_secs(),
            batch_size = self.batch_size,
            "Expiry reaper starting"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sweep().await;
                }

                Some(command) = self.command_rx.recv() => match command {
                    ReaperCommand::SweepNow(reply) => {
                        let report = self.sweep().await;
                        let _ = reply.send(report);
                    }
                },

                _ = self.shutdown_rx.recv() => {
                    info!("Expiry reaper shutting down");
                    break;
                }
            }
        }

        info!("Expiry reaper stopped");
    }

    /// Expires everything currently past its TTL, batch by batch.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        loop {
            let now = self.manager.clock().now();
            let batch = match self
                .manager
                .database()
                .reservations()
                .find_expired(now, self.batch_size)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    error!(error = %e, "Failed to scan for expired reservations");
                    break;
                }
            };

            let full = batch.len() as i64 >= self.batch_size;
            let outcome = self.expire_batch(&batch).await;
            report.merge(outcome);

            // Failed rows are still held and would come back in the next
            // batch.
            if !full || outcome.expired + outcome.lost_race == 0 {
                break;
            }
        }

        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                expired = report.expired,
                lost_race = report.lost_race,
                failed = report.failed,
                "Expiry sweep complete"
            );
        } else {
            debug!("Expiry sweep found nothing");
        }

        report
    }

    async fn expire_batch(&self, batch: &[Reservation]) -> SweepReport {
        let mut report = SweepReport {
            scanned: batch.len(),
            ..Default::default()
        };

        for reservation in batch {
            match self.manager.expire(&reservation.id).await {
                Ok(_) => report.expired += 1,
                Err(EngineError::AlreadyTerminal { status, .. }) => {
                    debug!(
                        reservation_id = %reservation.id,
                        %status,
                        "Reservation resolved before expiry"
                    );
                    report.lost_race += 1;
                }
                Err(e) => {
                    warn!(
                        reservation_id = %reservation.id,
                        product_id = %reservation.product_id,
                        size = %reservation.size,
                        error = %e,
                        "Failed to expire reservation"
                    );
                    report.failed += 1;
                }
            }
        }

        report
    }
}
