//! Periodic expiry of overdue reservations.
//!
//! Several sweepers may run against the same store: the reservation
//! compare-and-swap lets exactly one of them expire each reservation.

use crate::service::InventoryService;
use std::time::Duration;
use tokio::sync::watch;

/// Background task calling [`InventoryService::sweep_expired`] on a fixed
/// interval until shut down.
///
/// # Example
///
/// ```ignore
/// let (sweeper, shutdown) = Sweeper::new(service, Duration::from_secs(5));
/// let handle = tokio::spawn(sweeper.run());
///
/// tokio::signal::ctrl_c().await.ok();
/// shutdown.send(true).ok();
/// handle.await?;
/// ```
pub struct Sweeper {
    service: InventoryService,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Sweeper {
    /// Create a sweeper and the sender that stops it. Send `true` to stop.
    #[must_use]
    pub fn new(service: InventoryService, interval: Duration) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = Self {
            service,
            interval,
            shutdown: shutdown_rx,
        };
        (sweeper, shutdown_tx)
    }

    /// Runs until a shutdown signal is received. Returns the total number of
    /// reservations this sweeper expired.
    pub async fn run(mut self) -> usize {
        tracing::info!(interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX), "Starting reservation sweeper");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut total = 0;

        while !*self.shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.service.sweep_expired().await {
                        Ok(swept) => total += swept,
                        Err(e) => tracing::error!(error = %e, "Sweep failed"),
                    }
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!(total, "Reservation sweeper stopped");
        total
    }
}
