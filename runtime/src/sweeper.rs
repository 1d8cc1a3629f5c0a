//! Background sweeper for expired offers and no-shows.
//!
//! One tick runs an expiry sweep, then marks no-shows for every event that
//! ended since the previous successful tick. The first tick reaches back by
//! the sweeper's lookback, so events that ended while no sweeper was running
//! are still covered. Both passes are idempotent, so several service instances
//! may run a sweeper against the same store.
//!
//! # Example
//!
//! ```ignore
//! use rollcall_runtime::sweeper::Sweeper;
//! use std::time::Duration;
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let handle = Sweeper::new(engine, Duration::from_secs(60)).spawn(shutdown_rx);
//!
//! // ... later
//! shutdown_tx.send(true)?;
//! handle.await?;
//! ```

use crate::RegistrationEngine;
use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// How far back the first no-show pass looks unless configured otherwise.
pub const DEFAULT_LOOKBACK: TimeDelta = TimeDelta::days(7);

/// Periodic driver for the engine's sweeps.
#[derive(Clone)]
pub struct Sweeper {
    engine: RegistrationEngine,
    interval: Duration,
    lookback: TimeDelta,
}

impl Sweeper {
    /// Create a sweeper ticking every `interval`.
    #[must_use]
    pub const fn new(engine: RegistrationEngine, interval: Duration) -> Self {
        Self {
            engine,
            interval,
            lookback: DEFAULT_LOOKBACK,
        }
    }

    /// Set how far back the first no-show pass reaches.
    #[must_use]
    pub const fn with_lookback(mut self, lookback: TimeDelta) -> Self {
        self.lookback = lookback;
        self
    }

    /// Watermark for the first tick: the lookback or one interval, whichever
    /// reaches further.
    #[must_use]
    pub fn initial_watermark(&self) -> DateTime<Utc> {
        let interval = TimeDelta::from_std(self.interval).unwrap_or(TimeDelta::zero());
        self.engine.now() - self.lookback.max(interval)
    }

    /// Run on a spawned tokio task until `shutdown` turns `true` or its sender
    /// is dropped.
    #[must_use]
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Tick until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut watermark = self.initial_watermark();

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            watermark = %watermark,
            "Sweeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    watermark = self.tick(watermark).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Sweeper stopped");
    }

    /// Run one expiry sweep and one no-show pass.
    ///
    /// Returns the watermark for the next tick: `now` if the no-show pass
    /// succeeded, otherwise the old watermark so the window is retried.
    pub async fn tick(&self, watermark: DateTime<Utc>) -> DateTime<Utc> {
        if let Err(error) = self.engine.sweep_expired_promotions().await {
            tracing::error!(error = %error, "Expiry sweep failed");
        }

        let now = self.engine.now();
        match self.engine.sweep_no_shows(watermark, now).await {
            Ok(_) => now,
            Err(error) => {
                tracing::error!(error = %error, "No-show pass failed");
                watermark
            }
        }
    }
}
