//! Long-running service wrapper: one background task driving the schedule
//! tick, the daily counter reset, and the run dispatcher on a fixed cadence.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::dispatcher::RunDispatcher;
use crate::scheduler::{DailyReset, ScheduleTick};
use crate::traits::LeadStore;

struct ServiceInner {
    scheduler: ScheduleTick,
    dispatcher: RunDispatcher,
    store: Arc<dyn LeadStore>,
}

impl ServiceInner {
    /// One full cycle. Each stage logs its own failure; a bad cycle never
    /// kills the loop.
    async fn run_cycle(&self, daily_reset: &mut DailyReset) {
        let now = Utc::now();

        match self.scheduler.tick(now).await {
            Ok(stats) => {
                if stats.scheduled > 0 {
                    info!(%stats, "Schedule tick");
                }
            }
            Err(e) => error!(error = %e, "Schedule tick failed"),
        }

        if daily_reset.due(now) {
            match self.store.reset_daily_counters().await {
                Ok(reset) => info!(agents = reset, "Daily run counters reset"),
                Err(e) => error!(error = %e, "Daily counter reset failed"),
            }
        }

        match self.dispatcher.tick(now).await {
            Ok(stats) => {
                if stats.claimed > 0 {
                    info!(%stats, "Dispatch tick");
                }
            }
            Err(e) => error!(error = %e, "Dispatch tick failed"),
        }
    }
}

/// Owns the background loop. `initialize` spawns it, `shutdown` stops it and
/// waits for the in-flight cycle to finish.
pub struct SchedulerService {
    inner: Arc<ServiceInner>,
    tick_interval: Duration,
    running: Option<(watch::Sender<bool>, JoinHandle<()>)>,
}

impl SchedulerService {
    pub fn new(
        scheduler: ScheduleTick,
        dispatcher: RunDispatcher,
        store: Arc<dyn LeadStore>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                scheduler,
                dispatcher,
                store,
            }),
            tick_interval,
            running: None,
        }
    }

    pub fn initialize(&mut self) {
        if self.running.is_some() {
            return;
        }
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let inner = self.inner.clone();
        let tick_interval = self.tick_interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut daily_reset = DailyReset::new(Utc::now());

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        inner.run_cycle(&mut daily_reset).await;
                    }
                    _ = shutdown_rx.changed() => {
                        info!("Scheduler service stopping");
                        break;
                    }
                }
            }
        });

        info!(tick_secs = self.tick_interval.as_secs(), "Scheduler service started");
        self.running = Some((shutdown_tx, handle));
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some((shutdown_tx, handle)) = self.running.take() {
            let _ = shutdown_tx.send(true);
            handle.await?;
            info!("Scheduler service stopped");
        }
        Ok(())
    }
}
