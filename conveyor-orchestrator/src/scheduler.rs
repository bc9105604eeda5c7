//! Scheduler loop
//!
//! Fires due repeating registrations on every tick and runs the orphan
//! sweep on a slower interval, until shutdown is signalled.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::service::LifecycleManager;

pub struct Scheduler {
    manager: LifecycleManager,
    tick: Duration,
    reconcile_interval: Duration,
}

impl Scheduler {
    pub fn new(manager: LifecycleManager, tick: Duration, reconcile_interval: Duration) -> Self {
        Self {
            manager,
            tick,
            reconcile_interval,
        }
    }

    /// Runs until `shutdown` turns true or its sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting scheduler (tick: {:?}, reconcile every {:?})",
            self.tick, self.reconcile_interval
        );

        let mut tick = time::interval(self.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reconcile = time::interval(self.reconcile_interval);
        reconcile.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => self.fire_due().await,
                _ = reconcile.tick() => self.sweep().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler stopped");
    }

    async fn fire_due(&self) {
        match self.manager.queue().tick().await {
            Ok(0) => debug!("No registrations due"),
            Ok(fired) => info!("Fired {} scheduled run(s)", fired),
            Err(e) => error!("Scheduler tick failed: {}", e),
        }
    }

    async fn sweep(&self) {
        if let Err(e) = self.manager.reconcile_orphans().await {
            error!("Reconciliation sweep failed: {}", e);
        }
    }
}
