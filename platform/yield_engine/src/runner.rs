//! Background accrual loop

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{error, info};

use crate::service::InvestmentService;

/// Calls [`InvestmentService::tick`] on a fixed interval until shut down
pub struct AccrualRunner {
    service: Arc<InvestmentService>,
    interval: Duration,
}

/// Handle to a spawned runner
pub struct RunnerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<u64>,
}

impl RunnerHandle {
    /// Signal the loop to stop and wait for it; returns the number of ticks run
    pub async fn shutdown(self) -> u64 {
        let _ = self.shutdown.send(true);
        match self.join.await {
            Ok(ticks) => ticks,
            Err(e) => {
                error!(error = %e, "Accrual runner task failed");
                0
            }
        }
    }
}

impl AccrualRunner {
    pub fn new(service: Arc<InvestmentService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    pub fn spawn(self) -> RunnerHandle {
        let (shutdown, receiver) = watch::channel(false);
        let join = tokio::spawn(self.run(receiver));
        RunnerHandle { shutdown, join }
    }

    /// Tick until `shutdown` flips to true; a tick in progress always finishes
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks = 0u64;

        info!(interval_ms = self.interval.as_millis() as u64, "Accrual runner started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    ticks += 1;
                    // Failed saves are retried on the next tick; due cycles are caught up then
                    if let Err(e) = self.service.tick().await {
                        error!(error = %e, retryable = e.is_retryable(), "Accrual tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(ticks, "Accrual runner stopped");
        ticks
    }
}
