// src/scheduler/control_loop.rs
//! Fixed-cadence driver for the [`Scheduler`]
//!
//! One task owns the scheduler. It ticks on a tokio interval, applies
//! operator commands as they arrive between ticks, and stops when the
//! cancellation token fires.

use crate::scheduler::engine::Scheduler;
use crate::scheduler::operator::OperatorCommand;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct ControlLoop {
    scheduler: Scheduler,
    tick_interval: Duration,
    commands: mpsc::Receiver<OperatorCommand>,
    shutdown: CancellationToken,
}

impl ControlLoop {
    pub fn new(
        scheduler: Scheduler,
        tick_interval: Duration,
        commands: mpsc::Receiver<OperatorCommand>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            scheduler,
            tick_interval,
            commands,
            shutdown,
        }
    }

    /// Run until cancelled; hands the scheduler back after draining its lanes
    pub async fn run(mut self) -> Scheduler {
        let mut ticker = tokio::time::interval(self.tick_interval);
        // a slow tick delays the next one instead of bursting
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let hidden = self.scheduler.hide_all().await;
        info!(
            interval_ms = self.tick_interval.as_millis() as u64,
            hidden, "control loop started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                Some(command) = self.commands.recv() => {
                    match self.scheduler.apply(command).await {
                        Ok(reply) => info!(?command, "{}", reply),
                        Err(e) => warn!(?command, "operator command failed: {}", e),
                    }
                }

                _ = ticker.tick() => {
                    let report = self.scheduler.tick().await;
                    if !report.is_idle() {
                        debug!(tick = self.scheduler.ticks(), ?report, "tick");
                    }
                }
            }
        }

        self.scheduler.shutdown().await;
        self.scheduler
    }
}
