// src/automation/dispatcher.rs
//! Per-instance command lanes
//!
//! Every instance gets its own FIFO lane, drained by one task, so commands
//! against a single instance never overlap while different instances are
//! driven in parallel.
//!
//! # Architecture
//!
//! ```text
//! Scheduler tick
//!    │ submit(cmd)
//!    ▼
//! Lane #1 [cmd, cmd]   Lane #2 [cmd]   Lane #3 []
//!    │                    │
//!    ▼                    ▼
//! gateway.execute()    gateway.execute()      (one in flight per lane)
//!    │
//!    └─ completion (oneshot) → awaited for blocking commands
//! ```

use crate::automation::command::AutomationCommand;
use crate::automation::gateway::AutomationGateway;
use crate::utils::errors::{EngineError, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// A queued command and its completion signal
struct Envelope {
    command: AutomationCommand,
    done: oneshot::Sender<Result<()>>,
}

struct Lane {
    sender: mpsc::UnboundedSender<Envelope>,
    pending: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

/// Routes commands to per-instance lanes
pub struct CommandDispatcher {
    gateway: Arc<dyn AutomationGateway>,

    /// When false every command is awaited, not only blocking ones
    parallelize: bool,

    lanes: Mutex<HashMap<u32, Lane>>,

    stats: Arc<DispatchCounters>,
}

#[derive(Default)]
struct DispatchCounters {
    submitted: AtomicUsize,
    failed: AtomicUsize,
}

impl CommandDispatcher {
    pub fn new(gateway: Arc<dyn AutomationGateway>, parallelize: bool) -> Self {
        debug!(
            gateway = gateway.name(),
            parallelize, "command dispatcher initialized"
        );

        Self {
            gateway,
            parallelize,
            lanes: Mutex::new(HashMap::new()),
            stats: Arc::new(DispatchCounters::default()),
        }
    }

    pub fn gateway_name(&self) -> &'static str {
        self.gateway.name()
    }

    /// Queue a command on its instance lane.
    ///
    /// Blocking commands (and all commands when parallel dispatch is off)
    /// resolve with the command's result. Background commands resolve as
    /// soon as they are queued.
    pub async fn submit(&self, command: AutomationCommand) -> Result<()> {
        let wait = command.is_blocking() || !self.parallelize;
        let num = command.instance;
        let label = command.kind.to_string();

        let (done_tx, done_rx) = oneshot::channel();
        self.enqueue(Envelope {
            command,
            done: done_tx,
        })?;

        if !wait {
            return Ok(());
        }

        done_rx.await.map_err(|_| EngineError::Automation {
            num,
            command: label,
            reason: "lane closed before completion".to_string(),
        })?
    }

    fn enqueue(&self, envelope: Envelope) -> Result<()> {
        let num = envelope.command.instance;
        let mut lanes = self.lanes.lock();

        let lane = lanes.entry(num).or_insert_with(|| self.spawn_lane(num));
        lane.pending.fetch_add(1, Ordering::SeqCst);
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        trace!(instance = num, command = %envelope.command.kind, "queued command");

        lane.sender.send(envelope).map_err(|e| {
            lane.pending.fetch_sub(1, Ordering::SeqCst);
            EngineError::Automation {
                num,
                command: e.0.command.kind.to_string(),
                reason: "lane closed".to_string(),
            }
        })
    }

    fn spawn_lane(&self, num: u32) -> Lane {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Envelope>();
        let pending = Arc::new(AtomicUsize::new(0));
        let gateway = Arc::clone(&self.gateway);
        let stats = Arc::clone(&self.stats);
        let lane_pending = Arc::clone(&pending);

        debug!(instance = num, "opening command lane");

        let handle = tokio::spawn(async move {
            while let Some(Envelope { command, done }) = receiver.recv().await {
                let result = gateway.execute(&command).await;
                if let Err(e) = &result {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    let script = command.kind.script_name();
                    metrics::counter!("multireset_automation_failures_total", "command" => script)
                        .increment(1);
                    warn!(instance = num, "{} failed: {}", command.kind, e);
                }
                lane_pending.fetch_sub(1, Ordering::SeqCst);
                // receiver is gone for background commands
                let _ = done.send(result);
            }
            trace!(instance = num, "command lane closed");
        });

        Lane {
            sender,
            pending,
            handle,
        }
    }

    pub fn stats(&self) -> DispatchStats {
        let lanes = self.lanes.lock();
        DispatchStats {
            lanes: lanes.len(),
            pending: lanes
                .values()
                .map(|lane| lane.pending.load(Ordering::SeqCst))
                .sum(),
            submitted: self.stats.submitted.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }

    /// Close every lane and wait for queued commands to drain
    pub async fn shutdown(&self) {
        let lanes: Vec<(u32, Lane)> = self.lanes.lock().drain().collect();
        for (num, lane) in lanes {
            drop(lane.sender);
            if let Err(e) = lane.handle.await {
                warn!(instance = num, "command lane task failed: {}", e);
            }
        }
    }
}

/// Dispatcher statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchStats {
    pub lanes: usize,
    pub pending: usize,
    pub submitted: usize,
    pub failed: usize,
}
