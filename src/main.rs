// src/main.rs
//! MultiReset Engine
//!
//! Runs the instance scheduler until interrupted. Operator commands are
//! read from stdin, one per line (`primary 2`, `focus 3`, `reset`, ...).
//!
//! Usage: `multireset [CONFIG_FILE]`

use anyhow::{Context, Result};
use multireset_engine::observability::{init_metrics, init_tracing};
use multireset_engine::{BuildInfo, ControlLoop, EngineConfig, OperatorCommand, Scheduler};
use std::io::BufRead;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Forward parsed stdin lines to the control loop from a dedicated thread,
/// so a pending read never holds up runtime shutdown
fn spawn_operator_reader(commands: mpsc::Sender<OperatorCommand>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    error!("failed to read operator input: {}", e);
                    return;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            match line.parse::<OperatorCommand>() {
                Ok(command) => {
                    if commands.blocking_send(command).is_err() {
                        return;
                    }
                }
                Err(e) => warn!("{}", e),
            }
        }
        info!("stdin closed, operator commands disabled");
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);

    // Configuration errors are fatal before anything starts
    let config = EngineConfig::load(config_path.as_deref()).context("loading configuration")?;

    init_tracing(&config.observability)?;
    init_metrics(&config.observability)?;

    let build = BuildInfo::current();
    info!(
        "Starting MultiReset Engine v{} ({}, {})",
        build.version, build.git_hash, build.rustc_version
    );
    info!(
        instances = config.instances.count,
        test_mode = config.test_mode,
        "configuration loaded"
    );

    let scheduler = Scheduler::from_config(&config).context("building scheduler")?;

    let shutdown = CancellationToken::new();
    let (command_tx, command_rx) = mpsc::channel(32);

    spawn_operator_reader(command_tx);

    let control = ControlLoop::new(
        scheduler,
        config.scheduler.tick_interval(),
        command_rx,
        shutdown.clone(),
    );
    let mut control = tokio::spawn(control.run());

    // Graceful shutdown handler
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("installing CTRL+C handler")?;
            info!("Received shutdown signal, cleaning up...");
            shutdown.cancel();
        }
        finished = &mut control => {
            finished.context("control loop panicked")?;
            return Ok(());
        }
    }

    let scheduler = control.await.context("control loop panicked")?;
    info!(
        ticks = scheduler.ticks(),
        attempts = scheduler.attempts(),
        "Engine stopped gracefully"
    );
    Ok(())
}
