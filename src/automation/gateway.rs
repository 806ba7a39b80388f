// src/automation/gateway.rs
//! Automation gateways
//!
//! A gateway turns an [`AutomationCommand`] into an effect on the target
//! process:
//! - [`ScriptGateway`]: runs one external script per command kind, and
//!   freezes/unfreezes processes with SIGSTOP/SIGCONT
//! - [`DryRunGateway`]: logs and records commands without touching anything

use crate::automation::command::{AutomationCommand, CommandKind};
use crate::utils::errors::{EngineError, Result};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Capability the scheduler drives instances through
pub trait AutomationGateway: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Carry out one command; resolves once the effect is done
    fn execute<'a>(&'a self, command: &'a AutomationCommand) -> BoxFuture<'a, Result<()>>;
}

fn failure(command: &AutomationCommand, reason: impl Into<String>) -> EngineError {
    EngineError::Automation {
        num: command.instance,
        command: command.kind.to_string(),
        reason: reason.into(),
    }
}

/// Configuration for [`ScriptGateway`]
#[derive(Debug, Clone)]
pub struct ScriptConfig {
    /// Directory holding `<script-name>.<extension>` files
    pub script_dir: PathBuf,

    /// Program that runs the scripts (`None` executes them directly)
    pub interpreter: Option<String>,

    pub extension: String,

    /// Use SIGSTOP/SIGCONT for suspend/resume
    pub native_suspend: bool,

    /// Per-script timeout
    pub timeout: Duration,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            script_dir: PathBuf::from("scripts"),
            interpreter: None,
            extension: "sh".to_string(),
            native_suspend: true,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Gateway that shells out to per-command scripts
pub struct ScriptGateway {
    config: ScriptConfig,
}

impl ScriptGateway {
    pub fn new(config: ScriptConfig) -> Self {
        Self { config }
    }

    /// Script path for a command kind
    pub fn script_path(&self, kind: &CommandKind) -> PathBuf {
        self.config
            .script_dir
            .join(format!("{}.{}", kind.script_name(), self.config.extension))
    }

    async fn run_script(&self, command: &AutomationCommand) -> Result<()> {
        let script = self.script_path(&command.kind);
        if !script.is_file() {
            return Err(failure(
                command,
                format!("script {} not found", script.display()),
            ));
        }

        let mut cmd = match &self.config.interpreter {
            Some(interpreter) => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(&script);
                cmd
            }
            None => Command::new(&script),
        };

        cmd.args(command.script_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            instance = command.instance,
            script = %script.display(),
            "running automation script"
        );

        let child = cmd
            .spawn()
            .map_err(|e| failure(command, format!("failed to spawn script: {}", e)))?;

        let output = tokio::time::timeout(self.config.timeout, child.wait_with_output())
            .await
            .map_err(|_| failure(command, "script timed out"))?
            .map_err(|e| failure(command, format!("failed to wait for script: {}", e)))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(failure(
                command,
                format!("{}: {}", output.status, stderr.trim()),
            ))
        }
    }
}

impl AutomationGateway for ScriptGateway {
    fn name(&self) -> &'static str {
        "script"
    }

    fn execute<'a>(&'a self, command: &'a AutomationCommand) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if command.kind.needs_pid() && command.pid.is_none() {
                return Err(EngineError::PidUnassigned(command.instance));
            }

            match (&command.kind, command.pid) {
                (CommandKind::Suspend, Some(pid)) if self.config.native_suspend => {
                    signal(pid, nix::sys::signal::Signal::SIGSTOP)
                }
                (CommandKind::Resume, Some(pid)) if self.config.native_suspend => {
                    signal(pid, nix::sys::signal::Signal::SIGCONT)
                }
                _ => self.run_script(command).await,
            }
        })
    }
}

/// Send `sig` to `pid`
fn signal(pid: u32, sig: nix::sys::signal::Signal) -> Result<()> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let raw = i32::try_from(pid)
        .map_err(|_| EngineError::ProcessSignal(format!("pid {} out of range", pid)))?;

    debug!("Sending {} to PID {}", sig, pid);
    kill(Pid::from_raw(raw), sig).map_err(|e| {
        EngineError::ProcessSignal(format!("failed to send {} to {}: {}", sig, pid, e))
    })
}

/// Gateway that only logs and records what it was asked to do
#[derive(Default)]
pub struct DryRunGateway {
    commands: Mutex<Vec<AutomationCommand>>,
    failing: Mutex<HashSet<CommandKind>>,
}

impl DryRunGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command executed so far, in execution order
    pub fn commands(&self) -> Vec<AutomationCommand> {
        self.commands.lock().clone()
    }

    /// Commands executed for one instance
    pub fn commands_for(&self, instance: u32) -> Vec<CommandKind> {
        self.commands
            .lock()
            .iter()
            .filter(|c| c.instance == instance)
            .map(|c| c.kind.clone())
            .collect()
    }

    pub fn count(&self, kind: &CommandKind) -> usize {
        self.commands
            .lock()
            .iter()
            .filter(|c| &c.kind == kind)
            .count()
    }

    /// Make every later command of this kind fail
    pub fn fail_on(&self, kind: CommandKind) {
        self.failing.lock().insert(kind);
    }

    pub fn clear_failures(&self) {
        self.failing.lock().clear();
    }
}

impl AutomationGateway for DryRunGateway {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    fn execute<'a>(&'a self, command: &'a AutomationCommand) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.failing.lock().contains(&command.kind) {
                return Err(failure(command, "injected failure"));
            }

            info!(
                instance = command.instance,
                pid = ?command.pid,
                "automation {} {:?}",
                command.kind,
                command.script_args()
            );
            self.commands.lock().push(command.clone());
            Ok(())
        })
    }
}
