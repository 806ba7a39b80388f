// src/automation/command.rs
//! Automation command objects

use serde::Serialize;
use std::fmt;

/// What to do to an instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "arg", rename_all = "snake_case")]
pub enum CommandKind {
    /// Freeze the process
    Suspend,
    /// Unfreeze the process
    Resume,
    /// Leave the current world and start a new one
    Reset,
    /// Open the in-game pause menu
    Pause,
    /// Launch the game instance
    OpenInstance,
    /// Rename the game window
    SetTitle(String),
    /// Begin the world-generation session
    StartWorldgenSession,
    ToggleFullscreen,
}

/// Whether the caller waits for the command to finish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// The tick waits for completion and sees failures
    Blocking,
    /// Queued on the instance lane; failures are only logged
    Background,
}

impl CommandKind {
    /// Script file stem used by script-backed gateways
    pub fn script_name(&self) -> &'static str {
        match self {
            CommandKind::Suspend => "suspend",
            CommandKind::Resume => "resume",
            CommandKind::Reset => "reset",
            CommandKind::Pause => "pause",
            CommandKind::OpenInstance => "open-instance",
            CommandKind::SetTitle(_) => "set-title",
            CommandKind::StartWorldgenSession => "start-worldgen-session",
            CommandKind::ToggleFullscreen => "toggle-fullscreen",
        }
    }

    /// Resets must be confirmed before the instance counts as generating
    pub fn default_mode(&self) -> DispatchMode {
        match self {
            CommandKind::Reset => DispatchMode::Blocking,
            _ => DispatchMode::Background,
        }
    }

    /// Whether the command can run before a pid is known
    pub fn needs_pid(&self) -> bool {
        !matches!(self, CommandKind::OpenInstance)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.script_name())
    }
}

/// A command addressed to one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AutomationCommand {
    /// Target instance num; commands to one instance are serialized
    pub instance: u32,

    pub pid: Option<u32>,

    pub kind: CommandKind,

    pub mode: DispatchMode,
}

impl AutomationCommand {
    pub fn new(instance: u32, pid: Option<u32>, kind: CommandKind) -> Self {
        let mode = kind.default_mode();
        Self {
            instance,
            pid,
            kind,
            mode,
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.mode == DispatchMode::Blocking
    }

    /// `key=value` arguments handed to script gateways
    pub fn script_args(&self) -> Vec<String> {
        let mut args = vec![format!("instance={}", self.instance)];
        if let Some(pid) = self.pid {
            args.push(format!("pid={}", pid));
        }
        if let CommandKind::SetTitle(title) = &self.kind {
            args.push(format!("title={}", title));
        }
        args
    }
}
