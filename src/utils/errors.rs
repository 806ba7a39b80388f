// src/utils/errors.rs
//! Engine error types

use crate::instance::InstanceState;
use thiserror::Error;

/// Errors produced by the engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid or missing configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration sources could not be read or deserialized
    #[error("failed to load configuration: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("unknown instance #{0}")]
    UnknownInstance(u32),

    #[error("instance #{num} cannot move from {from} to {to}")]
    InvalidTransition {
        num: u32,
        from: InstanceState,
        to: InstanceState,
    },

    /// Operation needs a bound process id
    #[error("instance #{0} has no process id")]
    PidUnassigned(u32),

    #[error("pid {pid} is already claimed by instance #{owner}")]
    PidClaimed { pid: u32, owner: u32 },

    /// Automation command was rejected or failed
    #[error("automation command {command} for instance #{num} failed: {reason}")]
    Automation {
        num: u32,
        command: String,
        reason: String,
    },

    /// Operator input that does not parse
    #[error("invalid operator command: {0}")]
    InvalidCommand(String),

    #[error("display controller error: {0}")]
    Display(String),

    #[error("process signal error: {0}")]
    ProcessSignal(String),

    #[error("observability setup failed: {0}")]
    Observability(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether the failure is transient and the operation should be retried on a later tick
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::Automation { .. }
                | EngineError::Display(_)
                | EngineError::ProcessSignal(_)
                | EngineError::Io(_)
                | EngineError::PidUnassigned(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
