// src/lib.rs
//! MultiReset Engine Library
//!
//! Drives many speedrun game instances through boot, world generation,
//! freeze and play, keeping a stream of fresh worlds ready for the player.
//!
//! # Architecture
//!
//! The engine is structured into several key modules:
//!
//! - **instance**: per-instance lifecycle state machine and the instance pool
//! - **scheduler**: per-tick allocation policy, operator commands, control loop
//! - **automation**: command objects, per-instance dispatch lanes, gateways
//! - **observer**: world-generation completion detection
//! - **display**: overlay visibility for primary and focused instances
//! - **discovery**: process-id discovery and liveness
//! - **observability**: tracing and metrics setup
//! - **utils**: configuration, errors, clock

// Public module exports
pub mod automation;
pub mod discovery;
pub mod display;
pub mod instance;
pub mod observability;
pub mod observer;
pub mod scheduler;
pub mod utils;

// Re-export commonly used types
pub use instance::{Instance, InstancePool, InstanceState};
pub use scheduler::{ControlLoop, OperatorCommand, Scheduler, SchedulerPolicy, TickReport};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Engine build information
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}
