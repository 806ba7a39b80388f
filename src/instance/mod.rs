// src/instance/mod.rs
//! Instance lifecycle
//!
//! - **State**: lifecycle enum, permitted-transition table, capabilities
//! - **Entity**: one instance with its timestamped transitions and predicates
//! - **Pool**: the canonical instance collection and its filtered views
//!
//! # Lifecycle
//!
//! ```text
//! DEAD → BOOTING → GEN → PAUSED → READY → APPROVED → ACTIVE
//!                   ↑                │                   │
//!                   └──── PREGEN ←───┴──── release ──────┘
//!                            ↑
//!                          FREE (released while suspended)
//! ```

pub mod entity;
pub mod pool;
pub mod state;

pub use entity::{Instance, InstanceTimings};
pub use pool::{InstancePool, PoolStats};
pub use state::{Capabilities, InstanceState, StateCounters};
