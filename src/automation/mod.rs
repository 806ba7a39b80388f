// src/automation/mod.rs
//! Input automation boundary
//!
//! The scheduler never touches game processes directly. It builds
//! [`AutomationCommand`]s and hands them to the [`CommandDispatcher`],
//! which serializes them per instance and forwards them to an
//! [`AutomationGateway`].
//!
//! - **Command**: command kinds, dispatch modes, script arguments
//! - **Gateway**: script-backed and dry-run gateways
//! - **Dispatcher**: per-instance FIFO lanes with completion signals

pub mod command;
pub mod dispatcher;
pub mod gateway;

pub use command::{AutomationCommand, CommandKind, DispatchMode};
pub use dispatcher::{CommandDispatcher, DispatchStats};
pub use gateway::{AutomationGateway, DryRunGateway, ScriptConfig, ScriptGateway};
