// src/scheduler/mod.rs
//! Scheduling
//!
//! - **admission**: concurrency caps for BOOTING, GEN and the unfrozen queue
//! - **engine**: the [`Scheduler`] and its per-tick pipeline
//! - **operator**: console commands applied between ticks
//! - **control_loop**: the task that ticks the scheduler

pub mod admission;
pub mod control_loop;
pub mod engine;
pub mod operator;

pub use admission::{Admission, ConcurrencyLimits};
pub use control_loop::ControlLoop;
pub use engine::{
    Collaborators, InstanceView, Scheduler, SchedulerPolicy, SchedulerSnapshot, TickReport,
};
pub use operator::OperatorCommand;
