// src/utils/mod.rs
//! Common utilities shared by every layer of the engine
//!
//! - **clock**: monotonic time source and elapsed-duration predicate
//! - **config**: layered configuration loading and validation
//! - **errors**: the engine error type and `Result` alias

pub mod clock;
pub mod config;
pub mod errors;

pub use clock::{has_passed, Clock, ManualClock, MonotonicClock};
pub use config::EngineConfig;
pub use errors::{EngineError, Result};
