// src/instance/state.rs
//! Lifecycle states, the permitted-transition table and per-state capabilities

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    /// No process associated
    Dead,
    /// Launch requested, waiting for the process to come up
    Booting,
    /// Idle and available for reuse
    Free,
    /// Queued for the next world-generation cycle
    Pregen,
    /// World generation in progress
    Gen,
    /// World generated, frozen while it waits for promotion
    Paused,
    /// Unfrozen and selectable
    Ready,
    /// Eligible for display
    Approved,
    /// Being played
    Active,
}

/// What an instance may do while in a given state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub can_suspend: bool,
    pub can_be_primary: bool,
    pub can_auto_reset: bool,
}

impl InstanceState {
    pub const COUNT: usize = 9;

    pub const ALL: [InstanceState; Self::COUNT] = [
        InstanceState::Dead,
        InstanceState::Booting,
        InstanceState::Free,
        InstanceState::Pregen,
        InstanceState::Gen,
        InstanceState::Paused,
        InstanceState::Ready,
        InstanceState::Approved,
        InstanceState::Active,
    ];

    /// Stable index, used for per-state counters
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstanceState::Dead => "DEAD",
            InstanceState::Booting => "BOOTING",
            InstanceState::Free => "FREE",
            InstanceState::Pregen => "PREGEN",
            InstanceState::Gen => "GEN",
            InstanceState::Paused => "PAUSED",
            InstanceState::Ready => "READY",
            InstanceState::Approved => "APPROVED",
            InstanceState::Active => "ACTIVE",
        }
    }

    /// Whether `self -> next` appears in the transition table.
    /// Re-entering the current state is always permitted.
    pub fn can_transition_to(self, next: InstanceState) -> bool {
        use InstanceState::*;

        if self == next {
            return true;
        }

        match next {
            Dead | Booting => true,
            Free | Pregen => self != Dead,
            Gen => matches!(self, Booting | Pregen),
            Paused => self == Gen,
            Ready => matches!(self, Paused | Approved),
            Approved => self == Ready,
            Active => matches!(self, Ready | Approved),
        }
    }

    pub fn capabilities(self) -> Capabilities {
        use InstanceState::*;

        Capabilities {
            can_suspend: self != Dead,
            can_be_primary: matches!(self, Ready | Approved | Active),
            can_auto_reset: matches!(self, Gen | Paused | Ready | Approved),
        }
    }

    /// States that hold heavy resources and count against concurrency caps
    pub fn is_resource_heavy(self) -> bool {
        matches!(self, InstanceState::Booting | InstanceState::Gen)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-state entry counters driving instance priority
#[derive(Debug, Clone, Default)]
pub struct StateCounters {
    entered: [u64; InstanceState::COUNT],
}

impl StateCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more entry into `state` and return the new count
    pub fn next(&mut self, state: InstanceState) -> u64 {
        let slot = &mut self.entered[state.index()];
        *slot += 1;
        *slot
    }

    /// How many times `state` has been entered so far
    pub fn entered(&self, state: InstanceState) -> u64 {
        self.entered[state.index()]
    }
}
