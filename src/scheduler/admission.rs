// src/scheduler/admission.rs
//! Concurrency caps and per-tick admission
//!
//! BOOTING and GEN are the resource-heavy states. Each tick the scheduler
//! asks how many more instances may enter them; anything beyond the cap
//! simply waits for a later tick.

use crate::instance::{InstancePool, InstanceState};
use serde::{Deserialize, Serialize};

/// Caps on resource-heavy states and the unfrozen queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyLimits {
    /// Instances generating worlds at once
    pub max_concurrent: usize,

    /// Instances booting at once
    pub max_concurrent_boot: usize,

    /// Lower GEN cap applied while a run is being played
    pub max_concurrent_in_run: Option<usize>,

    /// READY + APPROVED instances kept unfrozen
    pub unfrozen_queue_size: usize,
}

impl Default for ConcurrencyLimits {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            max_concurrent_boot: 1,
            max_concurrent_in_run: None,
            unfrozen_queue_size: 1,
        }
    }
}

impl ConcurrencyLimits {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be at least 1".to_string());
        }

        if self.max_concurrent_boot == 0 {
            return Err("max_concurrent_boot must be at least 1".to_string());
        }

        if let Some(in_run) = self.max_concurrent_in_run {
            if in_run > self.max_concurrent {
                return Err(format!(
                    "max_concurrent_in_run ({}) cannot exceed max_concurrent ({})",
                    in_run, self.max_concurrent
                ));
            }
        }

        Ok(())
    }

    /// GEN cap, lowered while a run is active
    pub fn gen_cap(&self, run_active: bool) -> usize {
        match (run_active, self.max_concurrent_in_run) {
            (true, Some(in_run)) => in_run,
            _ => self.max_concurrent,
        }
    }

    /// Upper bound on BOOTING + GEN at any tick
    pub fn heavy_cap(&self) -> usize {
        self.max_concurrent + self.max_concurrent_boot
    }
}

/// Free slots for this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub boot_slots: usize,
    pub gen_slots: usize,
    pub unfreeze_slots: usize,
}

impl Admission {
    pub fn compute(limits: &ConcurrencyLimits, pool: &InstancePool) -> Self {
        let booting = pool.count_in_state(InstanceState::Booting);
        let generating = pool.count_in_state(InstanceState::Gen);
        let run_active = pool.count_in_state(InstanceState::Active) > 0;
        let unfrozen = pool.count_where(|inst| inst.is_ready());

        Self {
            boot_slots: limits.max_concurrent_boot.saturating_sub(booting),
            gen_slots: limits.gen_cap(run_active).saturating_sub(generating),
            unfreeze_slots: limits.unfrozen_queue_size.saturating_sub(unfrozen),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Instant;

    #[test]
    fn test_default_limits() {
        let limits = ConcurrencyLimits::default();
        assert_eq!(limits.max_concurrent, 2);
        assert_eq!(limits.max_concurrent_boot, 1);
        assert_eq!(limits.heavy_cap(), 3);
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let zero_gen = ConcurrencyLimits {
            max_concurrent: 0,
            ..Default::default()
        };
        assert!(zero_gen.validate().is_err());

        let zero_boot = ConcurrencyLimits {
            max_concurrent_boot: 0,
            ..Default::default()
        };
        assert!(zero_boot.validate().is_err());

        let in_run_too_high = ConcurrencyLimits {
            max_concurrent_in_run: Some(5),
            ..Default::default()
        };
        assert!(in_run_too_high.validate().is_err());
    }

    #[test]
    fn test_gen_cap_during_run() {
        let limits = ConcurrencyLimits {
            max_concurrent: 4,
            max_concurrent_in_run: Some(1),
            ..Default::default()
        };
        assert_eq!(limits.gen_cap(false), 4);
        assert_eq!(limits.gen_cap(true), 1);

        let no_override = ConcurrencyLimits::default();
        assert_eq!(no_override.gen_cap(true), 2);
    }

    #[test]
    fn test_admission_counts_slots() {
        let now = Instant::now();
        let mut pool = InstancePool::new(4, "inst", Path::new("/"), now);
        let (inst, counters) = pool.entry(1).unwrap();
        inst.mark_booting(counters, now).unwrap();

        let limits = ConcurrencyLimits {
            max_concurrent: 2,
            max_concurrent_boot: 2,
            max_concurrent_in_run: None,
            unfrozen_queue_size: 1,
        };
        let admission = Admission::compute(&limits, &pool);
        assert_eq!(admission.boot_slots, 1);
        assert_eq!(admission.gen_slots, 2);
        assert_eq!(admission.unfreeze_slots, 1);
    }
}
