// src/instance/pool.rs
//! Instance pool
//!
//! The pool owns every [`Instance`] for the lifetime of a run, plus the
//! per-state entry counters that give instances their priority. It is
//! built once from the configured instance count and never resized.
//!
//! # Architecture
//!
//! ```text
//! InstancePool
//! ├─ instances: [#1, #2, ... #N]   (creation order = num order)
//! └─ counters:  DEAD=N, BOOTING=k, GEN=m, ...
//! ```
//!
//! The scheduler only observes global state through the views below.

use crate::instance::entity::Instance;
use crate::instance::state::{InstanceState, StateCounters};
use crate::utils::errors::{EngineError, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Canonical collection of managed instances
#[derive(Debug)]
pub struct InstancePool {
    instances: Vec<Instance>,
    counters: StateCounters,
}

impl InstancePool {
    /// Create `count` DEAD instances numbered 1..=count
    pub fn new(count: u32, base_name: &str, root_dir: &Path, now: Instant) -> Self {
        info!("Initializing instance pool with {} instances", count);

        let mut counters = StateCounters::new();
        let instances = (1..=count)
            .map(|num| Instance::new(num, base_name, root_dir, &mut counters, now))
            .collect();

        Self {
            instances,
            counters,
        }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn counters(&self) -> &StateCounters {
        &self.counters
    }

    pub fn get(&self, num: u32) -> Result<&Instance> {
        self.index_of(num)
            .map(|i| &self.instances[i])
            .ok_or(EngineError::UnknownInstance(num))
    }

    pub fn get_mut(&mut self, num: u32) -> Result<&mut Instance> {
        let index = self
            .index_of(num)
            .ok_or(EngineError::UnknownInstance(num))?;
        Ok(&mut self.instances[index])
    }

    /// Borrow an instance together with the counters its transitions need
    pub fn entry(&mut self, num: u32) -> Result<(&mut Instance, &mut StateCounters)> {
        let index = self
            .index_of(num)
            .ok_or(EngineError::UnknownInstance(num))?;
        Ok((&mut self.instances[index], &mut self.counters))
    }

    fn index_of(&self, num: u32) -> Option<usize> {
        // nums are 1..=N in order
        let index = (num as usize).checked_sub(1)?;
        (index < self.instances.len()).then_some(index)
    }

    // ---- views ----

    /// Every instance, in num order
    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.instances.iter()
    }

    pub fn filter<'a, F>(&'a self, predicate: F) -> impl Iterator<Item = &'a Instance> + 'a
    where
        F: Fn(&Instance) -> bool + 'a,
    {
        self.instances.iter().filter(move |inst| predicate(inst))
    }

    pub fn in_state(&self, state: InstanceState) -> impl Iterator<Item = &Instance> {
        self.instances
            .iter()
            .filter(move |inst| inst.state() == state)
    }

    pub fn nums_in_state(&self, state: InstanceState) -> Vec<u32> {
        self.in_state(state).map(Instance::num).collect()
    }

    pub fn count_in_state(&self, state: InstanceState) -> usize {
        self.in_state(state).count()
    }

    pub fn count_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Instance) -> bool,
    {
        self.instances.iter().filter(|inst| predicate(inst)).count()
    }

    pub fn dead(&self) -> impl Iterator<Item = &Instance> {
        self.in_state(InstanceState::Dead)
    }

    pub fn pid_bound(&self) -> impl Iterator<Item = &Instance> {
        self.instances.iter().filter(|inst| inst.pid().is_some())
    }

    pub fn claimed_pids(&self) -> HashSet<u32> {
        self.instances.iter().filter_map(Instance::pid).collect()
    }

    pub fn owner_of(&self, pid: u32) -> Option<u32> {
        self.instances
            .iter()
            .find(|inst| inst.pid() == Some(pid))
            .map(Instance::num)
    }

    /// Instances in `state`, ordered for allocation: by num, or by
    /// per-state entry priority (ties by num) when `prioritize` is set
    pub fn ordered(&self, state: InstanceState, prioritize: bool) -> Vec<u32> {
        let mut candidates: Vec<&Instance> = self.in_state(state).collect();
        if prioritize {
            candidates.sort_by_key(|inst| (inst.priority(), inst.num()));
        }
        candidates.into_iter().map(Instance::num).collect()
    }

    // ---- pid binding ----

    /// Bind the first discovered pid no instance has claimed yet.
    /// Returns the claimed pid, or `None` when every pid is taken.
    pub fn assign_pid(&mut self, num: u32, discovered: &[u32]) -> Result<Option<u32>> {
        if let Some(pid) = self.get(num)?.pid() {
            return Ok(Some(pid));
        }

        let claimed = self.claimed_pids();
        let unclaimed = discovered
            .iter()
            .copied()
            .find(|pid| !claimed.contains(pid));
        let Some(pid) = unclaimed else {
            debug!(instance = num, "no unclaimed pid available");
            return Ok(None);
        };

        self.get_mut(num)?.bind_pid(pid);
        Ok(Some(pid))
    }

    /// Bind a specific pid, refusing one owned by another instance
    pub fn bind_pid(&mut self, num: u32, pid: u32) -> Result<()> {
        if let Some(owner) = self.owner_of(pid) {
            if owner != num {
                return Err(EngineError::PidClaimed { pid, owner });
            }
        }
        self.get_mut(num)?.bind_pid(pid);
        Ok(())
    }

    /// Per-state instance counts
    pub fn stats(&self) -> PoolStats {
        let mut by_state = [0usize; InstanceState::COUNT];
        for inst in &self.instances {
            by_state[inst.state().index()] += 1;
        }

        PoolStats {
            total: self.instances.len(),
            suspended: self.count_where(Instance::is_suspended),
            by_state: InstanceState::ALL
                .iter()
                .map(|state| (*state, by_state[state.index()]))
                .collect(),
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub suspended: usize,
    pub by_state: Vec<(InstanceState, usize)>,
}

impl PoolStats {
    pub fn count(&self, state: InstanceState) -> usize {
        self.by_state
            .iter()
            .find(|(s, _)| *s == state)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}
