// src/instance/entity.rs
//! A single managed game instance
//!
//! Holds identity, process binding, lifecycle state and the timestamp of
//! the last timed state entry. Every transition goes through the table in
//! [`InstanceState::can_transition_to`] and draws its priority from the
//! pool's [`StateCounters`].

use crate::automation::{AutomationCommand, CommandDispatcher, CommandKind};
use crate::instance::state::{InstanceState, StateCounters};
use crate::utils::clock::has_passed;
use crate::utils::errors::{EngineError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Save folders created by a fresh world start with this prefix
const NEW_WORLD_PREFIX: &str = "New World";

/// Durations used by the time-gated predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceTimings {
    pub boot_delay: Duration,
    pub freeze_delay: Duration,
    pub unfreeze_delay: Duration,
    pub auto_reset: Duration,
}

impl Default for InstanceTimings {
    fn default() -> Self {
        Self {
            boot_delay: Duration::from_secs(8),
            freeze_delay: Duration::from_secs(2),
            unfreeze_delay: Duration::from_millis(500),
            auto_reset: Duration::from_secs(300),
        }
    }
}

/// One managed game process and its current world attempt
#[derive(Debug, Clone)]
pub struct Instance {
    num: u32,
    name: String,
    dir: PathBuf,
    pid: Option<u32>,
    state: InstanceState,
    suspended: bool,
    timestamp: Instant,
    priority: u64,
    was_active: bool,
    first_reset: bool,
}

impl Instance {
    pub(crate) fn new(
        num: u32,
        base_name: &str,
        root_dir: &Path,
        counters: &mut StateCounters,
        now: Instant,
    ) -> Self {
        let name = format!("{}{}", base_name, num);
        let dir = root_dir.join(&name);

        Self {
            num,
            name,
            dir,
            pid: None,
            state: InstanceState::Dead,
            suspended: false,
            timestamp: now,
            priority: counters.next(InstanceState::Dead),
            was_active: false,
            first_reset: true,
        }
    }

    pub fn num(&self) -> u32 {
        self.num
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn priority(&self) -> u64 {
        self.priority
    }

    pub fn was_active(&self) -> bool {
        self.was_active
    }

    pub fn is_first_reset(&self) -> bool {
        self.first_reset
    }

    pub fn is_active(&self) -> bool {
        self.state == InstanceState::Active
    }

    /// READY or APPROVED
    pub fn is_ready(&self) -> bool {
        matches!(self.state, InstanceState::Ready | InstanceState::Approved)
    }

    /// Path of the game log tailed for worldgen completion
    pub fn log_file(&self) -> PathBuf {
        self.dir.join("logs").join("latest.log")
    }

    // ---- transitions ----

    fn enter(&mut self, next: InstanceState, counters: &mut StateCounters) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                num: self.num,
                from: self.state,
                to: next,
            });
        }

        trace!(instance = self.num, from = %self.state, to = %next, "state transition");
        self.priority = counters.next(next);
        self.state = next;
        Ok(())
    }

    pub fn mark_booting(&mut self, counters: &mut StateCounters, now: Instant) -> Result<()> {
        self.enter(InstanceState::Booting, counters)?;
        self.timestamp = now;
        Ok(())
    }

    pub fn mark_pregen(&mut self, counters: &mut StateCounters) -> Result<()> {
        self.enter(InstanceState::Pregen, counters)?;
        self.was_active = false;
        Ok(())
    }

    pub fn mark_generating(&mut self, counters: &mut StateCounters, now: Instant) -> Result<()> {
        self.enter(InstanceState::Gen, counters)?;
        self.timestamp = now;
        Ok(())
    }

    pub fn mark_worldgen_finished(
        &mut self,
        counters: &mut StateCounters,
        now: Instant,
    ) -> Result<()> {
        self.enter(InstanceState::Paused, counters)?;
        self.timestamp = now;
        self.first_reset = false;
        Ok(())
    }

    pub fn mark_free(&mut self, counters: &mut StateCounters) -> Result<()> {
        self.enter(InstanceState::Free, counters)
    }

    /// Give the instance back to the pool: FREE when suspended, PREGEN otherwise
    pub fn release(&mut self, counters: &mut StateCounters, now: Instant) -> Result<InstanceState> {
        let next = if self.suspended {
            InstanceState::Free
        } else {
            InstanceState::Pregen
        };
        self.enter(next, counters)?;
        self.timestamp = now;
        Ok(next)
    }

    pub fn mark_ready(&mut self, counters: &mut StateCounters) -> Result<()> {
        self.enter(InstanceState::Ready, counters)
    }

    pub fn mark_approved(&mut self, counters: &mut StateCounters) -> Result<()> {
        self.enter(InstanceState::Approved, counters)
    }

    pub fn mark_active(&mut self, counters: &mut StateCounters) -> Result<()> {
        self.enter(InstanceState::Active, counters)?;
        self.was_active = true;
        Ok(())
    }

    pub fn mark_inactive(&mut self, counters: &mut StateCounters) -> Result<()> {
        self.mark_pregen(counters)
    }

    /// The bound process is gone
    pub fn mark_dead(&mut self, counters: &mut StateCounters, now: Instant) -> Result<()> {
        self.enter(InstanceState::Dead, counters)?;
        self.timestamp = now;
        self.pid = None;
        self.suspended = false;
        Ok(())
    }

    pub(crate) fn bind_pid(&mut self, pid: u32) {
        debug!(instance = self.num, pid, "bound process id");
        self.pid = Some(pid);
    }

    // ---- time-gated predicates ----

    /// One freeze delay regardless of state
    pub fn is_ready_for_freeze(&self, timings: &InstanceTimings, now: Instant) -> bool {
        has_passed(self.timestamp, timings.freeze_delay, now)
    }

    pub fn is_ready_for_unfreeze(&self, timings: &InstanceTimings, now: Instant) -> bool {
        has_passed(self.timestamp, timings.unfreeze_delay, now)
    }

    pub fn is_done_unfreezing(&self, timings: &InstanceTimings, now: Instant) -> bool {
        has_passed(self.timestamp, timings.unfreeze_delay, now)
    }

    pub fn is_done_booting(&self, timings: &InstanceTimings, now: Instant) -> bool {
        has_passed(self.timestamp, timings.boot_delay, now)
    }

    /// Pure check: has the instance dwelt in its current state for the auto-reset timeout
    pub fn should_auto_reset(&self, timings: &InstanceTimings, now: Instant) -> bool {
        has_passed(self.timestamp, timings.auto_reset, now)
    }

    /// Releases the instance when the auto-reset timeout has elapsed.
    /// Returns whether it fired.
    pub fn check_should_auto_reset(
        &mut self,
        counters: &mut StateCounters,
        timings: &InstanceTimings,
        now: Instant,
    ) -> Result<bool> {
        if !self.should_auto_reset(timings, now) {
            return Ok(false);
        }
        self.release(counters, now)?;
        Ok(true)
    }

    // ---- process control ----

    /// Build a command addressed to this instance
    pub fn command(&self, kind: CommandKind) -> AutomationCommand {
        AutomationCommand::new(self.num, self.pid, kind)
    }

    /// Freeze the process. Only issues a command when the flag actually flips.
    pub async fn suspend(&mut self, automation: &CommandDispatcher) -> Result<bool> {
        if self.suspended {
            return Ok(false);
        }
        if self.pid.is_none() || !self.state.capabilities().can_suspend {
            return Err(EngineError::PidUnassigned(self.num));
        }

        automation.submit(self.command(CommandKind::Suspend)).await?;
        self.suspended = true;
        Ok(true)
    }

    /// Unfreeze the process. Only issues a command when the flag actually flips.
    pub async fn resume(&mut self, automation: &CommandDispatcher) -> Result<bool> {
        if !self.suspended {
            return Ok(false);
        }
        if self.pid.is_none() {
            return Err(EngineError::PidUnassigned(self.num));
        }

        automation.submit(self.command(CommandKind::Resume)).await?;
        self.suspended = false;
        Ok(true)
    }

    // ---- world files ----

    /// Move finished save folders out of the instance into `archive_dir`.
    /// Folders that fail to move are skipped.
    pub fn move_worlds(&self, archive_dir: &Path) -> Result<usize> {
        let saves = self.dir.join("saves");
        if !saves.is_dir() {
            return Ok(0);
        }

        fs::create_dir_all(archive_dir)?;

        let mut moved = 0;
        for entry in fs::read_dir(&saves)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(instance = self.num, "failed to read save entry: {}", e);
                    continue;
                }
            };

            let file_name = entry.file_name();
            if !file_name.to_string_lossy().starts_with(NEW_WORLD_PREFIX) {
                continue;
            }

            let target = archive_dir.join(ulid::Ulid::new().to_string());
            match fs::rename(entry.path(), &target) {
                Ok(()) => moved += 1,
                Err(e) => {
                    warn!(
                        instance = self.num,
                        world = %file_name.to_string_lossy(),
                        "failed to archive world: {}",
                        e
                    );
                }
            }
        }

        if moved > 0 {
            debug!(instance = self.num, moved, "archived old worlds");
        }
        Ok(moved)
    }
}
