// src/scheduler/engine.rs
//! The scheduler: one pass over the pool per tick
//!
//! # Tick pipeline
//!
//! ```text
//! reap ─► pids ─► worldgen ─► freeze ─► unfreeze ─► auto-reset ─► recycle ─► GEN admission ─► boot admission
//!  │        │         │          │          │            │             │             │                 │
//!  DEAD   claim    PAUSED     suspend    READY     FREE/PREGEN      PREGEN          GEN             BOOTING
//! ```
//!
//! Every step addresses instances by number and works on a snapshot of
//! candidate numbers taken before it starts, so a failure on one instance
//! only skips that instance. Primary and focused promotion happen outside
//! the tick, through operator commands.

use crate::automation::{
    AutomationGateway, CommandDispatcher, CommandKind, DispatchStats, DryRunGateway, ScriptConfig,
    ScriptGateway,
};
use crate::discovery::{FixedPidSource, PidSource, ProcessScanner};
use crate::display::{
    DisplayController, DisplayHandle, MemoryDisplay, NoopDisplay, SocketDisplay,
};
use crate::instance::{Instance, InstancePool, InstanceState, InstanceTimings, PoolStats};
use crate::observer::{LogTailObserver, SimulatedObserver, WorldgenObserver};
use crate::scheduler::admission::{Admission, ConcurrencyLimits};
use crate::utils::clock::{Clock, MonotonicClock};
use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Synthetic pids in test mode start above this value
const TEST_PID_BASE: u32 = 40_000;

/// Allocation policy knobs
#[derive(Debug, Clone)]
pub struct SchedulerPolicy {
    pub limits: ConcurrencyLimits,

    /// Order candidates by per-state priority instead of instance number
    pub use_prioritization: bool,

    /// Booted instances take GEN slots before PREGEN instances
    pub prioritize_booting: bool,

    /// Boot DEAD instances without an explicit request
    pub auto_launch: bool,

    /// Pause the game when worldgen completes
    pub auto_pause: bool,

    /// Toggle fullscreen on the new primary
    pub fullscreen: bool,

    /// Window title, `{num}` and `{name}` substituted
    pub title_template: String,

    /// Old worlds are moved here before each reset
    pub archive_dir: Option<PathBuf>,
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        Self {
            limits: ConcurrencyLimits::default(),
            use_prioritization: true,
            prioritize_booting: false,
            auto_launch: true,
            auto_pause: true,
            fullscreen: false,
            title_template: "Minecraft* - Instance {num}".to_string(),
            archive_dir: None,
        }
    }
}

impl SchedulerPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        let scheduler = &config.scheduler;
        Self {
            limits: scheduler.limits.clone(),
            use_prioritization: scheduler.use_prioritization,
            prioritize_booting: scheduler.prioritize_booting,
            auto_launch: scheduler.auto_launch,
            auto_pause: scheduler.auto_pause,
            fullscreen: scheduler.fullscreen,
            title_template: config.automation.title_template.clone(),
            archive_dir: config.worldgen.archive_dir.clone(),
        }
    }

    pub fn render_title(&self, num: u32, name: &str) -> String {
        self.title_template
            .replace("{num}", &num.to_string())
            .replace("{name}", name)
    }
}

/// External capabilities the scheduler drives
pub struct Collaborators {
    pub automation: CommandDispatcher,
    pub observer: Arc<dyn WorldgenObserver>,
    pub pids: Arc<dyn PidSource>,
    pub display: DisplayHandle,
    pub clock: Arc<dyn Clock>,
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub died: Vec<u32>,
    /// (instance, pid)
    pub pids_bound: Vec<(u32, u32)>,
    pub worldgen_finished: Vec<u32>,
    pub frozen: Vec<u32>,
    pub unfrozen: Vec<u32>,
    pub auto_reset: Vec<u32>,
    pub recycled: Vec<u32>,
    pub generating: Vec<u32>,
    pub booted: Vec<u32>,
    /// Per-instance steps that failed and will be retried
    pub failures: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.failures == 0
            && self.died.is_empty()
            && self.pids_bound.is_empty()
            && self.worldgen_finished.is_empty()
            && self.frozen.is_empty()
            && self.unfrozen.is_empty()
            && self.auto_reset.is_empty()
            && self.recycled.is_empty()
            && self.generating.is_empty()
            && self.booted.is_empty()
    }

    fn fail(&mut self, num: u32, step: &'static str, err: &EngineError) {
        self.failures += 1;
        metrics::counter!("multireset_step_failures_total", "step" => step).increment(1);
        if err.is_transient() {
            warn!(instance = num, step, "{}", err);
        } else {
            error!(instance = num, step, "{}", err);
        }
    }
}

/// Per-instance line in a snapshot
#[derive(Debug, Clone, Serialize)]
pub struct InstanceView {
    pub num: u32,
    pub state: InstanceState,
    pub pid: Option<u32>,
    pub suspended: bool,
}

/// Point-in-time view for the `status` command
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSnapshot {
    pub ticks: u64,
    pub attempts: u64,
    pub primary: Option<u32>,
    pub focused: Option<u32>,
    pub pool: PoolStats,
    pub automation: DispatchStats,
    pub instances: Vec<InstanceView>,
}

fn record_transition(state: InstanceState) {
    metrics::counter!("multireset_transitions_total", "state" => state.as_str()).increment(1);
}

#[derive(Debug, Clone, Copy)]
enum GenCandidate {
    Booted(u32),
    Pregen(u32),
}

/// Owns the pool and every display slot; drives instances through their lifecycle
pub struct Scheduler {
    policy: SchedulerPolicy,
    timings: InstanceTimings,
    pool: InstancePool,
    automation: CommandDispatcher,
    observer: Arc<dyn WorldgenObserver>,
    pids: Arc<dyn PidSource>,
    display: DisplayHandle,
    clock: Arc<dyn Clock>,
    primary: Option<u32>,
    focused: Option<u32>,
    boot_requests: BTreeSet<u32>,
    attempts: u64,
    ticks: u64,
}

impl Scheduler {
    pub fn new(
        policy: SchedulerPolicy,
        timings: InstanceTimings,
        pool: InstancePool,
        parts: Collaborators,
    ) -> Self {
        info!(
            instances = pool.len(),
            gateway = parts.automation.gateway_name(),
            max_concurrent = policy.limits.max_concurrent,
            max_concurrent_boot = policy.limits.max_concurrent_boot,
            "scheduler initialized"
        );

        Self {
            policy,
            timings,
            pool,
            automation: parts.automation,
            observer: parts.observer,
            pids: parts.pids,
            display: parts.display,
            clock: parts.clock,
            primary: None,
            focused: None,
            boot_requests: BTreeSet::new(),
            attempts: 0,
            ticks: 0,
        }
    }

    /// Wire up production or test-mode collaborators from configuration
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        config.validate()?;

        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock);
        let pool = InstancePool::new(
            config.instances.count,
            &config.instances.base_name,
            &config.instances.root_dir,
            clock.now(),
        );

        let gateway: Arc<dyn AutomationGateway> = if config.test_mode || !config.automation.enabled
        {
            Arc::new(DryRunGateway::new())
        } else {
            Arc::new(ScriptGateway::new(ScriptConfig {
                script_dir: config.automation.script_dir.clone(),
                interpreter: config.automation.interpreter.clone(),
                extension: config.automation.script_extension.clone(),
                native_suspend: config.automation.native_suspend,
                timeout: config.automation.command_timeout(),
            }))
        };

        let observer: Arc<dyn WorldgenObserver> = if config.test_mode {
            Arc::new(SimulatedObserver::new(Duration::from_secs_f64(
                config.worldgen.simulated_secs,
            )))
        } else {
            Arc::new(LogTailObserver::new(
                config.worldgen.lines_from_bottom,
                config.worldgen.markers.clone(),
            ))
        };

        let pids: Arc<dyn PidSource> = if config.test_mode {
            Arc::new(FixedPidSource::synthetic(
                config.instances.count,
                TEST_PID_BASE,
            ))
        } else {
            Arc::new(ProcessScanner::new(config.discovery.process_name.clone()))
        };

        let controller: Arc<dyn DisplayController> = if config.test_mode {
            Arc::new(MemoryDisplay::new())
        } else if config.display.enabled {
            Arc::new(SocketDisplay::new(
                &config.display.host,
                config.display.port,
                config.display.password.clone(),
                config.display.timeout(),
            ))
        } else {
            Arc::new(NoopDisplay)
        };

        Ok(Self::new(
            SchedulerPolicy::from_config(config),
            config.scheduler.timings(),
            pool,
            Collaborators {
                automation: CommandDispatcher::new(gateway, config.automation.parallelize),
                observer,
                pids,
                display: DisplayHandle::new(
                    controller,
                    config.display.primary_prefix.clone(),
                    config.display.focused_prefix.clone(),
                ),
                clock,
            },
        ))
    }

    pub fn pool(&self) -> &InstancePool {
        &self.pool
    }

    #[cfg(test)]
    pub(crate) fn pool_mut(&mut self) -> &mut InstancePool {
        &mut self.pool
    }

    pub fn policy(&self) -> &SchedulerPolicy {
        &self.policy
    }

    pub fn automation(&self) -> &CommandDispatcher {
        &self.automation
    }

    pub fn primary(&self) -> Option<u32> {
        self.primary
    }

    pub fn focused(&self) -> Option<u32> {
        self.focused
    }

    /// Completed runs and auto-resets
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            ticks: self.ticks,
            attempts: self.attempts,
            primary: self.primary,
            focused: self.focused,
            pool: self.pool.stats(),
            automation: self.automation.stats(),
            instances: self
                .pool
                .iter()
                .map(|inst| InstanceView {
                    num: inst.num(),
                    state: inst.state(),
                    pid: inst.pid(),
                    suspended: inst.is_suspended(),
                })
                .collect(),
        }
    }

    /// Queue a DEAD instance for boot admission. Returns false when it is
    /// not DEAD or already queued.
    pub fn request_boot(&mut self, num: u32) -> Result<bool> {
        let state = self.pool.get(num)?.state();
        if state != InstanceState::Dead {
            debug!(instance = num, %state, "boot request ignored");
            return Ok(false);
        }
        Ok(self.boot_requests.insert(num))
    }

    // ---- tick ----

    /// Run one pass of the pipeline
    pub async fn tick(&mut self) -> TickReport {
        let now = self.clock.now();
        let mut report = TickReport::default();
        self.ticks += 1;

        self.reap_exited(now, &mut report).await;
        self.assign_pids(&mut report);
        self.poll_worldgen(now, &mut report).await;
        self.freeze_paused(now, &mut report).await;
        self.unfreeze_ready(now, &mut report).await;
        self.auto_reset(now, &mut report).await;
        self.recycle_free(&mut report).await;
        self.admit_generation(now, &mut report).await;
        self.admit_boots(now, &mut report).await;

        self.check_heavy_cap();
        self.publish_gauges();
        report
    }

    fn ordered(&self, state: InstanceState) -> Vec<u32> {
        self.pool.ordered(state, self.policy.use_prioritization)
    }

    async fn reap_exited(&mut self, now: Instant, report: &mut TickReport) {
        let exited: Vec<u32> = self
            .pool
            .pid_bound()
            .filter(|inst| inst.pid().is_some_and(|pid| !self.pids.is_alive(pid)))
            .map(Instance::num)
            .collect();

        for num in exited {
            if self.primary == Some(num) {
                self.primary = None;
                self.display.hide_primary(num).await;
            }
            if self.focused == Some(num) {
                self.focused = None;
                self.display.hide_focused(num).await;
            }

            let result = self
                .pool
                .entry(num)
                .and_then(|(inst, counters)| inst.mark_dead(counters, now));
            match result {
                Ok(()) => {
                    warn!(instance = num, "process exited");
                    record_transition(InstanceState::Dead);
                    report.died.push(num);
                }
                Err(e) => report.fail(num, "reap", &e),
            }
        }
    }

    fn assign_pids(&mut self, report: &mut TickReport) {
        let waiting: Vec<u32> = self
            .ordered(InstanceState::Booting)
            .into_iter()
            .filter(|num| self.pool.get(*num).is_ok_and(|inst| inst.pid().is_none()))
            .collect();
        if waiting.is_empty() {
            return;
        }

        let discovered = self.pids.discover();
        for num in waiting {
            match self.pool.assign_pid(num, &discovered) {
                Ok(Some(pid)) => {
                    info!(instance = num, pid, "claimed process");
                    report.pids_bound.push((num, pid));
                }
                Ok(None) => {}
                Err(e) => report.fail(num, "pid", &e),
            }
        }
    }

    async fn poll_worldgen(&mut self, now: Instant, report: &mut TickReport) {
        for num in self.ordered(InstanceState::Gen) {
            let complete = match self.pool.get(num) {
                Ok(inst) => match self.observer.is_worldgen_complete(inst, now) {
                    Ok(complete) => complete,
                    Err(e) => {
                        debug!(instance = num, "worldgen check failed: {}", e);
                        false
                    }
                },
                Err(e) => {
                    report.fail(num, "worldgen", &e);
                    continue;
                }
            };

            if !complete {
                continue;
            }
            match self.finish_worldgen(num, now).await {
                Ok(()) => report.worldgen_finished.push(num),
                Err(e) => report.fail(num, "worldgen", &e),
            }
        }
    }

    async fn finish_worldgen(&mut self, num: u32, now: Instant) -> Result<()> {
        if self.policy.auto_pause {
            let pause = self.pool.get(num)?.command(CommandKind::Pause);
            self.automation.submit(pause).await?;
        }

        let (inst, counters) = self.pool.entry(num)?;
        inst.mark_worldgen_finished(counters, now)?;
        record_transition(InstanceState::Paused);
        info!(instance = num, "worldgen finished");
        Ok(())
    }

    async fn freeze_paused(&mut self, now: Instant, report: &mut TickReport) {
        let due: Vec<u32> = self
            .ordered(InstanceState::Paused)
            .into_iter()
            .filter(|num| {
                self.pool.get(*num).is_ok_and(|inst| {
                    !inst.is_suspended() && inst.is_ready_for_freeze(&self.timings, now)
                })
            })
            .collect();

        for num in due {
            let result = match self.pool.get_mut(num) {
                Ok(inst) => inst.suspend(&self.automation).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(true) => {
                    debug!(instance = num, "frozen");
                    report.frozen.push(num);
                }
                Ok(false) => {}
                Err(e) => report.fail(num, "freeze", &e),
            }
        }
    }

    async fn unfreeze_ready(&mut self, now: Instant, report: &mut TickReport) {
        let mut slots = Admission::compute(&self.policy.limits, &self.pool).unfreeze_slots;
        if slots == 0 {
            return;
        }

        let candidates: Vec<u32> = self
            .ordered(InstanceState::Paused)
            .into_iter()
            .filter(|num| {
                self.pool
                    .get(*num)
                    .is_ok_and(|inst| inst.is_ready_for_unfreeze(&self.timings, now))
            })
            .collect();

        for num in candidates {
            if slots == 0 {
                break;
            }
            match self.unfreeze(num).await {
                Ok(()) => {
                    slots -= 1;
                    report.unfrozen.push(num);
                }
                Err(e) => report.fail(num, "unfreeze", &e),
            }
        }
    }

    async fn unfreeze(&mut self, num: u32) -> Result<()> {
        self.pool.get_mut(num)?.resume(&self.automation).await?;

        let (inst, counters) = self.pool.entry(num)?;
        inst.mark_ready(counters)?;
        record_transition(InstanceState::Ready);
        debug!(instance = num, "ready");
        Ok(())
    }

    async fn auto_reset(&mut self, now: Instant, report: &mut TickReport) {
        let due: Vec<u32> = self
            .pool
            .filter(|inst| inst.state().capabilities().can_auto_reset)
            .filter(|inst| inst.should_auto_reset(&self.timings, now))
            .map(Instance::num)
            .collect();

        for num in due {
            if self.focused == Some(num) {
                self.focused = None;
                self.display.hide_focused(num).await;
            }

            let result = self.pool.entry(num).and_then(|(inst, counters)| {
                inst.check_should_auto_reset(counters, &self.timings, now)?;
                Ok(inst.state())
            });
            match result {
                Ok(state) => {
                    self.attempts += 1;
                    metrics::counter!("multireset_attempts_total").increment(1);
                    record_transition(state);
                    info!(instance = num, %state, "auto-reset after dwell timeout");
                    report.auto_reset.push(num);
                }
                Err(e) => report.fail(num, "auto-reset", &e),
            }
        }
    }

    async fn recycle_free(&mut self, report: &mut TickReport) {
        for num in self.ordered(InstanceState::Free) {
            match self.recycle(num).await {
                Ok(()) => report.recycled.push(num),
                Err(e) => report.fail(num, "recycle", &e),
            }
        }
    }

    async fn recycle(&mut self, num: u32) -> Result<()> {
        self.pool.get_mut(num)?.resume(&self.automation).await?;

        let (inst, counters) = self.pool.entry(num)?;
        inst.mark_pregen(counters)?;
        record_transition(InstanceState::Pregen);
        Ok(())
    }

    async fn admit_generation(&mut self, now: Instant, report: &mut TickReport) {
        let mut slots = Admission::compute(&self.policy.limits, &self.pool).gen_slots;
        if slots == 0 {
            return;
        }

        let booted: Vec<GenCandidate> = self
            .ordered(InstanceState::Booting)
            .into_iter()
            .filter(|num| {
                self.pool.get(*num).is_ok_and(|inst| {
                    inst.pid().is_some() && inst.is_done_booting(&self.timings, now)
                })
            })
            .map(GenCandidate::Booted)
            .collect();
        let pregen = self
            .ordered(InstanceState::Pregen)
            .into_iter()
            .map(GenCandidate::Pregen);

        let candidates: Vec<GenCandidate> = if self.policy.prioritize_booting {
            booted.into_iter().chain(pregen).collect()
        } else {
            pregen.chain(booted).collect()
        };

        for candidate in candidates {
            if slots == 0 {
                break;
            }
            let (num, result) = match candidate {
                GenCandidate::Booted(num) => (num, self.start_worldgen_session(num, now).await),
                GenCandidate::Pregen(num) => (num, self.start_reset(num, now).await),
            };
            match result {
                Ok(()) => {
                    slots -= 1;
                    report.generating.push(num);
                }
                Err(e) => report.fail(num, "gen admission", &e),
            }
        }
    }

    /// First world of a freshly booted instance
    async fn start_worldgen_session(&mut self, num: u32, now: Instant) -> Result<()> {
        let inst = self.pool.get(num)?;
        let title = self.policy.render_title(num, inst.name());
        let set_title = inst.command(CommandKind::SetTitle(title));
        let start = inst.command(CommandKind::StartWorldgenSession);

        self.automation.submit(set_title).await?;
        self.automation.submit(start).await?;

        let (inst, counters) = self.pool.entry(num)?;
        inst.mark_generating(counters, now)?;
        record_transition(InstanceState::Gen);
        info!(instance = num, "booted, generating first world");
        Ok(())
    }

    async fn start_reset(&mut self, num: u32, now: Instant) -> Result<()> {
        let inst = self.pool.get_mut(num)?;
        inst.resume(&self.automation).await?;

        if let Some(archive_dir) = &self.policy.archive_dir {
            if let Err(e) = inst.move_worlds(archive_dir) {
                warn!(instance = num, "archiving worlds failed: {}", e);
            }
        }

        let reset = inst.command(CommandKind::Reset);
        self.automation.submit(reset).await?;

        let (inst, counters) = self.pool.entry(num)?;
        inst.mark_generating(counters, now)?;
        record_transition(InstanceState::Gen);
        debug!(instance = num, "reset, generating");
        Ok(())
    }

    async fn admit_boots(&mut self, now: Instant, report: &mut TickReport) {
        let mut slots = Admission::compute(&self.policy.limits, &self.pool).boot_slots;
        if slots == 0 {
            return;
        }

        let candidates: Vec<u32> = self
            .ordered(InstanceState::Dead)
            .into_iter()
            .filter(|num| self.policy.auto_launch || self.boot_requests.contains(num))
            .collect();

        for num in candidates {
            if slots == 0 {
                break;
            }
            match self.boot(num, now).await {
                Ok(()) => {
                    slots -= 1;
                    self.boot_requests.remove(&num);
                    report.booted.push(num);
                }
                Err(e) => report.fail(num, "boot", &e),
            }
        }
    }

    async fn boot(&mut self, num: u32, now: Instant) -> Result<()> {
        let open = self.pool.get(num)?.command(CommandKind::OpenInstance);
        self.automation.submit(open).await?;

        let (inst, counters) = self.pool.entry(num)?;
        inst.mark_booting(counters, now)?;
        record_transition(InstanceState::Booting);
        info!(instance = num, "booting");
        Ok(())
    }

    fn check_heavy_cap(&self) {
        let heavy = self
            .pool
            .count_where(|inst| inst.state().is_resource_heavy());
        let cap = self.policy.limits.heavy_cap();
        if heavy > cap {
            error!(heavy, cap, "heavy states exceed the configured caps");
        }
    }

    fn publish_gauges(&self) {
        let stats = self.pool.stats();
        for (state, count) in &stats.by_state {
            metrics::gauge!("multireset_instances", "state" => state.as_str()).set(*count as f64);
        }
        metrics::gauge!("multireset_suspended_instances").set(stats.suspended as f64);
    }

    // ---- display slots ----

    /// Make `num` the instance being played. The previous primary is
    /// demoted first; a focused `num` loses its focus slot.
    pub async fn set_new_primary(&mut self, num: u32) -> Result<()> {
        let state = self.pool.get(num)?.state();
        if self.primary == Some(num) {
            return Ok(());
        }
        if !state.capabilities().can_be_primary || state == InstanceState::Active {
            return Err(EngineError::InvalidTransition {
                num,
                from: state,
                to: InstanceState::Active,
            });
        }

        self.pool.get_mut(num)?.resume(&self.automation).await?;

        if let Some(previous) = self.primary {
            self.mark_hidden(previous).await?;
        }
        if self.focused == Some(num) {
            self.focused = None;
            self.display.hide_focused(num).await;
        }

        let (inst, counters) = self.pool.entry(num)?;
        inst.mark_active(counters)?;
        record_transition(InstanceState::Active);
        self.primary = Some(num);
        self.display.show_primary(num).await;

        if self.policy.fullscreen {
            let toggle = self.pool.get(num)?.command(CommandKind::ToggleFullscreen);
            if let Err(e) = self.automation.submit(toggle).await {
                warn!(instance = num, "fullscreen toggle failed: {}", e);
            }
        }

        info!(instance = num, "promoted to primary");
        Ok(())
    }

    /// Give `num` the focused slot, demoting the previous holder
    pub async fn set_new_focused(&mut self, num: u32) -> Result<()> {
        let state = self.pool.get(num)?.state();
        if self.focused == Some(num) {
            return Ok(());
        }
        if !matches!(state, InstanceState::Ready | InstanceState::Approved) {
            return Err(EngineError::InvalidTransition {
                num,
                from: state,
                to: InstanceState::Approved,
            });
        }

        if let Some(previous) = self.focused {
            self.mark_hidden(previous).await?;
        }

        let (inst, counters) = self.pool.entry(num)?;
        inst.mark_approved(counters)?;
        record_transition(InstanceState::Approved);
        self.focused = Some(num);
        self.display.show_focused(num).await;

        debug!(instance = num, "focused");
        Ok(())
    }

    /// Take `num` off screen. An ACTIVE primary ends its run: it is paused
    /// and queued for a new world. A focused instance drops back to READY.
    pub async fn mark_hidden(&mut self, num: u32) -> Result<()> {
        self.pool.get(num)?;

        if self.primary == Some(num) {
            self.primary = None;
            self.display.hide_primary(num).await;

            if self.pool.get(num)?.is_active() {
                let pause = self.pool.get(num)?.command(CommandKind::Pause);
                if let Err(e) = self.automation.submit(pause).await {
                    warn!(instance = num, "pause on demotion failed: {}", e);
                }

                let (inst, counters) = self.pool.entry(num)?;
                inst.mark_inactive(counters)?;
                record_transition(InstanceState::Pregen);
                self.attempts += 1;
                metrics::counter!("multireset_attempts_total").increment(1);
                info!(instance = num, attempts = self.attempts, "run ended");
            }
        }

        if self.focused == Some(num) {
            self.focused = None;
            self.display.hide_focused(num).await;

            let (inst, counters) = self.pool.entry(num)?;
            if inst.state() == InstanceState::Approved {
                inst.mark_ready(counters)?;
                record_transition(InstanceState::Ready);
            }
        }

        Ok(())
    }

    /// End the current run and promote the next candidate.
    /// Returns the new primary, if any.
    pub async fn reset_active(&mut self) -> Result<Option<u32>> {
        let Some(current) = self.primary else {
            debug!("no active instance to reset");
            return Ok(None);
        };

        self.mark_hidden(current).await?;

        let now = self.clock.now();
        match self.next_primary_candidate(now) {
            Some(next) => {
                self.set_new_primary(next).await?;
                Ok(Some(next))
            }
            None => {
                info!("no ready instance to promote");
                Ok(None)
            }
        }
    }

    /// The focused instance, else the first APPROVED then READY instance
    /// that has finished unfreezing
    pub fn next_primary_candidate(&self, now: Instant) -> Option<u32> {
        if self.focused.is_some() {
            return self.focused;
        }

        self.ordered(InstanceState::Approved)
            .into_iter()
            .chain(self.ordered(InstanceState::Ready))
            .find(|num| {
                self.pool
                    .get(*num)
                    .is_ok_and(|inst| inst.is_done_unfreezing(&self.timings, now))
            })
    }

    /// Hide every instance source on the display
    pub async fn hide_all(&self) -> usize {
        self.display.hide_all().await
    }

    /// Drain automation lanes
    pub async fn shutdown(&self) {
        info!(
            ticks = self.ticks,
            attempts = self.attempts,
            "scheduler stopping"
        );
        self.automation.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::clock::ManualClock;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::path::Path;

    /// Completion is set per instance (or for all) by the test
    #[derive(Default)]
    struct ScriptedObserver {
        complete: Mutex<HashSet<u32>>,
        all: Mutex<bool>,
        failing: Mutex<bool>,
    }

    impl ScriptedObserver {
        fn complete(&self, num: u32) {
            self.complete.lock().insert(num);
        }
    }

    impl WorldgenObserver for ScriptedObserver {
        fn is_worldgen_complete(&self, instance: &Instance, _now: Instant) -> Result<bool> {
            if *self.failing.lock() {
                return Err(EngineError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "latest.log missing",
                )));
            }
            Ok(*self.all.lock() || self.complete.lock().contains(&instance.num()))
        }
    }

    #[derive(Default)]
    struct TestPids {
        pids: Vec<u32>,
        exited: Mutex<HashSet<u32>>,
    }

    impl PidSource for TestPids {
        fn discover(&self) -> Vec<u32> {
            self.pids.clone()
        }

        fn is_alive(&self, pid: u32) -> bool {
            !self.exited.lock().contains(&pid)
        }
    }

    struct Harness {
        scheduler: Scheduler,
        clock: ManualClock,
        gateway: Arc<DryRunGateway>,
        display: Arc<MemoryDisplay>,
        observer: Arc<ScriptedObserver>,
        pids: Arc<TestPids>,
    }

    fn timings() -> InstanceTimings {
        InstanceTimings {
            boot_delay: Duration::from_secs(1),
            ..Default::default()
        }
    }

    fn harness_in(root: &Path, count: u32, policy: SchedulerPolicy, pids: Vec<u32>) -> Harness {
        let clock = ManualClock::new();
        let gateway = Arc::new(DryRunGateway::new());
        let display = Arc::new(MemoryDisplay::new());
        let observer = Arc::new(ScriptedObserver::default());
        let pids = Arc::new(TestPids {
            pids,
            ..Default::default()
        });

        let pool = InstancePool::new(count, "inst", root, clock.now());
        let scheduler = Scheduler::new(
            policy,
            timings(),
            pool,
            Collaborators {
                automation: CommandDispatcher::new(gateway.clone(), false),
                observer: observer.clone(),
                pids: pids.clone(),
                display: DisplayHandle::new(display.clone(), "active", "focused"),
                clock: Arc::new(clock.clone()),
            },
        );

        Harness {
            scheduler,
            clock,
            gateway,
            display,
            observer,
            pids,
        }
    }

    fn harness(count: u32, policy: SchedulerPolicy, pids: Vec<u32>) -> Harness {
        harness_in(Path::new("/instances"), count, policy, pids)
    }

    fn manual() -> SchedulerPolicy {
        SchedulerPolicy {
            auto_launch: false,
            ..Default::default()
        }
    }

    fn with_limits(limits: ConcurrencyLimits) -> SchedulerPolicy {
        SchedulerPolicy {
            limits,
            ..manual()
        }
    }

    impl Harness {
        fn state(&self, num: u32) -> InstanceState {
            self.scheduler.pool().get(num).unwrap().state()
        }

        fn force_paused(&mut self, num: u32) {
            let now = self.clock.now();
            let pool = self.scheduler.pool_mut();
            pool.bind_pid(num, 100 + num).unwrap();
            let (inst, counters) = pool.entry(num).unwrap();
            inst.mark_booting(counters, now).unwrap();
            inst.mark_generating(counters, now).unwrap();
            inst.mark_worldgen_finished(counters, now).unwrap();
        }

        fn force_ready(&mut self, num: u32) {
            self.force_paused(num);
            let (inst, counters) = self.scheduler.pool_mut().entry(num).unwrap();
            inst.mark_ready(counters).unwrap();
        }

        fn force_pregen(&mut self, num: u32) {
            self.force_ready(num);
            let (inst, counters) = self.scheduler.pool_mut().entry(num).unwrap();
            inst.mark_pregen(counters).unwrap();
        }

        fn heavy(&self) -> usize {
            self.scheduler
                .pool()
                .count_where(|inst| inst.state().is_resource_heavy())
        }
    }

    #[tokio::test]
    async fn test_boot_cap_limits_booting() {
        let mut h = harness(
            4,
            SchedulerPolicy {
                limits: ConcurrencyLimits {
                    max_concurrent_boot: 2,
                    ..Default::default()
                },
                ..Default::default()
            },
            vec![],
        );

        let report = h.scheduler.tick().await;
        assert_eq!(report.booted, vec![1, 2]);
        assert_eq!(h.state(1), InstanceState::Booting);
        assert_eq!(h.state(2), InstanceState::Booting);
        assert_eq!(h.state(3), InstanceState::Dead);
        assert_eq!(h.state(4), InstanceState::Dead);
        assert_eq!(h.gateway.count(&CommandKind::OpenInstance), 2);

        // caps stay full on the next tick
        let report = h.scheduler.tick().await;
        assert!(report.booted.is_empty());
    }

    #[tokio::test]
    async fn test_manual_launch_waits_for_request() {
        let mut h = harness(3, manual(), vec![]);

        assert!(h.scheduler.tick().await.booted.is_empty());
        assert!(h.scheduler.request_boot(3).unwrap());
        assert!(!h.scheduler.request_boot(3).unwrap());

        assert_eq!(h.scheduler.tick().await.booted, vec![3]);
        assert!(!h.scheduler.request_boot(3).unwrap());
        assert!(h.scheduler.request_boot(9).is_err());
    }

    #[tokio::test]
    async fn test_pid_claim_skips_owned_pid() {
        let mut h = harness(
            2,
            with_limits(ConcurrencyLimits {
                max_concurrent_boot: 2,
                ..Default::default()
            }),
            vec![101, 102],
        );
        {
            let now = h.clock.now();
            let pool = h.scheduler.pool_mut();
            let (inst, counters) = pool.entry(1).unwrap();
            inst.mark_booting(counters, now).unwrap();
            pool.bind_pid(1, 101).unwrap();
        }
        h.scheduler.request_boot(2).unwrap();

        let first = h.scheduler.tick().await;
        assert_eq!(first.booted, vec![2]);
        assert!(first.pids_bound.is_empty());

        let second = h.scheduler.tick().await;
        assert_eq!(second.pids_bound, vec![(2, 102)]);

        let third = h.scheduler.tick().await;
        assert!(third.pids_bound.is_empty());
        assert_eq!(h.scheduler.pool().get(1).unwrap().pid(), Some(101));
        assert_eq!(h.scheduler.pool().get(2).unwrap().pid(), Some(102));
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let mut h = harness(1, SchedulerPolicy::default(), vec![4242]);

        assert_eq!(h.scheduler.tick().await.booted, vec![1]);
        assert_eq!(h.scheduler.tick().await.pids_bound, vec![(1, 4242)]);

        // boot delay not over yet
        assert!(h.scheduler.tick().await.generating.is_empty());
        h.clock.advance(Duration::from_secs(1));
        assert_eq!(h.scheduler.tick().await.generating, vec![1]);
        assert_eq!(h.state(1), InstanceState::Gen);

        // never leaves GEN before the observer says so
        assert!(h.scheduler.tick().await.worldgen_finished.is_empty());
        assert_eq!(h.state(1), InstanceState::Gen);

        h.observer.complete(1);
        assert_eq!(h.scheduler.tick().await.worldgen_finished, vec![1]);
        assert_eq!(h.state(1), InstanceState::Paused);

        h.clock.advance(Duration::from_millis(500));
        assert_eq!(h.scheduler.tick().await.unfrozen, vec![1]);
        assert_eq!(h.state(1), InstanceState::Ready);

        assert_eq!(
            h.gateway.commands_for(1),
            vec![
                CommandKind::OpenInstance,
                CommandKind::SetTitle("Minecraft* - Instance 1".to_string()),
                CommandKind::StartWorldgenSession,
                CommandKind::Pause,
            ]
        );
    }

    #[tokio::test]
    async fn test_waiting_instances_freeze_at_boundary() {
        let mut h = harness(2, manual(), vec![]);
        h.force_paused(1);
        h.force_paused(2);

        h.clock.advance(Duration::from_millis(500));
        assert_eq!(h.scheduler.tick().await.unfrozen, vec![1]);
        assert_eq!(h.state(2), InstanceState::Paused);

        h.clock.advance(Duration::from_millis(1499));
        assert!(h.scheduler.tick().await.frozen.is_empty());

        h.clock.advance(Duration::from_millis(1));
        assert_eq!(h.scheduler.tick().await.frozen, vec![2]);
        assert!(h.scheduler.pool().get(2).unwrap().is_suspended());

        h.scheduler.tick().await;
        assert_eq!(h.gateway.count(&CommandKind::Suspend), 1);
    }

    #[tokio::test]
    async fn test_observer_errors_read_as_incomplete() {
        let mut h = harness(1, manual(), vec![]);
        h.force_pregen(1);
        h.scheduler.tick().await;
        assert_eq!(h.state(1), InstanceState::Gen);

        *h.observer.failing.lock() = true;
        h.observer.complete(1);
        let report = h.scheduler.tick().await;
        assert_eq!(report.failures, 0);
        assert_eq!(h.state(1), InstanceState::Gen);

        *h.observer.failing.lock() = false;
        h.scheduler.tick().await;
        assert_eq!(h.state(1), InstanceState::Paused);
    }

    #[tokio::test]
    async fn test_heavy_states_stay_within_caps() {
        let limits = ConcurrencyLimits {
            max_concurrent: 1,
            max_concurrent_boot: 2,
            max_concurrent_in_run: None,
            unfrozen_queue_size: 1,
        };
        let mut h = harness(
            6,
            SchedulerPolicy {
                limits: limits.clone(),
                ..Default::default()
            },
            (101..=106).collect(),
        );
        *h.observer.all.lock() = true;

        for _ in 0..80 {
            h.scheduler.tick().await;
            let pool = h.scheduler.pool();
            assert!(h.heavy() <= limits.heavy_cap());
            assert!(pool.count_in_state(InstanceState::Booting) <= 2);
            assert!(pool.count_in_state(InstanceState::Gen) <= 1);
            h.clock.advance(Duration::from_millis(250));
        }

        let pool = h.scheduler.pool();
        assert_eq!(pool.count_in_state(InstanceState::Dead), 0);
        assert_eq!(pool.count_where(|inst| inst.is_ready()), 1);
    }

    #[tokio::test]
    async fn test_auto_reset_releases_stale_ready() {
        let mut h = harness(1, manual(), vec![]);
        h.force_ready(1);

        h.clock.advance(Duration::from_millis(299_999));
        assert!(h.scheduler.tick().await.auto_reset.is_empty());
        assert_eq!(h.state(1), InstanceState::Ready);

        h.clock.advance(Duration::from_millis(1));
        let report = h.scheduler.tick().await;
        assert_eq!(report.auto_reset, vec![1]);
        // released to PREGEN and admitted to GEN in the same tick
        assert_eq!(report.generating, vec![1]);
        assert_eq!(h.state(1), InstanceState::Gen);
        assert_eq!(h.scheduler.attempts(), 1);
        assert_eq!(h.gateway.count(&CommandKind::Reset), 1);
    }

    #[tokio::test]
    async fn test_hung_worldgen_releases_gen_slot() {
        let mut h = harness(
            2,
            with_limits(ConcurrencyLimits {
                max_concurrent: 1,
                ..Default::default()
            }),
            vec![],
        );
        h.force_pregen(1);
        h.force_pregen(2);

        assert_eq!(h.scheduler.tick().await.generating, vec![1]);
        assert_eq!(h.state(2), InstanceState::Pregen);

        h.clock.advance(Duration::from_millis(299_999));
        let report = h.scheduler.tick().await;
        assert!(report.auto_reset.is_empty());
        assert!(report.generating.is_empty());
        assert_eq!(h.state(1), InstanceState::Gen);

        // the log marker never shows up, the slot goes to the waiting instance
        h.clock.advance(Duration::from_millis(1));
        let report = h.scheduler.tick().await;
        assert_eq!(report.auto_reset, vec![1]);
        assert_eq!(report.generating, vec![2]);
        assert_eq!(h.state(1), InstanceState::Pregen);
        assert_eq!(h.state(2), InstanceState::Gen);
        assert_eq!(h.heavy(), 1);

        h.clock.advance(Duration::from_secs(300));
        let report = h.scheduler.tick().await;
        assert_eq!(report.auto_reset, vec![2]);
        assert_eq!(report.generating, vec![1]);
        assert_eq!(h.state(1), InstanceState::Gen);
        assert_eq!(h.gateway.count(&CommandKind::Reset), 3);
    }

    #[tokio::test]
    async fn test_auto_reset_of_frozen_instance_recycles() {
        let mut h = harness(
            1,
            with_limits(ConcurrencyLimits {
                unfrozen_queue_size: 0,
                ..Default::default()
            }),
            vec![],
        );
        h.force_paused(1);

        h.clock.advance(Duration::from_secs(2));
        assert_eq!(h.scheduler.tick().await.frozen, vec![1]);

        h.clock.advance(Duration::from_secs(300));
        let report = h.scheduler.tick().await;
        assert_eq!(report.auto_reset, vec![1]);
        assert_eq!(report.recycled, vec![1]);
        assert_eq!(report.generating, vec![1]);
        assert!(!h.scheduler.pool().get(1).unwrap().is_suspended());
        assert_eq!(
            h.gateway.commands_for(1),
            vec![CommandKind::Suspend, CommandKind::Resume, CommandKind::Reset]
        );
    }

    #[tokio::test]
    async fn test_primary_handoff() {
        let mut h = harness(2, manual(), vec![]);
        h.force_ready(1);
        h.force_ready(2);

        h.scheduler.set_new_primary(1).await.unwrap();
        assert_eq!(h.scheduler.primary(), Some(1));
        assert!(h.display.is_visible("active1"));

        h.scheduler.set_new_primary(2).await.unwrap();
        assert_eq!(h.scheduler.primary(), Some(2));
        assert_eq!(h.display.hide_calls("active1"), 1);
        assert!(h.display.is_visible("active2"));
        assert_eq!(h.state(1), InstanceState::Pregen);
        assert_eq!(h.state(2), InstanceState::Active);
        assert_eq!(h.scheduler.pool().count_where(Instance::is_active), 1);
        assert_eq!(h.scheduler.attempts(), 1);
    }

    #[tokio::test]
    async fn test_primary_requires_ready_instance() {
        let mut h = harness(1, manual(), vec![]);

        let err = h.scheduler.set_new_primary(1).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { num: 1, .. }));
        assert_eq!(h.scheduler.primary(), None);
        assert!(matches!(
            h.scheduler.set_new_primary(9).await,
            Err(EngineError::UnknownInstance(9))
        ));
    }

    #[tokio::test]
    async fn test_focus_handoff() {
        let mut h = harness(3, manual(), vec![]);
        for num in 1..=3 {
            h.force_ready(num);
        }

        h.scheduler.set_new_focused(1).await.unwrap();
        assert_eq!(h.state(1), InstanceState::Approved);
        assert!(h.display.is_visible("focused1"));

        h.scheduler.set_new_focused(2).await.unwrap();
        assert_eq!(h.state(1), InstanceState::Ready);
        assert_eq!(h.state(2), InstanceState::Approved);
        assert_eq!(h.display.hide_calls("focused1"), 1);

        // promoting the focused instance vacates the focus slot
        h.scheduler.set_new_primary(2).await.unwrap();
        assert_eq!(h.scheduler.focused(), None);
        assert_eq!(h.state(2), InstanceState::Active);
        assert!(!h.display.is_visible("focused2"));
    }

    #[tokio::test]
    async fn test_reset_active_promotes_next() {
        let mut h = harness(2, manual(), vec![]);
        h.force_ready(1);
        h.force_ready(2);
        h.clock.advance(Duration::from_millis(500));
        h.scheduler.set_new_primary(1).await.unwrap();

        assert_eq!(h.scheduler.reset_active().await.unwrap(), Some(2));
        assert_eq!(h.state(1), InstanceState::Pregen);
        assert_eq!(h.scheduler.primary(), Some(2));

        assert_eq!(h.scheduler.reset_active().await.unwrap(), None);
        assert_eq!(h.scheduler.primary(), None);
        assert_eq!(h.scheduler.attempts(), 2);
        assert_eq!(h.gateway.count(&CommandKind::Pause), 2);
    }

    #[tokio::test]
    async fn test_failed_reset_keeps_pregen() {
        let mut h = harness(2, manual(), vec![]);
        h.force_pregen(1);
        {
            let now = h.clock.now();
            let pool = h.scheduler.pool_mut();
            let (inst, counters) = pool.entry(2).unwrap();
            inst.mark_booting(counters, now).unwrap();
            pool.bind_pid(2, 202).unwrap();
        }
        h.gateway.fail_on(CommandKind::Reset);
        h.clock.advance(Duration::from_secs(1));

        let report = h.scheduler.tick().await;
        assert_eq!(report.failures, 1);
        assert_eq!(report.generating, vec![2]);
        assert_eq!(h.state(1), InstanceState::Pregen);

        h.gateway.clear_failures();
        let report = h.scheduler.tick().await;
        assert_eq!(report.generating, vec![1]);
        assert_eq!(h.state(1), InstanceState::Gen);
    }

    #[tokio::test]
    async fn test_exited_process_is_reaped() {
        let mut h = harness(1, manual(), vec![]);
        h.force_ready(1);
        h.scheduler.set_new_primary(1).await.unwrap();

        h.pids.exited.lock().insert(101);
        let report = h.scheduler.tick().await;
        assert_eq!(report.died, vec![1]);
        assert_eq!(h.state(1), InstanceState::Dead);
        assert_eq!(h.scheduler.pool().get(1).unwrap().pid(), None);
        assert_eq!(h.scheduler.primary(), None);
        assert_eq!(h.display.hide_calls("active1"), 1);
    }

    #[tokio::test]
    async fn test_gen_cap_lowered_during_run() {
        let mut h = harness(
            3,
            with_limits(ConcurrencyLimits {
                max_concurrent: 2,
                max_concurrent_in_run: Some(1),
                ..Default::default()
            }),
            vec![],
        );
        h.force_ready(1);
        h.force_pregen(2);
        h.force_pregen(3);
        h.scheduler.set_new_primary(1).await.unwrap();

        let report = h.scheduler.tick().await;
        assert_eq!(report.generating.len(), 1);
        assert_eq!(h.scheduler.pool().count_in_state(InstanceState::Gen), 1);
    }

    #[tokio::test]
    async fn test_prioritize_booting_takes_slot_first() {
        let mut h = harness(
            2,
            SchedulerPolicy {
                prioritize_booting: true,
                limits: ConcurrencyLimits {
                    max_concurrent: 1,
                    ..Default::default()
                },
                ..manual()
            },
            vec![],
        );
        h.force_pregen(1);
        {
            let now = h.clock.now();
            let pool = h.scheduler.pool_mut();
            let (inst, counters) = pool.entry(2).unwrap();
            inst.mark_booting(counters, now).unwrap();
            pool.bind_pid(2, 202).unwrap();
        }
        h.clock.advance(Duration::from_secs(1));

        assert_eq!(h.scheduler.tick().await.generating, vec![2]);
        assert_eq!(h.state(1), InstanceState::Pregen);
    }

    #[tokio::test]
    async fn test_fullscreen_on_promotion() {
        let mut h = harness(
            1,
            SchedulerPolicy {
                fullscreen: true,
                ..manual()
            },
            vec![],
        );
        h.force_ready(1);
        h.scheduler.set_new_primary(1).await.unwrap();
        assert_eq!(h.gateway.count(&CommandKind::ToggleFullscreen), 1);
    }

    #[tokio::test]
    async fn test_reset_archives_old_worlds() {
        let root = tempfile::tempdir().unwrap();
        let archive = root.path().join("archive");
        let mut h = harness_in(
            root.path(),
            1,
            SchedulerPolicy {
                archive_dir: Some(archive.clone()),
                ..manual()
            },
            vec![],
        );
        h.force_pregen(1);
        let saves = h.scheduler.pool().get(1).unwrap().dir().join("saves");
        std::fs::create_dir_all(saves.join("New World")).unwrap();

        h.scheduler.tick().await;
        assert_eq!(h.state(1), InstanceState::Gen);
        assert!(!saves.join("New World").exists());
        assert_eq!(std::fs::read_dir(&archive).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_serializes() {
        let mut h = harness(
            2,
            SchedulerPolicy {
                fullscreen: true,
                ..manual()
            },
            vec![],
        );
        h.force_ready(2);
        h.scheduler.set_new_primary(2).await.unwrap();

        let json = serde_json::to_value(h.scheduler.snapshot()).unwrap();
        assert_eq!(json["primary"], 2);
        assert_eq!(json["instances"][1]["state"], "ACTIVE");
        assert_eq!(json["instances"][0]["state"], "DEAD");
        assert_eq!(json["automation"]["lanes"], 1);
        assert_eq!(json["automation"]["submitted"], 1);
        assert_eq!(json["automation"]["pending"], 0);
    }

    #[tokio::test]
    async fn test_from_config_test_mode() {
        let mut config = EngineConfig::default();
        config.test_mode = true;
        config.instances.count = 3;

        let mut scheduler = Scheduler::from_config(&config).unwrap();
        assert_eq!(scheduler.pool().len(), 3);
        assert_eq!(scheduler.automation().gateway_name(), "dry-run");

        assert_eq!(scheduler.tick().await.booted, vec![1]);
        assert_eq!(scheduler.tick().await.pids_bound, vec![(1, 40_001)]);
        scheduler.shutdown().await;
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        assert!(Scheduler::from_config(&EngineConfig::default()).is_err());
    }

    #[test]
    fn test_render_title() {
        let policy = SchedulerPolicy {
            title_template: "{name} (#{num})".to_string(),
            ..Default::default()
        };
        assert_eq!(policy.render_title(3, "Speedrun3"), "Speedrun3 (#3)");
    }
}
