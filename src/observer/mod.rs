// src/observer/mod.rs
//! World-generation observers
//!
//! The scheduler polls an observer for every GEN instance each tick. An
//! error counts as "not complete yet"; the instance is polled again on the
//! next tick.

use crate::instance::Instance;
use crate::utils::clock::has_passed;
use crate::utils::errors::Result;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::time::{Duration, Instant};
use tracing::trace;

/// Only this many trailing bytes of a log are read
const TAIL_WINDOW_BYTES: u64 = 64 * 1024;

/// Reports whether an instance has finished generating its world
pub trait WorldgenObserver: Send + Sync {
    fn is_worldgen_complete(&self, instance: &Instance, now: Instant) -> Result<bool>;
}

/// Looks for a completion marker in the last lines of the instance log
#[derive(Debug, Clone)]
pub struct LogTailObserver {
    lines_from_bottom: usize,
    markers: Vec<String>,
}

impl LogTailObserver {
    /// `markers` must all appear on the same line
    pub fn new(lines_from_bottom: usize, markers: Vec<String>) -> Self {
        Self {
            lines_from_bottom,
            markers,
        }
    }

    fn line_matches(&self, line: &str) -> bool {
        self.markers
            .iter()
            .all(|marker| line.contains(marker.as_str()))
    }

    /// Last `lines_from_bottom` lines of `file`
    fn tail(&self, file: &mut File) -> Result<Vec<String>> {
        let len = file.metadata()?.len();
        let start = len.saturating_sub(TAIL_WINDOW_BYTES);
        file.seek(SeekFrom::Start(start))?;

        let mut buf = Vec::with_capacity((len - start) as usize);
        file.read_to_end(&mut buf)?;
        let text = String::from_utf8_lossy(&buf);

        let lines: Vec<&str> = text.lines().collect();
        let skip = lines.len().saturating_sub(self.lines_from_bottom);
        Ok(lines[skip..].iter().map(|line| line.to_string()).collect())
    }
}

impl WorldgenObserver for LogTailObserver {
    fn is_worldgen_complete(&self, instance: &Instance, _now: Instant) -> Result<bool> {
        let mut file = File::open(instance.log_file())?;
        let complete = self
            .tail(&mut file)?
            .iter()
            .any(|line| self.line_matches(line));
        trace!(instance = instance.num(), complete, "checked worldgen log");
        Ok(complete)
    }
}

/// Declares worldgen complete a fixed time after the instance entered GEN
#[derive(Debug, Clone)]
pub struct SimulatedObserver {
    worldgen_time: Duration,
}

impl SimulatedObserver {
    pub fn new(worldgen_time: Duration) -> Self {
        Self { worldgen_time }
    }
}

impl WorldgenObserver for SimulatedObserver {
    fn is_worldgen_complete(&self, instance: &Instance, now: Instant) -> Result<bool> {
        Ok(has_passed(instance.timestamp(), self.worldgen_time, now))
    }
}
