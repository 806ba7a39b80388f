// src/discovery/mod.rs
//! Process-id discovery
//!
//! The scheduler asks a [`PidSource`] for candidate game processes once per
//! tick and claims unowned pids for booting instances. The same source
//! answers liveness checks used to notice exited processes.

use nix::errno::Errno;
use tracing::{debug, trace};

/// Where candidate pids come from
pub trait PidSource: Send + Sync {
    /// Candidate pids in OS-reported order
    fn discover(&self) -> Vec<u32>;

    /// Whether `pid` still refers to a running process
    fn is_alive(&self, pid: u32) -> bool {
        let _ = pid;
        true
    }
}

/// Scans `/proc` for processes whose name contains a fragment
#[derive(Debug, Clone)]
pub struct ProcessScanner {
    name_fragment: String,
}

impl ProcessScanner {
    pub fn new(name_fragment: impl Into<String>) -> Self {
        Self {
            name_fragment: name_fragment.into().to_lowercase(),
        }
    }

    #[cfg(target_os = "linux")]
    fn scan(&self) -> Vec<u32> {
        use std::fs;

        let entries = match fs::read_dir("/proc") {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Failed to read /proc: {}", e);
                return Vec::new();
            }
        };

        let mut pids: Vec<u32> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
            .filter(|pid| {
                fs::read_to_string(format!("/proc/{}/comm", pid))
                    .map(|comm| comm.trim().to_lowercase().contains(&self.name_fragment))
                    .unwrap_or(false)
            })
            .collect();

        pids.sort_unstable();
        pids
    }

    #[cfg(not(target_os = "linux"))]
    fn scan(&self) -> Vec<u32> {
        debug!("Process scanning not supported on this platform");
        Vec::new()
    }
}

impl PidSource for ProcessScanner {
    fn discover(&self) -> Vec<u32> {
        let pids = self.scan();
        trace!(count = pids.len(), fragment = %self.name_fragment, "discovered processes");
        pids
    }

    fn is_alive(&self, pid: u32) -> bool {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        match i32::try_from(pid) {
            Ok(raw) => signal_check_alive(kill(Pid::from_raw(raw), None)),
            Err(_) => false,
        }
    }
}

/// Signal 0 fails with EPERM for a live process owned by another user
fn signal_check_alive(result: nix::Result<()>) -> bool {
    matches!(result, Ok(()) | Err(Errno::EPERM))
}

/// Fixed list of pids, for test mode and tests
#[derive(Debug, Clone, Default)]
pub struct FixedPidSource {
    pids: Vec<u32>,
}

impl FixedPidSource {
    pub fn new(pids: Vec<u32>) -> Self {
        Self { pids }
    }

    /// One synthetic pid per instance, starting above `base`
    pub fn synthetic(count: u32, base: u32) -> Self {
        Self::new((1..=count).map(|n| base + n).collect())
    }
}

impl PidSource for FixedPidSource {
    fn discover(&self) -> Vec<u32> {
        self.pids.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_source() {
        let source = FixedPidSource::new(vec![101, 102]);
        assert_eq!(source.discover(), vec![101, 102]);
        assert!(source.is_alive(101));
    }

    #[test]
    fn test_synthetic_pids() {
        let source = FixedPidSource::synthetic(3, 40_000);
        assert_eq!(source.discover(), vec![40_001, 40_002, 40_003]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_scanner_finds_own_process() {
        let own = std::process::id();
        let path = format!("/proc/{}/comm", own);
        let comm = std::fs::read_to_string(path).unwrap();
        let scanner = ProcessScanner::new(comm.trim());
        assert!(scanner.discover().contains(&own));
        assert!(scanner.is_alive(own));
    }

    #[test]
    fn test_scanner_rejects_out_of_range_pid() {
        let scanner = ProcessScanner::new("java");
        assert!(!scanner.is_alive(u32::MAX));
    }

    #[test]
    fn test_foreign_process_counts_as_alive() {
        assert!(signal_check_alive(Ok(())));
        assert!(signal_check_alive(Err(Errno::EPERM)));
        assert!(!signal_check_alive(Err(Errno::ESRCH)));
    }
}
