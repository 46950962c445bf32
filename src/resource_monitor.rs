// resource_monitor.rs

use procfs::process::Process;
use procfs::{CurrentSI, KernelStats};
use sysinfo::System;

use crate::errors::{DeputyError, ErrorKind};

/// One whole-system snapshot: `/proc/stat` jiffy counters plus memory and
/// swap totals. Two consecutive snapshots make one load reading.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct SystemSample {
    pub user: u64,
    pub user_low: u64,
    pub system: u64,
    pub idle: u64,
    pub mem_total: u64,
    pub mem_free: u64,
    pub swap_total: u64,
    pub swap_free: u64,
}

/// One per-process snapshot from `/proc/<pid>/stat`.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ProcessSample {
    pub user: u64,
    pub system: u64,
    pub vsize: u64,
    pub rss: u64,
}

/// Reads the system-wide counters. Holds the `sysinfo` handle so repeated
/// memory refreshes reuse its buffers.
pub struct ResourceSampler {
    system: System,
}

impl ResourceSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Takes a fresh [`SystemSample`].
    ///
    /// # Errors
    ///
    /// Fails if `/proc/stat` cannot be read or parsed.
    pub fn sample_system(&mut self) -> Result<SystemSample, DeputyError> {
        let stat = KernelStats::current()
            .map_err(|err| DeputyError::new(ErrorKind::InputOutput, err.to_string()))?;
        self.system.refresh_memory();
        Ok(SystemSample {
            user: stat.total.user,
            user_low: stat.total.nice,
            system: stat.total.system,
            idle: stat.total.idle,
            mem_total: self.system.total_memory(),
            mem_free: self.system.free_memory(),
            swap_total: self.system.total_swap(),
            swap_free: self.system.free_swap(),
        })
    }
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads one child's CPU ticks and memory footprint.
///
/// # Errors
///
/// Fails if the process is gone or `/proc/<pid>/stat` cannot be parsed.
pub fn sample_process(pid: i32) -> Result<ProcessSample, DeputyError> {
    let process =
        Process::new(pid).map_err(|err| DeputyError::new(ErrorKind::InputOutput, err.to_string()))?;
    let stat = process
        .stat()
        .map_err(|err| DeputyError::new(ErrorKind::InputOutput, err.to_string()))?;
    Ok(ProcessSample {
        user: stat.utime,
        system: stat.stime,
        vsize: stat.vsize,
        rss: (stat.rss as u64) * procfs::page_size(),
    })
}

/// RSS and VSZ of the deputy itself, in bytes.
pub fn self_memory() -> Result<(u64, u64), DeputyError> {
    let stat = Process::myself()
        .and_then(|me| me.stat())
        .map_err(|err| DeputyError::new(ErrorKind::InputOutput, err.to_string()))?;
    Ok(((stat.rss as u64) * procfs::page_size(), stat.vsize))
}

/// Jiffies the whole system spent between two snapshots, busy or idle.
pub fn elapsed_jiffies(prev: &SystemSample, cur: &SystemSample) -> u64 {
    cur.user.saturating_sub(prev.user)
        + cur.user_low.saturating_sub(prev.user_low)
        + cur.system.saturating_sub(prev.system)
        + cur.idle.saturating_sub(prev.idle)
}

/// Fraction of the interval the system spent busy, in [0, 1]. Zero when the
/// interval is empty.
pub fn cpu_load(prev: &SystemSample, cur: &SystemSample) -> f32 {
    let elapsed = elapsed_jiffies(prev, cur);
    if elapsed == 0 {
        return 0.0;
    }
    let loaded = cur.user.saturating_sub(prev.user)
        + cur.user_low.saturating_sub(prev.user_low)
        + cur.system.saturating_sub(prev.system);
    (loaded as f64 / elapsed as f64) as f32
}

/// One child's share of the elapsed system jiffies. Zero when the interval
/// is empty, and zero when `has_prev` is unset: a freshly started child has
/// no previous reading, and a ratio against the zeroed slot would spike.
pub fn proc_cpu_usage(
    prev: &ProcessSample,
    cur: &ProcessSample,
    elapsed_sys: u64,
    has_prev: bool,
) -> f32 {
    if elapsed_sys == 0 || !has_prev {
        return 0.0;
    }
    let used = cur.user.saturating_sub(prev.user) + cur.system.saturating_sub(prev.system);
    (used as f64 / elapsed_sys as f64) as f32
}
