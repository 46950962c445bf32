// src/command.rs

use std::sync::Arc;

use libc::c_int;
use tokio::net::unix::pipe;

use crate::reconcile::CmdStatus;
use crate::resource_monitor::ProcessSample;

/// One managed command: the record the process manager keeps for every
/// sheriff id it has been told about.
///
/// The handle outlives any individual run of the command. `pid` and `stdout`
/// are set while a child is alive; `exit_status` holds the raw wait status of
/// the most recent run once it has been reaped.
pub struct DeputyCommand {
    /// Stable identifier assigned by the sheriff, unique within this deputy.
    pub sheriff_id: i32,
    name: String,
    args: Vec<String>,
    pub nickname: String,
    pub group: String,

    /// 0 when not running.
    pub pid: i32,
    /// Reactor registration for the child's combined stdout/stderr pipe.
    pub stdout: Option<Arc<pipe::Receiver>>,
    /// Raw wait status; meaningful only after a reap.
    pub exit_status: i32,

    /// Generation of the run currently (or last) spawned. Set only at spawn.
    pub actual_runid: i32,

    pub num_kills_sent: u32,
    /// Microsecond timestamp of the last signal sent; 0 before the first.
    pub last_kill_time: i64,
    /// Reap, then delete the handle. Never goes back to false.
    pub remove_requested: bool,

    /// Two-slot ring of per-process CPU/memory samples: previous, current.
    pub cpu_samples: [ProcessSample; 2],
    pub cpu_usage: f32,
    /// Whether `cpu_samples[0]` holds a real reading for the current run.
    pub has_prev_sample: bool,
}

impl DeputyCommand {
    pub fn new(sheriff_id: i32, name: &str, nickname: &str, group: &str) -> Self {
        Self {
            sheriff_id,
            name: name.to_string(),
            args: tokenize(name),
            nickname: nickname.to_string(),
            group: group.to_string(),
            pid: 0,
            stdout: None,
            exit_status: 0,
            actual_runid: 0,
            num_kills_sent: 0,
            last_kill_time: 0,
            remove_requested: false,
            cpu_samples: [ProcessSample::default(); 2],
            cpu_usage: 0.0,
            has_prev_sample: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Replaces the stored command string and re-tokenizes the argv. A
    /// running child is untouched; the new argv applies at the next spawn.
    pub fn change_name(&mut self, name: &str) {
        self.name = name.to_string();
        self.args = tokenize(name);
    }

    pub fn status(&self) -> CmdStatus {
        if self.pid != 0 {
            CmdStatus::Running
        } else {
            CmdStatus::Stopped
        }
    }

    /// Picks the next signal of the kill escalation, or `None` when the
    /// command is not running or the previous signal is still within its
    /// `retry_interval_us` grace window. The first `graceful_limit` signals
    /// are SIGTERM; after that the escalation turns forceful.
    pub fn plan_kill(
        &self,
        now_us: i64,
        retry_interval_us: i64,
        graceful_limit: u32,
    ) -> Option<c_int> {
        if self.pid == 0 {
            return None;
        }
        if self.last_kill_time != 0 && now_us < self.last_kill_time + retry_interval_us {
            return None;
        }
        if self.num_kills_sent < graceful_limit {
            Some(libc::SIGTERM)
        } else {
            Some(libc::SIGKILL)
        }
    }

    /// Books a signal sent at `now_us`. Escalation advances even when the
    /// kill itself failed.
    pub fn record_kill(&mut self, now_us: i64) {
        self.num_kills_sent += 1;
        self.last_kill_time = now_us;
    }
}

fn tokenize(name: &str) -> Vec<String> {
    shlex::split(name).unwrap_or_default()
}
