// src/process_manager.rs

use std::collections::HashMap;
use std::io;
use std::os::fd::AsRawFd;
use std::process::{Command, Stdio};
use std::sync::Arc;

use libc::c_int;
use tokio::net::unix::pipe;

use crate::command::DeputyCommand;
use crate::errors::{DeputyError, ErrorKind};
use crate::log;
use crate::logger::LogLevel;
use crate::messages::SheriffCmdSpec;

/// Owns every [`DeputyCommand`] the deputy manages, keyed by sheriff id, and
/// provides the process-table primitives: spawn, signal, reap, pipe
/// plumbing. All mutation happens from the event-loop task, so the table
/// needs no lock.
pub struct ProcessManager {
    cmds: HashMap<i32, DeputyCommand>,
}

impl ProcessManager {
    pub fn new() -> Self {
        Self {
            cmds: HashMap::new(),
        }
    }

    /// Registers a handle for `spec` without spawning anything. Re-adding an
    /// existing sheriff id returns the existing handle untouched.
    pub fn add_cmd(&mut self, spec: &SheriffCmdSpec) -> &mut DeputyCommand {
        self.cmds.entry(spec.sheriff_id).or_insert_with(|| {
            DeputyCommand::new(spec.sheriff_id, &spec.name, &spec.nickname, &spec.group)
        })
    }

    /// Detaches and drops a handle. Only settled commands may be removed;
    /// a running one must be stopped and reaped first.
    pub fn remove_cmd(&mut self, sheriff_id: i32) -> Result<(), DeputyError> {
        match self.cmds.get(&sheriff_id) {
            Some(cmd) if cmd.pid != 0 => Err(DeputyError::new(
                ErrorKind::AlreadyRunning,
                format!("[{}] is still running as pid {}", cmd.name(), cmd.pid),
            )),
            Some(_) => {
                self.cmds.remove(&sheriff_id);
                Ok(())
            }
            None => Err(DeputyError::new(
                ErrorKind::NotFound,
                format!("no command with sheriff id {}", sheriff_id),
            )),
        }
    }

    /// Spawns a handle's argv with stdout and stderr funneled into one pipe
    /// whose read end is registered with the reactor.
    ///
    /// # Errors
    ///
    /// `SpawnFailed` on an empty argv or a failed exec; the handle stays
    /// settled (`pid` 0, no pipe registered) so the sheriff's next order can
    /// retry.
    pub fn start_cmd(&mut self, sheriff_id: i32) -> Result<(), DeputyError> {
        let cmd = self.cmds.get_mut(&sheriff_id).ok_or_else(|| {
            DeputyError::new(
                ErrorKind::NotFound,
                format!("no command with sheriff id {}", sheriff_id),
            )
        })?;
        if cmd.pid != 0 {
            return Err(DeputyError::new(
                ErrorKind::AlreadyRunning,
                format!("[{}] is already running as pid {}", cmd.name(), cmd.pid),
            ));
        }
        if cmd.args().is_empty() {
            return Err(DeputyError::new(
                ErrorKind::SpawnFailed,
                format!("[{}] tokenizes to an empty command", cmd.name()),
            ));
        }

        let (read_end, write_end) = nix::unistd::pipe()?;
        // the read side must never block the event loop
        if unsafe { libc::fcntl(read_end.as_raw_fd(), libc::F_SETFL, libc::O_NONBLOCK) } < 0 {
            return Err(io::Error::last_os_error().into());
        }
        let receiver = pipe::Receiver::from_owned_fd(read_end)?;
        let write_clone = write_end.try_clone()?;

        let mut child_cmd = Command::new(&cmd.args()[0]);
        child_cmd
            .args(&cmd.args()[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::from(write_end))
            .stderr(Stdio::from(write_clone));

        match child_cmd.spawn() {
            Ok(child) => {
                cmd.pid = child.id() as i32;
                cmd.stdout = Some(Arc::new(receiver));
                cmd.exit_status = 0;
                cmd.num_kills_sent = 0;
                cmd.last_kill_time = 0;
                cmd.cpu_samples = Default::default();
                cmd.cpu_usage = 0.0;
                cmd.has_prev_sample = false;
                log!(
                    LogLevel::Debug,
                    "spawned [{}] as pid {}",
                    cmd.name(),
                    cmd.pid
                );
                Ok(())
            }
            Err(err) => Err(DeputyError::new(
                ErrorKind::SpawnFailed,
                format!("couldn't start [{}]: {}", cmd.name(), err),
            )),
        }
    }

    /// Sends `sig` to a running command.
    ///
    /// # Errors
    ///
    /// `NotRunning` when the command has no pid, `SignalFailed` when the
    /// kill syscall is refused.
    pub fn kill_cmd(&self, sheriff_id: i32, sig: c_int) -> Result<(), DeputyError> {
        let cmd = self.cmds.get(&sheriff_id).ok_or_else(|| {
            DeputyError::new(
                ErrorKind::NotFound,
                format!("no command with sheriff id {}", sheriff_id),
            )
        })?;
        if cmd.pid == 0 {
            return Err(DeputyError::new(
                ErrorKind::NotRunning,
                format!("[{}] is not running", cmd.name()),
            ));
        }
        if unsafe { libc::kill(cmd.pid, sig) } != 0 {
            return Err(DeputyError::new(
                ErrorKind::SignalFailed,
                io::Error::last_os_error().to_string(),
            ));
        }
        Ok(())
    }

    /// Collects at most one terminated child: fills its raw wait status and
    /// settles its pid. Callers loop until `None` so a burst of exits drains
    /// completely.
    pub fn reap_one(&mut self) -> Option<i32> {
        for cmd in self.cmds.values_mut() {
            if cmd.pid == 0 {
                continue;
            }
            let mut status: c_int = 0;
            let reaped = unsafe { libc::waitpid(cmd.pid, &mut status, libc::WNOHANG) };
            if reaped == cmd.pid {
                cmd.exit_status = status;
                cmd.pid = 0;
                cmd.cpu_usage = 0.0;
                cmd.has_prev_sample = false;
                return Some(cmd.sheriff_id);
            }
        }
        None
    }

    /// Drops the stdout registration of a settled command, closing the
    /// deputy's end of the pipe.
    pub fn close_dead_pipe(&mut self, sheriff_id: i32) {
        if let Some(cmd) = self.cmds.get_mut(&sheriff_id) {
            cmd.stdout = None;
        }
    }

    pub fn contains(&self, sheriff_id: i32) -> bool {
        self.cmds.contains_key(&sheriff_id)
    }

    pub fn get(&self, sheriff_id: i32) -> Option<&DeputyCommand> {
        self.cmds.get(&sheriff_id)
    }

    pub fn get_mut(&mut self, sheriff_id: i32) -> Option<&mut DeputyCommand> {
        self.cmds.get_mut(&sheriff_id)
    }

    pub fn cmds(&self) -> impl Iterator<Item = &DeputyCommand> {
        self.cmds.values()
    }

    pub fn cmds_mut(&mut self) -> impl Iterator<Item = &mut DeputyCommand> {
        self.cmds.values_mut()
    }

    pub fn sheriff_ids(&self) -> Vec<i32> {
        self.cmds.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.cmds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }

    /// Number of commands with a live child.
    pub fn running(&self) -> usize {
        self.cmds.values().filter(|cmd| cmd.pid != 0).count()
    }

    /// The current set of watched stdout pipes, for the event loop's
    /// readability poll. The registrations stay owned by their handles; the
    /// loop only borrows them for one poll.
    pub fn watch_list(&self) -> Vec<(i32, Arc<pipe::Receiver>)> {
        self.cmds
            .values()
            .filter_map(|cmd| {
                cmd.stdout
                    .as_ref()
                    .map(|stdout| (cmd.sheriff_id, Arc::clone(stdout)))
            })
            .collect()
    }
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}
