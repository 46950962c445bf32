// src/logger.rs

use std::fmt;
use std::fs::OpenOptions;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::sync::RwLock;

use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::errors::{DeputyError, ErrorKind};

lazy_static::lazy_static! {
    static ref VERBOSITY: RwLock<LogLevel> = RwLock::new(LogLevel::Info);
}

/// Severity of a deputy diagnostic line. `Debug` carries the traces the
/// original deputy printed in verbose mode (renames, spawns, culls);
/// `Trace` the bus frame noise.
#[derive(Debug, PartialEq, PartialOrd, Clone, Copy, Eq, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// The verbosity selected by the `-v` flag.
    pub fn from_verbose(verbose: bool) -> Self {
        if verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        }
    }

    fn tag(self) -> &'static str {
        match self {
            LogLevel::Error => "Error",
            LogLevel::Warn => "Warn",
            LogLevel::Info => "Info",
            LogLevel::Debug => "Debug",
            LogLevel::Trace => "Trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.tag().bold();
        let tag = match self {
            LogLevel::Error => tag.red(),
            LogLevel::Warn => tag.yellow(),
            LogLevel::Info => tag.green(),
            LogLevel::Debug => tag.blue(),
            LogLevel::Trace => tag.magenta(),
        };
        write!(f, "{}", tag)
    }
}

pub fn set_log_level(level: LogLevel) {
    *VERBOSITY.write().unwrap() = level;
}

/// Whether a line at `level` should be printed under the current verbosity.
pub fn enabled(level: LogLevel) -> bool {
    level <= *VERBOSITY.read().unwrap()
}

/// The `-l/--log` behavior: points fds 1 and 2 at `path` (append, create),
/// so every diagnostic, and everything else the deputy prints from here on,
/// lands in the file.
///
/// # Errors
///
/// `InitFailure` when the file cannot be opened or the fds cannot be
/// redirected; the deputy exits nonzero on it.
pub fn redirect_to_file(path: &Path) -> Result<(), DeputyError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| {
            DeputyError::new(
                ErrorKind::InitFailure,
                format!("couldn't open logfile {}: {}", path.display(), err),
            )
        })?;
    for fd in [libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        if unsafe { libc::dup2(file.as_raw_fd(), fd) } < 0 {
            return Err(DeputyError::new(
                ErrorKind::InitFailure,
                format!(
                    "couldn't redirect fd {} to {}: {}",
                    fd,
                    path.display(),
                    std::io::Error::last_os_error()
                ),
            ));
        }
    }
    // fds 1 and 2 keep the description open for the life of the process
    std::mem::forget(file);
    Ok(())
}

/// Leveled diagnostic line on stderr, stamped with the local wall clock so
/// log files interleave sensibly with child output.
#[macro_export]
macro_rules! log {
    ($level:expr, $($arg:tt)*) => {
        {
            if $crate::logger::enabled($level) {
                eprintln!(
                    "{} [{}]: {}",
                    $crate::timestamp::log_stamp(),
                    $level,
                    format!($($arg)*)
                );
            }
        }
    };
}
