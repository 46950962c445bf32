// src/errors.rs

use std::{fmt, io};

/// Failure categories the deputy distinguishes. Per-child failures are
/// reported and survived; only `InitFailure` is allowed to end the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SpawnFailed,
    SignalFailed,
    NotRunning,
    AlreadyRunning,
    NotFound,
    InputOutput,
    Protocol,
    Config,
    InitFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ErrorKind::SpawnFailed => "spawn failed",
            ErrorKind::SignalFailed => "signal failed",
            ErrorKind::NotRunning => "not running",
            ErrorKind::AlreadyRunning => "already running",
            ErrorKind::NotFound => "not found",
            ErrorKind::InputOutput => "i/o error",
            ErrorKind::Protocol => "protocol error",
            ErrorKind::Config => "configuration error",
            ErrorKind::InitFailure => "initialization failure",
        };
        write!(f, "{}", text)
    }
}

#[derive(Debug, Clone)]
pub struct DeputyError {
    pub kind: ErrorKind,
    pub message: String,
}

impl DeputyError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for DeputyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for DeputyError {}

impl From<io::Error> for DeputyError {
    fn from(err: io::Error) -> Self {
        Self::new(ErrorKind::InputOutput, err.to_string())
    }
}

impl From<nix::Error> for DeputyError {
    fn from(err: nix::Error) -> Self {
        Self::new(ErrorKind::InputOutput, err.to_string())
    }
}

impl From<serde_json::Error> for DeputyError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::Protocol, err.to_string())
    }
}

impl From<config::ConfigError> for DeputyError {
    fn from(err: config::ConfigError) -> Self {
        Self::new(ErrorKind::Config, err.to_string())
    }
}
