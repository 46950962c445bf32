// src/signals.rs

use std::io;

use tokio::signal::unix::{signal, Signal, SignalKind};

/// A signal observed by the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// SIGCHLD: at least one child changed state; reap until dry.
    ChildExited,
    /// One of the shutdown signals, carrying its name for the log.
    Shutdown(&'static str),
}

/// Converts asynchronous signal delivery into events the event loop can
/// `await` alongside its other sources. The OS-level handler does no work of
/// its own; it only wakes the stream this relay reads.
pub struct SignalRelay {
    sigchld: Signal,
    sigint: Signal,
    sighup: Signal,
    sigquit: Signal,
    sigterm: Signal,
}

impl SignalRelay {
    /// Installs handlers for SIGCHLD and the shutdown signals.
    ///
    /// # Errors
    ///
    /// Fails if a handler cannot be registered; callers treat this as fatal
    /// at startup.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            sigchld: signal(SignalKind::child())?,
            sigint: signal(SignalKind::interrupt())?,
            sighup: signal(SignalKind::hangup())?,
            sigquit: signal(SignalKind::quit())?,
            sigterm: signal(SignalKind::terminate())?,
        })
    }

    /// Waits for the next signal of interest.
    pub async fn recv(&mut self) -> SignalEvent {
        tokio::select! {
            _ = self.sigchld.recv() => SignalEvent::ChildExited,
            _ = self.sigint.recv() => SignalEvent::Shutdown("SIGINT"),
            _ = self.sighup.recv() => SignalEvent::Shutdown("SIGHUP"),
            _ = self.sigquit.recv() => SignalEvent::Shutdown("SIGQUIT"),
            _ = self.sigterm.recv() => SignalEvent::Shutdown("SIGTERM"),
        }
    }
}
