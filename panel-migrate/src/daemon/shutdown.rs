//! SIGINT/SIGTERM handling.
//!
//! The pipeline has no cancellation protocol: it runs on a blocking thread and
//! `main` races it against [`ShutdownListener::recv`]. When a signal wins, the
//! run lock is released and the process exits with [`INTERRUPTED_EXIT_CODE`].
//! Partially written archives or extracted files are left in place.

use std::fmt;
use std::io;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::warn;

/// Conventional `128 + SIGINT`.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => f.write_str("SIGINT"),
            ShutdownSignal::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Signal handlers, installed before the pipeline starts.
pub struct ShutdownListener {
    interrupt: Signal,
    terminate: Signal,
}

impl ShutdownListener {
    /// Must be called inside the tokio runtime.
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for the first SIGINT or SIGTERM.
    pub async fn recv(&mut self) -> ShutdownSignal {
        let received = tokio::select! {
            _ = self.interrupt.recv() => ShutdownSignal::Interrupt,
            _ = self.terminate.recv() => ShutdownSignal::Terminate,
        };
        warn!("Received {}, stopping; partial output is left in place", received);
        received
    }
}
