//! # Termination signals.
//!
//! [`wait_for_shutdown_signal`] resolves with the first signal received:
//! - Unix: `SIGINT` (Ctrl-C), `SIGTERM` (kubelet, systemd), `SIGQUIT`
//! - elsewhere: Ctrl-C only

use std::fmt;

/// Signal that requested the shutdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    /// `SIGINT` / Ctrl-C.
    Interrupt,
    /// `SIGTERM`.
    Terminate,
    /// `SIGQUIT`.
    Quit,
}

impl Signal {
    /// Conventional signal name.
    pub fn as_str(self) -> &'static str {
        match self {
            Signal::Interrupt => "SIGINT",
            Signal::Terminate => "SIGTERM",
            Signal::Quit => "SIGQUIT",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Waits for a termination signal.
///
/// Fails only if the signal handlers cannot be registered.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<Signal> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    tokio::select! {
        res = tokio::signal::ctrl_c() => res.map(|()| Signal::Interrupt),
        _ = terminate.recv() => Ok(Signal::Terminate),
        _ = quit.recv() => Ok(Signal::Quit),
    }
}

/// Waits for a termination signal.
///
/// Fails only if the signal handler cannot be registered.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<Signal> {
    tokio::signal::ctrl_c().await.map(|()| Signal::Interrupt)
}
