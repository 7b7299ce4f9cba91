//! Error types shared across the controller manager.
//!
//! - [`ConfigurationError`]: unrecoverable setup failures (bad credentials,
//!   unknown resource kinds). The only kind allowed to end the process.
//! - [`HandlerError`]: returned by a reconcile call; retried with backoff.
//! - [`RuntimeError`]: lifecycle failures of the manager itself.
//!
//! Every enum exposes `as_label()`, a stable snake_case label used in events.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::client::ClientError;

/// # Fatal configuration errors.
///
/// Raised while building a runtime or loading connection settings.
/// Never retried.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// The connection settings cannot produce a working API client.
    #[error("invalid connection config: {reason}; check the kubeconfig or in-cluster credentials")]
    InvalidConnection {
        /// What was wrong.
        reason: String,
    },

    /// The handler asked for a resource kind the client layer cannot address.
    #[error("resource kind {kind:?} is not supported; see client::kinds for the known set")]
    UnsupportedKind {
        /// Resource name as requested by the handler.
        kind: String,
    },

    /// A kubeconfig file could not be read or interpreted.
    #[error("kubeconfig {path}: {reason}")]
    Kubeconfig {
        /// File that was read.
        path: PathBuf,
        /// What was wrong.
        reason: String,
    },

    /// The process is not running inside a cluster (or its service account is unreadable).
    #[error("in-cluster config unavailable: {reason}")]
    InCluster {
        /// What was missing.
        reason: String,
    },
}

impl ConfigurationError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigurationError::InvalidConnection { .. } => "config_invalid_connection",
            ConfigurationError::UnsupportedKind { .. } => "config_unsupported_kind",
            ConfigurationError::Kubeconfig { .. } => "config_kubeconfig",
            ConfigurationError::InCluster { .. } => "config_in_cluster",
        }
    }
}

/// # Errors returned by reconciliation.
///
/// All variants are retryable; whether a condition deserves an error at all
/// is up to the handler.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Reconciliation did not reach the desired state.
    #[error("reconcile failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// A cluster API call made by the handler failed.
    #[error("cluster request failed: {0}")]
    Client(#[from] ClientError),

    /// The reconcile future panicked; the worker survived it.
    #[error("reconcile panicked: {info}")]
    Panicked {
        /// Panic payload, if it was a string.
        info: String,
    },
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Fail`].
    pub fn fail(error: impl std::fmt::Display) -> Self {
        HandlerError::Fail {
            error: error.to_string(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            HandlerError::Fail { .. } => "handler_failed",
            HandlerError::Client(_) => "handler_client",
            HandlerError::Panicked { .. } => "handler_panicked",
        }
    }
}

/// # Errors produced by the manager lifecycle.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Some runtimes were still running when the grace period ran out.
    #[error("shutdown grace {grace:?} exceeded; still running: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Names of the runtimes that had not stopped.
        stuck: Vec<String>,
    },

    /// A runtime is built once and may only be started once.
    #[error("controller {name:?} was already started")]
    AlreadyStarted {
        /// Controller name.
        name: String,
    },

    /// OS signal handlers could not be installed.
    #[error("cannot listen for termination signals: {reason}")]
    SignalSetup {
        /// Underlying I/O error.
        reason: String,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use kontroller::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::AlreadyStarted { .. } => "runtime_already_started",
            RuntimeError::SignalSetup { .. } => "runtime_signal_setup",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_fail_keeps_message() {
        let err = HandlerError::fail("configmap missing key");
        assert_eq!(err.as_label(), "handler_failed");
        assert_eq!(err.to_string(), "reconcile failed: configmap missing key");
    }

    #[test]
    fn unsupported_kind_names_the_kind() {
        let err = ConfigurationError::UnsupportedKind {
            kind: "widgets".into(),
        };
        assert!(err.to_string().contains("\"widgets\""));
        assert_eq!(err.as_label(), "config_unsupported_kind");
    }
}
