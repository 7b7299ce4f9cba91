//! # LogWriter: events rendered through `tracing`.
//!
//! Maps every [`Event`] to one `tracing` record at the severity returned by
//! [`EventKind::severity`](crate::EventKind::severity). The process decides
//! what reaches the terminal by installing a `tracing` subscriber (the
//! binary filters with the configured `log.level`).
//!
//! ## Example output (fmt layer)
//! ```text
//! INFO  kontroller: [registered] controller="reloader"
//! INFO  kontroller: [cache-synced] controller="reloader"
//! ERROR kontroller: [retry] controller="reloader" key="prod/app" attempt=1 delay_ms=5 err="reconcile failed: boom"
//! ERROR kontroller: [failed-finally] controller="reloader" key="prod/app" attempt=5 err="reconcile failed: boom"
//! ```

use async_trait::async_trait;

use crate::config::LogLevel;
use crate::events::Event;
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

macro_rules! emit {
    ($level:expr, $e:expr) => {{
        let e = $e;
        let controller = e.controller.as_deref().unwrap_or("-");
        let key = e.key.as_deref().unwrap_or("");
        let reason = e.reason.as_deref().unwrap_or("");
        match $level {
            LogLevel::Fatal | LogLevel::Error => tracing::error!(
                target: "kontroller",
                controller, key, attempt = e.attempt, delay_ms = e.delay_ms, err = reason,
                "[{}]", e.kind.as_label()
            ),
            LogLevel::Warning => tracing::warn!(
                target: "kontroller",
                controller, key, attempt = e.attempt, delay_ms = e.delay_ms, err = reason,
                "[{}]", e.kind.as_label()
            ),
            LogLevel::Info => tracing::info!(
                target: "kontroller",
                controller, key, attempt = e.attempt, reason,
                "[{}]", e.kind.as_label()
            ),
            LogLevel::Debug => tracing::debug!(
                target: "kontroller",
                controller, key, attempt = e.attempt, reason,
                "[{}]", e.kind.as_label()
            ),
        }
    }};
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        emit!(e.kind.severity(), e);
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }

    fn queue_capacity(&self) -> usize {
        4096
    }
}
