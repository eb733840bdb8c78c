//! # Router configuration.
//!
//! [`RouterConfig`] holds the knobs of one [`EventRouter`](crate::EventRouter):
//! blocking-dispatch timeout, background-loop acceptance and start bounds,
//! join default, logging switches and opt-in signal handling.
//!
//! ## Sentinel values
//! - `default_event_timeout = None` → blocking callers wait indefinitely

use std::time::Duration;

/// Configuration for an [`EventRouter`](crate::EventRouter).
#[derive(Clone, Debug)]
pub struct RouterConfig {
    /// Bound on a blocking caller's wait for one bridged async handler.
    ///
    /// Exceeding it makes `apply_sync` return `DispatchError::Timeout`.
    pub default_event_timeout: Option<Duration>,

    /// How long a fire-and-forget caller waits for the background loop to
    /// confirm it picked up a unit of work. It never waits for the unit itself.
    pub submit_timeout: Duration,

    /// How long to wait for the background loop thread to come up.
    pub loop_start_timeout: Duration,

    /// Default bound for `join` / `join_async` when none is passed.
    pub join_timeout: Duration,

    /// Log each captured handler failure at `warn`.
    pub log_handler_errors: bool,

    /// Debug tracing: per-dispatch handler count, duration and exception,
    /// plus predicate failures and skipped handlers.
    pub trace: bool,

    /// Register with the process-wide shutdown-signal registry.
    pub handle_signals: bool,

    /// Label used in logs and as the background thread name.
    pub name: Option<String>,
}

impl RouterConfig {
    /// Set the blocking-dispatch timeout.
    pub fn with_event_timeout(mut self, timeout: Duration) -> Self {
        self.default_event_timeout = Some(timeout);
        self
    }

    /// Set the acceptance wait for fire-and-forget units.
    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    /// Set the default join bound.
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Toggle failure logging.
    pub fn with_error_logging(mut self, enabled: bool) -> Self {
        self.log_handler_errors = enabled;
        self
    }

    /// Toggle debug tracing.
    pub fn with_trace(mut self, enabled: bool) -> Self {
        self.trace = enabled;
        self
    }

    /// Opt in to shutdown-signal handling.
    pub fn with_signal_handling(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    /// Name the router.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Name for the background loop thread.
    pub(crate) fn thread_name(&self) -> String {
        match &self.name {
            Some(name) => format!("tidings-{name}"),
            None => "tidings-bridge".to_string(),
        }
    }
}

impl Default for RouterConfig {
    /// Default configuration:
    ///
    /// - `default_event_timeout = None` (wait indefinitely)
    /// - `submit_timeout = 10ms`
    /// - `loop_start_timeout = 5s`
    /// - `join_timeout = 30s`
    /// - `log_handler_errors = true`, `trace = false`, `handle_signals = false`
    fn default() -> Self {
        Self {
            default_event_timeout: None,
            submit_timeout: Duration::from_millis(10),
            loop_start_timeout: Duration::from_secs(5),
            join_timeout: Duration::from_secs(30),
            log_handler_errors: true,
            trace: false,
            handle_signals: false,
            name: None,
        }
    }
}
