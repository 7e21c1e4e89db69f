//! Logging
//!
//! Providers log through an explicitly constructed [`Logger`] rather than a
//! process-wide default. A logger pairs a level threshold with a
//! `tracing::Span` that tags every event with the provider it came from.

use crate::config::LogLevel;
use tracing::Span;
use tracing_subscriber::EnvFilter;

/// Per-provider structured logger
#[derive(Debug, Clone)]
pub struct Logger {
    level: LogLevel,
    span: Span,
}

impl Logger {
    /// Create a logger for a provider
    pub fn new(provider: &str, level: LogLevel) -> Self {
        Self {
            level,
            span: tracing::info_span!("db", provider = %provider),
        }
    }

    /// A logger that discards everything
    pub fn silent() -> Self {
        Self {
            level: LogLevel::Silent,
            span: Span::none(),
        }
    }

    /// Same span, different threshold
    pub fn with_level(&self, level: LogLevel) -> Self {
        Self {
            level,
            span: self.span.clone(),
        }
    }

    /// Current threshold
    pub fn level(&self) -> LogLevel {
        self.level
    }

    /// Whether an event at `level` would be emitted
    pub fn enabled(&self, level: LogLevel) -> bool {
        self.level.allows(level)
    }

    /// Parent span for emitted events
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new("dbvault", LogLevel::default())
    }
}

macro_rules! log_info {
    ($logger:expr, $($arg:tt)+) => {{
        let logger: &$crate::logging::Logger = &$logger;
        if logger.enabled($crate::config::LogLevel::Info) {
            ::tracing::info!(parent: logger.span(), $($arg)+);
        }
    }};
}

macro_rules! log_warn {
    ($logger:expr, $($arg:tt)+) => {{
        let logger: &$crate::logging::Logger = &$logger;
        if logger.enabled($crate::config::LogLevel::Warn) {
            ::tracing::warn!(parent: logger.span(), $($arg)+);
        }
    }};
}

macro_rules! log_error {
    ($logger:expr, $($arg:tt)+) => {{
        let logger: &$crate::logging::Logger = &$logger;
        if logger.enabled($crate::config::LogLevel::Error) {
            ::tracing::error!(parent: logger.span(), $($arg)+);
        }
    }};
}

pub(crate) use {log_error, log_info, log_warn};

/// Install a global fmt subscriber. `RUST_LOG` wins over `level`.
pub fn init_tracing(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}
