//! Provides utilities to initialize structured logging for the wallet core.
use std::env;

use tracing::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// Environment variable name for the service label, which is appended to the
/// whoami string.
pub const SVC_LABEL_ENVVAR: &str = "WALLET_SVC_LABEL";

/// Environment variable that enables file names in log lines when set to `1`.
pub const LOG_FILE_ENVVAR: &str = "LOG_FILE";

/// Environment variable that enables line numbers in log lines when set to `1`.
pub const LOG_LINE_NUM_ENVVAR: &str = "LOG_LINE_NUM";

/// Configuration for the logger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggerConfig {
    /// The whoami string, which is used to identify the embedding application in logs.
    whoami: String,

    /// Whether log lines carry the source file name.
    with_file: bool,

    /// Whether log lines carry the source line number.
    with_line_number: bool,
}

impl LoggerConfig {
    /// Creates a new instance with whoami set and source locations disabled.
    pub const fn new(whoami: String) -> Self {
        Self {
            whoami,
            with_file: false,
            with_line_number: false,
        }
    }

    /// Creates a new instance with the whoami string derived from the
    /// provided base name, and source locations read from the environment.
    pub fn with_base_name(s: &str) -> Self {
        Self {
            whoami: get_whoami_string(s),
            with_file: flag_from_env(LOG_FILE_ENVVAR),
            with_line_number: flag_from_env(LOG_LINE_NUM_ENVVAR),
        }
    }

    /// Enables or disables file names in log lines.
    pub fn set_with_file(&mut self, enabled: bool) {
        self.with_file = enabled;
    }

    /// Enables or disables line numbers in log lines.
    pub fn set_with_line_number(&mut self, enabled: bool) {
        self.with_line_number = enabled;
    }

    /// The whoami string attached to the "logging started" event.
    pub fn whoami(&self) -> &str {
        &self.whoami
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self::with_base_name("(wallet-core)")
    }
}

/// Initializes the logging subsystem with the provided config.
///
/// Filtering follows `RUST_LOG`. This installs a global subscriber, so it must be
/// called at most once per process.
pub fn init(config: LoggerConfig) {
    let filt = tracing_subscriber::EnvFilter::from_default_env();

    let stdout_sub = tracing_subscriber::fmt::layer()
        .compact()
        .event_format(
            tracing_subscriber::fmt::format()
                .with_file(config.with_file)
                .with_line_number(config.with_line_number),
        )
        .with_filter(filt);

    tracing_subscriber::registry().with(stdout_sub).init();

    info!(whoami = %config.whoami, "logging started");
}

/// Gets the service label from the standard envvar, which should be included
/// in the whoami string.
pub fn get_service_label_from_env() -> Option<String> {
    env::var(SVC_LABEL_ENVVAR).ok()
}

/// Computes a standard whoami string.
pub fn get_whoami_string(base: &str) -> String {
    match get_service_label_from_env() {
        Some(label) => format!("{base}%{label}"),
        None => base.to_owned(),
    }
}

fn flag_from_env(var: &str) -> bool {
    env::var(var).is_ok_and(|v| v == "1")
}
