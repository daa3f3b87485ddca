//! Per-node JSONL logging for SPY routers and simulations
//!
//! A simulation drives dozens of routers on one thread and a live node logs
//! every routing decision, so the output has to be machine-readable first.
//!
//! # Features
//!
//! - **JSONL Output**: Structured JSON lines for offline analysis (default)
//! - **Node Context**: Spans opened while a [`NodeContextGuard`] is active are tagged with the router's address
//! - **File Rotation**: Daily/hourly rotation, or a single truncated file per simulation run
//!
//! # Quick Start
//!
//! ```ignore
//! use spy_logging::{SpySubscriberBuilder, LogConfig};
//!
//! // JSONL to console
//! SpySubscriberBuilder::new().init();
//!
//! // Pretty console for development
//! SpySubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init();
//! ```
//!
//! Keep the returned [`WorkerGuard`] alive while file output is enabled;
//! dropping it flushes and closes the file.

pub mod config;
pub mod context;
pub mod layers;

pub use config::{ConsoleOutput, FileConfig, FileRotation, JsonFormat, LogConfig};
pub use context::{NodeContextData, NodeContextGuard, NodeKind};
pub use layers::{NodeContextExtension, NodeContextLayer, jsonl_layer};
pub use tracing_appender::non_blocking::WorkerGuard;

use std::fs::{self, File};

use thiserror::Error;
use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Errors raised while installing the subscriber
#[derive(Debug, Error)]
pub enum LogError {
    #[error("failed to open log file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to create rolling appender: {0}")]
    Appender(#[from] InitError),

    #[error("a global subscriber is already installed: {0}")]
    AlreadyInitialized(#[from] TryInitError),
}

/// Open the non-blocking writer for `config`
///
/// [`FileRotation::Never`] truncates the file so each run starts clean;
/// the rotating strategies append.
pub fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LogError> {
    let rotation = match config.rotation {
        FileRotation::Never => {
            fs::create_dir_all(&config.directory)?;
            let file = File::create(config.single_file_path())?;
            return Ok(tracing_appender::non_blocking(file));
        }
        FileRotation::Daily => Rotation::DAILY,
        FileRotation::Hourly => Rotation::HOURLY,
    };

    let appender = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(&config.prefix)
        .filename_suffix("jsonl")
        .build(&config.directory)?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Builder for configuring and initializing the SPY logging subscriber
///
/// Console output is JSONL unless the config says otherwise; see
/// [`LogConfig::development`] for a readable console.
#[derive(Debug, Default)]
pub struct SpySubscriberBuilder {
    config: LogConfig,
}

impl SpySubscriberBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config = self.config.with_level(level);
        self
    }

    /// Override the level for one target
    pub fn with_target(mut self, target: impl Into<String>, level: impl Into<String>) -> Self {
        self.config = self.config.with_target(target, level);
        self
    }

    pub fn with_console(mut self, console: ConsoleOutput) -> Self {
        self.config = self.config.with_console(console);
        self
    }

    /// Also write JSONL to files
    pub fn with_file_output(mut self, file: FileConfig) -> Self {
        self.config = self.config.with_file(file);
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Install the subscriber globally
    ///
    /// Returns the file writer's guard when file output is enabled.
    /// `RUST_LOG`, when set, replaces the configured levels.
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LogError> {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.config.filter_directives()));

        let (file_layer, guard) = match &self.config.file {
            Some(file_config) => {
                let (writer, guard) = file_writer(file_config)?;
                (Some(jsonl_layer(writer, &self.config.json)), Some(guard))
            }
            None => (None, None),
        };

        let pretty_console = match self.config.console {
            ConsoleOutput::Pretty { ansi } => Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(ansi)
                    .with_target(true),
            ),
            _ => None,
        };
        let jsonl_console = (self.config.console == ConsoleOutput::Json)
            .then(|| jsonl_layer(std::io::stdout, &self.config.json));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(NodeContextLayer::new())
            .with(pretty_console)
            .with(jsonl_console)
            .with(file_layer)
            .try_init()?;

        Ok(guard)
    }

    /// Install the subscriber globally, reporting failures on stderr
    ///
    /// Logging is best effort: a second installation or an unwritable log
    /// directory leaves the process running with whatever was installed.
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Warning: logging not initialized: {e}");
                None
            }
        }
    }
}

/// Initialize logging with default settings (JSONL to console)
pub fn init_default() {
    SpySubscriberBuilder::new().init();
}

/// Initialize logging for development (verbose, pretty console output)
pub fn init_development() {
    SpySubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init();
}

/// Initialize logging for testing (minimal output)
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_testing() {
    let _ = SpySubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_creation() {
        let builder = SpySubscriberBuilder::new();
        assert_eq!(builder.config().level, "info");
        assert_eq!(builder.config().console, ConsoleOutput::Json);
    }

    #[test]
    fn test_builder_with_config() {
        let builder = SpySubscriberBuilder::new().with_config(LogConfig::development());
        assert_eq!(builder.config().level, "debug");
        assert_eq!(builder.config().console, ConsoleOutput::Pretty { ansi: true });
    }

    #[test]
    fn test_builder_with_level_and_target() {
        let builder = SpySubscriberBuilder::new()
            .with_level("trace")
            .with_target("spy_node", "warn");
        assert_eq!(builder.config().filter_directives(), "trace,spy_node=warn");
    }

    #[test]
    fn test_builder_with_console() {
        let builder = SpySubscriberBuilder::new().with_console(ConsoleOutput::Off);
        assert_eq!(builder.config().console, ConsoleOutput::Off);
    }

    #[test]
    fn test_init_testing_twice() {
        init_testing();
        init_testing();
    }
}
