// Logging for Offload
//
// Built on the `tracing` ecosystem. Pools never install a subscriber on their
// own; the embedding application calls one of the `init*` functions once.
//
// # Usage Examples
//
// ```rust
// use offload::logging;
//
// // INFO level, human-readable console output
// logging::init_default();
//
// // DEBUG for the crate, TRACE for unit threads
// logging::init_development();
//
// // JSON lines for log aggregators
// logging::init_production();
// ```
//
// ## Using Log Macros
//
// ```rust
// use offload::{log_pool, log_task, log_unit, pool_span};
//
// let span = pool_span!("resize", "0b7c...");
// let _guard = span.enter();
//
// log_pool!("resize", "initialized", units = 4);
// log_unit!("unit-3", "handshake");
// log_task!("task-12", "dispatched", unit = "unit-3");
// ```

use std::io;
use std::sync::Once;

use tracing::{Level, Subscriber};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Configuration for the logging subscriber.
///
/// # Examples
///
/// ```rust
/// use offload::logging::LogConfig;
/// use tracing::Level;
///
/// let config = LogConfig {
///     level: Level::DEBUG,
///     target_filters: Some("offload::pool=trace".to_string()),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: Level,
    /// Whether to use JSON format for logs
    pub json_format: bool,
    /// Whether to include file and line information
    pub show_file_line: bool,
    /// Whether to include thread name/id (unit threads are named after their unit)
    pub show_thread_info: bool,
    /// Whether to include timestamps
    pub show_time: bool,
    /// Target filter expressions (format: "target=level,target2=level2,...")
    pub target_filters: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            show_file_line: true,
            show_thread_info: true,
            show_time: true,
            target_filters: None,
        }
    }
}

static INIT: Once = Once::new();

fn env_filter(config: &LogConfig) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env().add_directive(config.level.into());
    if let Some(filters) = &config.target_filters {
        for directive in filters.split(',') {
            match directive.trim().parse() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(err) => eprintln!("Ignoring log filter {:?}: {}", directive, err),
            }
        }
    }
    filter
}

/// Initialize the global subscriber. Only the first call takes effect.
pub fn init(config: LogConfig) {
    INIT.call_once(|| {
        let registry = tracing_subscriber::registry().with(env_filter(&config));

        let subscriber: Box<dyn Subscriber + Send + Sync> = if config.json_format {
            Box::new(registry.with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_thread_names(config.show_thread_info),
            ))
        } else if config.show_time {
            Box::new(registry.with(
                fmt::layer()
                    .with_ansi(atty::is(atty::Stream::Stdout))
                    .with_file(config.show_file_line)
                    .with_line_number(config.show_file_line)
                    .with_thread_names(config.show_thread_info)
                    .with_thread_ids(config.show_thread_info),
            ))
        } else {
            Box::new(registry.with(
                fmt::layer()
                    .without_time()
                    .with_ansi(atty::is(atty::Stream::Stdout))
                    .with_file(config.show_file_line)
                    .with_line_number(config.show_file_line)
                    .with_thread_names(config.show_thread_info)
                    .with_thread_ids(config.show_thread_info),
            ))
        };

        set_global_subscriber(subscriber);
    });
}

fn set_global_subscriber<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error setting global tracing subscriber: {}", err);
    }
}

/// Open `path` in append mode for use as a log writer.
pub fn file_writer(path: &str) -> io::Result<Box<dyn io::Write + Send + Sync + 'static>> {
    use std::fs::OpenOptions;

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Box::new(file))
}

/// Initialize logging to both the console and `log_file`.
///
/// The file is opened up front so an unwritable path is reported to the
/// caller instead of being silently dropped.
pub fn init_with_file(config: LogConfig, log_file: &str) -> io::Result<()> {
    file_writer(log_file)?;

    INIT.call_once(|| {
        let console_layer = fmt::layer()
            .with_ansi(atty::is(atty::Stream::Stdout))
            .with_file(config.show_file_line)
            .with_line_number(config.show_file_line)
            .with_thread_names(config.show_thread_info)
            .with_thread_ids(config.show_thread_info);

        let log_file_path = log_file.to_string();
        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_writer(move || match file_writer(&log_file_path) {
                Ok(writer) => writer,
                Err(_) => Box::new(io::stderr()),
            })
            .with_file(true)
            .with_line_number(true)
            .with_thread_names(true)
            .with_thread_ids(true);

        let subscriber = tracing_subscriber::registry()
            .with(env_filter(&config))
            .with(console_layer)
            .with(file_layer);

        set_global_subscriber(subscriber);
    });

    Ok(())
}

/// INFO level, human-readable console output.
pub fn init_default() {
    init(LogConfig::default());
}

/// DEBUG for the crate and TRACE for pool internals, with file/line info.
pub fn init_development() {
    init(LogConfig {
        level: Level::DEBUG,
        target_filters: Some("offload=debug,offload::pool=trace".to_string()),
        ..Default::default()
    });
}

/// JSON output without file/line information.
pub fn init_production() {
    init(LogConfig {
        level: Level::INFO,
        json_format: true,
        show_file_line: false,
        show_thread_info: true,
        show_time: true,
        target_filters: None,
    });
}

/// Warnings and errors only, compact output for test runs.
pub fn init_test() {
    init(LogConfig {
        level: Level::WARN,
        json_format: false,
        show_file_line: true,
        show_thread_info: false,
        show_time: false,
        target_filters: None,
    });
}

/// Span covering everything a pool does.
#[macro_export]
macro_rules! pool_span {
    ($script:expr, $pool_id:expr) => {
        tracing::info_span!("pool", script = %$script, pool_id = %$pool_id)
    };
    ($script:expr, $pool_id:expr, $($fields:tt)*) => {
        tracing::info_span!("pool", script = %$script, pool_id = %$pool_id, $($fields)*)
    };
}

/// Pool-level state changes (initialized, shutting down, terminated).
#[macro_export]
macro_rules! log_pool {
    ($script:expr, $event:expr) => {
        tracing::info!(script = %$script, event = $event)
    };
    ($script:expr, $event:expr, $($fields:tt)*) => {
        tracing::info!(script = %$script, event = $event, $($fields)*)
    };
}

/// Unit lifecycle transitions.
#[macro_export]
macro_rules! log_unit {
    ($unit:expr, $event:expr) => {
        tracing::debug!(unit = %$unit, event = $event)
    };
    ($unit:expr, $event:expr, $($fields:tt)*) => {
        tracing::debug!(unit = %$unit, event = $event, $($fields)*)
    };
}

/// Task progress (queued, dispatched, settled).
#[macro_export]
macro_rules! log_task {
    ($task:expr, $status:expr) => {
        tracing::trace!(task = %$task, status = $status)
    };
    ($task:expr, $status:expr, $($fields:tt)*) => {
        tracing::trace!(task = %$task, status = $status, $($fields)*)
    };
}

/// Error conditions.
#[macro_export]
macro_rules! log_error {
    ($error:expr) => {
        tracing::error!(error = %$error)
    };
    ($error:expr, $($fields:tt)*) => {
        tracing::error!(error = %$error, $($fields)*)
    };
}

/// The dispatcher active on the calling thread.
///
/// Unit threads install it so their events reach the same subscriber even
/// when only a scoped (non-global) default was set.
#[inline]
pub fn current_subscriber() -> tracing::Dispatch {
    tracing::dispatcher::get_default(|d| d.clone())
}

pub use tracing::{debug, error, info, trace, warn};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert!(!config.json_format);
        assert!(config.target_filters.is_none());
    }

    #[test]
    fn test_env_filter_accepts_target_directives() {
        let config = LogConfig {
            target_filters: Some("offload=debug, offload::pool=trace".to_string()),
            ..Default::default()
        };
        let rendered = env_filter(&config).to_string();
        assert!(rendered.contains("offload=debug"));
        assert!(rendered.contains("offload::pool=trace"));
    }

    #[test]
    fn test_init_is_idempotent() {
        init_test();
        init_test();
        tracing::warn!("logging initialized twice without panicking");
    }
}
