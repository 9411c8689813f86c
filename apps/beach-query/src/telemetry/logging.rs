use clap::ValueEnum;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub const LOG_FILTER_ENV: &str = "BEACH_QUERY_LOG_FILTER";
pub const TRACE_DEPS_ENV: &str = "BEACH_QUERY_TRACE_DEPS";

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub file: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to configure logger: {0}")]
    Configure(String),
}

static INIT: OnceLock<()> = OnceLock::new();
static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs the global subscriber; later calls are no-ops.
pub fn init(config: &LogConfig) -> Result<(), InitError> {
    if INIT.get().is_some() {
        return Ok(());
    }

    inner_init(config)?;
    INIT.set(()).ok();
    Ok(())
}

fn inner_init(config: &LogConfig) -> Result<(), InitError> {
    let (env_filter, throttled_deps) = build_env_filter(config.level.to_filter());

    let (writer, guard) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| InitError::Io {
                    path: path.clone(),
                    source,
                })?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_level(true)
        .with_target(config.level >= LogLevel::Debug)
        .with_thread_ids(config.level >= LogLevel::Trace)
        .with_ansi(config.file.is_none())
        .with_writer(writer)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| InitError::Configure(err.to_string()))?;

    let _ = GUARD.set(guard);
    if throttled_deps {
        tracing::debug!(
            target: "beach_query::telemetry",
            "suppressing dependency trace noise; set {TRACE_DEPS_ENV}=1 or {LOG_FILTER_ENV} to override"
        );
    }
    Ok(())
}

fn build_env_filter(level: LevelFilter) -> (EnvFilter, bool) {
    if let Ok(filter) = std::env::var(LOG_FILTER_ENV) {
        return (EnvFilter::new(filter), false);
    }
    let (filter, throttled) = default_filter_for(level);
    (EnvFilter::new(filter), throttled)
}

const TRACE_DEP_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "rustls", "mio", "h2"];

fn default_filter_for(level: LevelFilter) -> (String, bool) {
    let base = match level {
        LevelFilter::TRACE => "info,beach_query=trace,beach_query_core=trace,multipart_stream=trace",
        LevelFilter::DEBUG => "info,beach_query=debug,beach_query_core=debug,multipart_stream=debug",
        LevelFilter::INFO => "info",
        LevelFilter::WARN => "warn",
        LevelFilter::ERROR => "error",
        LevelFilter::OFF => "off",
    };
    if level == LevelFilter::TRACE && !allow_dependency_traces() {
        (throttle_dependency_traces(base), true)
    } else {
        (base.to_owned(), false)
    }
}

fn allow_dependency_traces() -> bool {
    super::env_truthy(TRACE_DEPS_ENV).unwrap_or(false)
}

fn throttle_dependency_traces(base: &str) -> String {
    let mut filter = base.to_owned();
    for target in TRACE_DEP_TARGETS {
        filter.push(',');
        filter.push_str(target);
        filter.push_str("=info");
    }
    filter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttled_filter_lists_dependencies() {
        let filter = throttle_dependency_traces("info");
        assert!(filter.starts_with("info,"));
        for target in TRACE_DEP_TARGETS {
            assert!(filter.contains(&format!("{target}=info")));
        }
    }

    #[test]
    fn debug_filter_enables_crate_targets() {
        let (filter, throttled) = default_filter_for(LevelFilter::DEBUG);
        assert!(filter.contains("beach_query=debug"));
        assert!(!throttled);
        assert_eq!(default_filter_for(LevelFilter::WARN).0, "warn");
    }

    #[test]
    fn levels_order_by_verbosity() {
        assert!(LogLevel::Trace > LogLevel::Debug);
        assert_eq!(LogLevel::default(), LogLevel::Warn);
    }
}
