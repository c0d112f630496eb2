//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the fleet engine."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Tracing setup for the daemon.
//!
//! The filter is chosen from, in order: an explicit override (the daemon's
//! `--log-level`), `SAR_LOG`, `RUST_LOG`, then `logging.level` from the config.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

pub const LOG_ENV: &str = "SAR_LOG";
const FALLBACK_DIRECTIVE: &str = "info";

/// Stdout encodings for the daemon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Where the active filter directive came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterSource {
    Override,
    SarLog,
    RustLog,
    Config,
}

/// Pick the filter directive. Blank values are skipped.
pub fn select_directive(
    override_level: Option<&str>,
    sar_log: Option<String>,
    rust_log: Option<String>,
    configured: &str,
) -> (String, FilterSource) {
    let candidates = [
        (override_level.map(str::to_owned), FilterSource::Override),
        (sar_log, FilterSource::SarLog),
        (rust_log, FilterSource::RustLog),
    ];
    candidates
        .into_iter()
        .find_map(|(directive, source)| {
            directive
                .filter(|directive| !directive.trim().is_empty())
                .map(|directive| (directive, source))
        })
        .unwrap_or_else(|| (configured.to_owned(), FilterSource::Config))
}

/// Keeps the non-blocking writers flushing. Drop it last in `main`.
#[must_use = "logs stop flushing once the guards are dropped"]
pub struct LogGuards {
    _stdout: WorkerGuard,
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber for `service_name`.
///
/// Stdout gets JSON or pretty lines per `logging.format`; when `logging.file`
/// is set a daily-rolling JSON file is written under `logging.directory` as
/// well. A subscriber installed earlier (tests) is left in place.
pub fn init_tracing(
    service_name: &str,
    config: &LoggingConfig,
    level_override: Option<&str>,
) -> Result<LogGuards> {
    let (directive, source) = select_directive(
        level_override,
        std::env::var(LOG_ENV).ok(),
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
        &config.level,
    );
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|err| {
        eprintln!("invalid log filter {directive:?} from {source:?} ({err}); using {FALLBACK_DIRECTIVE}");
        EnvFilter::new(FALLBACK_DIRECTIVE)
    });

    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let stdout_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };

    let mut file_guard = None;
    let file_layer = if config.file {
        std::fs::create_dir_all(&config.directory)?;
        let file_name = format!("{}.log", config.file_prefix.as_deref().unwrap_or(service_name));
        let (file_writer, guard) = tracing_appender::non_blocking(daily(&config.directory, file_name));
        file_guard = Some(guard);
        Some(
            fmt::layer()
                .with_target(true)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .json()
                .with_writer(file_writer),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(
        service = %service_name,
        filter = %directive,
        filter_source = ?source,
        log_file = config.file,
        log_dir = %config.directory.display(),
        format = ?config.format,
        "tracing initialised"
    );
    Ok(LogGuards {
        _stdout: stdout_guard,
        _file: file_guard,
    })
}
