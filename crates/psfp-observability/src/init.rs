// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! Logging initialization
//!
//! Console output is always installed. With the `file-logging` feature and a
//! log directory, a JSON log of the run is written as well:
//! ```text
//! ./logs/
//!   └── run_20250101_120000/
//!       └── psfp-controller.log
//! ```

use std::path::{Path, PathBuf};

use anyhow::Result;
#[cfg(feature = "file-logging")]
use anyhow::Context;
use chrono::{NaiveDateTime, Utc};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::cli::CrateDebugFlags;

const RUN_PREFIX: &str = "run_";
const RUN_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Where and how long to keep log files
#[derive(Debug, Clone)]
pub struct FileLogging {
    pub log_dir: PathBuf,
    pub retention_days: u64,
    pub retention_runs: usize,
}

/// Keeps the non-blocking writers alive; logs are flushed when dropped
pub struct LoggingGuard {
    #[cfg(feature = "file-logging")]
    _file_guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
    run_dir: Option<PathBuf>,
}

impl LoggingGuard {
    /// Directory holding this run's log file, when file logging is active
    pub fn run_dir(&self) -> Option<&Path> {
        self.run_dir.as_deref()
    }
}

/// Install the global subscriber
///
/// # Arguments
/// * `debug_flags` - Per-crate debug flags
/// * `base_level` - Level for everything not covered by a debug flag
/// * `file` - Optional file logging destination and retention policy
pub fn init_logging(
    debug_flags: &CrateDebugFlags,
    base_level: &str,
    file: Option<&FileLogging>,
) -> Result<LoggingGuard> {
    let filter = debug_flags.to_filter_string(base_level);

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_filter(EnvFilter::new(&filter))
        .boxed();
    layers.push(console_layer);

    #[cfg(feature = "file-logging")]
    let mut file_guards = Vec::new();
    let mut run_dir = None;

    if let Some(file) = file {
        #[cfg(feature = "file-logging")]
        {
            let run_folder = file.log_dir.join(format!(
                "{}{}",
                RUN_PREFIX,
                Utc::now().format(RUN_TIMESTAMP_FORMAT)
            ));
            std::fs::create_dir_all(&run_folder).with_context(|| {
                format!("Failed to create log directory: {}", run_folder.display())
            })?;

            cleanup_old_logs(&file.log_dir, file.retention_days, file.retention_runs)?;

            let appender = tracing_appender::rolling::never(&run_folder, "psfp-controller.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            file_guards.push(guard);

            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .json()
                .with_filter(EnvFilter::new(&filter))
                .boxed();
            layers.push(file_layer);
            run_dir = Some(run_folder);
        }
        #[cfg(not(feature = "file-logging"))]
        {
            let _ = file;
        }
    }

    Registry::default().with(layers).try_init()?;

    Ok(LoggingGuard {
        #[cfg(feature = "file-logging")]
        _file_guards: file_guards,
        run_dir,
    })
}

/// Remove run folders older than `retention_days`, then keep only the newest
/// `retention_runs` of what is left.
pub fn cleanup_old_logs(
    base_log_dir: &Path,
    retention_days: u64,
    retention_runs: usize,
) -> Result<()> {
    if !base_log_dir.exists() {
        return Ok(());
    }

    let cutoff = Utc::now().naive_utc() - chrono::Duration::days(retention_days as i64);

    let mut runs: Vec<(PathBuf, NaiveDateTime)> = Vec::new();
    for entry in std::fs::read_dir(base_log_dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let Some(stamp) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(RUN_PREFIX))
        else {
            continue;
        };
        if let Ok(dt) = NaiveDateTime::parse_from_str(stamp, RUN_TIMESTAMP_FORMAT) {
            runs.push((path, dt));
        }
    }

    // Oldest first
    runs.sort_by_key(|(_, dt)| *dt);

    let (expired, kept): (Vec<_>, Vec<_>) = runs.into_iter().partition(|(_, dt)| *dt < cutoff);
    let excess = kept.len().saturating_sub(retention_runs);

    for (path, _) in expired.iter().chain(kept.iter().take(excess)) {
        if let Err(e) = std::fs::remove_dir_all(path) {
            eprintln!(
                "Warning: Failed to remove old log directory {}: {}",
                path.display(),
                e
            );
        }
    }

    Ok(())
}
