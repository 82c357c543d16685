//! Console and per-run log file setup

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Set to `json` to write the log file as JSON lines
const FORMAT_ENV: &str = "LIVEWINE_LOG_FORMAT";

/// Keeps the log file open for the life of the process and syncs it on drop
pub struct LogGuard {
    file: Arc<File>,
    path: PathBuf,
}

impl LogGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        let _ = (&*self.file).flush();
        let _ = self.file.sync_all();
    }
}

fn log_file_name(now: DateTime<Local>) -> String {
    format!("livewine-{}.log", now.format("%Y%m%d-%H%M%S"))
}

fn directives(level: &str) -> String {
    format!("livewine={level},livewine_lib={level}")
}

/// Console at info (debug when verbose, `RUST_LOG` wins), file always at debug
pub fn init(log_dir: &Path, verbose: bool) -> Result<LogGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
    let path = log_dir.join(log_file_name(Local::now()));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;
    let file = Arc::new(file);

    let level = if verbose { "debug" } else { "info" };
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives(level)));
    let console = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let json = std::env::var(FORMAT_ENV).map_or(false, |v| v.eq_ignore_ascii_case("json"));
    let text_file = (!json).then(|| {
        fmt::layer()
            .with_ansi(false)
            .with_writer(file.clone())
            .with_filter(EnvFilter::new(directives("debug")))
    });
    let json_file = json.then(|| {
        fmt::layer()
            .json()
            .with_writer(file.clone())
            .with_filter(EnvFilter::new(directives("debug")))
    });

    tracing_subscriber::registry()
        .with(console)
        .with(text_file)
        .with(json_file)
        .try_init()
        .context("Failed to install the log subscriber")?;

    Ok(LogGuard { file, path })
}
