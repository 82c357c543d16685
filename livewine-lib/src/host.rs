//! External collaborators: tools on PATH, commands, downloads, supervised
//! GUI processes.
//!
//! Steps only reach the outside world through [`Host`], so the whole plan
//! can be driven by a scripted host in tests.

use crate::download::DownloadManager;
use crate::error::Result;
use crate::runner::{self, CommandOutcome, CommandRunner, CommandSpec};
use crate::watchdog::{WatchReport, WatchSettings, Watchdog};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[allow(async_fn_in_trait)]
pub trait Host {
    /// Absolute path of a tool on PATH
    fn find_tool(&self, name: &str) -> Option<PathBuf>;

    fn has_tool(&self, name: &str) -> bool {
        self.find_tool(name).is_some()
    }

    /// Run a command to completion or timeout
    async fn run(&self, spec: &CommandSpec, timeout: Option<Duration>) -> Result<CommandOutcome>;

    /// Download `url` into the cache as `filename`
    async fn download(&self, url: &str, filename: &str, sha256: Option<&str>) -> Result<PathBuf>;

    /// Launch a GUI process and wait for it, polling `artifact`
    async fn supervise(
        &self,
        spec: &CommandSpec,
        artifact: &dyn Fn() -> bool,
        bound: Option<Duration>,
    ) -> Result<WatchReport>;

    /// Make sure privileged commands can run without prompting
    async fn authorize_root(&self) -> Result<()> {
        Ok(())
    }
}

/// The real machine
pub struct SystemHost {
    runner: CommandRunner,
    downloader: DownloadManager,
    watchdog: Watchdog,
}

impl SystemHost {
    pub fn new(
        download_dir: &Path,
        request_timeout: Option<Duration>,
        watch: WatchSettings,
        cancel: CancellationToken,
    ) -> Result<Self> {
        Ok(Self {
            runner: CommandRunner::new(watch.grace).with_cancel(cancel.clone()),
            downloader: DownloadManager::new(download_dir.to_path_buf(), request_timeout)?
                .with_cancel(cancel.clone()),
            watchdog: Watchdog::new(watch, cancel),
        })
    }
}

impl Host for SystemHost {
    fn find_tool(&self, name: &str) -> Option<PathBuf> {
        which::which(name).ok()
    }

    async fn run(&self, spec: &CommandSpec, timeout: Option<Duration>) -> Result<CommandOutcome> {
        self.runner.run(spec, timeout).await
    }

    async fn download(&self, url: &str, filename: &str, sha256: Option<&str>) -> Result<PathBuf> {
        self.downloader.fetch(url, filename, sha256).await
    }

    async fn supervise(
        &self,
        spec: &CommandSpec,
        artifact: &dyn Fn() -> bool,
        bound: Option<Duration>,
    ) -> Result<WatchReport> {
        self.watchdog.supervise(spec, artifact, bound).await
    }

    async fn authorize_root(&self) -> Result<()> {
        runner::acquire_sudo().await
    }
}
