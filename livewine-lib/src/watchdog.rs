//! Supervision of long-running GUI installers
//!
//! A Windows installer running under Wine gives no programmatic signal when
//! it is done. The watchdog polls two things at a coarse interval: whether
//! the process is still alive, and whether the expected artifact (the
//! installed executable) has appeared. The process exiting is authoritative;
//! the artifact only changes what gets logged. When the optional bound runs
//! out the process group is terminated.

use crate::error::{InstallerError, Result};
use crate::runner::{self, CommandSpec};
use command_group::AsyncCommandGroup;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Polling parameters
#[derive(Debug, Clone, Copy)]
pub struct WatchSettings {
    pub poll_interval: Duration,
    /// Grace period between SIGTERM and SIGKILL on timeout
    pub grace: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            grace: runner::DEFAULT_GRACE,
        }
    }
}

/// Optional time bound measured from construction
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    bound: Option<Duration>,
}

impl Deadline {
    pub fn new(bound: Option<Duration>) -> Self {
        Self::starting_at(Instant::now(), bound)
    }

    pub fn starting_at(start: Instant, bound: Option<Duration>) -> Self {
        Self { start, bound }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// True once the elapsed time exceeds the bound. Never true when unbounded.
    pub fn expired(&self) -> bool {
        self.expired_after(self.elapsed())
    }

    pub fn expired_after(&self, elapsed: Duration) -> bool {
        self.bound.map_or(false, |bound| elapsed > bound)
    }
}

/// Watchdog state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Launched,
    Monitoring { detected: bool },
    TimedOut,
    Finished,
}

/// What one poll saw
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Observation {
    pub exited: bool,
    pub artifact: bool,
    pub expired: bool,
}

impl WatchState {
    pub fn next(self, seen: Observation) -> WatchState {
        match self {
            WatchState::Launched => WatchState::Monitoring { detected: false }.next(seen),
            WatchState::Monitoring { detected } => {
                if seen.exited {
                    WatchState::Finished
                } else if seen.expired {
                    WatchState::TimedOut
                } else {
                    WatchState::Monitoring {
                        detected: detected || seen.artifact,
                    }
                }
            }
            // Termination always follows a timeout
            WatchState::TimedOut => WatchState::Finished,
            WatchState::Finished => WatchState::Finished,
        }
    }
}

/// How a supervised process ended
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchReport {
    /// Exit code, `None` when killed
    pub exit_code: Option<i32>,
    pub artifact_detected: bool,
    pub timed_out: bool,
    pub elapsed: Duration,
}

/// Polls a launched process for exit or an expected side effect
#[derive(Debug, Clone)]
pub struct Watchdog {
    settings: WatchSettings,
    cancel: CancellationToken,
}

impl Watchdog {
    pub fn new(settings: WatchSettings, cancel: CancellationToken) -> Self {
        Self { settings, cancel }
    }

    /// Launch `spec` and supervise it until it exits, `bound` runs out, or
    /// the cancellation token fires.
    pub async fn supervise<F>(
        &self,
        spec: &CommandSpec,
        artifact: F,
        bound: Option<Duration>,
    ) -> Result<WatchReport>
    where
        F: Fn() -> bool,
    {
        let mut cmd = spec.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let mut child = cmd
            .group_spawn()
            .map_err(|e| InstallerError::CommandExecution {
                command: spec.to_string(),
                error: e.to_string(),
            })?;

        let deadline = Deadline::new(bound);
        let mut state = WatchState::Launched;
        info!("Launched {} (pid {:?})", spec.program(), child.id());
        match bound {
            Some(b) => info!("Waiting up to {}s for the installer to finish", b.as_secs()),
            None => info!("Waiting for the installer to finish (no timeout, Ctrl-C to abort)"),
        }

        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut exit_code = None;
        let mut detected = false;
        let mut timed_out = false;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    warn!("Cancelled, terminating {}", spec.program());
                    runner::terminate(&mut child, self.settings.grace).await?;
                    return Err(InstallerError::Cancelled);
                }
                _ = ticker.tick() => {}
            }

            let status = child.try_wait()?;
            let seen = Observation {
                exited: status.is_some(),
                artifact: status.is_none() && artifact(),
                expired: deadline.expired(),
            };
            let next = state.next(seen);

            if let WatchState::Monitoring { detected: true } = next {
                if !detected {
                    info!("Installed application detected, waiting for the installer to exit");
                    detected = true;
                }
            }

            match next {
                WatchState::Finished => {
                    exit_code = status.and_then(|s| s.code());
                    state = next;
                    break;
                }
                WatchState::TimedOut => {
                    warn!(
                        "Installer still running after {}s, terminating",
                        deadline.elapsed().as_secs()
                    );
                    runner::terminate(&mut child, self.settings.grace).await?;
                    timed_out = true;
                    state = next.next(Observation::default());
                    break;
                }
                _ => state = next,
            }
        }

        debug!("Watchdog finished in state {:?}", state);
        Ok(WatchReport {
            exit_code,
            artifact_detected: detected || artifact(),
            timed_out,
            elapsed: deadline.elapsed(),
        })
    }
}
