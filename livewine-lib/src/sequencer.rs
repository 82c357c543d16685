//! Ordered step execution with idempotent checkpoints
//!
//! Each step is skipped when its precondition says the work is already done
//! (unless forced), otherwise run and then verified. A critical step that
//! fails aborts the rest of the sequence; an optional one is recorded as a
//! warning and the sequence carries on. Steps never run concurrently: the
//! package manager and the Wine prefix are not safe to share.

use crate::error::{InstallerError, Result};
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Whether a step failure aborts the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
    Critical,
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Skipped,
    Succeeded,
    Warned,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Skipped => "skipped",
            StepStatus::Succeeded => "ok",
            StepStatus::Warned => "warning",
            StepStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub status: StepStatus,
    pub message: Option<String>,
}

impl StepResult {
    fn new(status: StepStatus, message: Option<String>) -> Self {
        Self { status, message }
    }
}

#[derive(Debug, Clone)]
pub struct StepRecord {
    pub name: String,
    pub criticality: Criticality,
    pub result: StepResult,
}

/// One installation step over a context `C`
#[allow(async_fn_in_trait)]
pub trait Step<C> {
    fn name(&self) -> &str;

    fn criticality(&self) -> Criticality;

    /// Disabled steps are skipped without probing
    fn enabled(&self, _ctx: &C) -> bool {
        true
    }

    /// Forced steps run even when their precondition is satisfied
    fn forced(&self, _ctx: &C) -> bool {
        false
    }

    /// Is the work already done?
    async fn is_satisfied(&self, ctx: &mut C) -> Result<bool>;

    async fn run(&self, ctx: &mut C) -> Result<()>;

    async fn verify(&self, ctx: &mut C) -> Result<bool>;
}

/// Every step's record, plus the reason the run stopped early if it did
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub records: Vec<StepRecord>,
    pub aborted_by: Option<String>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.aborted_by.is_none()
    }

    /// Process exit code for this run
    pub fn exit_code(&self) -> u8 {
        if self.succeeded() {
            0
        } else {
            1
        }
    }

    pub fn status_of(&self, name: &str) -> Option<StepStatus> {
        self.records
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.result.status)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &StepRecord> {
        self.records
            .iter()
            .filter(|r| r.result.status == StepStatus::Warned)
    }
}

/// Runs a fixed, linear list of steps
#[derive(Debug, Clone)]
pub struct Sequencer {
    label: String,
    cancel: Option<CancellationToken>,
}

impl Sequencer {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            cancel: None,
        }
    }

    /// Stop before the next step once `cancel` fires
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().map_or(false, |c| c.is_cancelled())
    }

    pub async fn run<C, S>(&self, steps: &[S], ctx: &mut C) -> RunReport
    where
        S: Step<C>,
    {
        let mut report = RunReport::default();
        let total = steps.len();
        info!("Starting {} ({} steps)", self.label, total);

        for (index, step) in steps.iter().enumerate() {
            let name = step.name().to_string();
            let criticality = step.criticality();
            let position = format!("[{}/{}] {}", index + 1, total, name);

            if self.cancelled() {
                warn!("{}: not started, run was cancelled", position);
                report.aborted_by = Some(InstallerError::Cancelled.to_string());
                break;
            }

            let outcome = self.run_step(step, ctx, &position).await;
            let (result, abort) = match outcome {
                Ok(result) => (result, None),
                Err(e) => {
                    let message = e.to_string();
                    if criticality == Criticality::Critical || e.aborts_run() {
                        error!("{} failed: {}", position, message);
                        (
                            StepResult::new(StepStatus::Failed, Some(message.clone())),
                            Some(format!("{}: {}", name, message)),
                        )
                    } else {
                        warn!("{} failed (optional, continuing): {}", position, message);
                        (StepResult::new(StepStatus::Warned, Some(message)), None)
                    }
                }
            };

            report.records.push(StepRecord {
                name,
                criticality,
                result,
            });

            if abort.is_some() {
                report.aborted_by = abort;
                break;
            }
        }

        if report.succeeded() {
            info!("Finished {}", self.label);
        } else {
            error!("Aborted {}", self.label);
        }
        report
    }

    async fn run_step<C, S>(&self, step: &S, ctx: &mut C, position: &str) -> Result<StepResult>
    where
        S: Step<C>,
    {
        if !step.enabled(ctx) {
            info!("{}: disabled, skipping", position);
            return Ok(StepResult::new(
                StepStatus::Skipped,
                Some("disabled by configuration".into()),
            ));
        }

        if !step.forced(ctx) {
            match step.is_satisfied(ctx).await {
                Ok(true) => {
                    info!("{}: already done, skipping", position);
                    return Ok(StepResult::new(
                        StepStatus::Skipped,
                        Some("already satisfied".into()),
                    ));
                }
                Ok(false) => {}
                Err(e) if e.aborts_run() => return Err(e),
                Err(e) => warn!("{}: precondition check failed, running anyway: {}", position, e),
            }
        } else {
            info!("{}: forced", position);
        }

        info!("{}: running", position);
        step.run(ctx).await?;

        if step.verify(ctx).await? {
            info!("{}: done", position);
            Ok(StepResult::new(StepStatus::Succeeded, None))
        } else {
            Err(InstallerError::StepFailed {
                step: step.name().to_string(),
                critical: step.criticality() == Criticality::Critical,
                message: "verification failed".into(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Journal {
        ran: Vec<String>,
        force: bool,
    }

    struct FakeStep {
        name: &'static str,
        criticality: Criticality,
        enabled: bool,
        satisfied: bool,
        run_ok: bool,
        verify_ok: bool,
    }

    impl FakeStep {
        fn ok(name: &'static str, criticality: Criticality) -> Self {
            Self {
                name,
                criticality,
                enabled: true,
                satisfied: false,
                run_ok: true,
                verify_ok: true,
            }
        }
    }

    impl Step<Journal> for FakeStep {
        fn name(&self) -> &str {
            self.name
        }

        fn criticality(&self) -> Criticality {
            self.criticality
        }

        fn enabled(&self, _ctx: &Journal) -> bool {
            self.enabled
        }

        fn forced(&self, ctx: &Journal) -> bool {
            ctx.force
        }

        async fn is_satisfied(&self, _ctx: &mut Journal) -> Result<bool> {
            Ok(self.satisfied)
        }

        async fn run(&self, ctx: &mut Journal) -> Result<()> {
            ctx.ran.push(self.name.to_string());
            if self.run_ok {
                Ok(())
            } else {
                Err(InstallerError::DependencyMissing("make".into()))
            }
        }

        async fn verify(&self, _ctx: &mut Journal) -> Result<bool> {
            Ok(self.verify_ok)
        }
    }

    use Criticality::{Critical, Optional};

    #[tokio::test]
    async fn cancellation_stops_before_the_next_step() {
        let steps = vec![FakeStep::ok("first", Optional), FakeStep::ok("second", Optional)];
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut journal = Journal::default();
        let report = Sequencer::new("test")
            .with_cancel(cancel)
            .run(&steps, &mut journal)
            .await;

        assert!(journal.ran.is_empty());
        assert!(report.records.is_empty());
        assert!(!report.succeeded());
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn critical_verification_failure_halts_the_sequence() {
        let steps = vec![
            FakeStep::ok("first", Critical),
            FakeStep {
                verify_ok: false,
                ..FakeStep::ok("broken", Critical)
            },
            FakeStep::ok("after", Optional),
        ];
        let mut journal = Journal::default();
        let report = Sequencer::new("test").run(&steps, &mut journal).await;

        assert_eq!(journal.ran, vec!["first", "broken"]);
        assert_eq!(report.status_of("broken"), Some(StepStatus::Failed));
        assert_eq!(report.status_of("after"), None);
        assert_ne!(report.exit_code(), 0);
    }

    #[tokio::test]
    async fn optional_failure_is_a_warning_and_keeps_going() {
        let steps = vec![
            FakeStep {
                run_ok: false,
                ..FakeStep::ok("bridge", Optional)
            },
            FakeStep {
                verify_ok: false,
                ..FakeStep::ok("polish", Optional)
            },
            FakeStep::ok("last", Critical),
        ];
        let mut journal = Journal::default();
        let report = Sequencer::new("test").run(&steps, &mut journal).await;

        assert_eq!(journal.ran, vec!["bridge", "polish", "last"]);
        assert_eq!(report.status_of("bridge"), Some(StepStatus::Warned));
        assert_eq!(report.status_of("polish"), Some(StepStatus::Warned));
        assert_eq!(report.status_of("last"), Some(StepStatus::Succeeded));
        assert_eq!(report.warnings().count(), 2);
        assert_eq!(report.exit_code(), 0);
    }

    #[tokio::test]
    async fn satisfied_steps_skip_unless_forced() {
        let steps = vec![FakeStep {
            satisfied: true,
            ..FakeStep::ok("install", Critical)
        }];

        let mut journal = Journal::default();
        let report = Sequencer::new("test").run(&steps, &mut journal).await;
        assert!(journal.ran.is_empty());
        assert_eq!(report.status_of("install"), Some(StepStatus::Skipped));

        let mut journal = Journal {
            force: true,
            ..Default::default()
        };
        let report = Sequencer::new("test").run(&steps, &mut journal).await;
        assert_eq!(journal.ran, vec!["install"]);
        assert_eq!(report.status_of("install"), Some(StepStatus::Succeeded));
    }

    #[tokio::test]
    async fn disabled_steps_never_run() {
        let steps = vec![FakeStep {
            enabled: false,
            run_ok: false,
            ..FakeStep::ok("patchbay", Critical)
        }];
        let mut journal = Journal {
            force: true,
            ..Default::default()
        };
        let report = Sequencer::new("test").run(&steps, &mut journal).await;
        assert!(journal.ran.is_empty());
        assert_eq!(report.status_of("patchbay"), Some(StepStatus::Skipped));
        assert!(report.succeeded());
    }
}
