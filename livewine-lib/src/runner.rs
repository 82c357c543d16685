//! External command execution with timeouts

use crate::error::{InstallerError, Result};
use command_group::{AsyncCommandGroup, AsyncGroupChild, Signal, UnixChildExt};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Grace period between SIGTERM and SIGKILL
pub const DEFAULT_GRACE: Duration = Duration::from_secs(10);

/// Description of an external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    cwd: Option<PathBuf>,
    privileged: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy())
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Run through `sudo -n` when sudo is available. Credentials have to be
    /// cached beforehand, see [`acquire_sudo`].
    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn envs(&self) -> &[(String, String)] {
        &self.envs
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    /// True if the program is `program` and the arguments start with `args`
    pub fn matches(&self, program: &str, args: &[&str]) -> bool {
        self.program == program
            && self.args.len() >= args.len()
            && self.args.iter().zip(args).all(|(a, b)| a == b)
    }

    fn uses_sudo(&self) -> bool {
        self.privileged && sudo_available()
    }

    /// Program and arguments as executed
    fn argv(&self, sudo: bool) -> (&str, Vec<&str>) {
        let args = self.args.iter().map(String::as_str);
        if sudo {
            // Never prompt: the child runs outside the terminal's foreground group
            let sudo_args = ["-n", self.program.as_str()].into_iter().chain(args);
            ("sudo", sudo_args.collect())
        } else {
            (self.program.as_str(), args.collect())
        }
    }

    pub(crate) fn to_command(&self) -> tokio::process::Command {
        let (program, args) = self.argv(self.uses_sudo());
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args);
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.privileged {
            f.write_str("sudo ")?;
        }
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Result of a finished (or killed) command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.code == Some(0)
    }

    /// Successful outcome with the given standard output
    pub fn ok_with(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    /// Failed outcome with the given exit code
    pub fn failed(code: i32) -> Self {
        Self {
            code: Some(code),
            ..Default::default()
        }
    }

    /// sudo refused to run the command because no credentials are cached
    pub fn sudo_refused(&self) -> bool {
        self.code == Some(1) && self.stderr.contains("a password is required")
    }

    /// Last non-empty line of stderr, for error messages
    pub fn stderr_tail(&self) -> &str {
        self.stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("")
            .trim()
    }
}

/// Runs commands as process groups so a timeout takes down the whole tree
#[derive(Debug, Clone)]
pub struct CommandRunner {
    grace: Duration,
    cancel: CancellationToken,
}

enum Waited {
    Exited(Option<i32>),
    TimedOut,
    Cancelled,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE)
    }
}

impl CommandRunner {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            cancel: CancellationToken::new(),
        }
    }

    /// Terminate running commands when `cancel` fires
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run a command to completion, or until `timeout` elapses.
    ///
    /// Never retries; a non-zero exit is reported in the outcome, not as an
    /// error. Errors are reserved for failing to start the command.
    pub async fn run(
        &self,
        spec: &CommandSpec,
        timeout: Option<Duration>,
    ) -> Result<CommandOutcome> {
        debug!("Running: {}", spec);

        let mut cmd = spec.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .group_spawn()
            .map_err(|e| InstallerError::CommandExecution {
                command: spec.to_string(),
                error: e.to_string(),
            })?;

        let stdout = tokio::spawn(read_all(child.inner().stdout.take()));
        let stderr = tokio::spawn(read_all(child.inner().stderr.take()));

        let waited = {
            let wait = async {
                match timeout {
                    Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                        Ok(status) => status.map(|s| Waited::Exited(s.code())),
                        Err(_) => Ok(Waited::TimedOut),
                    },
                    None => child.wait().await.map(|s| Waited::Exited(s.code())),
                }
            };
            tokio::select! {
                waited = wait => waited?,
                _ = self.cancel.cancelled() => Waited::Cancelled,
            }
        };

        let (code, timed_out) = match waited {
            Waited::Exited(code) => (code, false),
            Waited::TimedOut => {
                warn!(
                    "{} timed out after {}s, terminating",
                    spec,
                    timeout.map_or(0, |t| t.as_secs())
                );
                terminate(&mut child, self.grace).await?;
                (None, true)
            }
            Waited::Cancelled => {
                warn!("Cancelled, terminating {}", spec.program());
                terminate(&mut child, self.grace).await?;
                return Err(InstallerError::Cancelled);
            }
        };

        let outcome = CommandOutcome {
            code,
            timed_out,
            stdout: stdout.await.unwrap_or_default(),
            stderr: stderr.await.unwrap_or_default(),
        };
        debug!("{} exited with {:?}", spec.program(), outcome.code);
        if spec.uses_sudo() && outcome.sudo_refused() {
            return Err(InstallerError::DependencyMissing(format!(
                "sudo credentials for `{}` (run `sudo -v` and try again)",
                spec
            )));
        }
        Ok(outcome)
    }
}

fn sudo_available() -> bool {
    which::which("sudo").is_ok()
}

/// Validate sudo credentials in the foreground, where sudo can prompt on
/// the terminal. Privileged commands later run as `sudo -n` against the
/// cached credentials. A no-op when sudo is not installed.
pub async fn acquire_sudo() -> Result<()> {
    if !sudo_available() {
        return Ok(());
    }
    info!("Administrator rights are needed, sudo may ask for your password");
    let status = tokio::process::Command::new("sudo")
        .arg("-v")
        .status()
        .await
        .map_err(|e| InstallerError::CommandExecution {
            command: "sudo -v".into(),
            error: e.to_string(),
        })?;
    if status.success() {
        Ok(())
    } else {
        Err(InstallerError::DependencyMissing(
            "sudo credentials (sudo -v failed)".into(),
        ))
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_end(&mut buf).await;
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// SIGTERM the process group, wait `grace`, then SIGKILL it
pub(crate) async fn terminate(child: &mut AsyncGroupChild, grace: Duration) -> Result<()> {
    if let Err(e) = child.signal(Signal::SIGTERM) {
        debug!("SIGTERM failed: {}", e);
    }
    if tokio::time::timeout(grace, child.wait()).await.is_ok() {
        return Ok(());
    }
    warn!("Process group ignored SIGTERM for {}s, killing", grace.as_secs());
    if let Err(e) = child.signal(Signal::SIGKILL) {
        debug!("SIGKILL failed: {}", e);
    }
    child.wait().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn display_quotes_arguments_with_spaces() {
        let spec = CommandSpec::new("wine")
            .arg("C:\\Program Files\\Live.exe")
            .arg("/S")
            .privileged();
        assert_eq!(spec.to_string(), "sudo wine \"C:\\Program Files\\Live.exe\" /S");
    }

    #[test]
    fn privileged_commands_never_prompt() {
        let spec = CommandSpec::new("apt-get").arg("update").privileged();
        assert_eq!(spec.argv(true), ("sudo", vec!["-n", "apt-get", "update"]));
        assert_eq!(spec.argv(false), ("apt-get", vec!["update"]));
    }

    #[test]
    fn missing_sudo_credentials_are_recognised() {
        let refused = CommandOutcome {
            code: Some(1),
            stderr: "sudo: a password is required\n".into(),
            ..Default::default()
        };
        assert!(refused.sudo_refused());
        assert!(!CommandOutcome::failed(1).sudo_refused());
        assert!(!CommandOutcome::ok_with("a password is required").sudo_refused());
    }

    #[test]
    fn matches_on_program_and_leading_args() {
        let spec = CommandSpec::new("apt-get").args(["install", "-y", "git"]);
        assert!(spec.matches("apt-get", &["install"]));
        assert!(spec.matches("apt-get", &[]));
        assert!(!spec.matches("apt-get", &["update"]));
        assert!(!spec.matches("apt", &["install"]));
    }

    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let runner = CommandRunner::default();
        let spec = CommandSpec::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]);
        let outcome = runner.run(&spec, Some(Duration::from_secs(10))).await.unwrap();
        assert_eq!(outcome.code, Some(3));
        assert!(!outcome.timed_out);
        assert!(!outcome.success());
        assert_eq!(outcome.stdout.trim(), "out");
        assert_eq!(outcome.stderr_tail(), "err");
    }

    #[tokio::test]
    async fn passes_environment_and_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::new("sh")
            .args(["-c", "echo \"$LIVEWINE_TEST\"; pwd"])
            .env("LIVEWINE_TEST", "hello")
            .current_dir(dir.path());
        let outcome = CommandRunner::default().run(&spec, None).await.unwrap();
        assert!(outcome.success());
        let mut lines = outcome.stdout.lines();
        assert_eq!(lines.next(), Some("hello"));
        let pwd = PathBuf::from(lines.next().unwrap());
        assert_eq!(
            pwd.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn timeout_kills_the_command() {
        let runner = CommandRunner::new(Duration::from_millis(200));
        let spec = CommandSpec::new("sleep").arg("30");
        let start = Instant::now();
        let outcome = runner
            .run(&spec, Some(Duration::from_millis(200)))
            .await
            .unwrap();
        assert!(outcome.timed_out);
        assert!(!outcome.success());
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn cancellation_terminates_the_command() {
        let cancel = CancellationToken::new();
        let runner = CommandRunner::new(Duration::from_millis(200)).with_cancel(cancel.clone());
        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
        let spec = CommandSpec::new("sleep").arg("30");
        let err = runner.run(&spec, None).await.unwrap_err();
        assert!(matches!(err, InstallerError::Cancelled));
        trigger.await.unwrap();
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let spec = CommandSpec::new("livewine-definitely-not-installed");
        let err = CommandRunner::default().run(&spec, None).await.unwrap_err();
        assert!(matches!(err, InstallerError::CommandExecution { .. }));
    }
}
