//! systemd user service units

use std::fmt;

/// `Restart=` policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    No,
    OnFailure,
    Always,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartPolicy::No => "no",
            RestartPolicy::OnFailure => "on-failure",
            RestartPolicy::Always => "always",
        }
    }
}

/// Autostart service descriptor
#[derive(Debug, Clone)]
pub struct ServiceUnit {
    name: String,
    description: String,
    exec_start: Vec<String>,
    restart: RestartPolicy,
    restart_sec: u32,
    after: Vec<String>,
    wanted_by: String,
}

impl ServiceUnit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            exec_start: Vec::new(),
            restart: RestartPolicy::OnFailure,
            restart_sec: 3,
            after: Vec::new(),
            wanted_by: "default.target".into(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn exec_start<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exec_start = argv.into_iter().map(Into::into).collect();
        self
    }

    pub fn restart(mut self, policy: RestartPolicy, delay_secs: u32) -> Self {
        self.restart = policy;
        self.restart_sec = delay_secs;
        self
    }

    pub fn after(mut self, unit: impl Into<String>) -> Self {
        self.after.push(unit.into());
        self
    }

    pub fn wanted_by(mut self, target: impl Into<String>) -> Self {
        self.wanted_by = target.into();
        self
    }

    /// Unit file name, e.g. `livewine-a2jmidid.service`
    pub fn file_name(&self) -> String {
        format!("{}.service", self.name)
    }
}

impl fmt::Display for ServiceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[Unit]")?;
        writeln!(f, "Description={}", self.description)?;
        if !self.after.is_empty() {
            writeln!(f, "After={}", self.after.join(" "))?;
        }
        writeln!(f)?;
        writeln!(f, "[Service]")?;
        writeln!(f, "Type=simple")?;
        writeln!(f, "ExecStart={}", self.exec_start.join(" "))?;
        writeln!(f, "Restart={}", self.restart.as_str())?;
        if self.restart != RestartPolicy::No {
            writeln!(f, "RestartSec={}", self.restart_sec)?;
        }
        writeln!(f)?;
        writeln!(f, "[Install]")?;
        writeln!(f, "WantedBy={}", self.wanted_by)?;
        Ok(())
    }
}
