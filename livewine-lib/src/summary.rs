//! End-of-run summary: step outcomes, component states, remediation

use crate::host::Host;
use crate::runner::CommandSpec;
use crate::sequencer::{RunReport, StepStatus};
use crate::steps::{
    asio_registered, desktop_entry_path, installed_app, module_installed, plugin_bridge_ready,
    service_enabled, InstallContext, MIDI_BRIDGE, PATCHBAY, QUICK_TIMEOUT,
};
use crate::version::InstalledVersion;
use crate::wine::strip_version;
use std::fmt::Write;

const REMEDIATION: &str = "\
Next steps:
  - Start Ableton Live from the application menu.
  - In Preferences > Audio pick Driver Type \"ASIO\" and Audio Device \"WineASIO\".
  - No sound or no device: make sure pipewire-jack is installed, then rerun
    with --force-rebuild to rebuild and register WineASIO.
  - Crackles or dropouts: raise --buffer-size or add --tweak-audio-server.
  - Plugins missing: run `yabridgectl sync` after installing new VST3 plugins.
  - Full logs are in the log file named below.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentStatus {
    Installed,
    Missing,
}

impl ComponentStatus {
    fn from_bool(present: bool) -> Self {
        if present {
            ComponentStatus::Installed
        } else {
            ComponentStatus::Missing
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentStatus::Installed => "installed",
            ComponentStatus::Missing => "missing",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Component {
    pub name: &'static str,
    pub status: ComponentStatus,
    pub detail: Option<String>,
}

impl Component {
    fn new(name: &'static str, present: bool, detail: Option<String>) -> Self {
        Self {
            name,
            status: ComponentStatus::from_bool(present),
            detail,
        }
    }
}

/// Probe every component the configuration asked for
pub async fn collect<H: Host>(ctx: &InstallContext<H>) -> Vec<Component> {
    let features = &ctx.config.features;
    let mut components = Vec::new();

    let wine = ctx.wine_available();
    let wine_version = if wine {
        match ctx.host.run(&ctx.wine.version(), Some(QUICK_TIMEOUT)).await {
            Ok(outcome) if outcome.success() => Some(strip_version(&outcome.stdout)),
            _ => None,
        }
    } else {
        None
    };
    components.push(Component::new("Wine", wine, wine_version));

    components.push(Component::new(
        "Wine prefix",
        ctx.layout.prefix_registry().exists(),
        Some(ctx.layout.prefix.display().to_string()),
    ));
    components.push(Component::new("WineASIO driver", module_installed(ctx), None));
    components.push(Component::new(
        "WineASIO registration",
        asio_registered(ctx).await,
        None,
    ));

    let app = installed_app(ctx).ok();
    let version = InstalledVersion::read(&ctx.layout.prefix).map(|m| m.version);
    components.push(Component::new("Ableton Live", app.is_some(), version));

    if features.plugin_bridge {
        components.push(Component::new("yabridge", plugin_bridge_ready(ctx).await, None));
    }
    if features.midi_bridge {
        components.push(Component::new("a2jmidid", ctx.host.has_tool(MIDI_BRIDGE), None));
    }
    if features.background_services && features.midi_bridge {
        components.push(Component::new("MIDI bridge service", service_enabled(ctx).await, None));
    }
    if features.patchbay {
        components.push(Component::new("qpwgraph", ctx.host.has_tool(PATCHBAY), None));
    }
    if features.desktop_entry {
        components.push(Component::new(
            "Desktop entry",
            desktop_entry_path(&ctx.layout).exists(),
            None,
        ));
    }
    components
}

/// Render the summary block printed at the end of a run
pub fn render(report: &RunReport, components: &[Component]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Summary");
    let _ = writeln!(out, "=======");

    let _ = writeln!(out, "Steps:");
    for record in &report.records {
        let _ = write!(out, "  {:<22} {:<8}", record.name, record.result.status.as_str());
        match record.result.message {
            // Multi-line messages are printed in full below
            Some(ref message) if record.result.status != StepStatus::Skipped => {
                let first = message.lines().next().unwrap_or("");
                let _ = writeln!(out, " {}", first);
            }
            _ => {
                let _ = writeln!(out);
            }
        }
    }

    if !components.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Components:");
        for component in components {
            let _ = write!(out, "  {:<22} {:<9}", component.name, component.status.as_str());
            match component.detail {
                Some(ref detail) => {
                    let _ = writeln!(out, " {}", detail);
                }
                None => {
                    let _ = writeln!(out);
                }
            }
        }
    }

    let warnings: Vec<_> = report
        .warnings()
        .filter_map(|r| r.result.message.as_ref().map(|m| (r.name.as_str(), m)))
        .filter(|(_, m)| m.contains('\n'))
        .collect();
    for (name, message) in warnings {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}:", name);
        for line in message.lines() {
            let _ = writeln!(out, "  {}", line);
        }
    }

    let _ = writeln!(out);
    match report.aborted_by {
        Some(ref reason) => {
            let _ = writeln!(out, "Stopped early: {}", reason);
        }
        None => {
            let _ = writeln!(out, "Finished with {} warning(s).", report.warnings().count());
        }
    }

    let _ = writeln!(out);
    out.push_str(REMEDIATION);
    out.push('\n');
    out
}

/// Command an operator can paste to start the application by hand
pub fn launch_hint<H: Host>(ctx: &InstallContext<H>) -> Option<String> {
    let app = installed_app(ctx).ok()?;
    let spec = CommandSpec::new(ctx.wine.wine_bin.to_string_lossy()).path_arg(&app);
    Some(format!("WINEPREFIX={} {}", ctx.layout.prefix.display(), spec))
}
