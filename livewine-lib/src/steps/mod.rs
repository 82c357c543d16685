//! Install and uninstall steps
//!
//! Every step is a [`StepKind`] variant; the per-step logic lives in the
//! submodules and only talks to the machine through the context's [`Host`].

mod application;
mod dependencies;
mod driver;
mod integration;
mod uninstall;
mod verify;

pub use application::{installed_app, locate_app, requested_version};
pub use dependencies::{install_packages, RUNTIME_VERBS};
pub use driver::{
    asio_registered, locate_module_dirs, module_installed, ModuleDirs, WINEASIO_REPO, WINEASIO_TAG,
};
pub use integration::{
    desktop_entry_path, pipewire_dropin_path, plugin_bridge_ready, service_enabled,
    service_unit_path, wireplumber_dropin_path, DESKTOP_FILE, MIDI_BRIDGE, PATCHBAY,
    YABRIDGE_VERSION,
};

use crate::config::{InstallConfig, RunMode};
use crate::error::{InstallerError, Result};
use crate::host::Host;
use crate::layout::Layout;
use crate::runner::{CommandOutcome, CommandSpec};
use crate::sequencer::{Criticality, Step};
use crate::wine::Wine;
use std::time::Duration;
use tracing::warn;

/// apt operations and Wine prefix creation
pub const PACKAGE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Compiling WineASIO
pub const BUILD_TIMEOUT: Duration = Duration::from_secs(20 * 60);
/// Short Wine commands (wineboot, regsvr32, reg)
pub const WINE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Anything else
pub const QUICK_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything a step reads or acts on
pub struct InstallContext<H: Host> {
    pub config: InstallConfig,
    pub layout: Layout,
    pub host: H,
    pub wine: Wine,
}

impl<H: Host> InstallContext<H> {
    pub fn new(config: InstallConfig, layout: Layout, host: H) -> Self {
        let wine = Wine::for_layout(&layout, config.channel);
        Self {
            config,
            layout,
            host,
            wine,
        }
    }

    /// Look Wine up again, after packages may have added a build under /opt
    pub fn refresh_wine(&mut self) {
        self.wine = Wine::for_layout(&self.layout, self.config.channel);
    }

    /// Effective bound for an operation: none with `--no-timeout`
    pub fn timeout(&self, limit: Duration) -> Option<Duration> {
        if self.config.no_timeout {
            None
        } else {
            Some(limit)
        }
    }

    /// Is the selected Wine binary usable?
    pub fn wine_available(&self) -> bool {
        if self.wine.wine_bin.is_absolute() {
            self.wine.wine_bin.exists()
        } else {
            self.host.has_tool(&self.wine.wine_bin.to_string_lossy())
        }
    }

    /// Run a command that has to succeed
    pub async fn run_checked(&self, spec: &CommandSpec, limit: Duration) -> Result<CommandOutcome> {
        let outcome = self.host.run(spec, self.timeout(limit)).await?;
        if outcome.timed_out {
            return Err(InstallerError::TimedOut {
                what: spec.to_string(),
                secs: limit.as_secs(),
            });
        }
        if !outcome.success() {
            return Err(InstallerError::CommandExecution {
                command: spec.to_string(),
                error: match outcome.code {
                    Some(code) => format!("exit code {}: {}", code, outcome.stderr_tail()),
                    None => "killed by signal".to_string(),
                },
            });
        }
        Ok(outcome)
    }

    /// Run a command whose failure only deserves a warning
    pub async fn run_best_effort(&self, spec: &CommandSpec, limit: Duration) -> bool {
        match self.run_checked(spec, limit).await {
            Ok(_) => true,
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }
}

/// Ask for root once, up front, if an enabled step that still has work to
/// do runs commands as root
pub async fn authorize_plan<H: Host>(plan: &[StepKind], ctx: &mut InstallContext<H>) -> Result<()> {
    for step in plan.iter().filter(|s| s.needs_root()) {
        if !step.enabled(&*ctx) {
            continue;
        }
        if step.forced(&*ctx) || !step.is_satisfied(ctx).await.unwrap_or(false) {
            return ctx.host.authorize_root().await;
        }
    }
    Ok(())
}

/// `apt-get <args>` as root
pub fn apt_get<I, S>(args: I) -> CommandSpec
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    CommandSpec::new("apt-get").args(args).privileged()
}

/// `systemctl --user <args>`
pub fn systemctl_user<I, S>(args: I) -> CommandSpec
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    CommandSpec::new("systemctl").arg("--user").args(args)
}

/// Every step the installer knows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Dependencies,
    AudioDriver,
    DriverRegistration,
    Application,
    DriverSettings,
    AudioTuning,
    PluginBridge,
    MidiBridge,
    Patchbay,
    Services,
    DesktopEntry,
    Verification,

    RemoveDesktopEntry,
    RemoveServices,
    RemoveAudioTuning,
    RemoveMarker,
    RemoveDriver,
    RemovePrefix,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Dependencies => "dependencies",
            StepKind::AudioDriver => "audio-driver",
            StepKind::DriverRegistration => "driver-registration",
            StepKind::Application => "application",
            StepKind::DriverSettings => "driver-settings",
            StepKind::AudioTuning => "audio-tuning",
            StepKind::PluginBridge => "plugin-bridge",
            StepKind::MidiBridge => "midi-bridge",
            StepKind::Patchbay => "patchbay",
            StepKind::Services => "services",
            StepKind::DesktopEntry => "desktop-entry",
            StepKind::Verification => "verification",
            StepKind::RemoveDesktopEntry => "remove-desktop-entry",
            StepKind::RemoveServices => "remove-services",
            StepKind::RemoveAudioTuning => "remove-audio-tuning",
            StepKind::RemoveMarker => "remove-marker",
            StepKind::RemoveDriver => "remove-driver",
            StepKind::RemovePrefix => "remove-prefix",
        }
    }

    /// Steps for a run mode
    pub fn plan(mode: RunMode) -> Vec<StepKind> {
        match mode {
            RunMode::Install => Self::install_plan(),
            RunMode::Uninstall => Self::uninstall_plan(false),
            RunMode::UninstallFull => Self::uninstall_plan(true),
        }
    }

    /// Install steps in the order they must run
    pub fn install_plan() -> Vec<StepKind> {
        vec![
            StepKind::Dependencies,
            StepKind::AudioDriver,
            StepKind::DriverRegistration,
            StepKind::Application,
            StepKind::DriverSettings,
            StepKind::AudioTuning,
            StepKind::PluginBridge,
            StepKind::MidiBridge,
            StepKind::Patchbay,
            StepKind::Services,
            StepKind::DesktopEntry,
            StepKind::Verification,
        ]
    }

    /// Steps whose commands go through sudo
    pub fn needs_root(&self) -> bool {
        matches!(
            self,
            StepKind::Dependencies
                | StepKind::AudioDriver
                | StepKind::MidiBridge
                | StepKind::Patchbay
                | StepKind::RemoveDriver
        )
    }

    /// Uninstall steps; `full` also removes the driver and the prefix
    pub fn uninstall_plan(full: bool) -> Vec<StepKind> {
        let mut plan = vec![
            StepKind::RemoveDesktopEntry,
            StepKind::RemoveServices,
            StepKind::RemoveAudioTuning,
            StepKind::RemoveMarker,
        ];
        if full {
            plan.push(StepKind::RemoveDriver);
            plan.push(StepKind::RemovePrefix);
        }
        plan
    }
}

impl<H: Host> Step<InstallContext<H>> for StepKind {
    fn name(&self) -> &str {
        self.as_str()
    }

    fn criticality(&self) -> Criticality {
        match self {
            StepKind::Dependencies
            | StepKind::AudioDriver
            | StepKind::Application
            | StepKind::Verification
            | StepKind::RemovePrefix => Criticality::Critical,
            _ => Criticality::Optional,
        }
    }

    fn enabled(&self, ctx: &InstallContext<H>) -> bool {
        let features = &ctx.config.features;
        match self {
            StepKind::DriverSettings => !ctx.config.minimal,
            StepKind::AudioTuning => features.audio_tuning,
            StepKind::PluginBridge => features.plugin_bridge,
            StepKind::MidiBridge => features.midi_bridge,
            StepKind::Patchbay => features.patchbay,
            StepKind::Services => features.background_services && features.midi_bridge,
            StepKind::DesktopEntry => features.desktop_entry,
            _ => true,
        }
    }

    fn forced(&self, ctx: &InstallContext<H>) -> bool {
        match self {
            StepKind::AudioDriver => ctx.config.force_rebuild,
            StepKind::Application => ctx.config.force_reinstall,
            _ => false,
        }
    }

    async fn is_satisfied(&self, ctx: &mut InstallContext<H>) -> Result<bool> {
        match self {
            StepKind::Dependencies => Ok(dependencies::is_satisfied(ctx)),
            StepKind::AudioDriver => Ok(driver::module_installed(ctx)),
            StepKind::DriverRegistration => Ok(driver::asio_registered(ctx).await),
            StepKind::Application => Ok(application::is_satisfied(ctx)),
            StepKind::DriverSettings => Ok(driver::settings_applied(ctx).await),
            StepKind::AudioTuning => Ok(integration::tuning_current(ctx)),
            StepKind::PluginBridge => Ok(integration::plugin_bridge_ready(ctx).await),
            StepKind::MidiBridge => Ok(ctx.host.has_tool(MIDI_BRIDGE)),
            StepKind::Patchbay => Ok(ctx.host.has_tool(PATCHBAY)),
            StepKind::Services => Ok(integration::service_enabled(ctx).await),
            StepKind::DesktopEntry => integration::desktop_entry_current(ctx),
            StepKind::Verification => Ok(false),
            StepKind::RemoveDesktopEntry => Ok(!desktop_entry_path(&ctx.layout).exists()),
            StepKind::RemoveServices => Ok(!service_unit_path(&ctx.layout).exists()),
            StepKind::RemoveAudioTuning => Ok(uninstall::tuning_removed(ctx)),
            StepKind::RemoveMarker => Ok(uninstall::marker_removed(ctx)),
            StepKind::RemoveDriver => Ok(uninstall::driver_removed(ctx)),
            StepKind::RemovePrefix => Ok(!ctx.layout.prefix.exists()),
        }
    }

    async fn run(&self, ctx: &mut InstallContext<H>) -> Result<()> {
        match self {
            StepKind::Dependencies => dependencies::run(ctx).await,
            StepKind::AudioDriver => driver::build_and_install(ctx).await,
            StepKind::DriverRegistration => driver::register(ctx).await,
            StepKind::Application => application::run(ctx).await,
            StepKind::DriverSettings => driver::apply_settings(ctx).await,
            StepKind::AudioTuning => integration::write_tuning(ctx).await,
            StepKind::PluginBridge => integration::setup_plugin_bridge(ctx).await,
            StepKind::MidiBridge => install_packages(ctx, &[MIDI_BRIDGE]).await,
            StepKind::Patchbay => install_packages(ctx, &[PATCHBAY]).await,
            StepKind::Services => integration::install_service(ctx).await,
            StepKind::DesktopEntry => integration::write_desktop_entry(ctx).await,
            StepKind::Verification => verify::run(ctx),
            StepKind::RemoveDesktopEntry => uninstall::remove_desktop_entry(ctx).await,
            StepKind::RemoveServices => uninstall::remove_services(ctx).await,
            StepKind::RemoveAudioTuning => uninstall::remove_tuning(ctx).await,
            StepKind::RemoveMarker => uninstall::remove_marker(ctx),
            StepKind::RemoveDriver => uninstall::remove_driver(ctx).await,
            StepKind::RemovePrefix => uninstall::remove_prefix(ctx).await,
        }
    }

    async fn verify(&self, ctx: &mut InstallContext<H>) -> Result<bool> {
        match self {
            StepKind::Dependencies => Ok(dependencies::verify(ctx)),
            StepKind::AudioDriver => Ok(driver::module_installed(ctx)),
            StepKind::DriverRegistration => Ok(driver::asio_registered(ctx).await),
            StepKind::Application => Ok(installed_app(ctx).is_ok()),
            StepKind::DriverSettings => Ok(driver::settings_applied(ctx).await),
            StepKind::Verification => Ok(true),
            // Everything else checks the same thing before and after
            _ => <Self as Step<InstallContext<H>>>::is_satisfied(self, ctx).await,
        }
    }
}
