//! Desktop integration around the application: audio server tuning, the
//! plugin bridge, the MIDI bridge service and the menu entry

use super::{systemctl_user, InstallContext, PACKAGE_TIMEOUT, QUICK_TIMEOUT};
use crate::error::{InstallerError, Result};
use crate::host::Host;
use crate::layout::Layout;
use crate::render::{self, ClockSettings, DesktopEntry, InterfaceRule, RestartPolicy, ServiceUnit};
use crate::runner::CommandSpec;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const MIDI_BRIDGE: &str = "a2jmidid";
pub const PATCHBAY: &str = "qpwgraph";

pub const YABRIDGE_VERSION: &str = "5.1.1";
const YABRIDGECTL: &str = "yabridgectl";

pub const DESKTOP_FILE: &str = "livewine-ableton-live.desktop";
const SERVICE_NAME: &str = "livewine-a2jmidid";
const PIPEWIRE_DROPIN: &str = "99-livewine.conf";
const WIREPLUMBER_DROPIN: &str = "99-livewine-interface.conf";

const AUDIO_SERVICES: &[&str] = &["pipewire", "pipewire-pulse", "wireplumber"];

pub fn desktop_entry_path(layout: &Layout) -> PathBuf {
    layout.applications_dir.join(DESKTOP_FILE)
}

pub fn service_unit_path(layout: &Layout) -> PathBuf {
    layout.systemd_user_dir.join(unit_file_name())
}

pub fn pipewire_dropin_path(layout: &Layout) -> PathBuf {
    layout.pipewire_conf_dir.join(PIPEWIRE_DROPIN)
}

pub fn wireplumber_dropin_path(layout: &Layout) -> PathBuf {
    layout.wireplumber_conf_dir.join(WIREPLUMBER_DROPIN)
}

// Audio server tuning

/// Drop-ins for the current configuration
fn tuning_files<H: Host>(ctx: &InstallContext<H>) -> Vec<(PathBuf, String)> {
    let config = &ctx.config;
    let mut files = vec![(
        pipewire_dropin_path(&ctx.layout),
        ClockSettings::new(config.sample_rate, config.buffer_size).to_string(),
    )];
    if let Some(ref interface) = config.audio_interface {
        let rule = InterfaceRule {
            interface: interface.clone(),
            rate: config.sample_rate,
            period: config.buffer_size,
        };
        files.push((wireplumber_dropin_path(&ctx.layout), rule.to_string()));
    }
    files
}

pub(super) fn tuning_current<H: Host>(ctx: &InstallContext<H>) -> bool {
    tuning_files(ctx)
        .iter()
        .all(|(path, content)| render::is_current(path, content))
}

pub(super) async fn write_tuning<H: Host>(ctx: &mut InstallContext<H>) -> Result<()> {
    let mut changed = false;
    for (path, content) in tuning_files(ctx) {
        if render::write_if_changed(&path, &content)? {
            info!("Wrote {}", path.display());
            changed = true;
        }
    }
    if changed {
        restart_audio_services(ctx).await;
    }
    Ok(())
}

/// Pick up new drop-ins; a failure leaves the old settings until next login
pub(super) async fn restart_audio_services<H: Host>(ctx: &InstallContext<H>) {
    if !ctx.host.has_tool("systemctl") {
        warn!("systemctl not found; log out and back in to apply the audio settings");
        return;
    }
    let spec = systemctl_user(["restart"]).args(AUDIO_SERVICES.iter().copied());
    ctx.run_best_effort(&spec, QUICK_TIMEOUT).await;
}

// Plugin bridge

fn yabridgectl<H: Host>(ctx: &InstallContext<H>) -> Option<PathBuf> {
    ctx.host.find_tool(YABRIDGECTL).or_else(|| {
        let bundled = ctx.layout.yabridge_dir.join(YABRIDGECTL);
        bundled.exists().then_some(bundled)
    })
}

fn yabridgectl_command(program: &Path, prefix: &Path) -> CommandSpec {
    CommandSpec::new(program.to_string_lossy()).env("WINEPREFIX", prefix.to_string_lossy())
}

/// Is the prefix's VST3 directory registered with yabridge?
pub async fn plugin_bridge_ready<H: Host>(ctx: &InstallContext<H>) -> bool {
    let Some(ctl) = yabridgectl(ctx) else {
        return false;
    };
    let list = yabridgectl_command(&ctl, &ctx.layout.prefix).arg("list");
    match ctx.host.run(&list, ctx.timeout(QUICK_TIMEOUT)).await {
        Ok(outcome) => {
            let vst3 = ctx.layout.vst3_dir();
            let vst3 = vst3.to_string_lossy();
            outcome.success() && outcome.stdout.lines().any(|l| l.trim() == vst3)
        }
        Err(_) => false,
    }
}

pub(super) async fn setup_plugin_bridge<H: Host>(ctx: &mut InstallContext<H>) -> Result<()> {
    let ctl = match yabridgectl(ctx) {
        Some(ctl) => ctl,
        None => {
            fetch_yabridge(ctx).await?;
            yabridgectl(ctx).ok_or_else(|| {
                InstallerError::NotFound(format!(
                    "{} in {}",
                    YABRIDGECTL,
                    ctx.layout.yabridge_dir.display()
                ))
            })?
        }
    };

    let vst3 = ctx.layout.vst3_dir();
    std::fs::create_dir_all(&vst3)?;

    if !plugin_bridge_ready(ctx).await {
        info!("Adding {} to yabridge", vst3.display());
        ctx.run_checked(
            &yabridgectl_command(&ctl, &ctx.layout.prefix).arg("add").path_arg(&vst3),
            QUICK_TIMEOUT,
        )
        .await?;
    }
    ctx.run_checked(
        &yabridgectl_command(&ctl, &ctx.layout.prefix).arg("sync"),
        PACKAGE_TIMEOUT,
    )
    .await?;
    Ok(())
}

/// Download the release tarball and unpack it next to `yabridge_dir`
async fn fetch_yabridge<H: Host>(ctx: &InstallContext<H>) -> Result<()> {
    let filename = format!("yabridge-{}.tar.gz", YABRIDGE_VERSION);
    let url = format!(
        "https://github.com/robbert-vdh/yabridge/releases/download/{}/{}",
        YABRIDGE_VERSION, filename
    );
    let archive = ctx.host.download(&url, &filename, None).await?;

    // The tarball holds a single top-level `yabridge/` directory
    let parent = ctx
        .layout
        .yabridge_dir
        .parent()
        .ok_or_else(|| InstallerError::Config("yabridge directory has no parent".into()))?;
    std::fs::create_dir_all(parent)?;
    info!("Extracting yabridge {} to {}", YABRIDGE_VERSION, parent.display());
    ctx.run_checked(
        &CommandSpec::new("tar")
            .arg("-C")
            .path_arg(parent)
            .arg("-xzf")
            .path_arg(&archive),
        PACKAGE_TIMEOUT,
    )
    .await?;
    Ok(())
}

// MIDI bridge service

fn service_unit(a2jmidid: &Path) -> ServiceUnit {
    ServiceUnit::new(SERVICE_NAME)
        .description("ALSA to JACK MIDI bridge for Ableton Live")
        .after("pipewire.service")
        .exec_start([a2jmidid.to_string_lossy().to_string(), "-e".to_string()])
        .restart(RestartPolicy::OnFailure, 5)
        .wanted_by("default.target")
}

fn unit_file_name() -> String {
    format!("{}.service", SERVICE_NAME)
}

pub async fn service_enabled<H: Host>(ctx: &InstallContext<H>) -> bool {
    let Some(a2jmidid) = ctx.host.find_tool(MIDI_BRIDGE) else {
        return false;
    };
    if !render::is_current(&service_unit_path(&ctx.layout), &service_unit(&a2jmidid).to_string()) {
        return false;
    }
    let query = systemctl_user(["is-enabled", "--quiet"]).arg(unit_file_name());
    matches!(
        ctx.host.run(&query, ctx.timeout(QUICK_TIMEOUT)).await,
        Ok(outcome) if outcome.success()
    )
}

pub(super) async fn install_service<H: Host>(ctx: &mut InstallContext<H>) -> Result<()> {
    let a2jmidid = ctx
        .host
        .find_tool(MIDI_BRIDGE)
        .ok_or_else(|| InstallerError::DependencyMissing(MIDI_BRIDGE.into()))?;

    let path = service_unit_path(&ctx.layout);
    if render::write_if_changed(&path, &service_unit(&a2jmidid).to_string())? {
        info!("Wrote {}", path.display());
    }
    ctx.run_checked(&systemctl_user(["daemon-reload"]), QUICK_TIMEOUT)
        .await?;
    ctx.run_checked(
        &systemctl_user(["enable", "--now"]).arg(unit_file_name()),
        QUICK_TIMEOUT,
    )
    .await?;
    Ok(())
}

// Desktop entry

fn desktop_entry<H: Host>(ctx: &InstallContext<H>) -> Result<DesktopEntry> {
    let app = super::installed_app(ctx)?;
    let exe_name = app
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let title = exe_name.trim_end_matches(".exe").to_string();

    let mut entry = DesktopEntry::new(title)
        .comment("Digital audio workstation (Wine)")
        .exec([
            "env".to_string(),
            format!("WINEPREFIX={}", ctx.layout.prefix.display()),
            ctx.wine.wine_bin.to_string_lossy().to_string(),
            app.to_string_lossy().to_string(),
        ])
        .icon("audio-x-generic")
        .wm_class(exe_name.to_lowercase())
        .categories(["AudioVideo", "Audio", "Midi"]);
    if let Some(dir) = app.parent() {
        entry = entry.working_dir(dir.to_string_lossy());
    }
    Ok(entry)
}

pub(super) fn desktop_entry_current<H: Host>(ctx: &InstallContext<H>) -> Result<bool> {
    let entry = match desktop_entry(ctx) {
        Ok(entry) => entry,
        Err(_) => return Ok(false),
    };
    Ok(render::is_current(
        &desktop_entry_path(&ctx.layout),
        &entry.to_string(),
    ))
}

pub(super) async fn write_desktop_entry<H: Host>(ctx: &mut InstallContext<H>) -> Result<()> {
    let entry = desktop_entry(ctx)?;
    let path = desktop_entry_path(&ctx.layout);
    if render::write_if_changed(&path, &entry.to_string())? {
        info!("Wrote {}", path.display());
    }
    refresh_menu(ctx).await;
    Ok(())
}

pub(super) async fn refresh_menu<H: Host>(ctx: &InstallContext<H>) {
    if ctx.host.has_tool("update-desktop-database") {
        let spec =
            CommandSpec::new("update-desktop-database").path_arg(&ctx.layout.applications_dir);
        ctx.run_best_effort(&spec, QUICK_TIMEOUT).await;
    }
}
