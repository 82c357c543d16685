//! Removal of what the install steps created

use super::integration::{refresh_menu, restart_audio_services};
use super::{
    desktop_entry_path, locate_module_dirs, pipewire_dropin_path, service_unit_path,
    systemctl_user, wireplumber_dropin_path, InstallContext, QUICK_TIMEOUT, WINE_TIMEOUT,
};
use crate::error::Result;
use crate::host::Host;
use crate::runner::CommandSpec;
use crate::version::InstalledVersion;
use std::path::Path;
use tracing::info;

fn remove_file(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            info!("Removed {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

pub(super) async fn remove_desktop_entry<H: Host>(ctx: &mut InstallContext<H>) -> Result<()> {
    if remove_file(&desktop_entry_path(&ctx.layout))? {
        refresh_menu(ctx).await;
    }
    Ok(())
}

pub(super) async fn remove_services<H: Host>(ctx: &mut InstallContext<H>) -> Result<()> {
    let unit = service_unit_path(&ctx.layout);
    if let Some(name) = unit.file_name() {
        let disable = systemctl_user(["disable", "--now"]).arg(name.to_string_lossy());
        ctx.run_best_effort(&disable, QUICK_TIMEOUT).await;
    }
    remove_file(&unit)?;
    ctx.run_best_effort(&systemctl_user(["daemon-reload"]), QUICK_TIMEOUT)
        .await;
    Ok(())
}

pub(super) fn tuning_removed<H: Host>(ctx: &InstallContext<H>) -> bool {
    !pipewire_dropin_path(&ctx.layout).exists() && !wireplumber_dropin_path(&ctx.layout).exists()
}

pub(super) async fn remove_tuning<H: Host>(ctx: &mut InstallContext<H>) -> Result<()> {
    let pipewire = remove_file(&pipewire_dropin_path(&ctx.layout))?;
    let wireplumber = remove_file(&wireplumber_dropin_path(&ctx.layout))?;
    if pipewire || wireplumber {
        restart_audio_services(ctx).await;
    }
    Ok(())
}

pub(super) fn marker_removed<H: Host>(ctx: &InstallContext<H>) -> bool {
    !InstalledVersion::marker_path(&ctx.layout.prefix).exists()
}

pub(super) fn remove_marker<H: Host>(ctx: &mut InstallContext<H>) -> Result<()> {
    InstalledVersion::remove(&ctx.layout.prefix)
}

pub(super) fn driver_removed<H: Host>(ctx: &InstallContext<H>) -> bool {
    match locate_module_dirs(&ctx.layout) {
        Ok(dirs) => !dirs.unix_module().exists() && !dirs.pe_module().exists(),
        Err(_) => true,
    }
}

pub(super) async fn remove_driver<H: Host>(ctx: &mut InstallContext<H>) -> Result<()> {
    let dirs = locate_module_dirs(&ctx.layout)?;
    let spec = CommandSpec::new("rm")
        .arg("-f")
        .path_arg(&dirs.unix_module())
        .path_arg(&dirs.pe_module())
        .privileged();
    ctx.run_checked(&spec, QUICK_TIMEOUT).await?;
    Ok(())
}

pub(super) async fn remove_prefix<H: Host>(ctx: &mut InstallContext<H>) -> Result<()> {
    if let Some(ctl) = ctx.host.find_tool("yabridgectl") {
        let spec = CommandSpec::new(ctl.to_string_lossy())
            .arg("rm")
            .path_arg(&ctx.layout.vst3_dir());
        ctx.run_best_effort(&spec, QUICK_TIMEOUT).await;
    }

    // Nothing may keep files open while the tree goes away
    ctx.run_best_effort(&ctx.wine.wineserver_kill(), WINE_TIMEOUT)
        .await;

    info!("Removing Wine prefix {}", ctx.layout.prefix.display());
    tokio::fs::remove_dir_all(&ctx.layout.prefix).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;

    #[tokio::test]
    async fn removing_missing_files_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), ScriptedHost::new(dir.path(), &[]), &["--uninstall"]);
        remove_desktop_entry(&mut ctx).await.unwrap();
        remove_tuning(&mut ctx).await.unwrap();
        remove_marker(&mut ctx).unwrap();
        assert!(tuning_removed(&ctx));
        assert!(marker_removed(&ctx));
        assert!(driver_removed(&ctx));
    }

    #[tokio::test]
    async fn services_are_disabled_before_the_unit_goes() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), ScriptedHost::new(dir.path(), &[]), &["--uninstall"]);
        touch(&service_unit_path(&ctx.layout));

        remove_services(&mut ctx).await.unwrap();
        assert!(!service_unit_path(&ctx.layout).exists());
        let commands = ctx.host.commands.lock().unwrap();
        assert!(commands[0].matches(
            "systemctl",
            &["--user", "disable", "--now", "livewine-a2jmidid.service"]
        ));
        assert!(commands[1].matches("systemctl", &["--user", "daemon-reload"]));
    }

    #[tokio::test]
    async fn prefix_removal_stops_wine_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(
            dir.path(),
            ScriptedHost::new(dir.path(), &[]),
            &["--uninstall-full", "--yes"],
        );
        touch(&ctx.layout.prefix.join("drive_c/windows/system32/wineasio64.dll"));

        remove_prefix(&mut ctx).await.unwrap();
        assert!(!ctx.layout.prefix.exists());
        assert_eq!(ctx.host.ran("wineserver", &["-k"]), 1);
    }
}
