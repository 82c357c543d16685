//! Final check that every core component is where it should be

use super::{driver, installed_app, InstallContext};
use crate::error::{InstallerError, Result};
use crate::host::Host;
use tracing::info;

/// Names of the missing core components
pub(super) fn missing_components<H: Host>(ctx: &InstallContext<H>) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if !ctx.wine_available() {
        missing.push("wine");
    }
    if !ctx.layout.prefix_registry().exists() {
        missing.push("wine prefix");
    }
    if !driver::module_installed(ctx) {
        missing.push("WineASIO driver");
    }
    if installed_app(ctx).is_err() {
        missing.push("Ableton Live");
    }
    missing
}

pub(super) fn run<H: Host>(ctx: &InstallContext<H>) -> Result<()> {
    let missing = missing_components(ctx);
    if !missing.is_empty() {
        return Err(InstallerError::NotFound(missing.join(", ")));
    }
    info!("All core components are in place");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;

    #[test]
    fn names_every_missing_component() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), ScriptedHost::new(dir.path(), &[]), &[]);
        match run(&ctx).unwrap_err() {
            InstallerError::NotFound(what) => {
                assert_eq!(what, "wine, wine prefix, WineASIO driver, Ableton Live")
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn passes_on_a_complete_install() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), ScriptedHost::new(dir.path(), &["wine"]), &[]);
        let wine = &ctx.layout.wine_roots[0];
        touch(&wine.join("lib/wine/x86_64-unix/wineasio64.dll.so"));
        touch(&wine.join("lib/wine/x86_64-windows/wineasio64.dll"));
        touch(&ctx.layout.prefix_registry());
        touch(
            &ctx.layout
                .drive_c()
                .join("ProgramData/Ableton/Live 12 Suite/Program/Ableton Live 12 Suite.exe"),
        );
        run(&ctx).unwrap();
    }
}
