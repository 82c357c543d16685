//! WineASIO: build, install, register, configure

use super::{InstallContext, BUILD_TIMEOUT, PACKAGE_TIMEOUT, WINE_TIMEOUT};
use crate::error::{InstallerError, Result};
use crate::host::Host;
use crate::layout::Layout;
use crate::probe::Locator;
use crate::render::{self, RegFile};
use crate::runner::CommandSpec;
use crate::wine::{ASIO_REGISTRY_KEY, WINEASIO_SETTINGS_KEY};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const WINEASIO_REPO: &str = "https://github.com/wineasio/wineasio.git";
pub const WINEASIO_TAG: &str = "v1.2.0";

/// Unix side of the driver, loaded by Wine
const UNIX_MODULE: &str = "wineasio64.dll.so";
/// PE side of the driver, copied into the prefix
const PE_MODULE: &str = "wineasio64.dll";

const REGISTER_HELPER: &str = "wineasio-register";

const REGISTRATION_HELP: &str = "WineASIO is installed but not registered. Register it by hand with\n    \
     WINEPREFIX=<prefix> wine regsvr32 wineasio64.dll\n\
     and check that `wine reg query HKLM\\Software\\ASIO` lists WineASIO.";

/// Where Wine looks for 64-bit modules of each kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDirs {
    /// `.../wine/x86_64-unix`
    pub unix: PathBuf,
    /// `.../wine/x86_64-windows`
    pub windows: PathBuf,
}

impl ModuleDirs {
    pub fn unix_module(&self) -> PathBuf {
        self.unix.join(UNIX_MODULE)
    }

    pub fn pe_module(&self) -> PathBuf {
        self.windows.join(PE_MODULE)
    }
}

/// Module directories of the first Wine root that has them
pub fn locate_module_dirs(layout: &Layout) -> Result<ModuleDirs> {
    let mut locator = Locator::new("Wine module directory (x86_64-unix)");
    for root in &layout.wine_roots {
        locator = locator
            .candidate_in(root, "lib/wine/x86_64-unix")
            .candidate_in(root, "lib64/wine/x86_64-unix")
            .candidate_in(root, "lib/x86_64-linux-gnu/wine/x86_64-unix");
    }
    let unix = locator.locate()?;
    let windows = unix.with_file_name("x86_64-windows");
    Ok(ModuleDirs { unix, windows })
}

/// Directory holding `windef.h`
fn locate_headers(layout: &Layout) -> Result<PathBuf> {
    let mut locator = Locator::new("Wine development headers (windef.h)");
    for root in &layout.wine_roots {
        locator = locator
            .candidate_in(root, "include/wine/windows/windef.h")
            .candidate_in(root, "include/wine/wine/windows/windef.h")
            .candidate_in(root, "include/wine-development/wine/windows/windef.h");
    }
    if let Some(root) = layout.wine_roots.first() {
        locator = locator.fallback(&root.join("include"), "windef.h", 5);
    }
    let header = locator.locate()?;
    header
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| InstallerError::NotFound("Wine header directory".into()))
}

pub fn module_installed<H: Host>(ctx: &InstallContext<H>) -> bool {
    match locate_module_dirs(&ctx.layout) {
        Ok(dirs) => dirs.unix_module().exists() && dirs.pe_module().exists(),
        Err(_) => false,
    }
}

pub(super) async fn build_and_install<H: Host>(ctx: &mut InstallContext<H>) -> Result<()> {
    let dirs = locate_module_dirs(&ctx.layout)?;
    let headers = locate_headers(&ctx.layout)?;
    let source = ctx.layout.build_dir().join("wineasio");

    // Always build from a fresh checkout of the pinned tag
    if source.exists() {
        std::fs::remove_dir_all(&source)?;
    }
    std::fs::create_dir_all(ctx.layout.build_dir())?;

    info!("Cloning WineASIO {}", WINEASIO_TAG);
    ctx.run_checked(
        &CommandSpec::new("git")
            .args(["clone", "--depth", "1", "--recurse-submodules", "--branch"])
            .arg(WINEASIO_TAG)
            .arg(WINEASIO_REPO)
            .path_arg(&source),
        PACKAGE_TIMEOUT,
    )
    .await?;

    info!("Building WineASIO against {}", headers.display());
    let include_path = match headers.parent() {
        Some(parent) => format!(
            "-I. -Irtaudio/include -I{} -I{}",
            headers.display(),
            parent.display()
        ),
        None => format!("-I. -Irtaudio/include -I{}", headers.display()),
    };
    ctx.run_checked(
        &CommandSpec::new("make")
            .arg("64")
            .arg(format!("INCLUDE_PATH={}", include_path))
            .current_dir(&source),
        BUILD_TIMEOUT,
    )
    .await?;

    let built_unix = source.join("build64").join(UNIX_MODULE);
    let built_pe = source.join("build64").join(PE_MODULE);
    for built in [&built_unix, &built_pe] {
        if !built.exists() {
            return Err(InstallerError::NotFound(format!(
                "build output {}",
                built.display()
            )));
        }
    }

    info!("Installing WineASIO into {}", dirs.unix.display());
    install_file(ctx, &built_unix, &dirs.unix_module()).await?;
    install_file(ctx, &built_pe, &dirs.pe_module()).await?;

    // The prefix needs its own copy of the PE module for regsvr32
    let system32 = ctx.layout.system32();
    std::fs::create_dir_all(&system32)?;
    std::fs::copy(&built_pe, system32.join(PE_MODULE))?;
    Ok(())
}

async fn install_file<H: Host>(ctx: &InstallContext<H>, from: &Path, to: &Path) -> Result<()> {
    ctx.run_checked(
        &CommandSpec::new("install")
            .args(["-D", "-m", "644"])
            .path_arg(from)
            .path_arg(to)
            .privileged(),
        WINE_TIMEOUT,
    )
    .await?;
    Ok(())
}

/// Does the prefix registry list WineASIO as an ASIO driver?
pub async fn asio_registered<H: Host>(ctx: &InstallContext<H>) -> bool {
    match ctx.host.run(&ctx.wine.reg_query(ASIO_REGISTRY_KEY), ctx.timeout(WINE_TIMEOUT)).await {
        Ok(outcome) => outcome.success() && outcome.stdout.to_lowercase().contains("wineasio"),
        Err(e) => {
            warn!("Could not query the registry: {}", e);
            false
        }
    }
}

/// Try regsvr32 first, then the packaged registration helper
pub(super) async fn register<H: Host>(ctx: &mut InstallContext<H>) -> Result<()> {
    info!("Registering WineASIO with regsvr32");
    ctx.run_best_effort(&ctx.wine.regsvr32(PE_MODULE), WINE_TIMEOUT).await;
    ctx.run_best_effort(&ctx.wine.wineserver_wait(), WINE_TIMEOUT).await;
    if asio_registered(ctx).await {
        return Ok(());
    }

    if ctx.host.has_tool(REGISTER_HELPER) {
        info!("regsvr32 did not register WineASIO, trying {}", REGISTER_HELPER);
        let helper = CommandSpec::new(REGISTER_HELPER)
            .env("WINEPREFIX", ctx.layout.prefix.to_string_lossy());
        ctx.run_best_effort(&helper, WINE_TIMEOUT).await;
        ctx.run_best_effort(&ctx.wine.wineserver_wait(), WINE_TIMEOUT).await;
        if asio_registered(ctx).await {
            return Ok(());
        }
    }

    Err(InstallerError::StepFailed {
        step: "driver-registration".into(),
        critical: false,
        message: REGISTRATION_HELP.into(),
    })
}

fn settings_file<H: Host>(ctx: &InstallContext<H>) -> RegFile {
    RegFile::new()
        .key(WINEASIO_SETTINGS_KEY)
        .dword("Number of inputs", 16)
        .dword("Number of outputs", 16)
        .dword("Preferred buffersize", ctx.config.buffer_size)
        .dword("Fixed buffersize", 1)
        .dword("Connect to hardware", 1)
        .dword("Autostart server", 0)
}

/// Does the prefix already use the configured buffer size?
pub(super) async fn settings_applied<H: Host>(ctx: &InstallContext<H>) -> bool {
    let query = ctx.wine.reg_query_value(WINEASIO_SETTINGS_KEY, "Preferred buffersize");
    match ctx.host.run(&query, ctx.timeout(WINE_TIMEOUT)).await {
        Ok(outcome) => {
            let expected = format!("0x{:x}", ctx.config.buffer_size);
            outcome.success()
                && outcome
                    .stdout
                    .split_whitespace()
                    .any(|word| word.eq_ignore_ascii_case(&expected))
        }
        Err(_) => false,
    }
}

pub(super) async fn apply_settings<H: Host>(ctx: &mut InstallContext<H>) -> Result<()> {
    let reg_path = ctx.layout.cache_dir.join("wineasio-settings.reg");
    render::write_if_changed(&reg_path, &settings_file(ctx).to_string())?;
    info!(
        "Setting WineASIO buffer size to {} frames",
        ctx.config.buffer_size
    );
    ctx.run_checked(&ctx.wine.regedit_import(&reg_path), WINE_TIMEOUT)
        .await?;
    ctx.run_best_effort(&ctx.wine.wineserver_wait(), WINE_TIMEOUT).await;
    Ok(())
}
