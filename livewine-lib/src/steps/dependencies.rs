//! System packages, the Wine package source and the prefix itself

use super::{apt_get, InstallContext, PACKAGE_TIMEOUT, QUICK_TIMEOUT, WINE_TIMEOUT};
use crate::config::InstallConfig;
use crate::error::{InstallerError, Result};
use crate::host::Host;
use crate::runner::CommandSpec;
use std::path::Path;
use tracing::{info, warn};

/// Tools every install needs besides Wine itself
const BUILD_TOOLS: &[&str] = &["git", "make", "gcc", "unzip", "curl", "winetricks"];

/// winetricks verbs the application needs in the prefix
pub const RUNTIME_VERBS: &[&str] = &["corefonts", "vcrun2022"];

const WINEHQ_KEY_URL: &str = "https://dl.winehq.org/wine-builds/winehq.key";
const WINEHQ_KEYRING: &str = "/etc/apt/keyrings/winehq-archive.key";
const SOURCES_DIR: &str = "/etc/apt/sources.list.d";

/// Packages for a configuration, Wine build included
fn packages(config: &InstallConfig) -> Vec<String> {
    let mut packages: Vec<String> = [
        "git",
        "make",
        "gcc",
        "gcc-multilib",
        "libasound2-dev",
        "libjack-jackd2-dev",
        "unzip",
        "curl",
        "winetricks",
        "cabextract",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect();

    if config.alternate_source {
        packages.push(format!("winehq-{}", config.channel));
        packages.push(format!("wine-{}-dev", config.channel));
    } else {
        packages.extend(["wine", "wine64", "libwine-dev"].map(String::from));
    }
    packages
}

/// `apt-get install -y <packages>`
pub async fn install_packages<H: Host>(ctx: &InstallContext<H>, packages: &[&str]) -> Result<()> {
    info!("Installing packages: {}", packages.join(" "));
    ctx.run_checked(&apt_get(["install", "-y"]).args(packages.iter().copied()), PACKAGE_TIMEOUT)
        .await?;
    Ok(())
}

/// Is `verb` recorded in the prefix's winetricks.log?
fn runtime_installed(prefix: &Path, verb: &str) -> bool {
    let Ok(content) = std::fs::read_to_string(prefix.join("winetricks.log")) else {
        return false;
    };
    content.lines().any(|line| {
        let trimmed = line.trim();
        // Skip comments and option lines
        if trimmed.starts_with('#') || trimmed.starts_with('-') {
            return false;
        }
        trimmed.split_whitespace().any(|word| word == verb)
    })
}

fn tools_present<H: Host>(ctx: &InstallContext<H>) -> bool {
    let missing: Vec<&str> = BUILD_TOOLS
        .iter()
        .copied()
        .filter(|tool| !ctx.host.has_tool(tool))
        .collect();
    if !missing.is_empty() {
        info!("Missing tools: {}", missing.join(", "));
    }
    missing.is_empty() && ctx.wine_available()
}

pub(super) fn is_satisfied<H: Host>(ctx: &InstallContext<H>) -> bool {
    tools_present(ctx)
        && ctx.layout.prefix_registry().exists()
        && RUNTIME_VERBS
            .iter()
            .all(|verb| runtime_installed(&ctx.layout.prefix, verb))
}

pub(super) fn verify<H: Host>(ctx: &InstallContext<H>) -> bool {
    tools_present(ctx) && ctx.layout.prefix_registry().exists()
}

pub(super) async fn run<H: Host>(ctx: &mut InstallContext<H>) -> Result<()> {
    if !ctx.host.has_tool("apt-get") {
        return Err(InstallerError::DependencyMissing(
            "apt-get (only Debian and Ubuntu based systems are supported)".into(),
        ));
    }

    if ctx.config.alternate_source {
        add_winehq_source(ctx).await?;
    }

    ctx.run_checked(&apt_get(["update"]), PACKAGE_TIMEOUT).await?;
    let packages = packages(&ctx.config);
    let packages: Vec<&str> = packages.iter().map(String::as_str).collect();
    install_packages(ctx, &packages).await?;

    // A WineHQ build lands under /opt
    ctx.refresh_wine();
    if !ctx.wine_available() {
        return Err(InstallerError::DependencyMissing(format!(
            "wine ({} was not found after installing packages)",
            ctx.wine.wine_bin.display()
        )));
    }

    init_prefix(ctx).await?;
    install_runtimes(ctx).await;
    Ok(())
}

/// Register the WineHQ apt repository for this distribution release
async fn add_winehq_source<H: Host>(ctx: &InstallContext<H>) -> Result<()> {
    let distro = lsb_release(ctx, "-is").await?.to_lowercase();
    let codename = lsb_release(ctx, "-cs").await?;
    let sources = Path::new(SOURCES_DIR).join(format!("winehq-{}.sources", codename));

    if sources.exists() && Path::new(WINEHQ_KEYRING).exists() {
        info!("WineHQ repository already configured");
        return Ok(());
    }

    info!("Adding the WineHQ repository for {} {}", distro, codename);
    ctx.run_checked(
        &CommandSpec::new("dpkg").args(["--add-architecture", "i386"]).privileged(),
        QUICK_TIMEOUT,
    )
    .await?;
    ctx.run_checked(
        &CommandSpec::new("mkdir").args(["-pm755", "/etc/apt/keyrings"]).privileged(),
        QUICK_TIMEOUT,
    )
    .await?;
    ctx.run_checked(
        &CommandSpec::new("curl")
            .args(["-fsSL", "-o", WINEHQ_KEYRING, WINEHQ_KEY_URL])
            .privileged(),
        PACKAGE_TIMEOUT,
    )
    .await?;

    let sources_url = format!(
        "https://dl.winehq.org/wine-builds/{}/dists/{}/winehq-{}.sources",
        distro, codename, codename
    );
    ctx.run_checked(
        &CommandSpec::new("curl")
            .args(["-fsSL", "-o"])
            .path_arg(&sources)
            .arg(sources_url)
            .privileged(),
        PACKAGE_TIMEOUT,
    )
    .await?;
    Ok(())
}

async fn lsb_release<H: Host>(ctx: &InstallContext<H>, flag: &str) -> Result<String> {
    let outcome = ctx
        .run_checked(&CommandSpec::new("lsb_release").arg(flag), QUICK_TIMEOUT)
        .await?;
    let value = outcome.stdout.trim().to_string();
    if value.is_empty() {
        return Err(InstallerError::Config(format!(
            "lsb_release {} returned nothing",
            flag
        )));
    }
    Ok(value)
}

/// Create the prefix unless wineboot already did
async fn init_prefix<H: Host>(ctx: &InstallContext<H>) -> Result<()> {
    if ctx.layout.prefix_registry().exists() {
        info!("Wine prefix {} already initialised", ctx.layout.prefix.display());
        return Ok(());
    }
    if let Some(parent) = ctx.layout.prefix.parent() {
        std::fs::create_dir_all(parent)?;
    }
    info!("Initialising Wine prefix {}", ctx.layout.prefix.display());
    ctx.run_checked(&ctx.wine.wineboot_init(), PACKAGE_TIMEOUT).await?;
    ctx.run_checked(&ctx.wine.wineserver_wait(), WINE_TIMEOUT).await?;
    Ok(())
}

/// Fonts and the VC++ runtime; the application starts without them, badly
async fn install_runtimes<H: Host>(ctx: &InstallContext<H>) {
    let missing: Vec<&str> = RUNTIME_VERBS
        .iter()
        .copied()
        .filter(|verb| !runtime_installed(&ctx.layout.prefix, verb))
        .collect();
    if missing.is_empty() {
        return;
    }

    info!("Installing runtimes with winetricks: {}", missing.join(" "));
    let spec = CommandSpec::new("winetricks")
        .arg("-q")
        .args(missing.iter().copied())
        .env("WINEPREFIX", ctx.layout.prefix.to_string_lossy())
        .env("WINE", ctx.wine.wine_bin.to_string_lossy());
    if !ctx.run_best_effort(&spec, PACKAGE_TIMEOUT).await {
        warn!("Runtime installation failed; fonts or plugins may misbehave");
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;

    #[test]
    fn distribution_and_winehq_package_sets() {
        let dir = tempfile::tempdir().unwrap();
        let host = || ScriptedHost::new(dir.path(), &[]);

        let ctx = context(dir.path(), host(), &[]);
        let distro = packages(&ctx.config);
        assert!(distro.contains(&"wine64".to_string()));
        assert!(distro.contains(&"libwine-dev".to_string()));
        assert!(!distro.iter().any(|p| p.starts_with("winehq")));

        let ctx = context(dir.path(), host(), &["--channel", "staging"]);
        let winehq = packages(&ctx.config);
        assert!(winehq.contains(&"winehq-staging".to_string()));
        assert!(winehq.contains(&"wine-staging-dev".to_string()));
        assert!(!winehq.contains(&"wine64".to_string()));
    }

    #[test]
    fn runtimes_are_read_from_winetricks_log() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("winetricks.log"),
            "# comment mentioning vcrun2022\n-q\ncorefonts\nvcrun2022x\n",
        )
        .unwrap();
        assert!(runtime_installed(dir.path(), "corefonts"));
        assert!(!runtime_installed(dir.path(), "vcrun2022"));
        assert!(!runtime_installed(&dir.path().join("missing"), "corefonts"));
    }

    #[tokio::test]
    async fn refuses_systems_without_apt() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), ScriptedHost::new(dir.path(), &["git"]), &[]);
        let err = run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, InstallerError::DependencyMissing(_)));
        assert_eq!(ctx.host.ran("apt-get", &[]), 0);
    }

    #[tokio::test]
    async fn installs_packages_then_initialises_the_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let host = ScriptedHost::new(dir.path(), &["apt-get", "wine", "winetricks"]);
        let mut ctx = context(dir.path(), host, &[]);
        run(&mut ctx).await.unwrap();

        assert_eq!(ctx.host.ran("apt-get", &["update"]), 1);
        assert_eq!(ctx.host.ran("apt-get", &["install", "-y", "git"]), 1);
        assert_eq!(ctx.host.ran("wine", &["wineboot", "--init"]), 1);
        assert_eq!(ctx.host.ran("winetricks", &["-q", "corefonts", "vcrun2022"]), 1);
        // The distribution build needs no extra repository
        assert_eq!(ctx.host.ran("lsb_release", &[]), 0);
    }
}
