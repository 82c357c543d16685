//! Ableton Live itself: acquire the installer, run it under the watchdog,
//! record what was installed

use super::{InstallContext, PACKAGE_TIMEOUT, WINE_TIMEOUT};
use crate::download::{filename_from_url, is_url, sha256_file};
use crate::error::{InstallerError, Result};
use crate::host::Host;
use crate::layout::Layout;
use crate::probe::Locator;
use crate::runner::CommandSpec;
use crate::version::{version_from_source, InstalledVersion};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Installer names tried inside an unpacked archive, best first
const INNER_INSTALLERS: &[&str] = &["*[Ii]nstaller*.exe", "[Ss]etup.exe", "*.msi", "*.exe"];

/// The installed `Ableton Live *.exe`.
///
/// With a `wanted` version only that major release counts. Otherwise, or
/// when several editions of the release are present, the newest release
/// wins.
pub fn locate_app(layout: &Layout, wanted: Option<&str>) -> Result<PathBuf> {
    let drive_c = layout.drive_c();
    let release = wanted.and_then(major_release);
    let name = release.map_or_else(|| "*".to_string(), |major| format!("{} *", major));

    Locator::new("Ableton Live executable")
        .candidate_in(
            &drive_c,
            &format!("ProgramData/Ableton/Live {0}/Program/Ableton Live {0}.exe", name),
        )
        .candidate_in(
            &drive_c,
            &format!("Program Files/Ableton/Live {0}/Program/Ableton Live {0}.exe", name),
        )
        .fallback(&drive_c, format!("Ableton Live {}.exe", name), 6)
        .locate_all()
        .into_iter()
        .max_by_key(|path| release_of(path))
        .ok_or_else(|| InstallerError::NotFound("Ableton Live executable".into()))
}

/// The executable for the configured installer's release
pub fn installed_app<H: Host>(ctx: &InstallContext<H>) -> Result<PathBuf> {
    let wanted = requested_version(ctx.config.installer.as_deref());
    locate_app(&ctx.layout, wanted.as_deref())
}

/// Version the configured installer would install
pub fn requested_version(source: Option<&str>) -> Option<String> {
    source.and_then(version_from_source)
}

fn major_release(version: &str) -> Option<u32> {
    version.split('.').next()?.parse().ok()
}

/// Release number in an `Ableton Live 12 Suite.exe` file name, 0 if absent
fn release_of(path: &Path) -> u32 {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix("Ableton Live "))
        .and_then(|rest| rest.split(|c: char| !c.is_ascii_digit()).next())
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(0)
}

pub(super) fn is_satisfied<H: Host>(ctx: &InstallContext<H>) -> bool {
    let app = match installed_app(ctx) {
        Ok(app) => app,
        Err(_) => return false,
    };

    let Some(source) = ctx.config.installer.as_deref() else {
        // Nothing to install, keep what is there
        info!("Found {} and no installer was given", app.display());
        return true;
    };

    let Some(requested) = requested_version(Some(source)) else {
        info!("Cannot tell the version of {}, reinstalling", source);
        return false;
    };

    match InstalledVersion::read(&ctx.layout.prefix) {
        Some(installed) if installed.matches(&requested) => {
            info!("Ableton Live {} is already installed", installed.version);
            true
        }
        Some(installed) => {
            info!(
                "Installed version {} differs from requested {}",
                installed.version, requested
            );
            false
        }
        None => false,
    }
}

pub(super) async fn run<H: Host>(ctx: &mut InstallContext<H>) -> Result<()> {
    let source = ctx.config.installer.clone().ok_or_else(|| {
        InstallerError::InvalidArgument(
            "Ableton Live is not installed; pass --installer <path or URL>".into(),
        )
    })?;

    let acquired = acquire(ctx, &source).await?;
    let installer = unpack(ctx, &acquired).await?;

    let spec = ctx.wine.run_installer(&installer);
    let layout = ctx.layout.clone();
    let wanted = requested_version(Some(&source));
    let artifact = move || locate_app(&layout, wanted.as_deref()).is_ok();
    let bound = ctx.timeout(ctx.config.installer_timeout);

    info!("Starting the installer; finish it in its window");
    let report = ctx.host.supervise(&spec, &artifact, bound).await?;

    if report.timed_out {
        if !report.artifact_detected {
            return Err(InstallerError::TimedOut {
                what: "Ableton Live installer".into(),
                secs: ctx.config.installer_timeout.as_secs(),
            });
        }
        warn!("Installer was stopped after the application appeared");
    } else if report.exit_code != Some(0) {
        warn!("Installer exited with {:?}", report.exit_code);
    }

    ctx.run_best_effort(&ctx.wine.wineserver_wait(), WINE_TIMEOUT).await;

    match installed_app(ctx) {
        Ok(app) => {
            let version = requested_version(Some(&source)).unwrap_or_else(|| "unknown".into());
            info!("Installed Ableton Live {} at {}", version, app.display());
            InstalledVersion::new(version, source).write(&ctx.layout.prefix)?;
        }
        Err(_) => warn!("The installer finished but Ableton Live was not found"),
    }
    Ok(())
}

/// Local path of the installer, downloading it first when given a URL
async fn acquire<H: Host>(ctx: &InstallContext<H>, source: &str) -> Result<PathBuf> {
    let expected = ctx.config.installer_sha256.as_deref();

    if is_url(source) {
        let filename =
            filename_from_url(source).unwrap_or_else(|| "ableton-live-installer.zip".into());
        return ctx.host.download(source, &filename, expected).await;
    }

    let path = PathBuf::from(source);
    if !path.is_file() {
        return Err(InstallerError::NotFound(format!("installer {}", source)));
    }
    if let Some(expected) = expected {
        let got = sha256_file(&path)?;
        if !got.eq_ignore_ascii_case(expected) {
            return Err(InstallerError::ChecksumMismatch {
                expected: expected.to_string(),
                got,
            });
        }
    }
    Ok(path)
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("zip"))
}

/// Extract a zip installer into the staging area and find the real
/// installer inside; anything else is used as is
async fn unpack<H: Host>(ctx: &InstallContext<H>, installer: &Path) -> Result<PathBuf> {
    if !is_zip(installer) {
        return Ok(installer.to_path_buf());
    }

    let stem = installer
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "installer".into());
    let dest = ctx.layout.staging_dir().join(stem);
    if dest.exists() {
        std::fs::remove_dir_all(&dest)?;
    }
    std::fs::create_dir_all(&dest)?;

    info!("Extracting {} to {}", installer.display(), dest.display());
    ctx.run_checked(
        &CommandSpec::new("unzip")
            .args(["-o", "-q"])
            .path_arg(installer)
            .arg("-d")
            .path_arg(&dest),
        PACKAGE_TIMEOUT,
    )
    .await?;

    find_inner_installer(&dest)
}

fn find_inner_installer(dir: &Path) -> Result<PathBuf> {
    for pattern in INNER_INSTALLERS {
        if let Ok(found) = Locator::new("installer").fallback(dir, *pattern, 4).locate() {
            return Ok(found);
        }
    }
    Err(InstallerError::NotFound(format!(
        "an installer inside {}",
        dir.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;

    fn app_path(layout: &Layout) -> PathBuf {
        layout
            .drive_c()
            .join("ProgramData/Ableton/Live 12 Suite/Program/Ableton Live 12 Suite.exe")
    }

    #[test]
    fn app_is_found_in_program_data() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::rooted(dir.path());
        assert!(locate_app(&layout, None).is_err());
        touch(&app_path(&layout));
        assert_eq!(locate_app(&layout, None).unwrap(), app_path(&layout));
    }

    #[test]
    fn app_in_an_unusual_place_is_found_by_search() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::rooted(dir.path());
        let odd = layout.drive_c().join("Live/Ableton Live 11 Lite.exe");
        touch(&odd);
        assert_eq!(locate_app(&layout, None).unwrap(), odd);
        assert_eq!(locate_app(&layout, Some("11.3.4")).unwrap(), odd);
        assert!(locate_app(&layout, Some("12.1")).is_err());
    }

    #[test]
    fn newest_release_wins_unless_one_is_wanted() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::rooted(dir.path());
        let old = layout
            .drive_c()
            .join("ProgramData/Ableton/Live 11 Suite/Program/Ableton Live 11 Suite.exe");
        touch(&old);
        touch(&app_path(&layout));

        assert_eq!(locate_app(&layout, None).unwrap(), app_path(&layout));
        assert_eq!(locate_app(&layout, Some("12.1.5")).unwrap(), app_path(&layout));
        assert_eq!(locate_app(&layout, Some("11.3.4")).unwrap(), old);
        assert!(locate_app(&layout, Some("13.0")).is_err());
    }

    #[test]
    fn an_older_release_does_not_satisfy_an_upgrade() {
        let dir = tempfile::tempdir().unwrap();
        let source = "/tmp/ableton_live_suite_12.1.5_64.exe";
        let ctx = context(dir.path(), ScriptedHost::new(dir.path(), &[]), &["--installer", source]);
        touch(
            &ctx.layout
                .drive_c()
                .join("ProgramData/Ableton/Live 11 Suite/Program/Ableton Live 11 Suite.exe"),
        );
        // A marker left by an install whose executable never appeared
        InstalledVersion::new("12.1.5", source)
            .write(&ctx.layout.prefix)
            .unwrap();

        assert!(!is_satisfied(&ctx));
        assert!(installed_app(&ctx).is_err());
        touch(&app_path(&ctx.layout));
        assert!(is_satisfied(&ctx));
    }

    #[test]
    fn inner_installer_prefers_the_named_installer() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("Ableton Live 12/helper.exe"));
        touch(&dir.path().join("Ableton Live 12/Ableton Live 12 Suite Installer.exe"));
        assert_eq!(
            find_inner_installer(dir.path()).unwrap(),
            dir.path().join("Ableton Live 12/Ableton Live 12 Suite Installer.exe")
        );

        let empty = tempfile::tempdir().unwrap();
        assert!(matches!(
            find_inner_installer(empty.path()),
            Err(InstallerError::NotFound(_))
        ));
    }

    #[test]
    fn unknown_installer_version_is_never_satisfied() {
        let dir = tempfile::tempdir().unwrap();
        let host = ScriptedHost::new(dir.path(), &[]);
        let ctx = context(dir.path(), host, &["--installer", "/tmp/Setup.exe"]);
        touch(&app_path(&ctx.layout));
        InstalledVersion::new("unknown", "/tmp/Setup.exe")
            .write(&ctx.layout.prefix)
            .unwrap();
        assert!(!is_satisfied(&ctx));
    }

    #[test]
    fn no_installer_keeps_an_existing_app() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), ScriptedHost::new(dir.path(), &[]), &[]);
        assert!(!is_satisfied(&ctx));
        touch(&app_path(&ctx.layout));
        assert!(is_satisfied(&ctx));
    }

    #[tokio::test]
    async fn local_installer_checksum_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let installer = dir.path().join("ableton_live_suite_12.1.5_64.exe");
        std::fs::write(&installer, b"abc").unwrap();
        let source = installer.to_string_lossy().to_string();

        let ctx = context(
            dir.path(),
            ScriptedHost::new(dir.path(), &[]),
            &["--installer", source.as_str(), "--installer-sha256", "00ff"],
        );
        assert!(matches!(
            acquire(&ctx, &source).await,
            Err(InstallerError::ChecksumMismatch { .. })
        ));

        let missing = dir.path().join("nope.exe").to_string_lossy().to_string();
        assert!(matches!(
            acquire(&ctx, &missing).await,
            Err(InstallerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn supervised_install_writes_the_marker() {
        let dir = tempfile::tempdir().unwrap();
        let installer = dir.path().join("ableton_live_suite_12.1.5_64.exe");
        std::fs::write(&installer, b"").unwrap();
        let source = installer.to_string_lossy().to_string();

        let host = ScriptedHost::new(dir.path(), &["wine"]);
        let mut ctx = context(dir.path(), host, &["--installer", source.as_str()]);
        // Pretend an earlier, interrupted install left the executable behind
        touch(&app_path(&ctx.layout));

        run(&mut ctx).await.unwrap();
        let marker = InstalledVersion::read(&ctx.layout.prefix).unwrap();
        assert_eq!(marker.version, "12.1.5");
        assert_eq!(marker.source, source);
        assert!(is_satisfied(&ctx));
    }
}
