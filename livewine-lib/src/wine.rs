//! Wine command builders for one prefix

use crate::config::Channel;
use crate::layout::Layout;
use crate::probe::Locator;
use crate::runner::CommandSpec;
use std::path::{Path, PathBuf};

/// Windows registry key WineASIO registers itself under
pub const ASIO_REGISTRY_KEY: &str = r"HKEY_LOCAL_MACHINE\Software\ASIO";

/// Per-user WineASIO settings key
pub const WINEASIO_SETTINGS_KEY: &str = r"HKEY_CURRENT_USER\Software\Wine\WineASIO";

/// Wine installation bound to a prefix
#[derive(Debug, Clone)]
pub struct Wine {
    /// Path to wine binary, or the bare name when resolved through PATH
    pub wine_bin: PathBuf,

    /// Path to wineserver binary
    pub wineserver_bin: PathBuf,

    pub prefix: PathBuf,

    /// Architecture (always win64 for Live)
    pub arch: &'static str,
}

impl Wine {
    /// Pick the Wine build for `channel`: a WineHQ build under `/opt` when
    /// installed, otherwise whatever is on PATH.
    pub fn for_layout(layout: &Layout, channel: Channel) -> Self {
        let mut locator = Locator::new("wine");
        // Distribution builds under /usr are reached through PATH
        for root in layout.wine_roots.iter().filter(|r| r.as_path() != Path::new("/usr")) {
            locator = locator.candidate_in(root, "bin/wine");
        }
        let (wine_bin, wineserver_bin) = match locator.locate() {
            Ok(wine) => {
                let server = wine.with_file_name("wineserver");
                (wine, server)
            }
            Err(_) => (PathBuf::from("wine"), PathBuf::from("wineserver")),
        };

        tracing::debug!(
            "Using {} for channel {}",
            wine_bin.display(),
            channel
        );

        Self {
            wine_bin,
            wineserver_bin,
            prefix: layout.prefix.clone(),
            arch: "win64",
        }
    }

    fn with_prefix(&self, spec: CommandSpec) -> CommandSpec {
        spec.env("WINEPREFIX", self.prefix.to_string_lossy())
            .env("WINEARCH", self.arch)
            .env("WINEDEBUG", "-all")
    }

    /// `wine <args>` inside the prefix
    pub fn command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_prefix(CommandSpec::new(self.wine_bin.to_string_lossy()).args(args))
    }

    /// Create and initialise the prefix
    pub fn wineboot_init(&self) -> CommandSpec {
        self.command(["wineboot", "--init"])
    }

    /// Block until every process in the prefix has exited
    pub fn wineserver_wait(&self) -> CommandSpec {
        self.with_prefix(CommandSpec::new(self.wineserver_bin.to_string_lossy()).arg("-w"))
    }

    /// Kill every process in the prefix
    pub fn wineserver_kill(&self) -> CommandSpec {
        self.with_prefix(CommandSpec::new(self.wineserver_bin.to_string_lossy()).arg("-k"))
    }

    pub fn version(&self) -> CommandSpec {
        CommandSpec::new(self.wine_bin.to_string_lossy()).arg("--version")
    }

    /// Recursive registry query
    pub fn reg_query(&self, key: &str) -> CommandSpec {
        self.command(["reg", "query", key, "/s"])
    }

    pub fn reg_query_value(&self, key: &str, value: &str) -> CommandSpec {
        self.command(["reg", "query", key, "/v", value])
    }

    /// Silently import a `.reg` file
    pub fn regedit_import(&self, reg_file: &Path) -> CommandSpec {
        self.command(["regedit".to_string(), "/S".to_string(), unix_to_wine_path(reg_file)])
    }

    pub fn regsvr32(&self, dll: &str) -> CommandSpec {
        self.command(["regsvr32", dll])
    }

    /// Run a Windows installer: `.msi` through msiexec, anything else directly
    pub fn run_installer(&self, installer: &Path) -> CommandSpec {
        let is_msi = installer
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e.eq_ignore_ascii_case("msi"));
        let spec = if is_msi {
            self.command(["msiexec".to_string(), "/i".to_string(), unix_to_wine_path(installer)])
        } else {
            self.command([installer.to_string_lossy().to_string()])
        };
        match installer.parent() {
            Some(dir) => spec.current_dir(dir),
            None => spec,
        }
    }
}

/// Windows view of a Unix path through the default `Z:` drive mapping
pub fn unix_to_wine_path(unix_path: &Path) -> String {
    format!("Z:{}", unix_path.to_string_lossy().replace('/', "\\"))
}

/// Strip version string to just the number
/// e.g., "wine-9.0 (Staging)" -> "9.0"
pub fn strip_version(version: &str) -> String {
    version
        .trim()
        .trim_start_matches("wine-")
        .split_whitespace()
        .next()
        .unwrap_or(version)
        .split("-rc")
        .next()
        .unwrap_or(version)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_wine_versions() {
        assert_eq!(strip_version("wine-9.0"), "9.0");
        assert_eq!(strip_version("wine-9.21 (Staging)\n"), "9.21");
        assert_eq!(strip_version("wine-10.0-rc3"), "10.0");
    }

    #[test]
    fn unix_paths_map_to_drive_z() {
        assert_eq!(
            unix_to_wine_path(Path::new("/home/me/live.reg")),
            r"Z:\home\me\live.reg"
        );
    }

    #[test]
    fn commands_carry_the_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::rooted(dir.path());
        let wine = Wine::for_layout(&layout, Channel::Stable);
        let spec = wine.regsvr32("wineasio64.dll");
        assert!(spec
            .arguments()
            .ends_with(&["regsvr32".to_string(), "wineasio64.dll".to_string()]));
        assert!(spec
            .envs()
            .iter()
            .any(|(k, v)| k == "WINEPREFIX" && Path::new(v) == layout.prefix));
    }

    #[test]
    fn prefers_wine_under_a_known_root() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::rooted(dir.path());
        let bin = layout.wine_roots[0].join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("wine"), b"").unwrap();

        let wine = Wine::for_layout(&layout, Channel::Staging);
        assert_eq!(wine.wine_bin, bin.join("wine"));
        assert_eq!(wine.wineserver_bin, bin.join("wineserver"));
    }

    #[test]
    fn msi_installers_go_through_msiexec() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::rooted(dir.path());
        let wine = Wine::for_layout(&layout, Channel::Stable);
        let spec = wine.run_installer(Path::new("/tmp/stage/Live.msi"));
        assert_eq!(spec.arguments()[0], "msiexec");
        assert_eq!(spec.arguments()[2], r"Z:\tmp\stage\Live.msi");
    }
}
