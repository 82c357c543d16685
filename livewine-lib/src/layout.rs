//! Filesystem locations used by the installer

use crate::config::{Channel, InstallConfig};
use crate::error::{InstallerError, Result};
use std::path::{Path, PathBuf};

/// Every directory the steps read or write.
///
/// Resolved once from the user's XDG directories; tests build one rooted in
/// a temporary directory with [`Layout::rooted`].
#[derive(Debug, Clone)]
pub struct Layout {
    /// Wine prefix the application lives in
    pub prefix: PathBuf,

    /// Downloads, build trees and staging directories
    pub cache_dir: PathBuf,

    /// Per-run log files
    pub log_dir: PathBuf,

    /// Desktop menu entries (`~/.local/share/applications`)
    pub applications_dir: PathBuf,

    /// systemd user units (`~/.config/systemd/user`)
    pub systemd_user_dir: PathBuf,

    /// PipeWire drop-ins (`~/.config/pipewire/pipewire.conf.d`)
    pub pipewire_conf_dir: PathBuf,

    /// WirePlumber drop-ins (`~/.config/wireplumber/wireplumber.conf.d`)
    pub wireplumber_conf_dir: PathBuf,

    /// Extracted yabridge release (`~/.local/share/yabridge`)
    pub yabridge_dir: PathBuf,

    /// Wine installation roots in order of preference
    pub wine_roots: Vec<PathBuf>,
}

impl Layout {
    /// Resolve the layout for the current user
    pub fn resolve(config: &InstallConfig) -> Result<Self> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| InstallerError::Config("Could not determine cache directory".into()))?
            .join("livewine");

        let data_dir = dirs::data_dir()
            .ok_or_else(|| InstallerError::Config("Could not determine data directory".into()))?;

        let config_dir = dirs::config_dir()
            .ok_or_else(|| InstallerError::Config("Could not determine config directory".into()))?;

        let log_dir = dirs::state_dir()
            .unwrap_or_else(|| data_dir.clone())
            .join("livewine")
            .join("logs");

        let opt = |name: &str| PathBuf::from("/opt").join(name);
        let wine_roots = match config.channel {
            Channel::Staging => vec![
                opt("wine-staging"),
                opt("wine-stable"),
                PathBuf::from("/usr"),
            ],
            Channel::Stable => vec![opt("wine-stable"), opt("wine-staging"), PathBuf::from("/usr")],
        };

        Ok(Self {
            prefix: config.prefix.clone(),
            cache_dir,
            log_dir,
            applications_dir: data_dir.join("applications"),
            systemd_user_dir: config_dir.join("systemd").join("user"),
            pipewire_conf_dir: config_dir.join("pipewire").join("pipewire.conf.d"),
            wireplumber_conf_dir: config_dir.join("wireplumber").join("wireplumber.conf.d"),
            yabridge_dir: data_dir.join("yabridge"),
            wine_roots,
        })
    }

    /// Layout with every location under `root`
    pub fn rooted(root: &Path) -> Self {
        let config_dir = root.join("config");
        let data_dir = root.join("data");
        Self {
            prefix: root.join("prefix"),
            cache_dir: root.join("cache"),
            log_dir: root.join("logs"),
            applications_dir: data_dir.join("applications"),
            systemd_user_dir: config_dir.join("systemd").join("user"),
            pipewire_conf_dir: config_dir.join("pipewire").join("pipewire.conf.d"),
            wireplumber_conf_dir: config_dir.join("wireplumber").join("wireplumber.conf.d"),
            yabridge_dir: data_dir.join("yabridge"),
            wine_roots: vec![root.join("wine")],
        }
    }

    /// Directory holding the installer's build trees
    pub fn build_dir(&self) -> PathBuf {
        self.cache_dir.join("build")
    }

    /// Directory installer archives are unpacked into
    pub fn staging_dir(&self) -> PathBuf {
        self.cache_dir.join("staging")
    }

    /// `drive_c` inside the prefix
    pub fn drive_c(&self) -> PathBuf {
        self.prefix.join("drive_c")
    }

    /// 64-bit system directory inside the prefix
    pub fn system32(&self) -> PathBuf {
        self.drive_c().join("windows").join("system32")
    }

    /// VST3 directory yabridge is pointed at
    pub fn vst3_dir(&self) -> PathBuf {
        self.drive_c()
            .join("Program Files")
            .join("Common Files")
            .join("VST3")
    }

    /// Marker file proving `wineboot` initialised the prefix
    pub fn prefix_registry(&self) -> PathBuf {
        self.prefix.join("system.reg")
    }
}
