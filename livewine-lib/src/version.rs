//! Installed version marker
//!
//! The version is taken from the installer's file name
//! (`ableton_live_suite_12.1.5_64.zip` -> `12.1.5`) and written next to the
//! installation after a successful install. A later run with the same
//! installer compares the two and skips the install.

use crate::error::Result;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Marker file name inside the prefix
pub const MARKER_FILE: &str = ".livewine-version";

fn dotted_version() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+){1,3})").expect("valid regex"))
}

fn major_version() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)live[ _-]*(\d{1,2})(?:\D|$)").expect("valid regex"))
}

/// Version implied by an installer path or URL
pub fn version_from_source(source: &str) -> Option<String> {
    let name = source
        .split(['?', '#'])
        .next()
        .unwrap_or(source)
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(source);

    if let Some(caps) = dotted_version().captures(name) {
        return Some(caps[1].to_string());
    }
    major_version()
        .captures(name)
        .map(|caps| caps[1].to_string())
}

/// Version persisted alongside the installation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledVersion {
    pub version: String,

    /// Installer path or URL the version came from
    pub source: String,

    pub installed_at: DateTime<Utc>,
}

impl InstalledVersion {
    pub fn new(version: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            source: source.into(),
            installed_at: Utc::now(),
        }
    }

    pub fn marker_path(dir: &Path) -> PathBuf {
        dir.join(MARKER_FILE)
    }

    /// Read the marker, `None` if there is none or it is unreadable
    pub fn read(dir: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(Self::marker_path(dir)).ok()?;
        match serde_json::from_str(&content) {
            Ok(marker) => Some(marker),
            Err(e) => {
                tracing::warn!("Ignoring corrupt version marker: {}", e);
                None
            }
        }
    }

    pub fn write(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(Self::marker_path(dir), content)?;
        Ok(())
    }

    pub fn remove(dir: &Path) -> Result<()> {
        let path = Self::marker_path(dir);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn matches(&self, requested: &str) -> bool {
        self.version == requested
    }
}
