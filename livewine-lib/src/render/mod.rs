//! Structured builders for the text files handed to outside tools
//!
//! Each builder renders the same literal text for the same input, so a step
//! can compare what is on disk with what it would write.

pub mod desktop;
pub mod pipewire;
pub mod registry;
pub mod unit;

pub use desktop::DesktopEntry;
pub use pipewire::{ClockSettings, InterfaceRule};
pub use registry::{RegFile, RegValue};
pub use unit::{RestartPolicy, ServiceUnit};

use crate::error::Result;
use std::path::Path;

/// Write `content` unless the file already holds exactly that.
/// Returns true when the file changed.
pub fn write_if_changed(path: &Path, content: &str) -> Result<bool> {
    if std::fs::read_to_string(path).map_or(false, |existing| existing == content) {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(true)
}

/// True if the file exists with exactly `content`
pub fn is_current(path: &Path, content: &str) -> bool {
    std::fs::read_to_string(path).map_or(false, |existing| existing == content)
}
