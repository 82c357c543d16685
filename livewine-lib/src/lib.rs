//! Livewine Library
//!
//! Core library for installing Ableton Live under Wine.
//! Resolves configuration, runs external tools with timeouts, supervises the
//! GUI installer and sequences the install and uninstall steps.

pub mod config;
pub mod download;
pub mod error;
pub mod host;
pub mod layout;
pub mod probe;
pub mod render;
pub mod runner;
pub mod sequencer;
pub mod steps;
pub mod summary;
pub mod version;
pub mod watchdog;
pub mod wine;

pub use config::{resolve, Channel, InstallConfig, Invocation, RunMode};
pub use error::{InstallerError, Result};
pub use host::{Host, SystemHost};
pub use layout::Layout;
pub use runner::{CommandOutcome, CommandRunner, CommandSpec};
pub use sequencer::{Criticality, RunReport, Sequencer, Step, StepRecord, StepResult, StepStatus};
pub use steps::{authorize_plan, InstallContext, StepKind};
pub use watchdog::{WatchReport, WatchSettings, Watchdog};
