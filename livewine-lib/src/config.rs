//! Configuration resolution for livewine
//!
//! Merges built-in defaults, an optional settings file, `LIVEWINE_*`
//! environment variables and command line flags into one [`InstallConfig`].
//! Later layers win: flag > environment > settings file > default.

use crate::error::{InstallerError, Result};
use clap::error::ErrorKind;
use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Prefix of the environment variables read during resolution
pub const ENV_PREFIX: &str = "LIVEWINE";

/// Sample rates accepted by `--sample-rate`
pub const SAMPLE_RATES: [u32; 5] = [44100, 48000, 88200, 96000, 192000];

pub const DEFAULT_SAMPLE_RATE: u32 = 48000;
pub const DEFAULT_BUFFER_SIZE: u32 = 256;
pub const DEFAULT_INSTALLER_TIMEOUT_SECS: u64 = 1800;

const TROUBLESHOOTING: &str = r#"ENVIRONMENT:
    LIVEWINE_INSTALLER, LIVEWINE_CHANNEL, LIVEWINE_SAMPLE_RATE,
    LIVEWINE_BUFFER_SIZE, LIVEWINE_AUDIO_INTERFACE, LIVEWINE_PREFIX,
    LIVEWINE_MINIMAL, LIVEWINE_NO_TIMEOUT, LIVEWINE_FORCE_REINSTALL,
    LIVEWINE_FORCE_REBUILD, LIVEWINE_ASSUME_YES, LIVEWINE_VERBOSE, ...
    Flags override environment variables, which override the settings file
    ($XDG_CONFIG_HOME/livewine/config.toml).

EXAMPLES:
    livewine --installer ~/Downloads/ableton_live_suite_12.1.5_64.zip
    livewine --installer https://example.com/live.zip --channel staging
    livewine --minimal --installer ./Setup.exe
    livewine --force-reinstall --installer ./ableton_live_suite_12.1.5_64.zip
    livewine --uninstall-full --yes

TROUBLESHOOTING:
    No sound in Live: select "ASIO" as driver type and "WineASIO" as device
    in Preferences > Audio. If WineASIO is missing, run
        WINEPREFIX=<prefix> wine regsvr32 wineasio64.dll
    Crackles: raise --buffer-size or pass --tweak-audio-server.
    The installer window hangs: rerun with --no-timeout and finish it by hand."#;

/// Wine release channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Stable,
    Staging,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Stable => "stable",
            Channel::Staging => "staging",
        }
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stable" => Ok(Channel::Stable),
            "staging" => Ok(Channel::Staging),
            _ => Err(format!("Unknown channel: {} (use stable or staging)", s)),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What this invocation does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Install,
    /// Remove desktop integration, services and tuning, keep the prefix
    Uninstall,
    /// Also remove the driver and the whole prefix
    UninstallFull,
}

/// Optional feature toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    pub plugin_bridge: bool,
    pub midi_bridge: bool,
    pub background_services: bool,
    pub audio_tuning: bool,
    pub patchbay: bool,
    pub desktop_entry: bool,
}

impl Features {
    /// All optional features off
    pub fn none() -> Self {
        Self {
            plugin_bridge: false,
            midi_bridge: false,
            background_services: false,
            audio_tuning: false,
            patchbay: false,
            desktop_entry: false,
        }
    }
}

/// Resolved installer configuration. Never mutated after [`resolve`].
#[derive(Debug, Clone)]
pub struct InstallConfig {
    pub mode: RunMode,

    /// Installer path or URL
    pub installer: Option<String>,

    /// Expected SHA-256 of a downloaded installer
    pub installer_sha256: Option<String>,

    pub channel: Channel,
    pub sample_rate: u32,
    pub buffer_size: u32,
    pub audio_interface: Option<String>,

    /// Wine prefix the application is installed into
    pub prefix: PathBuf,

    pub features: Features,
    pub minimal: bool,
    pub force_reinstall: bool,
    pub force_rebuild: bool,

    /// Install Wine from the WineHQ repository instead of the distribution
    pub alternate_source: bool,

    /// Never time out while waiting on the GUI installer or external tools
    pub no_timeout: bool,

    pub installer_timeout: Duration,

    /// Skip the confirmation before destructive removal
    pub assume_yes: bool,

    pub verbose: bool,
}

/// Outcome of argument resolution
#[derive(Debug, Clone)]
pub enum Invocation {
    /// `--help` or `--version` was requested; holds the rendered text
    Help(String),
    Run(InstallConfig),
}

#[derive(Parser, Debug)]
#[command(name = "livewine")]
#[command(version)]
#[command(about = "Install Ableton Live on Linux with Wine and WineASIO")]
#[command(after_help = TROUBLESHOOTING)]
struct Args {
    /// Installer archive, executable or URL
    #[arg(long, value_name = "PATH|URL")]
    installer: Option<String>,

    /// Expected SHA-256 checksum of a downloaded installer
    #[arg(long, value_name = "HEX")]
    installer_sha256: Option<String>,

    /// Wine channel to install (stable or staging)
    #[arg(long, value_name = "CHANNEL")]
    channel: Option<String>,

    /// Audio sample rate in Hz
    #[arg(long, value_name = "HZ")]
    sample_rate: Option<u32>,

    /// Audio buffer size in frames (power of two)
    #[arg(long, value_name = "FRAMES")]
    buffer_size: Option<u32>,

    /// Preferred ALSA card name for the audio server rules
    #[arg(long, value_name = "NAME")]
    audio_interface: Option<String>,

    /// Wine prefix to install into
    #[arg(long, value_name = "DIR")]
    prefix: Option<PathBuf>,

    /// Settings file (TOML)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Don't install the yabridge plugin bridge
    #[arg(long)]
    no_plugin_bridge: bool,

    /// Don't install the a2jmidid MIDI bridge
    #[arg(long)]
    no_midi_bridge: bool,

    /// Don't create a desktop menu entry
    #[arg(long)]
    no_desktop_entry: bool,

    /// Only install dependencies, the driver and the application
    #[arg(long)]
    minimal: bool,

    /// Install a systemd user service for the MIDI bridge
    #[arg(long)]
    enable_services: bool,

    /// Write PipeWire clock settings matching the sample rate and buffer size
    #[arg(long)]
    tweak_audio_server: bool,

    /// Install the qpwgraph patchbay
    #[arg(long)]
    patchbay: bool,

    /// Remove desktop integration, services and audio tuning
    #[arg(long, conflicts_with = "uninstall_full")]
    uninstall: bool,

    /// Remove everything including the Wine prefix
    #[arg(long)]
    uninstall_full: bool,

    /// Don't ask for confirmation
    #[arg(short = 'y', long)]
    yes: bool,

    /// Reinstall the application even if the same version is present
    #[arg(long)]
    force_reinstall: bool,

    /// Rebuild WineASIO even if it is already installed
    #[arg(long)]
    force_rebuild: bool,

    /// Install Wine from the WineHQ repository
    #[arg(long)]
    use_alternate_source: bool,

    /// Wait forever for the GUI installer
    #[arg(long)]
    no_timeout: bool,

    /// Seconds to wait for the GUI installer before giving up
    #[arg(long, value_name = "SECS")]
    installer_timeout: Option<u64>,

    /// Verbose console output
    #[arg(short, long)]
    verbose: bool,
}

/// Values from defaults, the settings file and the environment
#[derive(Debug, Deserialize)]
struct Settings {
    #[serde(default)]
    installer: Option<String>,
    #[serde(default)]
    installer_sha256: Option<String>,
    channel: String,
    sample_rate: u32,
    buffer_size: u32,
    #[serde(default)]
    audio_interface: Option<String>,
    #[serde(default)]
    prefix: Option<PathBuf>,
    plugin_bridge: bool,
    midi_bridge: bool,
    desktop_entry: bool,
    services: bool,
    tweak_audio_server: bool,
    patchbay: bool,
    minimal: bool,
    alternate_source: bool,
    no_timeout: bool,
    installer_timeout: u64,
    force_reinstall: bool,
    force_rebuild: bool,
    assume_yes: bool,
    verbose: bool,
}

/// Resolve argument tokens (including the program name) and an environment
/// snapshot into an [`Invocation`].
pub fn resolve<I, T>(tokens: I, env: &HashMap<String, String>) -> Result<Invocation>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args = match Args::try_parse_from(tokens) {
        Ok(args) => args,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                return Ok(Invocation::Help(e.to_string()));
            }
            _ => return Err(InstallerError::InvalidArgument(e.to_string())),
        },
    };

    let settings_file = settings_path(&args, env);
    let settings = load_settings(settings_file.as_deref(), env).map_err(|e| match e {
        InstallerError::Settings(e) => InstallerError::InvalidArgument(e.to_string()),
        other => other,
    })?;

    let channel = match args.channel.as_deref() {
        Some(c) => c,
        None => settings.channel.as_str(),
    }
    .parse::<Channel>()
    .map_err(InstallerError::InvalidArgument)?;

    let sample_rate = validate_sample_rate(args.sample_rate.unwrap_or(settings.sample_rate))?;
    let buffer_size = validate_buffer_size(args.buffer_size.unwrap_or(settings.buffer_size))?;

    let prefix = match args.prefix.or(settings.prefix) {
        Some(p) => p,
        None => default_prefix(env)?,
    };

    let minimal = args.minimal || settings.minimal;
    let features = if minimal {
        Features::none()
    } else {
        Features {
            plugin_bridge: !args.no_plugin_bridge && settings.plugin_bridge,
            midi_bridge: !args.no_midi_bridge && settings.midi_bridge,
            background_services: args.enable_services || settings.services,
            audio_tuning: args.tweak_audio_server || settings.tweak_audio_server,
            patchbay: args.patchbay || settings.patchbay,
            desktop_entry: !args.no_desktop_entry && settings.desktop_entry,
        }
    };

    let mode = if args.uninstall_full {
        RunMode::UninstallFull
    } else if args.uninstall {
        RunMode::Uninstall
    } else {
        RunMode::Install
    };

    // Staging builds only ship from the WineHQ repository
    let alternate_source =
        args.use_alternate_source || settings.alternate_source || channel == Channel::Staging;

    let installer_timeout =
        Duration::from_secs(args.installer_timeout.unwrap_or(settings.installer_timeout));
    if installer_timeout.is_zero() {
        return Err(InstallerError::InvalidArgument(
            "installer timeout must be greater than zero (use --no-timeout to disable it)".into(),
        ));
    }

    Ok(Invocation::Run(InstallConfig {
        mode,
        installer: args.installer.or(settings.installer),
        installer_sha256: args.installer_sha256.or(settings.installer_sha256),
        channel,
        sample_rate,
        buffer_size,
        audio_interface: args.audio_interface.or(settings.audio_interface),
        prefix,
        features,
        minimal,
        force_reinstall: args.force_reinstall || settings.force_reinstall,
        force_rebuild: args.force_rebuild || settings.force_rebuild,
        alternate_source,
        no_timeout: args.no_timeout || settings.no_timeout,
        installer_timeout,
        assume_yes: args.yes || settings.assume_yes,
        verbose: args.verbose || settings.verbose,
    }))
}

fn settings_path(args: &Args, env: &HashMap<String, String>) -> Option<PathBuf> {
    if let Some(ref path) = args.config {
        return Some(path.clone());
    }
    if let Some(path) = env.get("LIVEWINE_CONFIG") {
        return Some(PathBuf::from(path));
    }
    env.get("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(dirs::config_dir)
        .map(|dir| dir.join("livewine").join("config.toml"))
}

fn load_settings(file: Option<&Path>, env: &HashMap<String, String>) -> Result<Settings> {
    let mut builder = config::Config::builder()
        .set_default("channel", Channel::Stable.as_str())?
        .set_default("sample_rate", i64::from(DEFAULT_SAMPLE_RATE))?
        .set_default("buffer_size", i64::from(DEFAULT_BUFFER_SIZE))?
        .set_default("plugin_bridge", true)?
        .set_default("midi_bridge", true)?
        .set_default("desktop_entry", true)?
        .set_default("services", false)?
        .set_default("tweak_audio_server", false)?
        .set_default("patchbay", false)?
        .set_default("minimal", false)?
        .set_default("alternate_source", false)?
        .set_default("no_timeout", false)?
        .set_default("installer_timeout", DEFAULT_INSTALLER_TIMEOUT_SECS as i64)?
        .set_default("force_reinstall", false)?
        .set_default("force_rebuild", false)?
        .set_default("assume_yes", false)?
        .set_default("verbose", false)?;

    if let Some(file) = file {
        builder = builder.add_source(config::File::from(file).required(false));
    }

    let environment = config::Environment::with_prefix(ENV_PREFIX)
        .try_parsing(true)
        .source(Some(env.clone()));

    let settings = builder
        .add_source(environment)
        .build()?
        .try_deserialize::<Settings>()?;
    Ok(settings)
}

fn default_prefix(env: &HashMap<String, String>) -> Result<PathBuf> {
    if let Some(prefix) = env.get("WINEPREFIX").filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(prefix));
    }
    let data_dir = dirs::data_dir()
        .ok_or_else(|| InstallerError::Config("Could not determine data directory".into()))?;
    Ok(data_dir.join("wineprefixes").join("ableton-live"))
}

fn validate_sample_rate(rate: u32) -> Result<u32> {
    if SAMPLE_RATES.contains(&rate) {
        Ok(rate)
    } else {
        Err(InstallerError::InvalidArgument(format!(
            "unsupported sample rate {} (use one of {:?})",
            rate, SAMPLE_RATES
        )))
    }
}

fn validate_buffer_size(size: u32) -> Result<u32> {
    if size.is_power_of_two() && (16..=8192).contains(&size) {
        Ok(size)
    } else {
        Err(InstallerError::InvalidArgument(format!(
            "buffer size {} must be a power of two between 16 and 8192",
            size
        )))
    }
}
