//! livewine - set up Ableton Live under Wine with low-latency audio

mod logging;

use anyhow::Result;
use livewine_lib::download::DEFAULT_REQUEST_TIMEOUT;
use livewine_lib::{
    authorize_plan, resolve, summary, InstallContext, InstallerError, Invocation, Layout, RunMode,
    Sequencer, StepKind, SystemHost, WatchSettings,
};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const EXIT_USAGE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    let env: HashMap<String, String> = std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect();

    let config = match resolve(std::env::args_os(), &env) {
        Ok(Invocation::Run(config)) => config,
        Ok(Invocation::Help(text)) => {
            print!("{}", text);
            return Ok(ExitCode::SUCCESS);
        }
        Err(InstallerError::InvalidArgument(message)) => {
            eprintln!("{}", message.trim_end());
            eprintln!("Try 'livewine --help' for more information.");
            return Ok(ExitCode::from(EXIT_USAGE));
        }
        Err(e) => return Err(e.into()),
    };

    let layout = Layout::resolve(&config)?;
    let log = logging::init(&layout.log_dir, config.verbose)?;
    info!("livewine {} ({:?})", env!("CARGO_PKG_VERSION"), config.mode);

    if config.mode == RunMode::UninstallFull
        && !config.assume_yes
        && !confirm_full_removal(&layout.prefix)?
    {
        println!("Aborted. Nothing was removed.");
        return Ok(ExitCode::FAILURE);
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping the current step");
            on_interrupt.cancel();
        }
    });

    let request_timeout = (!config.no_timeout).then_some(DEFAULT_REQUEST_TIMEOUT);
    let host = SystemHost::new(
        &layout.cache_dir,
        request_timeout,
        WatchSettings::default(),
        cancel.clone(),
    )?;
    let mode = config.mode;
    let mut ctx = InstallContext::new(config, layout, host);

    let label = match mode {
        RunMode::Install => "installation",
        RunMode::Uninstall => "uninstall",
        RunMode::UninstallFull => "full uninstall",
    };
    let plan = StepKind::plan(mode);
    authorize_plan(&plan, &mut ctx).await?;
    let report = Sequencer::new(label)
        .with_cancel(cancel.clone())
        .run(&plan, &mut ctx)
        .await;

    let components = if mode == RunMode::Install && !cancel.is_cancelled() {
        summary::collect(&ctx).await
    } else {
        Vec::new()
    };

    println!();
    print!("{}", summary::render(&report, &components));
    if mode == RunMode::Install && report.succeeded() {
        if let Some(hint) = summary::launch_hint(&ctx) {
            println!();
            println!("Start it from a terminal with:");
            println!("    {}", hint);
        }
    }
    println!();
    println!("Log: {}", log.path().display());

    Ok(ExitCode::from(report.exit_code()))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

fn confirm_full_removal(prefix: &Path) -> Result<bool> {
    eprintln!("WARNING: This will DELETE the Wine prefix and everything installed in it:");
    eprintln!("  {}", prefix.display());
    eprintln!("WARNING: Projects and presets saved inside the prefix will be lost.");
    print!("Are you sure you want to continue? [y/N] ");
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(is_yes(&answer))
}
