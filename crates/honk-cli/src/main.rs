mod output;
mod source;

use anyhow::Context;
use clap::builder::PossibleValuesParser;
use clap::Parser;
use honk_core::download::Downloader;
use honk_core::orchestrator::{Pipeline, Selection};
use honk_core::paths::InstallLayout;
use honk_core::platform::PlatformProfile;
use honk_core::process::{ActiveChild, ProcessRunner};
use honk_core::steps::{default_pipeline, InstallContext, STEP_KEYS};
use std::path::PathBuf;

/// Exit status after Ctrl-C, as a shell reports SIGINT.
const INTERRUPTED_EXIT: i32 = 130;

#[derive(Parser)]
#[command(
    name = "honk-install",
    about = "Install the HonkTTS speech server into a self-contained directory",
    version,
    after_help = "Step keys: python, venv, packages, espeak, warmup, server\n\n\
                  Examples:\n  honk-install ~/tts --skip packages,warmup\n  honk-install ~/tts --only espeak"
)]
struct Cli {
    /// Install directory (default: <data dir>/StationHub/Installations/tts)
    #[arg(env = "HONK_INSTALL_DIR")]
    install_dir: Option<PathBuf>,

    /// Steps to skip (comma separated, repeatable)
    #[arg(
        long,
        value_delimiter = ',',
        value_parser = PossibleValuesParser::new(STEP_KEYS),
        ignore_case = true
    )]
    skip: Vec<String>,

    /// Run only these steps (comma separated, repeatable)
    #[arg(
        long,
        value_delimiter = ',',
        value_parser = PossibleValuesParser::new(STEP_KEYS),
        ignore_case = true
    )]
    only: Vec<String>,

    /// Directory containing tts_server.py and requirements.txt
    #[arg(long, env = "HONK_SERVER_SRC")]
    server_src: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .without_time()
        .init();

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Installation failed: {e:#}");
            if cfg!(debug_assertions) {
                eprintln!("{e:?}");
            }
            1
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let rt = tokio::runtime::Runtime::new()?;
    block_on_detached(rt, install(cli))
}

/// Drive `future` to completion, then drop the runtime without waiting for
/// blocking tasks (archive extraction) an interrupt left running.
fn block_on_detached<F: std::future::Future>(rt: tokio::runtime::Runtime, future: F) -> F::Output {
    let output = rt.block_on(future);
    rt.shutdown_background();
    output
}

async fn install(cli: Cli) -> anyhow::Result<i32> {
    let selection = Selection::new(&cli.only, &cli.skip)?;

    let active = ActiveChild::new();
    let downloader = Downloader::http()?.with_progress(output::progress_printer());
    let pipeline = Pipeline::new(default_pipeline(
        downloader,
        ProcessRunner::new(active.clone()),
    ))?;
    tracing::debug!(steps = ?pipeline.keys(), "pipeline built");
    // Reject an empty selection before touching anything.
    pipeline.select(&selection)?;

    let profile = PlatformProfile::detect()?;
    let root = install_dir(cli.install_dir)?;
    let server_source = source::resolve_server_source(cli.server_src.as_deref())?;
    let layout = InstallLayout::new(root, profile);

    output::header(&layout, &server_source, &selection);

    if selection.includes("espeak") {
        honk_core::preflight::check(&profile).await?;
    }

    let ctx = InstallContext::load(layout, server_source)
        .context("failed to read the server source")?;

    tokio::select! {
        result = pipeline.run(&ctx, &selection, output::print_event) => {
            let report = result?;
            output::summary(&ctx.layout, &report);
            Ok(0)
        }
        _ = tokio::signal::ctrl_c() => {
            if active.kill_active() {
                tracing::debug!("killed running child process");
            }
            eprintln!("\nInterrupted.");
            Ok(INTERRUPTED_EXIT)
        }
    }
}

/// Explicit directory made absolute, else the per-user default.
fn install_dir(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let dir = match explicit {
        Some(dir) => dir,
        None => dirs::data_dir()
            .context("cannot determine the user data directory; pass INSTALL_DIR")?
            .join("StationHub")
            .join("Installations")
            .join("tts"),
    };
    if dir.is_absolute() {
        return Ok(dir);
    }
    let cwd = std::env::current_dir().context("cannot read the current directory")?;
    Ok(cwd.join(dir))
}
