//! CLI Entry Point for xyz-tank
//!
//! Subcommands:
//! - `run`: non-interactive, executes one settings file and saves the result
//! - `interactive`: console menu feeding the controller's command queue
//! - `template`: write an example settings file to start from
//!
//! # Usage
//!
//! ```bash
//! xyz-tank run --settings demos/short.toml --output short.json
//! xyz-tank interactive --config config/xyz_tank.toml
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use xyz_tank::config::{AppConfig, ScanSettings};
use xyz_tank::controller::{Controller, ControllerHandle};
use xyz_tank::engine::{AcquisitionEngine, XyzSystemState};
use xyz_tank::hardware::mock::{RecordingTransport, SimulatedCapture};
use xyz_tank::logging;
use xyz_tank::storage::JsonResultWriter;

#[derive(Parser)]
#[command(name = "xyz-tank")]
#[command(about = "Three-axis tank scanner: plan, run, stop, resume and save grid measurements", long_about = None)]
struct Cli {
    /// Application configuration file
    #[arg(long, global = true, default_value = "config/xyz_tank.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one measurement to completion and save it
    Run {
        /// Scan settings file (tank, plan, hydrophone, transducer)
        #[arg(long)]
        settings: PathBuf,

        /// Where to save the result; relative paths go to the output directory
        #[arg(long)]
        output: PathBuf,
    },

    /// Drive the scanner from a console menu
    Interactive,

    /// Write an example scan settings file
    Template {
        /// Destination of the settings file
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Template { output } = &cli.command {
        let text = ScanSettings::example().to_toml()?;
        tokio::fs::write(output, text)
            .await
            .with_context(|| format!("writing {}", output.display()))?;
        println!("example settings written to {}", output.display());
        return Ok(());
    }

    let config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    logging::init_from_config(&config)?;
    info!(app = %config.application.name, "starting");

    let (handle, task) = start_controller(&config).await?;

    let outcome = match cli.command {
        Commands::Run { settings, output } => run_once(&handle, &settings, &output).await,
        Commands::Interactive => interactive(&handle).await,
        Commands::Template { .. } => Ok(()),
    };

    // the loop may already be gone after an interactive exit
    let _ = handle.exit().await;
    task.await.context("controller task failed")?;
    outcome
}

async fn start_controller(
    config: &AppConfig,
) -> Result<(ControllerHandle, tokio::task::JoinHandle<()>)> {
    if !config.capture.simulated {
        bail!("no hardware driver is built in; set capture.simulated = true");
    }

    let transport = Arc::new(RecordingTransport::new());
    let capture = Arc::new(
        SimulatedCapture::new(transport.clone())
            .with_source(config.capture.source)
            .with_noise(config.capture.noise_amplitude)
            .with_latency(Duration::from_millis(config.capture.latency_ms)),
    );

    let engine = AcquisitionEngine::initialize(transport, capture, &config.stage).await?;
    Ok(Controller::new(engine, Arc::new(JsonResultWriter), config).spawn())
}

async fn run_once(handle: &ControllerHandle, settings: &Path, output: &Path) -> Result<()> {
    let mut status = handle.subscribe_status();
    handle.start(settings).await?;

    tokio::select! {
        changed = status.wait_for(|s| !s.state.is_running()) => {
            changed.context("engine status channel closed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, stopping measurement");
            handle.stop().await?;
        }
    }

    let report = handle.status().await?;
    let path = handle.save(output).await?;
    println!("{report}");
    println!("saved to {}", path.display());

    match (report.status.state, report.status.last_error) {
        (XyzSystemState::Finished, _) => Ok(()),
        (_, Some(err)) => bail!("measurement aborted: {err}"),
        (state, None) => bail!("measurement ended in state {state}"),
    }
}

const MENU: &str = "\
1) start    2) stop    3) save    4) resume    5) status    q) exit";

async fn interactive(handle: &ControllerHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(format!("{MENU}\n> ").as_bytes()).await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            return Ok(());
        };

        // failures are already logged by the controller; keep the menu alive
        let outcome = match line.trim() {
            "1" => match prompt(&mut lines, &mut stdout, "settings file").await? {
                Some(path) => handle.start(path).await.map(|_| "started".to_string()),
                None => continue,
            },
            "2" => handle.stop().await.map(|_| "stop requested".to_string()),
            "3" => match prompt(&mut lines, &mut stdout, "output file").await? {
                Some(path) => handle
                    .save(path)
                    .await
                    .map(|p| format!("saved to {}", p.display())),
                None => continue,
            },
            "4" => handle.resume().await.map(|_| "resumed".to_string()),
            "5" => handle.status().await.map(|r| r.to_string()),
            "q" | "Q" => return Ok(()),
            "" => continue,
            other => {
                println!("unknown option '{other}'");
                continue;
            }
        };

        match outcome {
            Ok(message) => println!("{message}"),
            Err(e) => println!("error: {e}"),
        }
    }
}

async fn prompt<R>(
    lines: &mut tokio::io::Lines<R>,
    stdout: &mut tokio::io::Stdout,
    what: &str,
) -> Result<Option<PathBuf>>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    stdout.write_all(format!("{what}: ").as_bytes()).await?;
    stdout.flush().await?;
    Ok(lines
        .next_line()
        .await?
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .map(PathBuf::from))
}
