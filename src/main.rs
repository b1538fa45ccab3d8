//! Headless command-line front end.
//!
//! The binary wires [`frogscan::app::App`] to a few terminal workflows:
//! watching the live feed, dumping a snapshot, running a stage scan, and
//! listing serial ports. Anything interactive lives behind the library API.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use frogscan::app::App;
use frogscan::config::Settings;
use frogscan::data::snapshot;
use frogscan::stage::SerialLink;
use log::info;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "frogscan", about = "Spectrometer acquisition and FROG scanning", version)]
struct Cli {
    /// Configuration file under config/ (TOML), without extension lookup
    /// beyond what the loader does.
    #[arg(long, global = true)]
    config: Option<String>,

    /// Skip hardware backends and use the synthetic spectrometer.
    #[arg(long, global = true)]
    demo: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream frame statistics from the live feed.
    Live {
        /// How long to watch, in seconds.
        #[arg(long, default_value_t = 10)]
        duration: u64,
        /// Record every frame and save the batch here when done.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Capture one spectrum and write it as two-column CSV.
    Snapshot {
        #[arg(long, default_value = "snapshot.csv")]
        output: PathBuf,
    },
    /// Step the delay stage through a range, pairing each position with a
    /// spectrum.
    Scan {
        #[arg(long)]
        start: Option<f64>,
        #[arg(long)]
        stop: Option<f64>,
        #[arg(long)]
        step: Option<f64>,
        /// Serial port of the ESP300 controller.
        #[arg(long)]
        port: Option<String>,
        /// Controller axis (1..=3).
        #[arg(long)]
        axis: Option<u8>,
        /// Output path; defaults to the configured storage path.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// List serial ports visible to the system.
    Ports,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::new(cli.config.as_deref()).context("loading configuration")?;
    env_logger::Builder::new()
        .filter_level(settings.log_level.to_level_filter())
        .parse_default_env()
        .init();
    if cli.demo {
        settings.acquisition.allow_demo = true;
    }

    match cli.command {
        Command::Live { duration, output } => run_live(settings, duration, output).await,
        Command::Snapshot { output } => run_snapshot(settings, output).await,
        Command::Scan {
            start,
            stop,
            step,
            port,
            axis,
            output,
        } => run_scan(settings, start, stop, step, port, axis, output).await,
        Command::Ports => list_ports(),
    }
}

async fn run_live(settings: Settings, duration: u64, output: Option<PathBuf>) -> Result<()> {
    let mut app = App::start(settings).context("opening spectrometer")?;
    println!("backend: {}", app.backend());
    if output.is_some() {
        app.acquisition().start_acquisition();
    }

    let mut frames = app.acquisition().frames();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration);
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            changed = frames.changed() => {
                if changed.is_err() {
                    break;
                }
                let frame = frames.borrow().clone();
                if let Some(frame) = frame {
                    let peak = frame
                        .intensities
                        .iter()
                        .cloned()
                        .fold(f64::NEG_INFINITY, f64::max);
                    println!("t={:.3}s  {} px  peak={:.1}", frame.timestamp, frame.pixel_count(), peak);
                }
            }
        }
    }
    if let Some(fault) = app.acquisition().fault() {
        anyhow::bail!("acquisition stopped: {}", fault);
    }

    if let Some(path) = output {
        app.acquisition().stop_acquisition();
        let dataset = app.save_acquisition(&path).context("saving acquisition")?;
        println!("saved {} spectra to {}", dataset.len(), path.display());
    }
    app.shutdown().await;
    Ok(())
}

async fn run_snapshot(settings: Settings, output: PathBuf) -> Result<()> {
    let mut app = App::start(settings).context("opening spectrometer")?;
    let mut frames = app.acquisition().frames();
    frames
        .changed()
        .await
        .context("waiting for a spectrum")?;
    let frame = frames
        .borrow()
        .clone()
        .context("no spectrum was published")?;
    snapshot::write_snapshot(&output, &frame.wavelengths, &frame.intensities)
        .context("writing snapshot")?;
    println!("snapshot written to {}", output.display());
    app.shutdown().await;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_scan(
    mut settings: Settings,
    start: Option<f64>,
    stop: Option<f64>,
    step: Option<f64>,
    port: Option<String>,
    axis: Option<u8>,
    output: Option<PathBuf>,
) -> Result<()> {
    if let Some(start) = start {
        settings.scan.start = start;
    }
    if let Some(stop) = stop {
        settings.scan.stop = stop;
    }
    if let Some(step) = step {
        settings.scan.step = step;
    }
    if let Some(port) = port {
        settings.stage.port = port;
    }
    let axis = axis.unwrap_or(settings.stage.axis);
    let output = output.unwrap_or_else(|| PathBuf::from(&settings.storage.default_path));

    let mut app = App::start(settings).context("opening spectrometer")?;
    let link = SerialLink::open(
        &app.settings().stage.port,
        app.settings().stage.baud_rate,
        Duration::from_millis(app.settings().stage.read_timeout_ms),
    )
    .context("opening stage serial port")?;
    app.connect_stage(Box::new(link), axis);

    info!(
        "scanning {} -> {} step {}",
        app.settings().scan.start,
        app.settings().scan.stop,
        app.settings().scan.step
    );
    let result = app.run_scan(Some(&output)).await;
    app.shutdown().await;
    let dataset = result.context("scan failed")?;
    println!(
        "scan complete: {} position/spectrum pairs saved to {}",
        dataset.len(),
        output.display()
    );
    Ok(())
}

fn list_ports() -> Result<()> {
    let ports = SerialLink::available_ports().context("enumerating serial ports")?;
    if ports.is_empty() {
        println!("no serial ports found");
    } else {
        for port in ports {
            println!("{}", port);
        }
    }
    Ok(())
}
