//! Command line entry point.
//!
//! Subcommands map directly onto the library surface: `discover` probes
//! serial ports for a responding stage, `home` and `jog` drive the stage,
//! and `run` executes a full imaging run over a previously saved plate
//! path. `--mock` swaps in the in-memory stage and synthetic camera so
//! every workflow can be exercised without hardware attached.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};
use std::path::PathBuf;
use std::time::Duration;

use plate_scan::capture::MockCapture;
use plate_scan::config::Settings;
use plate_scan::core::{CaptureSource, MotionDevice};
use plate_scan::experiment::{Callbacks, ExperimentRunner, RunConfig, RunStatus};
use plate_scan::motion::{GcodeMotion, MockMotion};
use plate_scan::path::load_path;
use plate_scan::transport::{discover_port, open_port};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Automated multiwell plate imaging over a G-code motion stage.
#[derive(Parser)]
#[command(name = "plate_scan")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file overriding the built-in defaults
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Drive the built-in mock stage and camera instead of real hardware
    #[arg(long)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe serial ports for a responding stage
    Discover,
    /// Home all axes and park at the origin
    Home,
    /// Move the stage to an absolute position and wait for it to settle
    Jog {
        /// Target X in mm
        x: f64,
        /// Target Y in mm
        y: f64,
        /// Target Z in mm
        #[arg(default_value_t = 0.0)]
        z: f64,
    },
    /// Execute an imaging run over a saved plate path
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// JSON plate path produced by the calibration workflow
    #[arg(value_name = "PATH_FILE")]
    path_file: PathBuf,

    /// Dwell at each well before capture, seconds
    #[arg(long, default_value_t = 5.0)]
    pause_time: f64,

    /// Total run budget, seconds
    #[arg(long, default_value_t = 3600.0)]
    duration: f64,

    /// Output directory (default: timestamped folder under the configured save dir)
    #[arg(long)]
    save_folder: Option<PathBuf>,

    /// Image filename prefix (default: the configured prefix)
    #[arg(long)]
    prefix: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings = Settings::new(cli.config.as_deref()).context("Failed to load settings")?;

    match cli.command {
        Commands::Discover => {
            if cli.mock {
                info!("Mock transport is in-process; nothing to discover");
                return Ok(());
            }
            let port = discover_port(settings.serial.baud_rate)?;
            println!("{}", port);
        }
        Commands::Home => {
            if cli.mock {
                let (mut stage, _probe) = MockMotion::new();
                home_stage(&mut stage).await?;
            } else {
                let mut stage = open_stage(&settings).await?;
                let outcome = home_stage(&mut stage).await;
                stage.shutdown().await;
                outcome?;
            }
        }
        Commands::Jog { x, y, z } => {
            if cli.mock {
                let (mut stage, _probe) = MockMotion::new();
                jog_stage(&mut stage, x, y, z).await?;
            } else {
                let mut stage = open_stage(&settings).await?;
                let outcome = jog_stage(&mut stage, x, y, z).await;
                stage.shutdown().await;
                outcome?;
            }
        }
        Commands::Run(args) => run_experiment(args, &settings, cli.mock).await?,
    }

    Ok(())
}

/// Connect to the stage, waiting out the firmware boot banner before the
/// acceleration and jerk limits are applied.
async fn open_stage(settings: &Settings) -> Result<GcodeMotion> {
    let port = match &settings.serial.port {
        Some(port) => port.clone(),
        None => discover_port(settings.serial.baud_rate)?,
    };
    info!(
        "Connecting to stage on {} at {} baud",
        port, settings.serial.baud_rate
    );
    let transport = open_port(&port, settings.serial.baud_rate)?;
    let mut stage = GcodeMotion::new(Box::new(transport), &settings.serial);
    stage.initialize().await;
    Ok(stage)
}

async fn home_stage(stage: &mut dyn MotionDevice) -> Result<()> {
    if !stage.home().await? {
        anyhow::bail!("Homing was not acknowledged by the firmware");
    }
    info!("Stage homed; parked at {}", stage.position().await);
    Ok(())
}

async fn jog_stage(stage: &mut dyn MotionDevice, x: f64, y: f64, z: f64) -> Result<()> {
    if !stage.move_to(x, y, z).await? {
        anyhow::bail!("Stage rejected move to ({}, {}, {})", x, y, z);
    }
    stage
        .wait_motion_complete(Duration::from_secs(30))
        .await
        .context("Stage did not settle")?;
    info!("Stage at {}", stage.position().await);
    Ok(())
}

async fn run_experiment(args: RunArgs, settings: &Settings, mock: bool) -> Result<()> {
    let path = load_path(&args.path_file)
        .with_context(|| format!("Failed to load path file {}", args.path_file.display()))?;
    info!(
        "Loaded {} well positions from {}",
        path.len(),
        args.path_file.display()
    );

    let motion: Box<dyn MotionDevice> = if mock {
        let (stage, _probe) = MockMotion::new();
        Box::new(stage)
    } else {
        let mut stage = open_stage(settings).await?;
        if !stage.home().await {
            anyhow::bail!("Homing was not acknowledged by the firmware");
        }
        warn!("No camera driver is wired in this build; frames come from the synthetic source");
        Box::new(stage)
    };
    let capture: Box<dyn CaptureSource> = Box::new(MockCapture::new());

    let save_folder = args.save_folder.unwrap_or_else(|| {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        PathBuf::from(&settings.files.save_dir).join(format!("run_{}", stamp))
    });
    if let Some(parent) = save_folder.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let mut runner = ExperimentRunner::new(motion, capture);
    runner
        .set_callbacks(Callbacks {
            status: Some(Box::new(|status| info!("Run status: {}", status))),
            progress: Some(Box::new(|done, total| {
                info!("Iteration {}/{}", done, total)
            })),
            error: Some(Box::new(|message| error!("{}", message))),
        })
        .await;

    let prefix = args
        .prefix
        .unwrap_or_else(|| settings.files.prefix.clone());
    runner
        .configure(RunConfig {
            path,
            pause_time: Duration::from_secs_f64(args.pause_time),
            duration: Duration::from_secs_f64(args.duration),
            save_folder: save_folder.clone(),
            file_prefix: prefix,
            image_format: settings.files.image_format.clone(),
        })
        .await?;

    info!("Saving images under {}", save_folder.display());
    runner.start().await?;

    // Ctrl-C requests a cooperative stop; the in-flight well visit always
    // finishes before the loop exits.
    let mut interrupted = false;
    loop {
        match runner.status().await {
            RunStatus::Stopped | RunStatus::Completed | RunStatus::Errored => break,
            _ => {}
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(200)) => {}
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                info!("Interrupt received; stopping at the next well boundary");
                runner.stop().await;
                interrupted = true;
            }
        }
    }
    runner.join().await;

    let (done, total) = runner.progress();
    info!(
        "Run finished in state {} after {}/{} iterations",
        runner.status().await,
        done,
        total
    );
    Ok(())
}
