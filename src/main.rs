//! CLI entry point.
//!
//! Provides a command-line interface for:
//! - Computing interleaved measurement schedules without touching hardware
//!   (`plan-grid`, `plan-local`)
//! - Running a schedule against the built-in simulated instrument (`run`)
//! - Inspecting and editing the measurement script store (`scripts`)
//!
//! A real deployment replaces the simulated instrument with a bridge
//! implementation for its command channel; everything above the bridge stays
//! the same.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use spm_daq::bridge::mock::SimulatedInstrument;
use spm_daq::bridge::params;
use spm_daq::config::Settings;
use spm_daq::controller::AcquisitionController;
use spm_daq::distribution::DEFAULT_SAFETY_FRACTION;
use spm_daq::geometry::Point;
use spm_daq::grid::compute_grid;
use spm_daq::local_area::{compute_local_areas, LocalAreaSpec};
use spm_daq::scan::{ScanFrame, SweepDirection};
use spm_daq::schedule::Schedule;
use spm_daq::scripts::MeasurementScript;

#[derive(Parser)]
#[command(name = "spm_daq")]
#[command(about = "Raster-scan point-measurement acquisition", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = "config/default.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Scan-frame parameters shared by the planning commands.
#[derive(Args)]
struct FrameArgs {
    /// Frame center X (nm)
    #[arg(long, default_value_t = 0.0)]
    center_x: f64,

    /// Frame center Y (nm)
    #[arg(long, default_value_t = 0.0)]
    center_y: f64,

    /// Fast-axis range (nm)
    #[arg(long, default_value_t = 500.0)]
    range: f64,

    /// Frame rotation (degrees, CCW positive)
    #[arg(long, default_value_t = 0.0)]
    angle: f64,

    /// Fast range over slow range
    #[arg(long, default_value_t = 1.0)]
    aspect: f64,

    /// Total raster line count
    #[arg(long, default_value_t = 500)]
    lines: u32,

    /// Sweep top-down instead of bottom-up
    #[arg(long)]
    down: bool,
}

impl FrameArgs {
    fn to_frame(&self) -> ScanFrame {
        ScanFrame {
            center: Point::new(self.center_x, self.center_y),
            range: self.range,
            angle_deg: self.angle,
            aspect_ratio: self.aspect,
            pixel_density_ratio: 1.0,
            total_lines: self.lines,
            direction: if self.down {
                SweepDirection::Down
            } else {
                SweepDirection::Up
            },
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compute a global grid schedule and print it
    PlanGrid {
        #[command(flatten)]
        frame: FrameArgs,

        /// Points along the fast axis
        #[arg(long, default_value_t = 5)]
        nx: u32,

        /// Points along the slow axis
        #[arg(long, default_value_t = 5)]
        ny: u32,

        /// Dump the full schedule as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Compute a local-area schedule from a JSON area list and print it
    PlanLocal {
        #[command(flatten)]
        frame: FrameArgs,

        /// JSON file with a list of local-area specs
        areas: PathBuf,

        /// Dump the full schedule as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Run a grid acquisition against the simulated instrument
    Run {
        #[command(flatten)]
        frame: FrameArgs,

        /// Points along the fast axis
        #[arg(long, default_value_t = 3)]
        nx: u32,

        /// Points along the slow axis
        #[arg(long, default_value_t = 3)]
        ny: u32,
    },

    /// Manage the measurement script store
    Scripts {
        #[command(subcommand)]
        command: ScriptCommands,
    },
}

#[derive(Subcommand)]
enum ScriptCommands {
    /// List stored scripts
    List,

    /// Save a script (comma-separated bias lists)
    Save {
        /// Script name
        name: String,
        /// First bias channel values, e.g. "-2.0,-1.0,0.0"
        bias_a: String,
        /// Second bias channel values, paired with the first
        bias_b: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_from(&cli.config).context("loading configuration")?;
    settings
        .validate()
        .map_err(|message| anyhow::anyhow!(message))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.application.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::PlanGrid {
            frame,
            nx,
            ny,
            json,
        } => {
            let layout = compute_grid(&frame.to_frame(), nx, ny, DEFAULT_SAFETY_FRACTION)?;
            print_schedule(&layout.into_schedule(), json)
        }
        Commands::PlanLocal { frame, areas, json } => {
            let text = std::fs::read_to_string(&areas)
                .with_context(|| format!("reading {}", areas.display()))?;
            let specs: Vec<LocalAreaSpec> =
                serde_json::from_str(&text).context("parsing area list")?;
            let result = compute_local_areas(&frame.to_frame(), &specs)?;
            print_schedule(&result.schedule, json)
        }
        Commands::Run { frame, nx, ny } => run_simulated(&settings, &frame, nx, ny),
        Commands::Scripts { command } => manage_scripts(&settings, command),
    }
}

fn print_schedule(schedule: &Schedule, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(schedule)?);
        return Ok(());
    }

    println!(
        "{} segments, {} points, {} lines",
        schedule.segments.len(),
        schedule.total_points(),
        schedule.total_lines()
    );
    for (index, segment) in schedule.segments.iter().enumerate() {
        if segment.points.is_empty() {
            println!("  segment {index}: scan {} lines (run-out)", segment.lines_to_scan);
        } else {
            let first = segment.points[0];
            let last = segment.points[segment.points.len() - 1];
            println!(
                "  segment {index}: scan {} lines, measure {} points from ({:.2}, {:.2}) to ({:.2}, {:.2})",
                segment.lines_to_scan,
                segment.points.len(),
                first.x,
                first.y,
                last.x,
                last.y,
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn run_simulated(settings: &Settings, frame_args: &FrameArgs, nx: u32, ny: u32) -> Result<()> {
    let instrument = SimulatedInstrument::new().with_policy((&settings.instrument).into());
    instrument.set_register(params::X, frame_args.center_x);
    instrument.set_register(params::Y, frame_args.center_y);
    instrument.set_register(params::RANGE, frame_args.range);
    instrument.set_register(params::ANGLE, frame_args.angle);
    instrument.set_register(params::ASPECT_RATIO, frame_args.aspect);
    instrument.set_register(params::PIXEL, f64::from(frame_args.lines));

    let bridge = Arc::new(instrument);
    let controller = AcquisitionController::new(bridge, settings)?;

    let direction = if frame_args.down {
        SweepDirection::Down
    } else {
        SweepDirection::Up
    };
    let frame = controller.read_scan_frame(direction).await?;
    let report = controller.run_grid(&frame, nx, ny).await?;

    println!(
        "run complete: {} points measured, {} skipped, {} lines scanned",
        report.points_measured, report.points_skipped, report.lines_scanned
    );
    controller.safe_shutdown().await?;
    Ok(())
}

fn manage_scripts(settings: &Settings, command: ScriptCommands) -> Result<()> {
    let mut store = spm_daq::scripts::ScriptStore::open(&settings.scripts.path)?;
    match command {
        ScriptCommands::List => {
            if store.all().is_empty() {
                println!("no scripts stored");
            }
            let mut names: Vec<_> = store.all().keys().collect();
            names.sort();
            for name in names {
                let script = &store.all()[name];
                println!(
                    "{name}: {} steps, created {}",
                    script.bias_list_a.len(),
                    script.created_time.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        ScriptCommands::Save { name, bias_a, bias_b } => {
            let parse = |list: &str| -> Result<Vec<f64>> {
                list.split(',')
                    .map(|v| v.trim().parse::<f64>().context("parsing bias value"))
                    .collect()
            };
            store.save_script(MeasurementScript::new(name, parse(&bias_a)?, parse(&bias_b)?))?;
            println!("script saved");
        }
    }
    Ok(())
}
