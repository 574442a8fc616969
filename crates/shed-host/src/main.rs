//! # Shed Host
//!
//! This is the main entry point for the shed heater-control host: the
//! process that keeps a bank of solar-storage batteries warm (and not too
//! warm) in an outdoor shed.
//!
//! ## Responsibilities
//!
//! The host is responsible for:
//!
//! *   Loading and validating the configuration file.
//! *   Assembling the runtime services (scheduler, hap bus) and the
//!     hardware backend (simulated shed or sysfs GPIO).
//! *   Starting the heater supervisor and the hap log.
//! *   Shutting the heater off on the way out.
//!
//! ## Concurrency
//!
//! Everything runs as tasks on one tokio runtime: the supervisor tick, the
//! scheduled controller timeouts, the simulated shed (in `--sim` mode) and
//! the hap log subscriber.

// Use mimalloc for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use heater_control::hw::{HeaterPlant, SenseRelay};
use heater_control::sensor::SensorHub;
use heater_control::services::Services;
use heater_control::supervisor::HeaterSupervisor;
use sim::{ShedModel, ShedParams, SimShed};
use tracing::info;

#[cfg(feature = "hw-sysfs")]
mod gpio;
mod hap_log;
mod settings;

use settings::HostSettings;

/// Keeps the shed's solar-storage batteries inside their safe temperature
/// window.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the heater-control service.
    Run(RunArgs),
    /// Validate the configuration file and exit.
    CheckConfig(CheckConfigArgs),
}

/// Arguments for the `run` command.
#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "shedheat.cfg")]
    config_path: PathBuf,

    /// Run against a simulated shed instead of real hardware.
    #[arg(long)]
    sim: bool,
}

#[derive(Parser, Debug)]
struct CheckConfigArgs {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "shedheat.cfg")]
    config_path: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize the logging subscriber.
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::CheckConfig(args) => check_config(args),
    }
}

/// Loads, validates and reports; exits nonzero on any problem.
fn check_config(args: CheckConfigArgs) -> Result<()> {
    let settings = settings::load(&args.config_path)?;
    settings.control.validate()?;
    info!("configuration OK");
    Ok(())
}

/// Initializes and runs the whole service.
async fn run(args: RunArgs) -> Result<()> {
    info!("Starting shed heater-control host...");

    // 1. Load and validate configuration. Nothing touches hardware before
    //    this passes.
    info!("Loading configuration from: {:?}", args.config_path);
    let settings = settings::load(&args.config_path)?;
    settings.control.validate().context("fatal configuration")?;

    // 2. Shared services, and the hap log before anything can post.
    let services = Services::new();
    let _hap_log = hap_log::spawn(&services.haps);

    // 3. Sensor hub and hardware backend.
    let sensors = SensorHub::new();
    let mut sim_task = None;
    let (plant, sense) = if args.sim {
        info!("Using simulated shed.");
        let params = ShedParams {
            outside_temp: settings.sim.outside_temp,
            noise: 0.1,
            ..ShedParams::default()
        };
        let model = ShedModel::settled_at(params, settings.sim.start_temp);
        let shed = SimShed::new(model, sensors.clone());
        let plant = HeaterPlant::new(shed.ssr_pin(), shed.led_pin(), services.haps.clone());
        let sense = SenseRelay::new(shed.sense_pin());
        sim_task = Some(shed.spawn(
            &services.scheduler,
            Duration::from_millis(settings.sim.step_ms),
            settings.sim.light_mode,
        ));
        (plant, sense)
    } else {
        open_hardware(&settings, &services)?
    };

    // 4. The supervisor.
    let supervisor = HeaterSupervisor::new(
        settings.control.clone(),
        sensors,
        plant.clone(),
        sense,
        services.clone(),
    )?;
    let _tick = supervisor.start(&services.scheduler);
    info!("Heater supervisor started.");

    // Wait for a shutdown signal.
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting.");

    // Whatever state the controllers were in, leave the heater off.
    drop(sim_task);
    plant.heater_off();
    Ok(())
}

#[cfg(feature = "hw-sysfs")]
fn open_hardware(settings: &HostSettings, services: &Services) -> Result<(HeaterPlant, SenseRelay)> {
    info!("Opening sysfs GPIO lines.");
    gpio::open(&settings.gpio, services.haps.clone())
}

#[cfg(not(feature = "hw-sysfs"))]
fn open_hardware(_settings: &HostSettings, _services: &Services) -> Result<(HeaterPlant, SenseRelay)> {
    anyhow::bail!("built without a hardware backend; run with --sim or enable the hw-sysfs feature")
}
