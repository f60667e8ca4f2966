pub(crate) mod color;
pub(crate) mod config;
pub(crate) mod effects;
pub(crate) mod effecttask;
pub(crate) mod error;
pub(crate) mod intervaltimer;
pub(crate) mod ledstate;
pub(crate) mod presets;
pub(crate) mod scheduler;
pub(crate) mod signal;
pub(crate) mod snapshotter;
pub(crate) mod transport;

use std::io;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;
use env_logger::Env;

use crate::config::{Config, TransportKind};
use crate::error::{Error, Result};
use crate::presets::Preset;
use crate::scheduler::{Scheduler, SchedulerOptions};

#[derive(Parser)]
#[command(about = "Drives the LEDs of a christmas tree")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Effects to run when the configuration lists none
    #[arg(short, long, value_enum, default_value_t = Preset::Disco)]
    preset: Preset,

    /// Where the frames go
    #[arg(short, long, value_enum)]
    transport: Option<TransportKind>,

    /// Number of LEDs on the strip
    #[arg(short, long)]
    length: Option<usize>,

    /// Frames per second sent to the strip
    #[arg(short, long, value_name = "HZ")]
    frequency: Option<f32>,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(short, long, value_name = "SECS")]
    duration: Option<u64>,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(kind) = cli.transport {
        config.transport.kind = kind;
    }
    if let Some(length) = cli.length {
        config.strip.length = length;
    }
    if let Some(frequency) = cli.frequency {
        config.sampler.frequency_hz = frequency;
    }

    if config.effects.is_empty() {
        log::info!("No effects configured, using the {:?} preset", cli.preset);
        config.effects = cli.preset.effects(&config.strip)?;
    }

    config.validate()?;
    Ok(config)
}

fn run(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;

    let transport = transport::from_config(&config.transport, config.strip.length)?;
    let scheduler = Scheduler::start(
        config.strip.length,
        transport,
        SchedulerOptions::from_config(&config),
    )?;

    for effect in &config.effects {
        scheduler.register_effect(effect)?;
    }
    for (id, name) in scheduler.running_tasks() {
        log::info!("Task {}: {}", id, name);
    }

    let halt = scheduler.halt_signal();
    {
        let halt = halt.clone();
        ctrlc::set_handler(move || {
            log::info!("Interrupted, shutting down");
            halt.trigger();
        })
        .map_err(|err| Error::Io(io::Error::new(io::ErrorKind::Other, err.to_string())))?;
    }

    let outcome = match cli.duration {
        Some(secs) if !halt.wait_timeout(Duration::from_secs(secs)) => Ok(()),
        _ => scheduler.wait(),
    };

    let stopped = scheduler.stop();

    let stats = scheduler.stats();
    log::info!(
        "{} ticks, {} frames written, {} dropped, {} failed, {} ticks missed",
        stats.ticks(),
        stats.frames_written(),
        stats.frames_dropped(),
        stats.write_failures(),
        stats.missed_ticks()
    );

    outcome.and(stopped)
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        log::error!("{}", err);
        process::exit(1);
    }
}
