//! # engine_app: simulation host
//!
//! Owns the world and the system scheduler and drives them at a fixed rate.
//! A render task emits scene updates at its own rate, independently of the
//! simulation steps.
//!
//! ## Startup Sequence
//!
//! 1. Read the JSON configuration file, if one is given.
//! 2. Register the built-in system plugins.
//! 3. Spawn the configured entities, then load and attach the configured
//!    systems in order.
//! 4. Enter the tick loop until the tick limit, a stop request or Ctrl-C.

mod components;
mod config;
mod systems;
mod tick;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use engine_system::{EventManager, SystemLoader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::EngineConfig;
use tick::TickLoop;

#[derive(Parser)]
#[command(name = "engine_app", about = "Fixed-rate simulation host with pluggable systems")]
struct Args {
    /// Path to the JSON engine configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stop after this many ticks (overrides the configuration, 0 = unlimited)
    #[arg(short, long)]
    ticks: Option<u64>,

    /// Start with the simulation paused
    #[arg(long)]
    paused: bool,

    /// Step on the current thread without a render task
    #[arg(long)]
    headless: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("engine_app=info".parse()?))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "loading engine configuration");
            EngineConfig::load(path)?
        }
        None => EngineConfig::default(),
    };
    if let Some(ticks) = args.ticks {
        config.tick.max_ticks = ticks;
    }

    info!("simulation host starting");

    let events = Arc::new(EventManager::new());
    let mut loader = SystemLoader::new();
    systems::register_builtin(&mut loader, &events);
    info!(plugins = ?loader.names(), "registered system plugins");

    let mut tick_loop = TickLoop::from_config(&config, Arc::new(loader), events)?;
    if args.paused {
        tick_loop.set_paused(true);
    }
    if args.headless {
        tick_loop.run();
    } else {
        tick_loop.run_async().await?;
    }

    info!(
        ticks = tick_loop.tick_id(),
        sim_time = ?tick_loop.last_info().map(|info| info.sim_time),
        faults = tick_loop.faults(),
        entities = tick_loop.world().entity_count(),
        systems = tick_loop.scheduler().len(),
        parameters = tick_loop.scheduler().parameters().len(),
        "simulation host shut down"
    );
    Ok(())
}
