use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use drivebots_app::{RunOptions, load_config, run};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "drivebots",
    version,
    about = "Evolve neural-network drivers on a closed circuit"
)]
struct Cli {
    /// JSON configuration file; omitted sections use defaults.
    #[arg(long, env = "DRIVEBOTS_CONFIG")]
    config: Option<PathBuf>,

    /// Seed for reproducible runs.
    #[arg(long, env = "DRIVEBOTS_SEED")]
    seed: Option<u64>,

    /// Stop after this many completed generations (0 runs until quit).
    #[arg(long, env = "DRIVEBOTS_GENERATIONS", default_value_t = 10)]
    generations: usize,

    /// Genomes evaluated per generation.
    #[arg(long, env = "DRIVEBOTS_GENERATION_SIZE")]
    generation_size: Option<usize>,

    /// Hard cap on ticks per episode.
    #[arg(long, env = "DRIVEBOTS_MAX_EPISODE_TICKS")]
    max_episode_ticks: Option<u32>,

    /// Write the track and the last generation's trails as SVG on exit.
    #[arg(long, env = "DRIVEBOTS_SVG")]
    svg: Option<PathBuf>,

    /// Write per-generation fitness statistics as JSON on exit.
    #[arg(long, env = "DRIVEBOTS_REPORT")]
    report: Option<PathBuf>,

    /// Read start/kill/reset/quit commands from stdin instead of starting right away.
    #[arg(long)]
    interactive: bool,

    /// Pace frames to the physics timestep.
    #[arg(long)]
    realtime: bool,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(seed) = cli.seed {
        config.rng_seed = Some(seed);
    }
    if let Some(size) = cli.generation_size {
        config.evolution.generation_size = size;
    }
    if let Some(limit) = cli.max_episode_ticks {
        config.episode.max_episode_ticks = Some(limit);
    }

    info!(
        seed = ?config.rng_seed,
        generation_size = config.evolution.generation_size,
        generations = cli.generations,
        "Starting DriveBots training shell"
    );
    let options = RunOptions {
        generations: cli.generations,
        interactive: cli.interactive,
        realtime: cli.realtime,
        svg: cli.svg,
        report: cli.report,
    };
    run(&config, &options)?;
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
