//! Headless shell around the DriveBots genetic scheduler.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use drivebots_brain::FeedForwardNetwork;
use drivebots_core::{
    DrivebotsConfig, FrameEvent, GenerationSummary, GeneticScheduler, SchedulerState,
};
use drivebots_physics::ArcadeWorld;
use tracing::{debug, info};

pub mod command;
pub mod sinks;
pub mod svg;

use command::{BusStatus, create_command_bus, drain_pending_commands, make_command_submit};
use sinks::{TracingStatusSink, TrailRecorder};

pub type Scheduler = GeneticScheduler<ArcadeWorld, FeedForwardNetwork>;

const COMMAND_QUEUE_CAPACITY: usize = 32;
const IDLE_POLL: Duration = Duration::from_millis(20);

/// Knobs of a single shell session.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stop after this many completed generations; `0` runs until quit.
    pub generations: usize,
    /// Wait for `start` on stdin instead of starting immediately.
    pub interactive: bool,
    /// Pace frames to the physics timestep.
    pub realtime: bool,
    pub svg: Option<PathBuf>,
    pub report: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub frames: u64,
    pub history: Vec<GenerationSummary>,
}

/// Read a JSON configuration file; missing sections fall back to defaults.
pub fn load_config(path: Option<&Path>) -> Result<DrivebotsConfig> {
    let Some(path) = path else {
        return Ok(DrivebotsConfig::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: DrivebotsConfig = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    Ok(config)
}

/// Write the per-generation fitness history as pretty JSON.
pub fn write_report(path: &Path, history: &[GenerationSummary]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)
        .with_context(|| format!("failed to create report {}", path.display()))?;
    serde_json::to_writer_pretty(file, history).context("failed to serialize generation report")?;
    Ok(())
}

/// Drive the scheduler frame by frame until the generation target or `quit`.
pub fn run(config: &DrivebotsConfig, options: &RunOptions) -> Result<RunOutcome> {
    let recorder = TrailRecorder::new();
    let trails = recorder.handle();
    let mut scheduler = Scheduler::new(config, ArcadeWorld::default())
        .context("failed to initialise genetic scheduler")?
        .with_status_sink(TracingStatusSink::default())
        .with_frame_sink(recorder);
    info!(
        controller = FeedForwardNetwork::KIND,
        network = %scheduler.network_structure(),
        "Scheduler ready"
    );

    let bus = if options.interactive {
        let (sender, receiver) = create_command_bus(COMMAND_QUEUE_CAPACITY);
        command::spawn_stdin_reader(make_command_submit(sender))
            .context("failed to spawn stdin reader")?;
        info!("Interactive mode: type start, kill, reset or quit");
        Some(receiver)
    } else {
        scheduler.start()?;
        None
    };

    let frame_interval = Duration::from_secs_f32(config.episode.timestep);
    let mut frames = 0_u64;
    loop {
        if let Some(receiver) = &bus {
            match drain_pending_commands(receiver, &mut scheduler)? {
                BusStatus::Open => {}
                BusStatus::Quit => break,
                BusStatus::Closed if scheduler.state() == SchedulerState::Stopped => {
                    debug!("Command input closed while stopped");
                    break;
                }
                BusStatus::Closed => {}
            }
        }
        if options.generations > 0 && scheduler.history().len() >= options.generations {
            break;
        }

        let started = Instant::now();
        if let FrameEvent::Idle = scheduler.frame()? {
            std::thread::sleep(IDLE_POLL);
            continue;
        }
        frames += 1;
        if options.realtime {
            if let Some(remaining) = frame_interval.checked_sub(started.elapsed()) {
                std::thread::sleep(remaining);
            }
        }
    }

    info!(
        frames,
        generations = scheduler.history().len(),
        best_fitness = scheduler.best_fitness(),
        "Training session finished"
    );

    if let Some(path) = &options.report {
        write_report(path, scheduler.history())?;
        info!(path = %path.display(), "Wrote generation report");
    }
    if let Some(path) = &options.svg {
        let snapshot = trails
            .lock()
            .map_err(|_| anyhow!("trail recorder lock poisoned"))?
            .clone();
        svg::write_svg(path, scheduler.track(), &snapshot)?;
        info!(path = %path.display(), "Wrote trail snapshot");
    }

    Ok(RunOutcome {
        frames,
        history: scheduler.history().to_vec(),
    })
}
