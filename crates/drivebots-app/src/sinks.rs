//! Status and frame sinks used by the headless shell.

use std::sync::{Arc, Mutex};

use drivebots_core::{
    FrameSink, FrameView, GenerationSummary, Pose, StatusSink, StatusSnapshot, Vec2,
};
use tracing::{info, trace};

/// Logs live readouts at `trace` and generation boundaries at `info`.
#[derive(Debug, Default)]
pub struct TracingStatusSink {
    last: StatusSnapshot,
}

impl StatusSink for TracingStatusSink {
    fn update(&mut self, snapshot: &StatusSnapshot) {
        if snapshot.genome != self.last.genome || snapshot.generation != self.last.generation {
            trace!(
                generation = %snapshot.generation,
                genome = snapshot.genome,
                "Genome started"
            );
        }
        trace!(
            fitness = snapshot.fitness,
            best = snapshot.best_fitness,
            speed = snapshot.average_speed,
            "Status"
        );
        self.last = *snapshot;
    }

    fn generation_complete(&mut self, summary: &GenerationSummary) {
        info!(
            target: "drivebots::status",
            "Generation {} finished: best {:.1}, mean {:.1} over {} genomes ({} elites kept)",
            summary.generation,
            summary.best_fitness,
            summary.mean_fitness,
            summary.genomes,
            summary.elites
        );
    }
}

/// Trails of the current generation, as last drawn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrailSnapshot {
    pub previous: Vec<Vec<Vec2>>,
    pub current: Vec<Vec2>,
    pub pose: Option<Pose>,
}

pub type SharedTrails = Arc<Mutex<TrailSnapshot>>;

/// Frame sink that mirrors trail data into a shared snapshot.
#[derive(Debug, Clone, Default)]
pub struct TrailRecorder {
    shared: SharedTrails,
}

impl TrailRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn handle(&self) -> SharedTrails {
        Arc::clone(&self.shared)
    }
}

impl FrameSink for TrailRecorder {
    fn draw(&mut self, frame: &FrameView<'_>) {
        let Ok(mut snapshot) = self.shared.lock() else {
            return;
        };
        if snapshot.previous.len() != frame.previous_trails.len() {
            snapshot.previous = frame.previous_trails.to_vec();
        }
        // A shorter trail means a new episode started.
        if frame.trail.len() < snapshot.current.len() {
            snapshot.current.clear();
        }
        let known = snapshot.current.len();
        snapshot
            .current
            .extend(frame.trail.iter().skip(known).map(|point| point.position));
        snapshot.pose = Some(frame.pose);
    }
}
