//! Output collaborators: live status readouts and per-frame drawing data.
//!
//! Neither sink feeds anything back into the simulation.

use serde::{Deserialize, Serialize};

use crate::agent::{ControlOutputs, SensorReading};
use crate::episode::DataPoint;
use crate::physics::BoxShape;
use crate::scheduler::GenerationSummary;
use crate::track::TrackGeometry;
use crate::{Activations, Generation, LayerWeights, Pose, Vec2};

/// Values shown by the host UI, refreshed once per frame.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct StatusSnapshot {
    pub generation: Generation,
    pub genome: usize,
    pub best_fitness: f32,
    pub fitness: f32,
    pub average_speed: f32,
}

/// Text/number readouts for the host UI.
pub trait StatusSink {
    fn update(&mut self, snapshot: &StatusSnapshot);

    fn generation_complete(&mut self, _summary: &GenerationSummary) {}
}

/// Everything a renderer needs to draw one tick.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub track: &'a TrackGeometry,
    pub pose: Pose,
    pub body: BoxShape,
    pub sensors: &'a [SensorReading],
    pub controls: ControlOutputs,
    pub activations: &'a Activations,
    pub weights: LayerWeights<'a>,
    pub trail: &'a [DataPoint],
    /// Trails of the genomes already run in this generation.
    pub previous_trails: &'a [Vec<Vec2>],
    pub average_speed: f32,
    pub min_speed: f32,
    pub max_speed: f32,
}

pub trait FrameSink {
    fn draw(&mut self, frame: &FrameView<'_>);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullStatusSink;

impl StatusSink for NullStatusSink {
    fn update(&mut self, _snapshot: &StatusSnapshot) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullFrameSink;

impl FrameSink for NullFrameSink {
    fn draw(&mut self, _frame: &FrameView<'_>) {}
}
