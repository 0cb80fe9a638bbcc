//! Core types shared across the DriveBots workspace.

use rand::{RngCore, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub};
use thiserror::Error;

pub mod agent;
pub mod episode;
pub mod fitness;
pub mod physics;
pub mod render;
pub mod scheduler;
pub mod track;

#[cfg(test)]
mod testing;

pub use agent::{Agent, ControlOutputs, Sensor, SensorHit, SensorReading};
pub use episode::{
    DataPoint, EpisodeData, EpisodeError, EpisodeResult, EpisodeRunner, EpisodeState,
    FinishReason, TickOutcome, TickReport,
};
pub use fitness::fitness;
pub use physics::{
    BodyDesc, BodyId, BoxShape, ContactEvent, ContactSubscription, PhysicsError, PhysicsWorld,
    Ray, RayHit, ShapeInfo, VehicleControls, VehicleDesc,
};
pub use render::{FrameSink, FrameView, NullFrameSink, NullStatusSink, StatusSink, StatusSnapshot};
pub use scheduler::{
    ControlCommand, FrameEvent, GenerationSummary, GeneticScheduler, SchedulerState,
    SimulationError, apply_control_command,
};
pub use track::{Checkpoint, TrackBodies, TrackError, TrackGeometry, TrackPoint, WallSegment};

/// Default drivable width between the inner faces of the two walls.
pub const DEFAULT_TRACK_WIDTH: f32 = 80.0;
/// Thickness of the wall boxes lining the track.
pub const WALL_THICKNESS: f32 = 5.0;
/// Depth of the checkpoint sensor gates.
pub const CHECKPOINT_THICKNESS: f32 = 0.5;
/// Fixed physics timestep used for every episode tick.
pub const TIMESTEP: f32 = 1.0 / 60.0;
/// Smoothing factor for the running speed average.
pub const MOVING_AVERAGE_ALPHA: f32 = 0.1;
/// Steering angle (radians) produced by a fully saturated steer output.
pub const STEER_GAIN: f32 = 0.63;
/// Force applied by a fully saturated throttle or brake output.
pub const DRIVE_FORCE: f32 = 150.0;
/// Control outputs produced by every network: throttle, brake, steer.
pub const NUM_OUTPUTS: usize = 3;

pub const WALL_GROUP: u32 = 0b10;
pub const CAR_GROUP: u32 = 0b100;
pub const SENSOR_GROUP: u32 = 0b1000;
pub const CHECKPOINT_GROUP: u32 = 0b1_0000;

/// Two-component vector in world units.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(from = "[f32; 2]", into = "[f32; 2]")]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self::new(0.0, 0.0);

    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Unit vector pointing along `angle` (radians, counter-clockwise from +x).
    #[must_use]
    pub fn from_angle(angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self::new(cos, sin)
    }

    #[must_use]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y
    }

    /// Z component of the 3D cross product.
    #[must_use]
    pub fn cross(self, other: Self) -> f32 {
        self.x * other.y - self.y * other.x
    }

    #[must_use]
    pub fn length_squared(self) -> f32 {
        self.dot(self)
    }

    #[must_use]
    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    #[must_use]
    pub fn distance(self, other: Self) -> f32 {
        (other - self).length()
    }

    #[must_use]
    pub fn midpoint(self, other: Self) -> Self {
        (self + other) * 0.5
    }

    /// Direction angle of this vector.
    #[must_use]
    pub fn angle(self) -> f32 {
        self.y.atan2(self.x)
    }

    #[must_use]
    pub fn rotate(self, angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self::new(cos * self.x - sin * self.y, sin * self.x + cos * self.y)
    }

    /// Counter-clockwise perpendicular.
    #[must_use]
    pub fn perp(self) -> Self {
        Self::new(-self.y, self.x)
    }

    #[must_use]
    pub fn normalized(self) -> Option<Self> {
        let len = self.length();
        (len > f32::EPSILON).then(|| self * (1.0 / len))
    }

    #[must_use]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<[f32; 2]> for Vec2 {
    fn from([x, y]: [f32; 2]) -> Self {
        Self::new(x, y)
    }
}

impl From<Vec2> for [f32; 2] {
    fn from(v: Vec2) -> Self {
        [v.x, v.y]
    }
}

impl Add for Vec2 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vec2 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl Neg for Vec2 {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

/// Rigid-body placement: position plus rotation in radians.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Pose {
    pub position: Vec2,
    pub angle: f32,
}

impl Pose {
    #[must_use]
    pub const fn new(position: Vec2, angle: f32) -> Self {
        Self { position, angle }
    }

    /// Transform a body-local point into world space.
    #[must_use]
    pub fn to_world(&self, local: Vec2) -> Vec2 {
        self.position + local.rotate(self.angle)
    }
}

/// Collision group/mask pair. Two filters interact only when each group is in the other's mask.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CollisionFilter {
    pub group: u32,
    pub mask: u32,
}

impl CollisionFilter {
    pub const WALL: Self = Self::new(WALL_GROUP, CAR_GROUP | SENSOR_GROUP);
    pub const CAR: Self = Self::new(CAR_GROUP, WALL_GROUP | CHECKPOINT_GROUP);
    pub const SENSOR: Self = Self::new(SENSOR_GROUP, WALL_GROUP);
    pub const CHECKPOINT: Self = Self::new(CHECKPOINT_GROUP, CAR_GROUP);

    #[must_use]
    pub const fn new(group: u32, mask: u32) -> Self {
        Self { group, mask }
    }

    #[must_use]
    pub const fn interacts(self, other: Self) -> bool {
        self.group & other.mask != 0 && other.group & self.mask != 0
    }
}

/// Physics ticks processed within the current episode.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tick(pub u64);

impl Tick {
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Generation counter of the genetic scheduler.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct Generation(pub u32);

impl Generation {
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Layer sizes of a single-hidden-layer controller network.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NetworkStructure {
    pub num_inputs: usize,
    pub num_hidden_nodes: usize,
    pub num_outputs: usize,
}

impl NetworkStructure {
    #[must_use]
    pub const fn new(num_inputs: usize, num_hidden_nodes: usize, num_outputs: usize) -> Self {
        Self {
            num_inputs,
            num_hidden_nodes,
            num_outputs,
        }
    }

    /// Length of the input-to-hidden weight matrix.
    #[must_use]
    pub const fn input_weight_count(&self) -> usize {
        self.num_inputs * self.num_hidden_nodes
    }

    /// Length of the hidden-to-output weight matrix.
    #[must_use]
    pub const fn hidden_weight_count(&self) -> usize {
        self.num_hidden_nodes * self.num_outputs
    }
}

impl fmt::Display for NetworkStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.num_inputs, self.num_hidden_nodes, self.num_outputs
        )
    }
}

/// Crossover and mutation knobs used when breeding two parents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BreedingParams {
    /// Probability that an inherited weight is perturbed.
    pub mutation_chance: f32,
    /// Width of the uniform perturbation window centred on zero.
    pub mutation_amount: f32,
}

impl Default for BreedingParams {
    fn default() -> Self {
        Self {
            mutation_chance: 0.1,
            mutation_amount: 0.1,
        }
    }
}

/// Layer values produced by one network evaluation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Activations {
    pub inputs: Vec<f32>,
    pub hidden: Vec<f32>,
    pub outputs: Vec<f32>,
}

/// Borrowed view over a network's two weight matrices.
#[derive(Debug, Clone, Copy)]
pub struct LayerWeights<'a> {
    pub input_layer: &'a [f32],
    pub hidden_layer: &'a [f32],
}

/// Errors raised when constructing or evaluating controller networks.
#[derive(Debug, Error, PartialEq)]
pub enum NetworkError {
    #[error("{layer} weights expected {expected} values but got {actual}")]
    WeightCountMismatch {
        layer: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("network expects {expected} inputs but received {actual}")]
    InputMismatch { expected: usize, actual: usize },
}

/// Genome-backed controller driving one agent. Immutable once built; new genomes come from
/// `random`, `reshaped` or `from_parents`.
pub trait Controller: Clone + fmt::Debug + Send {
    /// Static identifier of the controller implementation.
    fn kind(&self) -> &'static str;

    fn structure(&self) -> NetworkStructure;

    /// Evaluate the network for one sensor vector.
    fn evaluate(&self, inputs: &[f32]) -> Result<Activations, NetworkError>;

    fn weights(&self) -> LayerWeights<'_>;

    /// Fresh genome with uniformly random weights.
    fn random(structure: NetworkStructure, rng: &mut dyn RngCore) -> Self;

    /// Adapt a carried-over genome to `structure`, keeping existing weights as a prefix.
    fn reshaped(&self, structure: NetworkStructure, rng: &mut dyn RngCore) -> Self;

    /// Uniform crossover of two parents followed by bounded mutation.
    fn from_parents(
        structure: NetworkStructure,
        parents: [&Self; 2],
        params: BreedingParams,
        rng: &mut dyn RngCore,
    ) -> Self;

    /// Load explicit weight matrices, rejecting lengths that do not fit `structure`.
    fn from_weights(
        structure: NetworkStructure,
        input_layer: Vec<f32>,
        hidden_layer: Vec<f32>,
    ) -> Result<Self, NetworkError>;
}

/// Errors that can occur when validating configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Centerline definition of the circuit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackConfig {
    /// Closed centerline polygon; the last point connects back to the first.
    pub points: Vec<TrackPoint>,
    /// Width used by points that do not override it.
    pub default_width: f32,
}

impl Default for TrackConfig {
    fn default() -> Self {
        const CIRCUIT: [[f32; 2]; 18] = [
            [130.0, 110.0],
            [150.0, 320.0],
            [90.0, 420.0],
            [110.0, 520.0],
            [400.0, 540.0],
            [650.0, 500.0],
            [700.0, 420.0],
            [660.0, 360.0],
            [560.0, 360.0],
            [400.0, 400.0],
            [320.0, 360.0],
            [300.0, 240.0],
            [390.0, 180.0],
            [620.0, 240.0],
            [700.0, 180.0],
            [685.0, 120.0],
            [600.0, 65.0],
            [305.0, 75.0],
        ];
        Self {
            points: CIRCUIT
                .iter()
                .map(|&p| TrackPoint::new(Vec2::from(p)))
                .collect(),
            default_width: DEFAULT_TRACK_WIDTH,
        }
    }
}

/// Vehicle body and sensor fan configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Width of the chassis box (wheel axle direction).
    pub body_width: f32,
    /// Length of the chassis box (forward direction).
    pub body_height: f32,
    pub mass: f32,
    /// Number of distance sensors; must be odd so the fan is symmetric.
    pub num_sensors: usize,
    pub sensor_length: f32,
    /// Total spread of the sensor fan in radians.
    pub sensor_angle: f32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            body_width: 20.0,
            body_height: 40.0,
            mass: 1.0,
            num_sensors: 3,
            sensor_length: 120.0,
            sensor_angle: std::f32::consts::FRAC_PI_2,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.body_width > 0.0 && self.body_height > 0.0) {
            return Err(ConfigError::InvalidConfig(
                "body_width and body_height must be positive",
            ));
        }
        if !(self.mass > 0.0) {
            return Err(ConfigError::InvalidConfig("mass must be positive"));
        }
        if self.num_sensors == 0 || self.num_sensors.is_multiple_of(2) {
            return Err(ConfigError::InvalidConfig(
                "num_sensors must be odd and at least 1",
            ));
        }
        if !(self.sensor_length > 0.0) {
            return Err(ConfigError::InvalidConfig("sensor_length must be positive"));
        }
        if !(0.0..=std::f32::consts::TAU).contains(&self.sensor_angle) {
            return Err(ConfigError::InvalidConfig(
                "sensor_angle must be within [0, 2π]",
            ));
        }
        Ok(())
    }
}

/// Per-episode physics and termination settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EpisodeConfig {
    pub timestep: f32,
    pub moving_average_alpha: f32,
    /// Running speed average below which a tick counts towards a stall.
    pub min_average_speed: f32,
    /// Consecutive slow ticks that end the episode.
    pub stall_ticks: u32,
    pub steer_gain: f32,
    pub drive_force: f32,
    /// Optional hard cap on episode length; `None` lets good drivers lap forever.
    pub max_episode_ticks: Option<u32>,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            timestep: TIMESTEP,
            moving_average_alpha: MOVING_AVERAGE_ALPHA,
            min_average_speed: 1.0,
            stall_ticks: 60,
            steer_gain: STEER_GAIN,
            drive_force: DRIVE_FORCE,
            max_episode_ticks: None,
        }
    }
}

impl EpisodeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.timestep > 0.0) {
            return Err(ConfigError::InvalidConfig("timestep must be positive"));
        }
        if !(self.moving_average_alpha > 0.0 && self.moving_average_alpha <= 1.0) {
            return Err(ConfigError::InvalidConfig(
                "moving_average_alpha must be within (0, 1]",
            ));
        }
        if self.min_average_speed < 0.0 {
            return Err(ConfigError::InvalidConfig(
                "min_average_speed must be non-negative",
            ));
        }
        if self.stall_ticks == 0 {
            return Err(ConfigError::InvalidConfig("stall_ticks must be positive"));
        }
        if self.max_episode_ticks == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "max_episode_ticks must be positive when set",
            ));
        }
        Ok(())
    }
}

/// Population sizing and breeding configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvolutionConfig {
    pub generation_size: usize,
    /// Top performers copied unchanged into the next generation.
    pub num_best_performers_to_keep: usize,
    /// Top performers eligible as crossover parents.
    pub num_breeders: usize,
    /// Slots at the end of every generation reserved for fresh random networks.
    pub num_random: usize,
    pub hidden_nodes: usize,
    pub breeding: BreedingParams,
    /// Pretrained network driven by the very first genome of a run.
    pub seed_weights: Option<SeedWeights>,
}

/// Explicit weights in the controller's row-major layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeedWeights {
    pub input_layer: Vec<f32>,
    pub hidden_layer: Vec<f32>,
}

impl SeedWeights {
    /// Check both matrices against `structure`.
    pub fn validate(&self, structure: NetworkStructure) -> Result<(), ConfigError> {
        if self.input_layer.len() != structure.input_weight_count() {
            return Err(ConfigError::InvalidConfig(
                "seed_weights.input_layer does not match num_sensors * hidden_nodes",
            ));
        }
        if self.hidden_layer.len() != structure.hidden_weight_count() {
            return Err(ConfigError::InvalidConfig(
                "seed_weights.hidden_layer does not match hidden_nodes * 3",
            ));
        }
        Ok(())
    }
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            generation_size: 20,
            num_best_performers_to_keep: 1,
            num_breeders: 3,
            num_random: 1,
            hidden_nodes: 10,
            breeding: BreedingParams::default(),
            seed_weights: None,
        }
    }
}

impl EvolutionConfig {
    /// Validate sizing and breeding knobs. Seed weights depend on the sensor count and are
    /// checked by [`EvolutionConfig::validate_for`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generation_size == 0 {
            return Err(ConfigError::InvalidConfig("generation_size must be positive"));
        }
        if self.num_best_performers_to_keep + self.num_random > self.generation_size {
            return Err(ConfigError::InvalidConfig(
                "elites plus random immigrants exceed generation_size",
            ));
        }
        if self.num_breeders == 0 {
            return Err(ConfigError::InvalidConfig("num_breeders must be positive"));
        }
        if self.hidden_nodes == 0 {
            return Err(ConfigError::InvalidConfig("hidden_nodes must be positive"));
        }
        if !(0.0..=1.0).contains(&self.breeding.mutation_chance) {
            return Err(ConfigError::InvalidConfig(
                "mutation_chance must be within [0, 1]",
            ));
        }
        if !(self.breeding.mutation_amount >= 0.0) {
            return Err(ConfigError::InvalidConfig(
                "mutation_amount must be non-negative",
            ));
        }
        Ok(())
    }

    /// Full validation against an agent with `num_sensors` rays.
    pub fn validate_for(&self, num_sensors: usize) -> Result<(), ConfigError> {
        self.validate()?;
        match &self.seed_weights {
            Some(seed) => seed.validate(self.network_structure(num_sensors)),
            None => Ok(()),
        }
    }

    /// Network shape implied by this configuration for an agent with `num_sensors` rays.
    #[must_use]
    pub const fn network_structure(&self, num_sensors: usize) -> NetworkStructure {
        NetworkStructure::new(num_sensors, self.hidden_nodes, NUM_OUTPUTS)
    }
}

/// Static configuration for a DriveBots training run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DrivebotsConfig {
    pub track: TrackConfig,
    pub agent: AgentConfig,
    pub episode: EpisodeConfig,
    pub evolution: EvolutionConfig,
    /// Optional RNG seed for reproducible runs.
    pub rng_seed: Option<u64>,
}

impl DrivebotsConfig {
    /// Validate every section; track geometry is validated when it is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.track.default_width > 0.0) {
            return Err(ConfigError::InvalidConfig("default_width must be positive"));
        }
        self.agent.validate()?;
        self.episode.validate()?;
        self.evolution.validate_for(self.agent.num_sensors)
    }

    /// Network shape for the configured sensor fan.
    #[must_use]
    pub const fn network_structure(&self) -> NetworkStructure {
        self.evolution.network_structure(self.agent.num_sensors)
    }

    /// Construct the run RNG, seeded when `rng_seed` is set.
    #[must_use]
    pub fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// Wrap `value` into `0..modulus`, also for negative inputs.
#[must_use]
pub fn wrapped_index(value: isize, modulus: usize) -> usize {
    value.rem_euclid(modulus as isize) as usize
}
