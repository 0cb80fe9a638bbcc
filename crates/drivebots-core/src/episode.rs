//! Lifecycle of one genome's drive around the track.
//!
//! `Unbound → Idle → Running → Finished`. Binding rebuilds the shared world and takes the single
//! begin-contact subscription; finishing or unbinding hands it back.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, trace};

use crate::agent::{Agent, ControlOutputs};
use crate::fitness::fitness;
use crate::physics::{ContactSubscription, PhysicsError, PhysicsWorld};
use crate::render::FrameView;
use crate::track::{TrackBodies, TrackGeometry};
use crate::{
    Activations, AgentConfig, CHECKPOINT_GROUP, ConfigError, Controller, EpisodeConfig,
    NUM_OUTPUTS, NetworkError, Pose, Tick, Vec2,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpisodeState {
    Unbound,
    Idle,
    Running,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    WallContact,
    Stalled,
    Killed,
    TickLimit,
}

/// Errors raised by the episode runner.
#[derive(Debug, Error, PartialEq)]
pub enum EpisodeError {
    #[error("controller has {actual} inputs but the agent has {expected} sensors")]
    InputMismatch { expected: usize, actual: usize },
    #[error("controller has {actual} outputs but {expected} are required")]
    OutputMismatch { expected: usize, actual: usize },
    #[error("episode is not bound to a physics world")]
    NotBound,
    #[error("episode is not running (state {state:?})")]
    NotRunning { state: EpisodeState },
    #[error("episode can only start from idle (state {state:?})")]
    NotIdle { state: EpisodeState },
    #[error(transparent)]
    Physics(#[from] PhysicsError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Sample recorded once per tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DataPoint {
    pub position: Vec2,
    pub speed: f32,
    pub fitness: f32,
}

/// Per-episode history and running extremes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpisodeData {
    pub datapoints: Vec<DataPoint>,
    pub min_speed: f32,
    pub max_speed: f32,
    pub best_fitness: f32,
}

impl Default for EpisodeData {
    fn default() -> Self {
        Self {
            datapoints: Vec::new(),
            min_speed: 0.0,
            max_speed: 1.0,
            best_fitness: 0.0,
        }
    }
}

impl EpisodeData {
    #[must_use]
    pub fn trail(&self) -> Vec<Vec2> {
        self.datapoints.iter().map(|d| d.position).collect()
    }

    fn record(&mut self, point: DataPoint) {
        self.max_speed = self.max_speed.max(point.speed);
        self.min_speed = self.min_speed.min(point.speed);
        self.best_fitness = self.best_fitness.max(point.fitness);
        self.datapoints.push(point);
    }
}

/// Live values of a tick that did not end the episode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TickReport {
    pub tick: Tick,
    pub fitness: f32,
    pub average_speed: f32,
    pub checkpoint: usize,
    pub laps: u32,
    pub controls: ControlOutputs,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EpisodeResult {
    /// Best fitness reached during the episode.
    pub fitness: f32,
    pub reason: FinishReason,
    pub ticks: Tick,
    pub laps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    Running(TickReport),
    Finished(EpisodeResult),
}

/// Drives one controller around the track, one physics step per [`EpisodeRunner::tick`].
#[derive(Debug)]
pub struct EpisodeRunner<C: Controller> {
    controller: C,
    agent: Agent,
    config: EpisodeConfig,
    track: Arc<TrackGeometry>,
    state: EpisodeState,
    subscription: Option<ContactSubscription>,
    bodies: TrackBodies,
    checkpoint: usize,
    laps: u32,
    stall_countdown: u32,
    tick: Tick,
    pose: Pose,
    controls: ControlOutputs,
    activations: Activations,
    data: EpisodeData,
    result: Option<EpisodeResult>,
}

impl<C: Controller> EpisodeRunner<C> {
    /// Pair `controller` with a fresh agent. The network must read every sensor and produce
    /// throttle, brake and steer.
    pub fn new(
        controller: C,
        agent: &AgentConfig,
        config: EpisodeConfig,
        track: Arc<TrackGeometry>,
    ) -> Result<Self, EpisodeError> {
        config.validate()?;
        let agent = Agent::new(agent)?;
        let structure = controller.structure();
        if structure.num_inputs != agent.num_sensors() {
            return Err(EpisodeError::InputMismatch {
                expected: agent.num_sensors(),
                actual: structure.num_inputs,
            });
        }
        if structure.num_outputs != NUM_OUTPUTS {
            return Err(EpisodeError::OutputMismatch {
                expected: NUM_OUTPUTS,
                actual: structure.num_outputs,
            });
        }
        Ok(Self {
            controller,
            agent,
            stall_countdown: config.stall_ticks,
            config,
            track,
            state: EpisodeState::Unbound,
            subscription: None,
            bodies: TrackBodies::default(),
            checkpoint: 0,
            laps: 0,
            tick: Tick::zero(),
            pose: Pose::default(),
            controls: ControlOutputs::default(),
            activations: Activations::default(),
            data: EpisodeData::default(),
            result: None,
        })
    }

    /// Rebuild `world` with the track and this runner's agent and take the contact subscription.
    pub fn bind<W: PhysicsWorld + ?Sized>(&mut self, world: &mut W) -> Result<(), EpisodeError> {
        self.release_subscription(world)?;
        self.subscription = Some(world.subscribe_begin_contact()?);
        world.clear();
        self.agent.detach();
        self.bodies = self.track.populate(world);
        self.agent.add_to_world(world);
        self.state = EpisodeState::Idle;
        Ok(())
    }

    /// Hand the contact subscription back to `world`.
    pub fn unbind<W: PhysicsWorld + ?Sized>(&mut self, world: &mut W) -> Result<(), EpisodeError> {
        self.release_subscription(world)?;
        self.agent.detach();
        self.bodies = TrackBodies::default();
        self.state = EpisodeState::Unbound;
        Ok(())
    }

    fn release_subscription<W: PhysicsWorld + ?Sized>(
        &mut self,
        world: &mut W,
    ) -> Result<(), PhysicsError> {
        match self.subscription.take() {
            Some(subscription) => world.unsubscribe(subscription),
            None => Ok(()),
        }
    }

    /// Reset progress, place the agent on the start line and record the first datapoint.
    pub fn start<W: PhysicsWorld + ?Sized>(&mut self, world: &mut W) -> Result<(), EpisodeError> {
        match self.state {
            EpisodeState::Idle => {}
            EpisodeState::Unbound => {
                error!("start called on an unbound episode");
                return Err(EpisodeError::NotBound);
            }
            state => {
                error!(?state, "start called outside the idle state");
                return Err(EpisodeError::NotIdle { state });
            }
        }
        self.checkpoint = 0;
        self.laps = 0;
        self.stall_countdown = self.config.stall_ticks;
        self.tick = Tick::zero();
        self.data = EpisodeData::default();
        self.result = None;
        self.controls = ControlOutputs::default();

        // Body forward is local +y, so the heading is rotated a quarter turn.
        self.pose = Pose::new(
            self.track.initial_position(),
            self.track.initial_angle() - std::f32::consts::FRAC_PI_2,
        );
        self.agent.place(world, self.pose)?;
        if let Some(subscription) = &self.subscription {
            world.drain_contacts(subscription)?;
        }

        let fitness = self.current_fitness();
        self.data.datapoints.push(DataPoint {
            position: self.pose.position,
            speed: self.agent.average_speed(),
            fitness,
        });
        self.state = EpisodeState::Running;
        Ok(())
    }

    fn ensure_running(&self, operation: &'static str) -> Result<(), EpisodeError> {
        match self.state {
            EpisodeState::Running => Ok(()),
            EpisodeState::Unbound => {
                error!(operation, "episode is not bound");
                Err(EpisodeError::NotBound)
            }
            state => {
                error!(operation, ?state, "episode is not running");
                Err(EpisodeError::NotRunning { state })
            }
        }
    }

    /// Advance exactly one physics step and run the control loop on its result.
    pub fn tick<W: PhysicsWorld + ?Sized>(
        &mut self,
        world: &mut W,
    ) -> Result<TickOutcome, EpisodeError> {
        self.ensure_running("tick")?;
        world.step(self.config.timestep);
        self.tick = self.tick.next();

        let subscription = self.subscription.as_ref().ok_or(EpisodeError::NotBound)?;
        for event in world.drain_contacts(subscription)? {
            match event.body_in_group(CHECKPOINT_GROUP) {
                Some(body) => {
                    if let Some(index) = self.bodies.checkpoint_for(body) {
                        self.hit_checkpoint(index);
                    }
                }
                None => return self.finish(world, FinishReason::WallContact),
            }
        }

        self.agent.compute_sensor_intersections(world)?;
        let inputs = self.agent.normalized_sensor_values();
        self.activations = self.controller.evaluate(&inputs)?;
        self.controls = ControlOutputs::from_outputs(&self.activations.outputs).ok_or(
            EpisodeError::OutputMismatch {
                expected: NUM_OUTPUTS,
                actual: self.activations.outputs.len(),
            },
        )?;
        self.agent.actuate(world, self.controls, &self.config)?;
        let average_speed = self
            .agent
            .update_average_speed(world, self.config.moving_average_alpha)?;

        self.pose = self.agent.pose(world)?;
        let fitness = self.current_fitness();
        self.data.record(DataPoint {
            position: self.pose.position,
            speed: average_speed,
            fitness,
        });

        if average_speed.abs() < self.config.min_average_speed {
            self.stall_countdown = self.stall_countdown.saturating_sub(1);
            if self.stall_countdown == 0 {
                return self.finish(world, FinishReason::Stalled);
            }
        } else {
            self.stall_countdown = self.config.stall_ticks;
        }

        if self
            .config
            .max_episode_ticks
            .is_some_and(|limit| self.tick.0 >= u64::from(limit))
        {
            return self.finish(world, FinishReason::TickLimit);
        }

        Ok(TickOutcome::Running(TickReport {
            tick: self.tick,
            fitness,
            average_speed,
            checkpoint: self.checkpoint,
            laps: self.laps,
            controls: self.controls,
        }))
    }

    /// End a running episode now, scoring it with the better of its best and current fitness.
    pub fn kill<W: PhysicsWorld + ?Sized>(
        &mut self,
        world: &mut W,
    ) -> Result<EpisodeResult, EpisodeError> {
        self.ensure_running("kill")?;
        self.pose = self.agent.pose(world)?;
        let current = self.current_fitness();
        self.data.best_fitness = self.data.best_fitness.max(current);
        match self.finish(world, FinishReason::Killed)? {
            TickOutcome::Finished(result) => Ok(result),
            TickOutcome::Running(_) => Err(EpisodeError::NotRunning { state: self.state }),
        }
    }

    fn finish<W: PhysicsWorld + ?Sized>(
        &mut self,
        world: &mut W,
        reason: FinishReason,
    ) -> Result<TickOutcome, EpisodeError> {
        self.release_subscription(world)?;
        self.state = EpisodeState::Finished;
        let result = EpisodeResult {
            fitness: self.data.best_fitness,
            reason,
            ticks: self.tick,
            laps: self.laps,
        };
        self.result = Some(result);
        debug!(
            ?reason,
            fitness = result.fitness,
            ticks = result.ticks.0,
            laps = result.laps,
            "Episode finished"
        );
        Ok(TickOutcome::Finished(result))
    }

    fn hit_checkpoint(&mut self, index: usize) {
        if index != self.checkpoint {
            return;
        }
        let is_last = self
            .track
            .checkpoint(index)
            .is_some_and(|checkpoint| checkpoint.is_last);
        if is_last {
            self.laps += 1;
            self.checkpoint = 0;
        } else {
            self.checkpoint += 1;
        }
        trace!(
            checkpoint = self.checkpoint,
            laps = self.laps,
            "Checkpoint reached"
        );
    }

    fn current_fitness(&self) -> f32 {
        fitness(self.laps, self.checkpoint, self.pose.position, &self.track)
    }

    /// Drawing data for the latest tick.
    #[must_use]
    pub fn frame<'a>(&'a self, previous_trails: &'a [Vec<Vec2>]) -> FrameView<'a> {
        FrameView {
            track: &self.track,
            pose: self.pose,
            body: self.agent.shape(),
            sensors: self.agent.readings(),
            controls: self.controls,
            activations: &self.activations,
            weights: self.controller.weights(),
            trail: &self.data.datapoints,
            previous_trails,
            average_speed: self.agent.average_speed(),
            min_speed: self.data.min_speed,
            max_speed: self.data.max_speed,
        }
    }

    #[must_use]
    pub const fn state(&self) -> EpisodeState {
        self.state
    }

    #[must_use]
    pub const fn controller(&self) -> &C {
        &self.controller
    }

    #[must_use]
    pub const fn agent(&self) -> &Agent {
        &self.agent
    }

    #[must_use]
    pub const fn data(&self) -> &EpisodeData {
        &self.data
    }

    #[must_use]
    pub const fn activations(&self) -> &Activations {
        &self.activations
    }

    #[must_use]
    pub const fn checkpoint(&self) -> usize {
        self.checkpoint
    }

    #[must_use]
    pub const fn laps(&self) -> u32 {
        self.laps
    }

    #[must_use]
    pub const fn result(&self) -> Option<EpisodeResult> {
        self.result
    }

    /// Live fitness at the latest recorded pose.
    #[must_use]
    pub fn fitness(&self) -> f32 {
        self.current_fitness()
    }

    /// Give back the controller and recorded history.
    #[must_use]
    pub fn into_parts(self) -> (C, EpisodeData) {
        (self.controller, self.data)
    }
}
