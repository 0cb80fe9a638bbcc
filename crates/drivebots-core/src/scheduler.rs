//! Genetic scheduler: runs one episode per genome and breeds each generation from the last.

use std::cmp::Reverse;
use std::sync::Arc;

use ordered_float::OrderedFloat;
use rand::{Rng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::episode::{
    EpisodeError, EpisodeResult, EpisodeRunner, EpisodeState, TickOutcome, TickReport,
};
use crate::physics::PhysicsWorld;
use crate::render::{FrameSink, NullFrameSink, NullStatusSink, StatusSink, StatusSnapshot};
use crate::track::{TrackError, TrackGeometry};
use crate::{
    AgentConfig, ConfigError, Controller, DrivebotsConfig, EpisodeConfig, EvolutionConfig,
    Generation, NetworkError, NetworkStructure, Vec2,
};

/// Errors surfaced while driving a training run.
#[derive(Debug, Error, PartialEq)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Track(#[from] TrackError),
    #[error(transparent)]
    Episode(#[from] EpisodeError),
    #[error(transparent)]
    Network(#[from] NetworkError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerState {
    /// Fresh or reset; waiting for `start`.
    Stopped,
    Running,
}

/// Parameterless commands from the host UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlCommand {
    Start,
    Kill,
    Reset,
}

/// Fitness statistics of one completed generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationSummary {
    pub generation: Generation,
    pub genomes: usize,
    pub best_fitness: f32,
    pub mean_fitness: f32,
    /// Genomes carried unchanged into the next generation.
    pub elites: usize,
}

/// What a call to [`GeneticScheduler::frame`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    Idle,
    Ticked(TickReport),
    EpisodeFinished(EpisodeResult),
    GenerationFinished {
        result: EpisodeResult,
        summary: GenerationSummary,
    },
}

/// Owns the physics world, the population and the active episode.
pub struct GeneticScheduler<W: PhysicsWorld, C: Controller> {
    world: W,
    track: Arc<TrackGeometry>,
    agent: AgentConfig,
    episode: EpisodeConfig,
    evolution: EvolutionConfig,
    pending: Option<(AgentConfig, EvolutionConfig)>,
    rng: SmallRng,
    status: Box<dyn StatusSink>,
    frames: Box<dyn FrameSink>,
    state: SchedulerState,
    generation: Generation,
    genome: usize,
    best_fitness: f32,
    population: Vec<(f32, C)>,
    /// Worst first, so `pop` hands out the best elite.
    elites: Vec<C>,
    breeders: Vec<C>,
    trails: Vec<Vec<Vec2>>,
    active: Option<EpisodeRunner<C>>,
    history: Vec<GenerationSummary>,
}

impl<W: PhysicsWorld, C: Controller> GeneticScheduler<W, C> {
    /// Validate `config`, build the track and bind the first episode to `world`.
    pub fn new(config: &DrivebotsConfig, world: W) -> Result<Self, SimulationError> {
        config.validate()?;
        let track = Arc::new(TrackGeometry::from_config(&config.track)?);
        info!(
            checkpoints = track.checkpoints().len(),
            track_length = track.total_track_length(),
            network = %config.network_structure(),
            generation_size = config.evolution.generation_size,
            "Initialised genetic scheduler"
        );
        let mut scheduler = Self {
            world,
            track,
            agent: config.agent.clone(),
            episode: config.episode.clone(),
            evolution: config.evolution.clone(),
            pending: None,
            rng: config.seeded_rng(),
            status: Box::new(NullStatusSink),
            frames: Box::new(NullFrameSink),
            state: SchedulerState::Stopped,
            generation: Generation::default(),
            genome: 0,
            best_fitness: 0.0,
            population: Vec::new(),
            elites: Vec::new(),
            breeders: Vec::new(),
            trails: Vec::new(),
            active: None,
            history: Vec::new(),
        };
        scheduler.reset()?;
        Ok(scheduler)
    }

    #[must_use]
    pub fn with_status_sink(mut self, sink: impl StatusSink + 'static) -> Self {
        self.status = Box::new(sink);
        self
    }

    #[must_use]
    pub fn with_frame_sink(mut self, sink: impl FrameSink + 'static) -> Self {
        self.frames = Box::new(sink);
        self
    }

    /// Forget all progress and bind a fresh first-generation episode. Leaves the scheduler stopped.
    pub fn reset(&mut self) -> Result<(), SimulationError> {
        if let Some(mut runner) = self.active.take() {
            runner.unbind(&mut self.world)?;
        }
        self.state = SchedulerState::Stopped;
        self.generation = Generation::default();
        self.genome = 0;
        self.best_fitness = 0.0;
        self.population.clear();
        self.elites.clear();
        self.breeders.clear();
        self.trails.clear();
        self.history.clear();
        self.active = Some(self.create_runner()?);
        debug!("Scheduler reset");
        Ok(())
    }

    /// Begin running episodes. No-op while already running.
    pub fn start(&mut self) -> Result<(), SimulationError> {
        if self.state == SchedulerState::Running {
            return Ok(());
        }
        if self.active.is_none() {
            self.active = Some(self.create_runner()?);
        }
        if let Some(runner) = self.active.as_mut() {
            if runner.state() == EpisodeState::Idle {
                runner.start(&mut self.world)?;
            }
        }
        self.state = SchedulerState::Running;
        self.push_status(0.0, 0.0);
        info!(generation = %self.generation, genome = self.genome, "Training started");
        Ok(())
    }

    /// Advance the active episode by one tick.
    pub fn frame(&mut self) -> Result<FrameEvent, SimulationError> {
        if self.state != SchedulerState::Running {
            return Ok(FrameEvent::Idle);
        }
        let runner = self.active.as_mut().ok_or(EpisodeError::NotBound)?;
        match runner.tick(&mut self.world)? {
            TickOutcome::Running(report) => {
                self.best_fitness = self.best_fitness.max(report.fitness);
                self.frames.draw(&runner.frame(&self.trails));
                self.push_status(report.fitness, report.average_speed);
                Ok(FrameEvent::Ticked(report))
            }
            TickOutcome::Finished(result) => self.complete_episode(result),
        }
    }

    /// End the active episode as if it stalled. No-op when nothing is running.
    pub fn kill_current_simulation(&mut self) -> Result<Option<FrameEvent>, SimulationError> {
        let Some(runner) = self
            .active
            .as_mut()
            .filter(|runner| runner.state() == EpisodeState::Running)
        else {
            debug!("Kill requested with no running episode");
            return Ok(None);
        };
        let result = runner.kill(&mut self.world)?;
        self.complete_episode(result).map(Some)
    }

    /// Stage new agent and evolution settings; they take effect at the next generation boundary.
    pub fn reconfigure(
        &mut self,
        agent: AgentConfig,
        evolution: EvolutionConfig,
    ) -> Result<(), SimulationError> {
        agent.validate()?;
        evolution.validate_for(agent.num_sensors)?;
        debug!(
            network = %evolution.network_structure(agent.num_sensors),
            "Staged configuration for next generation"
        );
        self.pending = Some((agent, evolution));
        Ok(())
    }

    fn complete_episode(&mut self, result: EpisodeResult) -> Result<FrameEvent, SimulationError> {
        let mut runner = self.active.take().ok_or(EpisodeError::NotBound)?;
        runner.unbind(&mut self.world)?;
        let (controller, data) = runner.into_parts();
        self.best_fitness = self.best_fitness.max(result.fitness);
        self.trails.push(data.trail());
        self.population.push((result.fitness, controller));
        debug!(
            generation = %self.generation,
            genome = self.genome,
            fitness = result.fitness,
            reason = ?result.reason,
            "Genome evaluated"
        );

        self.genome += 1;
        let summary =
            (self.genome >= self.evolution.generation_size).then(|| self.finish_generation());

        if let Err(err) = self.start_next_episode() {
            warn!(%err, "Could not start the next episode; training stopped");
            self.state = SchedulerState::Stopped;
            return Err(err);
        }
        self.push_status(0.0, 0.0);

        Ok(match summary {
            Some(summary) => FrameEvent::GenerationFinished { result, summary },
            None => FrameEvent::EpisodeFinished(result),
        })
    }

    fn start_next_episode(&mut self) -> Result<(), SimulationError> {
        let mut next = self.create_runner()?;
        if let Err(err) = next.start(&mut self.world) {
            next.unbind(&mut self.world)?;
            return Err(err.into());
        }
        self.active = Some(next);
        Ok(())
    }

    fn finish_generation(&mut self) -> GenerationSummary {
        if let Some((agent, evolution)) = self.pending.take() {
            self.agent = agent;
            self.evolution = evolution;
        }

        let mut population = std::mem::take(&mut self.population);
        population.sort_by_key(|(fitness, _)| Reverse(OrderedFloat(*fitness)));
        let genomes = population.len();
        let best_fitness = population.first().map_or(0.0, |(fitness, _)| *fitness);
        let mean_fitness = if genomes == 0 {
            0.0
        } else {
            population.iter().map(|(fitness, _)| fitness).sum::<f32>() / genomes as f32
        };

        self.elites = population
            .iter()
            .take(self.evolution.num_best_performers_to_keep)
            .map(|(_, controller)| controller.clone())
            .rev()
            .collect();
        self.breeders = population
            .into_iter()
            .take(self.evolution.num_breeders)
            .map(|(_, controller)| controller)
            .collect();

        let summary = GenerationSummary {
            generation: self.generation,
            genomes,
            best_fitness,
            mean_fitness,
            elites: self.elites.len(),
        };
        debug!(
            generation = %summary.generation,
            best = summary.best_fitness,
            mean = summary.mean_fitness,
            "Generation complete"
        );
        self.status.generation_complete(&summary);
        self.history.push(summary.clone());

        self.trails.clear();
        self.genome = 0;
        self.generation = self.generation.next();
        summary
    }

    fn create_runner(&mut self) -> Result<EpisodeRunner<C>, SimulationError> {
        let controller = self.next_controller()?;
        let mut runner = EpisodeRunner::new(
            controller,
            &self.agent,
            self.episode.clone(),
            Arc::clone(&self.track),
        )?;
        runner.bind(&mut self.world)?;
        Ok(runner)
    }

    /// Elites first, then offspring of the breeding pool, then random immigrants. The first
    /// genome of a run drives the configured seed weights, if any.
    fn next_controller(&mut self) -> Result<C, SimulationError> {
        let structure = self.network_structure();
        if self.generation.0 == 0 {
            if let Some(seed) = self.evolution.seed_weights.as_ref().filter(|_| self.genome == 0) {
                debug!(network = %structure, "Loading seed weights for the first genome");
                let (input_layer, hidden_layer) =
                    (seed.input_layer.clone(), seed.hidden_layer.clone());
                return Ok(C::from_weights(structure, input_layer, hidden_layer)?);
            }
            return Ok(C::random(structure, &mut self.rng));
        }
        if let Some(elite) = self.elites.pop() {
            return Ok(if elite.structure() == structure {
                elite
            } else {
                elite.reshaped(structure, &mut self.rng)
            });
        }
        let breeding_slots = self
            .evolution
            .generation_size
            .saturating_sub(self.evolution.num_random);
        let pool = self.breeders.len();
        if self.genome < breeding_slots && pool >= 2 {
            let first = self.rng.random_range(0..pool);
            let mut second = self.rng.random_range(0..pool - 1);
            if second >= first {
                second += 1;
            }
            return Ok(C::from_parents(
                structure,
                [&self.breeders[first], &self.breeders[second]],
                self.evolution.breeding,
                &mut self.rng,
            ));
        }
        Ok(C::random(structure, &mut self.rng))
    }

    fn push_status(&mut self, fitness: f32, average_speed: f32) {
        let snapshot = StatusSnapshot {
            generation: self.generation,
            genome: self.genome,
            best_fitness: self.best_fitness,
            fitness,
            average_speed,
        };
        self.status.update(&snapshot);
    }

    #[must_use]
    pub fn network_structure(&self) -> NetworkStructure {
        self.evolution.network_structure(self.agent.num_sensors)
    }

    #[must_use]
    pub const fn state(&self) -> SchedulerState {
        self.state
    }

    #[must_use]
    pub const fn generation(&self) -> Generation {
        self.generation
    }

    #[must_use]
    pub const fn genome(&self) -> usize {
        self.genome
    }

    #[must_use]
    pub const fn best_fitness(&self) -> f32 {
        self.best_fitness
    }

    #[must_use]
    pub fn track(&self) -> &TrackGeometry {
        &self.track
    }

    /// Trails of the genomes already evaluated in the current generation.
    #[must_use]
    pub fn trails(&self) -> &[Vec<Vec2>] {
        &self.trails
    }

    #[must_use]
    pub fn history(&self) -> &[GenerationSummary] {
        &self.history
    }

    #[must_use]
    pub fn active(&self) -> Option<&EpisodeRunner<C>> {
        self.active.as_ref()
    }

    #[must_use]
    pub const fn world(&self) -> &W {
        &self.world
    }
}

/// Apply one host UI command.
pub fn apply_control_command<W: PhysicsWorld, C: Controller>(
    scheduler: &mut GeneticScheduler<W, C>,
    command: ControlCommand,
) -> Result<(), SimulationError> {
    match command {
        ControlCommand::Start => scheduler.start(),
        ControlCommand::Kill => scheduler.kill_current_simulation().map(|_| ()),
        ControlCommand::Reset => scheduler.reset(),
    }
}
