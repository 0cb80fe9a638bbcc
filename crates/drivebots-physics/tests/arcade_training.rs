use std::sync::Arc;

use drivebots_brain::FeedForwardNetwork;
use drivebots_core::{
    AgentConfig, Controller, DrivebotsConfig, EpisodeConfig, EpisodeRunner, FinishReason,
    FrameEvent, GenerationSummary, GeneticScheduler, NetworkStructure, Tick, TickOutcome,
    TrackGeometry, TrackPoint, Vec2,
};
use drivebots_physics::ArcadeWorld;

fn square_track() -> Arc<TrackGeometry> {
    let points = [(0.0, 0.0), (400.0, 0.0), (400.0, 400.0), (0.0, 400.0)]
        .map(|(x, y)| TrackPoint::new(Vec2::new(x, y)));
    Arc::new(TrackGeometry::build(&points, 80.0).expect("square track"))
}

#[test]
fn silent_network_stalls_on_the_start_line() {
    let structure = NetworkStructure::new(3, 4, 3);
    let network = FeedForwardNetwork::from_weights(structure, vec![0.0; 12], vec![0.0; 12])
        .expect("weights");
    let config = EpisodeConfig::default();
    let stall_ticks = config.stall_ticks;
    let mut runner =
        EpisodeRunner::new(network, &AgentConfig::default(), config, square_track())
            .expect("runner");
    let mut world = ArcadeWorld::default();
    runner.bind(&mut world).expect("bind");
    runner.start(&mut world).expect("start");

    let result = loop {
        match runner.tick(&mut world).expect("tick") {
            TickOutcome::Running(report) => assert!(report.tick.0 < u64::from(stall_ticks)),
            TickOutcome::Finished(result) => break result,
        }
    };
    assert_eq!(result.reason, FinishReason::Stalled);
    assert_eq!(result.ticks, Tick(u64::from(stall_ticks)));
    assert_eq!(result.laps, 0);
}

fn train(seed: u64, generations: usize) -> Vec<GenerationSummary> {
    let mut config = DrivebotsConfig::default();
    config.rng_seed = Some(seed);
    config.evolution.generation_size = 4;
    config.evolution.num_breeders = 2;
    config.episode.max_episode_ticks = Some(600);

    let mut scheduler: GeneticScheduler<ArcadeWorld, FeedForwardNetwork> =
        GeneticScheduler::new(&config, ArcadeWorld::default()).expect("scheduler");
    scheduler.start().expect("start");
    let mut frames = 0_usize;
    while scheduler.history().len() < generations {
        frames += 1;
        assert!(frames < 100_000, "training did not converge to generation boundaries");
        if let FrameEvent::Idle = scheduler.frame().expect("frame") {
            panic!("scheduler went idle while running");
        }
    }
    scheduler.history().to_vec()
}

#[test]
fn seeded_training_is_reproducible() {
    let first = train(0xD21E, 2);
    let second = train(0xD21E, 2);
    assert_eq!(first, second);

    assert_eq!(first.len(), 2);
    for (index, summary) in first.iter().enumerate() {
        assert_eq!(summary.generation.0 as usize, index);
        assert_eq!(summary.genomes, 4);
        assert!(summary.best_fitness.is_finite());
        assert!(summary.best_fitness + 1e-3 >= summary.mean_fitness);
    }
}
