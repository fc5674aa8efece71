use std::sync::Arc;
use std::time::Duration;

use capsim::clock::{FastClock, ShutdownToken};
use capsim::config::CapsimConfig;
use capsim::engine::{BootstrapOptions, Engine};
use capsim::metrics::{AtomicMetricsSink, MetricsSink, NoopMetricsSink};
use capsim::repository::InMemoryRepository;
use capsim::types::RunId;

pub struct Scenario {
    pub agent_count: usize,
    pub horizon_days: u32,
}

pub const SMALL: Scenario = Scenario { agent_count: 50, horizon_days: 1 };
pub const MEDIUM: Scenario = Scenario { agent_count: 500, horizon_days: 1 };
pub const LARGE: Scenario = Scenario { agent_count: 2_000, horizon_days: 1 };

/// Builds a fully bootstrapped `Engine` ready to `run()`, matching the
/// teacher's `build_simulation` fixture shape: one call builds a scenario at
/// a given scale and seed, with seed posts enabled so the event queue has
/// real work queued from minute zero.
pub fn build_engine(scenario: &Scenario, seed: u64) -> Engine<InMemoryRepository> {
    let config = CapsimConfig::canonical();
    let metrics: Arc<dyn MetricsSink> = Arc::new(NoopMetricsSink);
    let repository = Arc::new(InMemoryRepository::new(
        config.batch_size,
        Duration::from_secs_f64(60.0 / config.sim_speed_factor),
        config.batch_retry_backoffs.iter().map(|s| Duration::from_secs_f64(*s)).collect(),
        Arc::clone(&metrics),
    ));
    let horizon_minutes = (scenario.horizon_days as f64) * capsim::types::MINUTES_PER_DAY;
    Engine::bootstrap(
        config,
        repository,
        metrics,
        Box::new(FastClock::new()),
        ShutdownToken::new(),
        BootstrapOptions {
            run_id: RunId(1),
            agent_count: scenario.agent_count,
            seed,
            horizon_minutes,
            seed_initial_posts: true,
        },
    )
    .expect("bootstrap failed")
}

/// Same as [`build_engine`] but backed by a metrics sink whose counters can
/// be inspected after the run (used by benches that report `actions_total`).
pub fn build_engine_with_metrics(scenario: &Scenario, seed: u64) -> (Engine<InMemoryRepository>, Arc<AtomicMetricsSink>) {
    let config = CapsimConfig::canonical();
    let metrics = Arc::new(AtomicMetricsSink::new());
    let repository = Arc::new(InMemoryRepository::new(
        config.batch_size,
        Duration::from_secs_f64(60.0 / config.sim_speed_factor),
        config.batch_retry_backoffs.iter().map(|s| Duration::from_secs_f64(*s)).collect(),
        Arc::clone(&metrics) as Arc<dyn MetricsSink>,
    ));
    let horizon_minutes = (scenario.horizon_days as f64) * capsim::types::MINUTES_PER_DAY;
    let engine = Engine::bootstrap(
        config,
        repository,
        Arc::clone(&metrics) as Arc<dyn MetricsSink>,
        Box::new(FastClock::new()),
        ShutdownToken::new(),
        BootstrapOptions {
            run_id: RunId(1),
            agent_count: scenario.agent_count,
            seed,
            horizon_minutes,
            seed_initial_posts: true,
        },
    )
    .expect("bootstrap failed");
    (engine, metrics)
}
