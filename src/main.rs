use std::io::{BufWriter, Write};
use std::sync::Arc;
use std::time::Duration;

use capsim::clock::{FastClock, ShutdownToken};
use capsim::config::CapsimConfig;
use capsim::engine::{BootstrapOptions, Engine};
use capsim::metrics::AtomicMetricsSink;
use capsim::repository::InMemoryRepository;
use capsim::types::RunId;

fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).json().init();

    let config = CapsimConfig::canonical();
    let metrics = Arc::new(AtomicMetricsSink::new());
    let repository = Arc::new(InMemoryRepository::new(
        config.batch_size,
        Duration::from_secs_f64(60.0 / config.sim_speed_factor),
        config.batch_retry_backoffs.iter().map(|s| Duration::from_secs_f64(*s)).collect(),
        Arc::clone(&metrics) as Arc<dyn capsim::metrics::MetricsSink>,
    ));
    let shutdown = ShutdownToken::new();

    let horizon_minutes = 7.0 * 1440.0; // one simulated week
    let mut engine = Engine::bootstrap(
        config,
        Arc::clone(&repository),
        Arc::clone(&metrics) as Arc<dyn capsim::metrics::MetricsSink>,
        Box::new(FastClock::new()),
        shutdown,
        BootstrapOptions { run_id: RunId(1), agent_count: 200, seed: 42, horizon_minutes, seed_initial_posts: true },
    )
    .expect("bootstrap failed");

    let status = engine.run(horizon_minutes).expect("simulation run failed");

    // NDJSON event log to stdout.
    let stdout = std::io::stdout();
    let mut writer = BufWriter::new(stdout.lock());
    let events = repository.events_snapshot();
    for event in &events {
        serde_json::to_writer(&mut writer, event).expect("failed to serialize event");
        writeln!(writer).expect("failed to write newline");
    }
    writer.flush().expect("failed to flush stdout");

    let history = repository.history_snapshot();

    // Run summary to stderr.
    eprintln!("Run finished with status {status:?}");
    eprintln!("Events fired: {}", events.len());
    eprintln!("Attribute-history records: {}", history.len());
    eprintln!("Final queue length: {}", engine.queue_len());
    eprintln!("batch_commit_errors_total: {}", metrics.batch_commit_errors_total());
    eprintln!("queue_full_total: {}", metrics.queue_full_total());
    eprintln!("actions_total: {}", metrics.actions_total());
}
