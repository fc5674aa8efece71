mod fixtures;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};

use capsim::events::{EventKind, EventQueue};
use capsim::influence;
use capsim::trend::Trend;
use capsim::types::{AgentId, CoverageLevel, Topic, TrendId};

use fixtures::{build_engine, build_engine_with_metrics, LARGE, MEDIUM, SMALL};

// ── Group 1: event_queue — BinaryHeap admission/pop in isolation ───────────

fn bench_event_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_queue");
    for &count in &[1_000usize, 10_000, 100_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &n| {
            b.iter_batched(
                || EventQueue::new(n + 1),
                |mut queue| {
                    for i in 0..n {
                        // Interleave timestamps so the heap does real reordering work,
                        // and alternate kind so priority ordering is exercised too.
                        let ts = if i % 2 == 0 { i as f64 } else { (n - i) as f64 };
                        let kind = if i % 5 == 0 {
                            EventKind::DailyReset
                        } else {
                            EventKind::SelfDev { agent: AgentId(i as u64) }
                        };
                        queue.push(capsim::types::EventId(i as u64), ts, kind);
                    }
                    while let Some(event) = queue.pop() {
                        std::hint::black_box(event);
                    }
                },
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

// ── Group 2: full_day — bootstrap + run one simulated day ──────────────────

fn bench_full_day(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_day");
    for (name, scenario) in [("small", &SMALL), ("medium", &MEDIUM), ("large", &LARGE)] {
        if name == "large" {
            group.sample_size(10);
        }
        group.throughput(Throughput::Elements(scenario.agent_count as u64));
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter_batched(
                || build_engine(scenario, 42),
                |mut engine| {
                    let horizon = (scenario.horizon_days as f64) * capsim::types::MINUTES_PER_DAY;
                    engine.run(horizon).expect("run should not fail")
                },
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

// ── Group 3: influence_fanout — audience selection + reader pass scaling ───

fn bench_influence_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("influence_fanout");
    for &audience_size in &[100usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(audience_size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(audience_size), &audience_size, |b, &n| {
            b.iter_batched(
                || {
                    let mut r = rand_chacha::ChaCha20Rng::from_seed([7u8; 32]);
                    use rand::SeedableRng;
                    let trend = Trend::create(
                        TrendId(1),
                        Topic::Science,
                        AgentId(0),
                        None,
                        0.0,
                        4.0,
                        5,
                        4.0,
                        CoverageLevel::High,
                        &mut r,
                    );
                    let eligible: Vec<AgentId> = (1..=n as u64).map(AgentId).collect();
                    (trend, eligible)
                },
                |(trend, eligible)| {
                    let mut rng = influence::audience_rng(trend.id, 0);
                    let audience = influence::select_audience(eligible, &trend, &mut rng);
                    std::hint::black_box(audience.len())
                },
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

// ── Group 4: bootstrap — agent population construction scaling ─────────────

fn bench_bootstrap(c: &mut Criterion) {
    let mut group = c.benchmark_group("bootstrap");
    for (name, scenario) in [("small", &SMALL), ("medium", &MEDIUM), ("large", &LARGE)] {
        group.throughput(Throughput::Elements(scenario.agent_count as u64));
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter_batched(|| (), |_| build_engine(scenario, 1), BatchSize::LargeInput)
        });
    }
    group.finish();
}

// ── Group 5: actions_counted — bootstrap+run with live metrics attached ─────

fn bench_actions_counted(c: &mut Criterion) {
    c.bench_function("actions_counted_small", |b| {
        b.iter_batched(
            || build_engine_with_metrics(&SMALL, 7),
            |(mut engine, metrics)| {
                let horizon = (SMALL.horizon_days as f64) * capsim::types::MINUTES_PER_DAY;
                engine.run(horizon).expect("run should not fail");
                std::hint::black_box(metrics.actions_total());
            },
            BatchSize::LargeInput,
        )
    });
}

criterion_group!(
    benches,
    bench_event_queue,
    bench_full_day,
    bench_influence_fanout,
    bench_bootstrap,
    bench_actions_counted,
);
criterion_main!(benches);
