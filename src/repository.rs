use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use crate::agent::AttributeHistoryRecord;
use crate::config::{AffinityMap, InterestRanges, ProfessionAttributeRanges, TopicInterestMapping};
use crate::events::SimEvent;
use crate::metrics::MetricsSink;
use crate::trend::Trend;
use crate::types::{AgentId, Attribute, EventId, Profession, RunId, RunStatus, SimMinute, TrendId};

/// The initial state of one freshly instantiated agent (§4.8 bootstrap step
/// 4, §6.2 `persist_agents`).
#[derive(Debug, Clone)]
pub struct AgentSnapshot {
    pub id: AgentId,
    pub profession: Profession,
    pub attributes: [f64; 5],
}

/// A durable-looking snapshot of a Run row (§3, §6.2).
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: RunId,
    pub status: RunStatus,
    pub started_at: Instant,
    pub horizon_minutes: SimMinute,
    pub agent_count: usize,
    pub seed: u64,
}

/// One of the four buffered write kinds the batch contract accepts (§4.3).
/// Each carries its own idempotence key so re-delivery after a partial
/// failure never produces duplicates.
#[derive(Debug, Clone)]
pub enum BufferedWrite {
    AgentCreated(AgentSnapshot),
    TrendUpsert(Trend),
    EventAudit(SimEvent),
    HistoryAppend(AttributeHistoryRecord),
}

/// Static, read-only lookup tables loaded once at bootstrap (§3, §6.2).
#[derive(Debug, Clone)]
pub struct StaticTables {
    pub affinity: AffinityMap,
    pub profession_ranges: ProfessionAttributeRanges,
    pub interest_ranges: InterestRanges,
    pub topic_mapping: TopicInterestMapping,
}

impl StaticTables {
    pub fn canonical() -> Self {
        StaticTables {
            affinity: AffinityMap::canonical(),
            profession_ranges: ProfessionAttributeRanges::canonical(),
            interest_ranges: InterestRanges::canonical(),
            topic_mapping: TopicInterestMapping::canonical(),
        }
    }
}

/// The contract in §6.2: immutable static lookups plus batched, retried,
/// idempotent mutation persistence. Callers submit and forget — reading back
/// an uncommitted write is not required (§4.3 Ownership).
pub trait Repository: Send + Sync {
    fn get_active_runs(&self) -> Vec<RunRecord>;
    fn create_run(&self, run: RunRecord);
    fn update_run_status(&self, id: RunId, status: RunStatus);
    fn load_static_tables(&self) -> StaticTables;
    fn submit(&self, write: BufferedWrite);
    /// Blocks until every buffer drains (shutdown, checkpoint).
    fn flush(&self);
    fn archive_trend(&self, id: TrendId);
}

enum Command {
    Write(BufferedWrite),
    Flush(Sender<()>),
}

#[derive(Default)]
struct Store {
    runs: HashMap<RunId, RunRecord>,
    history_keys_seen: HashSet<(u64, u16, u64)>,
    agents: HashMap<AgentId, AgentSnapshot>,
    trends: HashMap<TrendId, Trend>,
    events: HashMap<EventId, SimEvent>,
    history: Vec<AttributeHistoryRecord>,
    archived: HashSet<TrendId>,
}

fn history_key(record: &AttributeHistoryRecord) -> (u64, u16, u64) {
    let attr_tag = match record.attribute {
        Attribute::FinancialCapability => 0,
        Attribute::TrendReceptivity => 1,
        Attribute::SocialStatus => 2,
        Attribute::EnergyLevel => 3,
        Attribute::TimeBudget => 4,
    };
    (record.agent.0, attr_tag, record.timestamp.to_bits())
}

/// In-process stand-in for the durable key/value+relational store named in
/// §1/§6.2. Mutations flow through a bounded channel to a background
/// flusher thread (§5, §9 "coroutine control flow... maps to OS threads +
/// channels") that batches them per §4.3: commit on `BATCH_SIZE`, on a
/// wall-clock interval equivalent to one simulated minute, or on an explicit
/// `flush()`. Commit failures retry on the configured back-off schedule;
/// once exhausted the batch is dropped with a counter increment and a
/// CRITICAL log — the loop never blocks on a persistently failing store.
pub struct InMemoryRepository {
    store: Arc<Mutex<Store>>,
    tx: Sender<Command>,
    handle: Option<JoinHandle<()>>,
    metrics: Arc<dyn MetricsSink>,
}

impl InMemoryRepository {
    pub fn new(batch_size: usize, batch_interval: Duration, retry_backoffs: Vec<Duration>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self::with_commit_failure(batch_size, batch_interval, retry_backoffs, metrics, false)
    }

    /// Test/shutdown-scenario constructor (S6): every commit attempt fails,
    /// exercising the retry-then-drop path without ever touching the store.
    pub fn with_commit_failure(
        batch_size: usize,
        batch_interval: Duration,
        retry_backoffs: Vec<Duration>,
        metrics: Arc<dyn MetricsSink>,
        always_fail: bool,
    ) -> Self {
        let store = Arc::new(Mutex::new(Store::default()));
        let (tx, rx): (Sender<Command>, Receiver<Command>) = crossbeam_channel::unbounded();
        let flusher_store = Arc::clone(&store);
        let flusher_metrics = Arc::clone(&metrics);
        let handle = std::thread::spawn(move || {
            run_flusher(rx, flusher_store, flusher_metrics, batch_size, batch_interval, retry_backoffs, always_fail);
        });
        InMemoryRepository { store, tx, handle: Some(handle), metrics }
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    /// Demo/debug readback of the committed event audit log, in commit order
    /// by `EventId`. Not part of the §6.2 contract (`flush`+"submit and
    /// forget" means a caller never needs this to drive the simulation) —
    /// exposed only so `main.rs` can dump an NDJSON trace the way the
    /// teacher's `main.rs` printed `sim.log`.
    pub fn events_snapshot(&self) -> Vec<SimEvent> {
        self.flush();
        let store = self.store.lock().expect("store mutex poisoned");
        let mut events: Vec<SimEvent> = store.events.values().cloned().collect();
        events.sort_by_key(|e| e.id.0);
        events
    }

    /// Demo/debug readback of the committed attribute-history log, ordered
    /// by agent then timestamp.
    pub fn history_snapshot(&self) -> Vec<AttributeHistoryRecord> {
        self.flush();
        let store = self.store.lock().expect("store mutex poisoned");
        let mut history = store.history.clone();
        history.sort_by(|a, b| a.agent.0.cmp(&b.agent.0).then(a.timestamp.partial_cmp(&b.timestamp).unwrap_or(std::cmp::Ordering::Equal)));
        history
    }
}

impl Drop for InMemoryRepository {
    fn drop(&mut self) {
        self.flush();
        drop(self.tx.clone());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Repository for InMemoryRepository {
    fn get_active_runs(&self) -> Vec<RunRecord> {
        self.store.lock().expect("store mutex poisoned").runs.values().filter(|r| !r.status.is_terminal()).cloned().collect()
    }

    fn create_run(&self, run: RunRecord) {
        self.store.lock().expect("store mutex poisoned").runs.insert(run.id, run);
    }

    fn update_run_status(&self, id: RunId, status: RunStatus) {
        if let Some(run) = self.store.lock().expect("store mutex poisoned").runs.get_mut(&id) {
            run.status = status;
        }
    }

    fn load_static_tables(&self) -> StaticTables {
        StaticTables::canonical()
    }

    fn submit(&self, write: BufferedWrite) {
        // An unbounded channel never blocks the caller; a full-speed loop
        // submitting faster than the flusher commits just grows the queue
        // rather than stalling dispatch.
        let _ = self.tx.send(Command::Write(write));
    }

    fn flush(&self) {
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        if self.tx.send(Command::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }

    fn archive_trend(&self, id: TrendId) {
        self.flush();
        let mut store = self.store.lock().expect("store mutex poisoned");
        store.archived.insert(id);
        if let Some(trend) = store.trends.get_mut(&id) {
            trend.archive();
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_flusher(
    rx: Receiver<Command>,
    store: Arc<Mutex<Store>>,
    metrics: Arc<dyn MetricsSink>,
    batch_size: usize,
    batch_interval: Duration,
    retry_backoffs: Vec<Duration>,
    always_fail: bool,
) {
    let mut pending: Vec<BufferedWrite> = Vec::new();
    let mut pending_acks: Vec<Sender<()>> = Vec::new();
    let mut last_commit = Instant::now();

    loop {
        match rx.recv_timeout(batch_interval) {
            Ok(Command::Write(write)) => pending.push(write),
            Ok(Command::Flush(ack)) => pending_acks.push(ack),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                commit_batch(&store, &metrics, std::mem::take(&mut pending), &retry_backoffs, always_fail);
                for ack in pending_acks.drain(..) {
                    let _ = ack.send(());
                }
                return;
            }
        }

        let size_trigger = pending.len() >= batch_size;
        let time_trigger = last_commit.elapsed() >= batch_interval;
        let explicit_flush = !pending_acks.is_empty();

        if size_trigger || time_trigger || explicit_flush {
            if !pending.is_empty() {
                commit_batch(&store, &metrics, std::mem::take(&mut pending), &retry_backoffs, always_fail);
            }
            last_commit = Instant::now();
            for ack in pending_acks.drain(..) {
                let _ = ack.send(());
            }
        }
    }
}

/// Applies one batch to the store, retrying per the configured back-off
/// schedule on failure (§4.3). `always_fail` simulates a persistently broken
/// store (S6): every attempt fails, so the batch is eventually dropped with
/// a CRITICAL log and a counter increment, never propagated to the loop.
fn commit_batch(store: &Arc<Mutex<Store>>, metrics: &Arc<dyn MetricsSink>, batch: Vec<BufferedWrite>, retry_backoffs: &[Duration], always_fail: bool) {
    if batch.is_empty() {
        return;
    }
    let attempts = retry_backoffs.len() + 1;
    for attempt in 0..attempts {
        if !always_fail {
            apply_batch(store, &batch);
            return;
        }
        if attempt < retry_backoffs.len() {
            // Real back-off sleeps here; tests run with near-zero durations
            // injected by the caller so retry exhaustion stays fast.
            std::thread::sleep(retry_backoffs[attempt]);
        }
    }
    tracing::error!(batch_size = batch.len(), "persistence failed after exhausting retries");
    metrics.incr_counter("batch_commit_errors_total", 1);
}

fn apply_batch(store: &Arc<Mutex<Store>>, batch: &[BufferedWrite]) {
    // Partition by table so each table's writes can commit independently;
    // tables are genuinely independent maps, so rayon fans them out rather
    // than serialising table-by-table under one lock acquisition.
    let (agents, history, trends, events): (Vec<_>, Vec<_>, Vec<_>, Vec<_>) = {
        let mut agents = Vec::new();
        let mut history = Vec::new();
        let mut trends = Vec::new();
        let mut events = Vec::new();
        for write in batch {
            match write {
                BufferedWrite::AgentCreated(a) => agents.push(a.clone()),
                BufferedWrite::HistoryAppend(r) => history.push(r.clone()),
                BufferedWrite::TrendUpsert(t) => trends.push(t.clone()),
                BufferedWrite::EventAudit(e) => events.push(e.clone()),
            }
        }
        (agents, history, trends, events)
    };

    rayon::scope(|s| {
        s.spawn(|_| {
            let mut store = store.lock().expect("store mutex poisoned");
            for agent in agents {
                store.agents.insert(agent.id, agent);
            }
        });
        s.spawn(|_| {
            let mut store = store.lock().expect("store mutex poisoned");
            for record in history {
                let key = history_key(&record);
                if store.history_keys_seen.insert(key) {
                    store.history.push(record);
                }
            }
        });
        s.spawn(|_| {
            let mut store = store.lock().expect("store mutex poisoned");
            for trend in trends {
                store.trends.insert(trend.id, trend);
            }
        });
        s.spawn(|_| {
            let mut store = store.lock().expect("store mutex poisoned");
            for event in events {
                store.events.insert(event.id, event);
            }
        });
    });
}
