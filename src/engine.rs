use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::action::{self, PostContext};
use crate::agent::{Agent, AttributeHistoryRecord, DecisionContext};
use crate::clock::{Clock, ShutdownToken};
use crate::config::{ActionEffects, CapsimConfig, ShopWeights};
use crate::error::{CapsimError, CapsimResult};
use crate::events::{EventKind, EventQueue, SimEvent};
use crate::influence::{self, ReaderOutcome};
use crate::metrics::MetricsSink;
use crate::repository::{AgentSnapshot, BufferedWrite, Repository, RunRecord, StaticTables};
use crate::trend::{coverage_level_from_mean_social_status, Trend};
use crate::types::{AgentId, Attribute, EventId, Profession, RunId, RunStatus, SimMinute, Topic, TrendId};

/// The agent-based discrete-event simulator (§4.8). Generic over `Repository`
/// so tests can swap in a failure-injecting store (S6) without touching the
/// loop. Owns every piece of mutable simulation state on a single thread
/// (§5) — the Repository flusher is the only other moving part, and it
/// never touches `agents`/`trends`/`queue`.
pub struct Engine<R: Repository> {
    config: CapsimConfig,
    effects: ActionEffects,
    shop_weights: ShopWeights,
    static_tables: StaticTables,
    agents: HashMap<AgentId, Agent>,
    trends: HashMap<TrendId, Trend>,
    queue: EventQueue,
    clock: Box<dyn Clock>,
    rng: ChaCha20Rng,
    repository: Arc<R>,
    metrics: Arc<dyn MetricsSink>,
    shutdown: ShutdownToken,
    run_id: RunId,
    next_event_id: u64,
    next_trend_id: u64,
}

/// Parameters for `Engine::bootstrap` (§4.8 step 1-6).
pub struct BootstrapOptions {
    pub run_id: RunId,
    pub agent_count: usize,
    pub seed: u64,
    pub horizon_minutes: SimMinute,
    /// Whether to seed initial PUBLISH_POST events evenly across `[0, 60]`
    /// (§4.8 step 5, "Optionally seed..."). Tests that need a clean queue
    /// to enqueue a specific scenario event set this to `false`.
    pub seed_initial_posts: bool,
}

impl<R: Repository + 'static> Engine<R> {
    /// Runs the ordered bootstrap sequence (§4.8):
    /// 1. refuse if a non-terminal Run already exists,
    /// 2. persist a new Run row (INITIALIZING),
    /// 3. load static tables and seed the RNG,
    /// 4. instantiate and persist the agent population,
    /// 5. schedule the first system events (and optional seed posts),
    /// 6. mark the Run RUNNING.
    pub fn bootstrap(
        config: CapsimConfig,
        repository: Arc<R>,
        metrics: Arc<dyn MetricsSink>,
        clock: Box<dyn Clock>,
        shutdown: ShutdownToken,
        options: BootstrapOptions,
    ) -> CapsimResult<Self> {
        config.validate()?;

        if !repository.get_active_runs().is_empty() {
            return Err(CapsimError::ActiveSimulationExists);
        }

        repository.create_run(RunRecord {
            id: options.run_id,
            status: RunStatus::Initializing,
            started_at: Instant::now(),
            horizon_minutes: options.horizon_minutes,
            agent_count: options.agent_count,
            seed: options.seed,
        });

        let static_tables = repository.load_static_tables();
        let mut rng = ChaCha20Rng::seed_from_u64(options.seed);

        let mut agents = HashMap::with_capacity(options.agent_count);
        for i in 0..options.agent_count {
            let id = AgentId(i as u64);
            let profession = Profession::ALL[i % Profession::ALL.len()];
            let agent = Agent::new(id, profession, &static_tables.profession_ranges, &static_tables.interest_ranges, &mut rng);
            repository.submit(BufferedWrite::AgentCreated(AgentSnapshot {
                id,
                profession,
                attributes: agent.attributes_snapshot(),
            }));
            agents.insert(id, agent);
        }

        let queue = EventQueue::new(config.max_queue_size);
        let mut engine = Engine {
            config,
            effects: ActionEffects::canonical(),
            shop_weights: ShopWeights::canonical(),
            static_tables,
            agents,
            trends: HashMap::new(),
            queue,
            clock,
            rng,
            repository,
            metrics,
            shutdown,
            run_id: options.run_id,
            next_event_id: 0,
            next_trend_id: 0,
        };

        engine.schedule(1440.0, EventKind::DailyReset);
        engine.schedule(1440.0, EventKind::EnergyRecovery);
        engine.schedule(1440.0, EventKind::SaveDailyTrend);

        // Seed initial posts evenly across [0, 60] with a small jitter so
        // PUBLISH_POST timestamps don't collide when agent_count is large.
        if options.seed_initial_posts {
            let mut agent_ids: Vec<AgentId> = engine.agents.keys().copied().collect();
            // Sorted so the jitter draws below consume `engine.rng` in a fixed
            // order — `HashMap` iteration order is randomized per instance and
            // would otherwise break determinism (P9) across bootstraps of the
            // same seed.
            agent_ids.sort();
            if !agent_ids.is_empty() {
                let step = 60.0 / (agent_ids.len() as f64);
                for (i, id) in agent_ids.iter().enumerate() {
                    let jitter = engine.rng.random_range(0.0..step.max(0.001));
                    let ts = (i as f64) * step + jitter;
                    let topic = Topic::ALL[i % Topic::ALL.len()];
                    engine.schedule(ts, EventKind::PublishPost { agent: *id, topic, parent: None });
                }
            }
        }

        engine.repository.flush();
        engine.repository.update_run_status(engine.run_id, RunStatus::Running);
        engine.metrics.set_gauge("simulations_active", 1);

        Ok(engine)
    }

    fn alloc_event_id(&mut self) -> EventId {
        let id = EventId(self.next_event_id);
        self.next_event_id += 1;
        id
    }

    fn alloc_trend_id(&mut self) -> TrendId {
        let id = TrendId(self.next_trend_id);
        self.next_trend_id += 1;
        id
    }

    /// Admits `kind` at `timestamp` per §4.2, surfacing a refusal as a
    /// WARNING log plus the `queue_full_total` counter (§4.6, §7) rather
    /// than propagating an error — every caller (bootstrap seeding, actions,
    /// influence follow-ups) shares this one admission path.
    fn schedule(&mut self, timestamp: SimMinute, kind: EventKind) {
        let id = self.alloc_event_id();
        let admitted = self.queue.push(id, timestamp, kind.clone());
        if !admitted {
            tracing::warn!(?kind, timestamp, "event queue full, admission refused");
            self.metrics.incr_counter("queue_full_total", 1);
        }
        self.metrics.set_gauge("queue_length", self.queue.len() as i64);
    }

    /// Main loop (§4.8 a-e). Runs until the queue drains with no event left
    /// before `horizon_minutes`, or a shutdown is observed between events.
    /// Returns the terminal `RunStatus`.
    pub fn run(&mut self, horizon_minutes: SimMinute) -> CapsimResult<RunStatus> {
        loop {
            if self.shutdown.is_cancelled() {
                return self.shutdown_sequence();
            }

            let next_ts = match self.queue.peek_timestamp() {
                Some(ts) if ts <= horizon_minutes => ts,
                _ => break,
            };

            self.clock.wait_until(next_ts, self.shutdown.receiver());
            if self.shutdown.is_cancelled() {
                return self.shutdown_sequence();
            }

            let event = match self.queue.pop() {
                Some(e) => e,
                None => break,
            };
            self.clock.advance_to(event.timestamp);

            let dispatch_started = Instant::now();
            if let Err(e) = self.dispatch(event) {
                self.repository.update_run_status(self.run_id, RunStatus::Failed);
                self.repository.flush();
                self.metrics.set_gauge("simulations_active", 0);
                return Err(e);
            }
            self.metrics.observe_histogram("event_latency_ms", dispatch_started.elapsed().as_secs_f64() * 1000.0);
            self.metrics.set_gauge("queue_length", self.queue.len() as i64);
        }

        self.repository.flush();
        self.repository.update_run_status(self.run_id, RunStatus::Completed);
        self.metrics.set_gauge("simulations_active", 0);
        Ok(RunStatus::Completed)
    }

    fn dispatch(&mut self, event: SimEvent) -> CapsimResult<()> {
        self.repository.submit(BufferedWrite::EventAudit(event.clone()));
        match event.kind {
            EventKind::PublishPost { agent, topic, parent } => self.handle_publish_post(agent, topic, parent, event.timestamp),
            EventKind::SelfDev { agent } => self.handle_self_dev(agent, event.timestamp),
            EventKind::Purchase { agent, level } => self.handle_purchase(agent, level, event.timestamp),
            EventKind::TrendInfluence { trend } => self.handle_trend_influence(trend, event.timestamp),
            EventKind::EnergyRecovery => self.handle_energy_recovery(event.timestamp),
            EventKind::DailyReset => self.handle_daily_reset(event.timestamp),
            EventKind::SaveDailyTrend => self.handle_save_daily_trend(event.timestamp),
            EventKind::Law | EventKind::Weather => {
                tracing::debug!(kind = ?event.kind, "unhandled optional system event, skipped");
                Ok(())
            }
        }
    }

    fn submit_history(&self, history: Vec<AttributeHistoryRecord>) {
        for record in history {
            self.repository.submit(BufferedWrite::HistoryAppend(record));
        }
        self.metrics.incr_counter("actions_total", 1);
    }

    /// Drives an agent's own decision at its scheduled "turn" (the Engine's
    /// equivalent of the teacher's per-tick agent phase): consults the
    /// highest-virality active trend the agent has affinity for, if any,
    /// then dispatches whichever candidate `decide_action` selects.
    fn agent_turn(&mut self, agent_id: AgentId, now: SimMinute) -> CapsimResult<()> {
        let decision_ctx = self.decision_context_for(agent_id);
        let agent = match self.agents.get(&agent_id) {
            Some(a) => a,
            None => return Ok(()),
        };
        let choice = agent.decide_action(&self.config, &self.shop_weights, decision_ctx, now, &self.effects, &mut self.rng);
        match choice {
            Some(crate::agent::ActionCandidate::Post) => {
                let topic = decision_ctx.map(|c| c.topic).unwrap_or(Topic::ALL[agent_id.0 as usize % Topic::ALL.len()]);
                self.schedule(now, EventKind::PublishPost { agent: agent_id, topic, parent: None });
            }
            Some(crate::agent::ActionCandidate::SelfDev) => {
                self.schedule(now, EventKind::SelfDev { agent: agent_id });
            }
            Some(crate::agent::ActionCandidate::Purchase(level)) => {
                self.schedule(now, EventKind::Purchase { agent: agent_id, level });
            }
            None => {}
        }
        Ok(())
    }

    fn decision_context_for(&self, agent_id: AgentId) -> Option<DecisionContext> {
        let agent = self.agents.get(&agent_id)?;
        self.trends
            .values()
            .filter(|t| !t.archived && self.static_tables.affinity.get(agent.profession, t.topic) > 0)
            .max_by(|a, b| a.virality().partial_cmp(&b.virality()).unwrap_or(std::cmp::Ordering::Equal))
            .map(|t| DecisionContext { virality: t.virality(), topic: t.topic })
    }

    fn handle_publish_post(&mut self, agent_id: AgentId, topic: Topic, parent: Option<TrendId>, now: SimMinute) -> CapsimResult<()> {
        let affinity = match self.agents.get(&agent_id) {
            Some(agent) => self.static_tables.affinity.get(agent.profession, topic),
            None => return Ok(()),
        };
        let coverage_level = self.coverage_level_for_topic(topic);
        let trend_id = self.alloc_trend_id();
        let ctx = PostContext { trend_id, topic, parent, affinity, coverage_level };

        let agent = match self.agents.get_mut(&agent_id) {
            Some(a) => a,
            None => return Ok(()),
        };
        let outcome = match action::execute_post(agent, &self.config, &self.effects, ctx, now, &mut self.rng)? {
            Some(o) => o,
            None => return Ok(()),
        };

        self.submit_history(outcome.history);
        if let Some(trend) = outcome.created_trend {
            self.repository.submit(BufferedWrite::TrendUpsert(trend.clone()));
            self.trends.insert(trend.id, trend);
        }
        for request in outcome.schedule {
            self.schedule(request.timestamp, request.kind);
        }
        Ok(())
    }

    fn coverage_level_for_topic(&self, topic: Topic) -> crate::types::CoverageLevel {
        let matching: Vec<f64> = self
            .agents
            .values()
            .filter(|a| self.static_tables.affinity.get(a.profession, topic) > 0)
            .map(|a| a.attribute(Attribute::SocialStatus))
            .collect();
        if matching.is_empty() {
            return coverage_level_from_mean_social_status(0.0);
        }
        let mean = matching.iter().sum::<f64>() / (matching.len() as f64);
        coverage_level_from_mean_social_status(mean)
    }

    fn handle_self_dev(&mut self, agent_id: AgentId, now: SimMinute) -> CapsimResult<()> {
        let agent = match self.agents.get_mut(&agent_id) {
            Some(a) => a,
            None => return Ok(()),
        };
        if let Some(outcome) = action::execute_self_dev(agent, &self.config, &self.effects, now)? {
            self.submit_history(outcome.history);
        }
        Ok(())
    }

    fn handle_purchase(&mut self, agent_id: AgentId, level: crate::types::PurchaseLevel, now: SimMinute) -> CapsimResult<()> {
        let agent = match self.agents.get_mut(&agent_id) {
            Some(a) => a,
            None => return Ok(()),
        };
        if let Some(outcome) = action::execute_purchase(agent, level, &self.config, &self.effects, now)? {
            self.submit_history(outcome.history);
        }
        Ok(())
    }

    /// TREND_INFLUENCE (§4.7): selects the audience, processes each reader,
    /// applies the author's aggregate PostEffect, and runs the trend's
    /// counter update exactly once regardless of audience size.
    fn handle_trend_influence(&mut self, trend_id: TrendId, now: SimMinute) -> CapsimResult<()> {
        let trend = match self.trends.get(&trend_id) {
            Some(t) => t.clone(),
            None => return Err(crate::error::TrendNotFound(trend_id).into()),
        };

        let day_index = (now / crate::types::MINUTES_PER_DAY).floor() as u64;
        let mut eligible: Vec<AgentId> = self
            .agents
            .iter()
            .filter(|(id, a)| {
                **id != trend.originator
                    && self.static_tables.affinity.get(a.profession, trend.topic) > 0
                    && a.can_be_exposed_to(trend_id, now, self.config.exposure_reset_min)
            })
            .map(|(id, _)| *id)
            .collect();
        // Sorted before the partial Fisher-Yates shuffle in `select_audience`:
        // the shuffle's result depends on input order, which must be fixed
        // rather than this `HashMap`'s randomized iteration order (P9).
        eligible.sort();

        let mut rng = influence::audience_rng(trend_id, day_index);
        let audience = influence::select_audience(eligible, &trend, &mut rng);

        let mut sum_delta_energy = 0.0;
        let mut followups: Vec<(AgentId, SimMinute)> = Vec::new();

        for reader_id in &audience {
            let affinity = match self.agents.get(reader_id) {
                Some(a) => self.static_tables.affinity.get(a.profession, trend.topic),
                None => continue,
            };
            let agent = match self.agents.get_mut(reader_id) {
                Some(a) => a,
                None => continue,
            };
            let ReaderOutcome { history, reacted, delta_energy, followup_in } =
                influence::process_reader(agent, &trend, affinity, now, &mut rng);
            self.submit_history(history);
            if reacted {
                sum_delta_energy += delta_energy;
                if let Some(delay) = followup_in {
                    followups.push((*reader_id, now + delay));
                }
            }
        }

        let author_delta = influence::author_post_effect(sum_delta_energy, audience.len() as u64, trend.sentiment);
        if let Some(author) = self.agents.get_mut(&trend.originator) {
            if let Some(record) = author.apply_post_effect(author_delta, now) {
                self.submit_history(vec![record]);
            }
        }

        if let Some(trend) = self.trends.get_mut(&trend_id) {
            trend.record_interaction(now);
            self.repository.submit(BufferedWrite::TrendUpsert(trend.clone()));
        }

        for (reader_id, ts) in followups {
            self.schedule(ts, EventKind::PublishPost { agent: reader_id, topic: trend.topic, parent: Some(trend_id) });
        }

        Ok(())
    }

    /// ENERGY_RECOVERY (§4.8) doubles as the population's decision tick: the
    /// spec names no dedicated per-agent "turn" event, and ties the only two
    /// agent-action generators it does describe (bootstrap seed posts,
    /// TREND_INFLUENCE reply posts) to specific triggers rather than a
    /// standing schedule. Piggybacking `decide_action` on the recurring,
    /// already-per-agent ENERGY_RECOVERY tick gives SELF_DEV and PURCHASE a
    /// path to ever fire without inventing an EventKind absent from §3.
    fn handle_energy_recovery(&mut self, now: SimMinute) -> CapsimResult<()> {
        let mut ids: Vec<AgentId> = self.agents.keys().copied().collect();
        // Sorted for the same reason as the bootstrap seed-post jitter: `agent_turn`
        // draws from `self.rng`, so the iteration order must be fixed, not whatever
        // this particular `HashMap` instance happens to produce (P9).
        ids.sort();
        for id in &ids {
            if let Some(agent) = self.agents.get_mut(id) {
                let record = agent.energy_recovery(now);
                self.repository.submit(BufferedWrite::HistoryAppend(record));
            }
        }
        for id in ids {
            self.agent_turn(id, now)?;
        }
        self.schedule(now + self.config.energy_recovery_interval_min, EventKind::EnergyRecovery);
        Ok(())
    }

    fn handle_daily_reset(&mut self, now: SimMinute) -> CapsimResult<()> {
        for agent in self.agents.values_mut() {
            let record = agent.daily_reset(&self.static_tables.profession_ranges, now);
            self.repository.submit(BufferedWrite::HistoryAppend(record));
        }
        self.schedule(now + crate::types::MINUTES_PER_DAY, EventKind::DailyReset);
        Ok(())
    }

    /// SAVE_DAILY_TREND (§4.8): aggregates per-(topic, day) stats, persists
    /// them as trend upserts for every active trend, reschedules, then runs
    /// the archival pass.
    fn handle_save_daily_trend(&mut self, now: SimMinute) -> CapsimResult<()> {
        for trend in self.trends.values() {
            self.repository.submit(BufferedWrite::TrendUpsert(trend.clone()));
        }
        self.schedule(now + crate::types::MINUTES_PER_DAY, EventKind::SaveDailyTrend);

        let threshold = self.config.archive_threshold_minutes();
        let to_archive: Vec<TrendId> = self
            .trends
            .values()
            .filter(|t| t.is_archivable(now, threshold))
            .map(|t| t.id)
            .collect();
        for trend_id in to_archive {
            self.repository.archive_trend(trend_id);
            if let Some(trend) = self.trends.get_mut(&trend_id) {
                trend.archive();
            }
        }
        Ok(())
    }

    /// Shutdown (§4.8): mark STOPPING, drain currently-pending agent-action
    /// events at or before `current_sim_time`, flush, and report COMPLETED
    /// or FORCE_STOPPED depending on whether the drain finished within
    /// `SHUTDOWN_TIMEOUT_SEC`.
    fn shutdown_sequence(&mut self) -> CapsimResult<RunStatus> {
        self.repository.update_run_status(self.run_id, RunStatus::Stopping);
        let deadline = std::time::Duration::from_secs(self.config.shutdown_timeout_sec);
        let started = Instant::now();
        let current_sim_time = self.clock.now();

        loop {
            if started.elapsed() >= deadline {
                tracing::error!("shutdown drain exceeded SHUTDOWN_TIMEOUT_SEC");
                self.repository.flush();
                self.repository.update_run_status(self.run_id, RunStatus::ForceStopped);
                self.metrics.set_gauge("simulations_active", 0);
                return Ok(RunStatus::ForceStopped);
            }
            let pending = match self.queue.peek_timestamp() {
                Some(ts) if ts <= current_sim_time => true,
                _ => false,
            };
            if !pending {
                break;
            }
            let event = match self.queue.pop() {
                Some(e) => e,
                None => break,
            };
            if let Err(e) = self.dispatch(event) {
                self.repository.update_run_status(self.run_id, RunStatus::Failed);
                self.repository.flush();
                self.metrics.set_gauge("simulations_active", 0);
                return Err(e);
            }
        }

        // The drain loop above only bounds the dispatch phase; a
        // persistently failing store can still make `flush` itself run long
        // past `deadline` (§4.8, S6), so the final flush is time-boxed on a
        // detached thread rather than awaited directly.
        let remaining = deadline.saturating_sub(started.elapsed());
        if !Self::bounded_flush(&self.repository, remaining) {
            tracing::error!("shutdown flush exceeded SHUTDOWN_TIMEOUT_SEC");
            self.repository.update_run_status(self.run_id, RunStatus::ForceStopped);
            self.metrics.set_gauge("simulations_active", 0);
            return Ok(RunStatus::ForceStopped);
        }

        self.repository.update_run_status(self.run_id, RunStatus::Completed);
        self.metrics.set_gauge("simulations_active", 0);
        Ok(RunStatus::Completed)
    }

    /// Runs `repository.flush()` on a detached thread and waits at most
    /// `timeout` for it to finish. The flush keeps running in the background
    /// even past `timeout` — there is no way to cancel a commit mid-retry —
    /// but the caller is freed to report FORCE_STOPPED instead of hanging.
    fn bounded_flush(repository: &Arc<R>, timeout: Duration) -> bool {
        let repo = Arc::clone(repository);
        let (tx, rx) = crossbeam_channel::bounded(1);
        std::thread::spawn(move || {
            repo.flush();
            let _ = tx.send(());
        });
        rx.recv_timeout(timeout).is_ok()
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(&id)
    }

    pub fn trend(&self, id: TrendId) -> Option<&Trend> {
        self.trends.get(&id)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn now(&self) -> SimMinute {
        self.clock.now()
    }

    pub fn agent_ids(&self) -> Vec<AgentId> {
        self.agents.keys().copied().collect()
    }

    pub fn trend_ids(&self) -> Vec<TrendId> {
        self.trends.keys().copied().collect()
    }

    /// Directly overwrites one agent's attribute, bypassing the gate/score
    /// machinery and emitting no history record. Not part of the simulation's
    /// own mutation contract (§4.4 `apply` is the only path production code
    /// uses) — a fixture hook for scenario tests that need to force a known
    /// starting state after a normal `bootstrap` (S2).
    pub fn seed_agent_attribute(&mut self, id: AgentId, attribute: Attribute, value: f64) {
        if let Some(agent) = self.agents.get_mut(&id) {
            agent.set_attribute(attribute, value);
        }
    }

    /// Directly enqueues an event, bypassing `decide_action`/action-executor
    /// scheduling. Exposed for scenario tests that need to seed a specific
    /// event at a specific timestamp (S2, S5).
    pub fn seed_event(&mut self, timestamp: SimMinute, kind: EventKind) {
        self.schedule(timestamp, kind);
    }
}
