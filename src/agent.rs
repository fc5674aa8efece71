use std::collections::HashMap;

use rand::Rng;
use serde::Serialize;

use crate::config::{ActionEffects, CapsimConfig, ProfessionAttributeRanges, ShopWeights};
use crate::error::{CapsimError, CapsimResult};
use crate::types::{
    AgentId, Attribute, Interest, MutationReason, Profession, PurchaseLevel, SimMinute, Topic, TrendId,
};

/// One candidate the decision model scores before sampling (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionCandidate {
    Post,
    SelfDev,
    Purchase(PurchaseLevel),
}

impl ActionCandidate {
    /// Canonical sort key used to tie-break equal-score candidates (§9
    /// "dynamic selection... tie-break by candidate-name sort order").
    fn name(self) -> &'static str {
        match self {
            ActionCandidate::Post => "Post",
            ActionCandidate::Purchase(PurchaseLevel::L1) => "Purchase_L1",
            ActionCandidate::Purchase(PurchaseLevel::L2) => "Purchase_L2",
            ActionCandidate::Purchase(PurchaseLevel::L3) => "Purchase_L3",
            ActionCandidate::SelfDev => "SelfDev",
        }
    }
}

/// The trend an agent is currently reacting to when deciding whether to post
/// or shop (§4.4): `virality` feeds the Post candidate's score, `topic`
/// feeds the Purchase candidates' Economic multiplier.
#[derive(Debug, Clone, Copy)]
pub struct DecisionContext {
    pub virality: f64,
    pub topic: Topic,
}

/// An attribute mutation produced by `Agent::apply` (§3 Attribute-history record).
#[derive(Debug, Clone, Serialize)]
pub struct AttributeHistoryRecord {
    pub agent: AgentId,
    pub timestamp: SimMinute,
    pub attribute: Attribute,
    pub old_value: f64,
    pub new_value: f64,
    pub reason: MutationReason,
}

/// A simulated person (§3). Every scalar attribute is clamped to `[0, 5]`;
/// `time_budget` additionally quantises to 0.5-minute-equivalent steps so
/// cooldown arithmetic stays exact under repeated floating-point deltas.
#[derive(Debug, Clone)]
pub struct Agent {
    pub id: AgentId,
    pub profession: Profession,
    attributes: [f64; 5],
    interests: [f64; 6],
    last_post_at: Option<SimMinute>,
    last_self_dev_at: Option<SimMinute>,
    purchases_today: u32,
    /// Last minute each trend exposed this agent, for the
    /// `exposure_reset_min` gate (§9 Open Question (b)).
    exposure_history: HashMap<TrendId, SimMinute>,
}

const ATTR_MIN: f64 = 0.0;
const ATTR_MAX: f64 = 5.0;
const TIME_BUDGET_STEP: f64 = 0.5;

fn clamp_attr(v: f64) -> f64 {
    v.clamp(ATTR_MIN, ATTR_MAX)
}

fn quantise_time_budget(v: f64) -> f64 {
    (clamp_attr(v) / TIME_BUDGET_STEP).round() * TIME_BUDGET_STEP
}

fn attr_index(attribute: Attribute) -> usize {
    match attribute {
        Attribute::FinancialCapability => 0,
        Attribute::TrendReceptivity => 1,
        Attribute::SocialStatus => 2,
        Attribute::EnergyLevel => 3,
        Attribute::TimeBudget => 4,
    }
}

impl Agent {
    pub fn new(
        id: AgentId,
        profession: Profession,
        ranges: &ProfessionAttributeRanges,
        interest_ranges: &crate::config::InterestRanges,
        rng: &mut impl Rng,
    ) -> Self {
        let mut attributes = [0.0; 5];
        for attribute in [
            Attribute::FinancialCapability,
            Attribute::TrendReceptivity,
            Attribute::SocialStatus,
            Attribute::EnergyLevel,
            Attribute::TimeBudget,
        ] {
            let r = ranges.get(profession, attribute);
            attributes[attr_index(attribute)] = clamp_attr(r.sample(rng));
        }
        attributes[attr_index(Attribute::TimeBudget)] =
            quantise_time_budget(attributes[attr_index(Attribute::TimeBudget)]);

        let mut interests = [0.0; 6];
        for interest in Interest::ALL {
            interests[interest.index()] = interest_ranges.get(profession, interest).sample(rng).clamp(0.0, 5.0);
        }

        Agent {
            id,
            profession,
            attributes,
            interests,
            last_post_at: None,
            last_self_dev_at: None,
            purchases_today: 0,
            exposure_history: HashMap::new(),
        }
    }

    pub fn attribute(&self, attribute: Attribute) -> f64 {
        self.attributes[attr_index(attribute)]
    }

    /// Raw `[financial_capability, trend_receptivity, social_status,
    /// energy_level, time_budget]` snapshot, in `Attribute` declaration
    /// order, for the one-time `persist_agents` batch at bootstrap (§6.2).
    pub fn attributes_snapshot(&self) -> [f64; 5] {
        self.attributes
    }

    pub fn interest(&self, interest: Interest) -> f64 {
        self.interests[interest.index()]
    }

    pub fn purchases_today(&self) -> u32 {
        self.purchases_today
    }

    pub fn last_post_at(&self) -> Option<SimMinute> {
        self.last_post_at
    }

    pub fn last_self_dev_at(&self) -> Option<SimMinute> {
        self.last_self_dev_at
    }

    pub(crate) fn set_attribute(&mut self, attribute: Attribute, value: f64) {
        let v = if attribute == Attribute::TimeBudget { quantise_time_budget(value) } else { clamp_attr(value) };
        self.attributes[attr_index(attribute)] = v;
    }

    // ── Gates (§4.4) ──────────────────────────────────────────────────

    pub fn can_post(&self, config: &CapsimConfig, effects: &ActionEffects, now: SimMinute) -> bool {
        self.attribute(Attribute::TimeBudget) >= -effects.post.time_budget
            && self.attribute(Attribute::EnergyLevel) >= -effects.post.energy_level
            && self
                .last_post_at
                .is_none_or(|last| now - last >= config.post_cooldown_min)
            && Self::is_work_hours(now)
    }

    pub fn can_self_dev(&self, config: &CapsimConfig, effects: &ActionEffects, now: SimMinute) -> bool {
        self.attribute(Attribute::TimeBudget) >= -effects.self_dev.time_budget
            && self
                .last_self_dev_at
                .is_none_or(|last| now - last >= config.self_dev_cooldown_min)
    }

    pub fn can_purchase(&self, level: PurchaseLevel, config: &CapsimConfig) -> bool {
        self.attribute(Attribute::FinancialCapability) >= level.threshold()
            && self.purchases_today < config.max_purchases_day
    }

    /// Whether `trend` may expose this agent again at `now` (§9 Open
    /// Question (b)): either never exposed, or `exposure_reset_min` has
    /// elapsed since the last exposure.
    pub fn can_be_exposed_to(&self, trend: TrendId, now: SimMinute, exposure_reset_min: f64) -> bool {
        match self.exposure_history.get(&trend) {
            None => true,
            Some(last) => now - last >= exposure_reset_min,
        }
    }

    pub fn record_exposure(&mut self, trend: TrendId, now: SimMinute) {
        self.exposure_history.insert(trend, now);
    }

    /// Work-hours predicate (§4.4): agents are inactive during the first 480
    /// sim-minutes of each day (00:00–08:00 human-clock).
    pub fn is_work_hours(now: SimMinute) -> bool {
        now.rem_euclid(crate::types::MINUTES_PER_DAY) >= 480.0
    }

    // ── Decision model (§4.4) ────────────────────────────────────────

    /// Scores every gate-eligible candidate (§4.4), drops any candidate
    /// below `decide_score_threshold`, and samples one with probability
    /// proportional to its score using a prefix-sum + binary search (§9
    /// "dynamic selection" design note) so the draw is a single
    /// `rng.random::<f64>()` call, deterministic given the same rng state.
    /// Candidates are sorted by canonical name first so ties at the
    /// boundary between two cumulative ranges resolve the same way on every
    /// run. Returns `None` if nothing clears the threshold.
    pub fn decide_action(
        &self,
        config: &CapsimConfig,
        shop_weights: &ShopWeights,
        trend: Option<DecisionContext>,
        now: SimMinute,
        effects: &ActionEffects,
        rng: &mut impl Rng,
    ) -> Option<ActionCandidate> {
        let mut candidates = Vec::with_capacity(5);
        if self.can_post(config, effects, now) {
            candidates.push((ActionCandidate::Post, self.score_post(trend)));
        }
        if self.can_self_dev(config, effects, now) {
            candidates.push((ActionCandidate::SelfDev, self.score_self_dev()));
        }
        for level in [PurchaseLevel::L1, PurchaseLevel::L2, PurchaseLevel::L3] {
            if self.can_purchase(level, config) {
                candidates.push((ActionCandidate::Purchase(level), self.score_purchase(level, shop_weights, trend)));
            }
        }

        candidates.retain(|(_, score)| *score >= config.decide_score_threshold);
        if candidates.is_empty() {
            return None;
        }
        candidates.sort_by_key(|(action, _)| action.name());

        let total: f64 = candidates.iter().map(|(_, s)| s).sum();
        if total <= 0.0 {
            return None;
        }

        let mut prefix = Vec::with_capacity(candidates.len());
        let mut running = 0.0;
        for (action, score) in &candidates {
            running += score;
            prefix.push((running, *action));
        }
        let draw = rng.random::<f64>() * total;
        let idx = prefix.partition_point(|(cum, _)| *cum < draw);
        prefix.get(idx).or_else(|| prefix.last()).map(|(_, action)| *action)
    }

    /// Post candidate score (§4.4): `virality * trend_receptivity / 25 * (1
    /// + social_status / 10)` with a trend context, else a small positive
    /// baseline so an agent can still choose to post with nothing to react
    /// to.
    fn score_post(&self, trend: Option<DecisionContext>) -> f64 {
        match trend {
            Some(ctx) => {
                ctx.virality * self.attribute(Attribute::TrendReceptivity) / 25.0
                    * (1.0 + self.attribute(Attribute::SocialStatus) / 10.0)
            }
            None => 0.3,
        }
    }

    /// SelfDev candidate score (§4.4): `max(0, 1 - energy_level / 5)`.
    fn score_self_dev(&self) -> f64 {
        (1.0 - self.attribute(Attribute::EnergyLevel) / ATTR_MAX).max(0.0)
    }

    /// Purchase_Lk candidate score (§4.4): `0.3 * shop_weight(profession)`,
    /// multiplied by 1.2 when the contextual trend's topic is Economic.
    fn score_purchase(&self, _level: PurchaseLevel, shop_weights: &ShopWeights, trend: Option<DecisionContext>) -> f64 {
        let mut score = 0.3 * shop_weights.get(self.profession);
        if matches!(trend, Some(ctx) if ctx.topic == Topic::Economic) {
            score *= 1.2;
        }
        score
    }

    // ── Mutation (§4.4) ──────────────────────────────────────────────

    /// Applies a gate-passing action's effects, recording one history entry
    /// per attribute actually changed. Re-checks the relevant gate first and
    /// returns `GateFailed` if state drifted since scheduling (§4.6: the
    /// caller absorbs this silently, logging at debug level).
    pub fn apply(
        &mut self,
        candidate: ActionCandidate,
        config: &CapsimConfig,
        effects: &ActionEffects,
        now: SimMinute,
    ) -> CapsimResult<Vec<AttributeHistoryRecord>> {
        match candidate {
            ActionCandidate::Post => {
                if !self.can_post(config, effects, now) {
                    return Err(CapsimError::gate_failed(self.id, "can_post failed on re-check"));
                }
                self.last_post_at = Some(now);
                Ok(self.apply_effect_row(effects.post, MutationReason::Post, now))
            }
            ActionCandidate::SelfDev => {
                if !self.can_self_dev(config, effects, now) {
                    return Err(CapsimError::gate_failed(self.id, "can_self_dev failed on re-check"));
                }
                self.last_self_dev_at = Some(now);
                Ok(self.apply_effect_row(effects.self_dev, MutationReason::SelfDev, now))
            }
            ActionCandidate::Purchase(level) => {
                if !self.can_purchase(level, config) {
                    return Err(CapsimError::gate_failed(self.id, "can_purchase failed on re-check"));
                }
                self.purchases_today += 1;
                // Defensive check (§3 I1-I6, §4.8): `can_purchase` already gates
                // on this bound, so this should be unreachable in practice, but
                // a breached invariant here is exactly the FATAL case §4.8 names.
                if self.purchases_today > config.max_purchases_day {
                    return Err(CapsimError::invariant(format!(
                        "agent {:?} purchases_today {} exceeds max_purchases_day {}",
                        self.id, self.purchases_today, config.max_purchases_day
                    )));
                }
                let old_fc = self.attribute(Attribute::FinancialCapability);
                self.set_attribute(Attribute::FinancialCapability, old_fc - level.threshold());
                let mut records = self.apply_effect_row(effects.purchase(level), MutationReason::Purchase(level), now);
                records.push(AttributeHistoryRecord {
                    agent: self.id,
                    timestamp: now,
                    attribute: Attribute::FinancialCapability,
                    old_value: old_fc,
                    new_value: self.attribute(Attribute::FinancialCapability),
                    reason: MutationReason::Purchase(level),
                });
                Ok(records)
            }
        }
    }

    fn apply_effect_row(
        &mut self,
        row: crate::config::EffectRow,
        reason: MutationReason,
        now: SimMinute,
    ) -> Vec<AttributeHistoryRecord> {
        let mut records = Vec::with_capacity(3);
        for (attribute, delta) in [
            (Attribute::TimeBudget, row.time_budget),
            (Attribute::EnergyLevel, row.energy_level),
            (Attribute::SocialStatus, row.social_status),
        ] {
            if delta == 0.0 {
                continue;
            }
            let old_value = self.attribute(attribute);
            self.set_attribute(attribute, old_value + delta);
            records.push(AttributeHistoryRecord {
                agent: self.id,
                timestamp: now,
                attribute,
                old_value,
                new_value: self.attribute(attribute),
                reason,
            });
        }
        records
    }

    /// Applies a reacting reader's trend-influence deltas directly (§4.7):
    /// `Δtrend_receptivity`/`Δenergy_level` from the sentiment×match table,
    /// `Δsocial_status = (virality - 1) * 0.02`, and `Δtime_budget = -(0.5 *
    /// coverage_factor)`. Bypasses the gate/score machinery since the reader
    /// did not choose to be exposed. Zero deltas are skipped (no history
    /// record for an attribute that didn't move).
    pub fn apply_trend_influence(
        &mut self,
        delta_receptivity: f64,
        delta_energy: f64,
        delta_social_status: f64,
        delta_time_budget: f64,
        now: SimMinute,
    ) -> Vec<AttributeHistoryRecord> {
        let mut records = Vec::with_capacity(4);
        for (attribute, delta) in [
            (Attribute::TrendReceptivity, delta_receptivity),
            (Attribute::EnergyLevel, delta_energy),
            (Attribute::SocialStatus, delta_social_status),
            (Attribute::TimeBudget, delta_time_budget),
        ] {
            if delta == 0.0 {
                continue;
            }
            let old_value = self.attribute(attribute);
            self.set_attribute(attribute, old_value + delta);
            records.push(AttributeHistoryRecord {
                agent: self.id,
                timestamp: now,
                attribute,
                old_value,
                new_value: self.attribute(attribute),
                reason: MutationReason::TrendInfluence,
            });
        }
        records
    }

    pub fn apply_post_effect(&mut self, delta_social_status: f64, now: SimMinute) -> Option<AttributeHistoryRecord> {
        if delta_social_status == 0.0 {
            return None;
        }
        let old = self.attribute(Attribute::SocialStatus);
        self.set_attribute(Attribute::SocialStatus, old + delta_social_status);
        Some(AttributeHistoryRecord {
            agent: self.id,
            timestamp: now,
            attribute: Attribute::SocialStatus,
            old_value: old,
            new_value: self.attribute(Attribute::SocialStatus),
            reason: MutationReason::PostEffect,
        })
    }

    /// DAILY_RESET (§4.8, §9 Open Question (a)): restores `time_budget` to
    /// the midpoint of this profession's configured range and zeroes the
    /// purchase counter.
    pub fn daily_reset(&mut self, ranges: &ProfessionAttributeRanges, now: SimMinute) -> AttributeHistoryRecord {
        self.purchases_today = 0;
        let old = self.attribute(Attribute::TimeBudget);
        let target = ranges.get(self.profession, Attribute::TimeBudget).midpoint();
        self.set_attribute(Attribute::TimeBudget, target);
        AttributeHistoryRecord {
            agent: self.id,
            timestamp: now,
            attribute: Attribute::TimeBudget,
            old_value: old,
            new_value: self.attribute(Attribute::TimeBudget),
            reason: MutationReason::DailyReset,
        }
    }

    /// ENERGY_RECOVERY (§4.8, S4): agents below 3.0 recover fully to 5.0;
    /// everyone else gains a flat 2.0, capped at 5.0.
    pub fn energy_recovery(&mut self, now: SimMinute) -> AttributeHistoryRecord {
        let old = self.attribute(Attribute::EnergyLevel);
        let recovered = if old < 3.0 { 5.0 } else { (old + 2.0).min(ATTR_MAX) };
        self.set_attribute(Attribute::EnergyLevel, recovered);
        AttributeHistoryRecord {
            agent: self.id,
            timestamp: now,
            attribute: Attribute::EnergyLevel,
            old_value: old,
            new_value: self.attribute(Attribute::EnergyLevel),
            reason: MutationReason::EnergyRecovery,
        }
    }
}

#[cfg(test)]
impl Agent {
    /// Test-only attribute setter exposed across module boundaries so other
    /// modules' tests can force an agent into a known state without routing
    /// through `apply`.
    pub fn set_attribute_for_test(&mut self, attribute: Attribute, value: f64) {
        self.set_attribute(attribute, value);
    }
}
