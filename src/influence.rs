use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, Exp};

use crate::agent::{Agent, AttributeHistoryRecord};
use crate::trend::Trend;
use crate::types::{AgentId, Sentiment, SimMinute, TrendId};

/// Minimum/maximum minutes until a reacting reader's own follow-up post,
/// drawn from `Exp(lambda = 1/15)` and clamped (§4.7).
const FOLLOWUP_LAMBDA: f64 = 1.0 / 15.0;
const FOLLOWUP_MIN: f64 = 1.0;
const FOLLOWUP_MAX: f64 = 60.0;

/// Outcome of exposing one reader to one trend (§4.7).
pub struct ReaderOutcome {
    pub history: Vec<AttributeHistoryRecord>,
    pub reacted: bool,
    /// Contribution to the author's `Σ Δenergy_level` aggregate (§4.7
    /// PostEffect) — zero when the reader didn't react.
    pub delta_energy: f64,
    /// `Some(minutes_from_now)` if this reader schedules their own follow-up
    /// PUBLISH_POST as a reaction. At most one per reader per trend, since
    /// each reader is only ever processed once per TREND_INFLUENCE dispatch.
    pub followup_in: Option<SimMinute>,
}

/// Seeds a deterministic rng for one trend's audience sampling (§4.7:
/// "deterministic sampling seeded by (trend_id, day_index)").
pub fn audience_rng(trend_id: TrendId, day_index: u64) -> ChaCha20Rng {
    let seed = trend_id.0 ^ day_index.wrapping_mul(0x9E3779B97F4A7C15);
    ChaCha20Rng::seed_from_u64(seed)
}

/// Caps `eligible` (already filtered by the caller for non-zero affinity and
/// exposure eligibility) down to the trend's coverage fraction (§4.7:
/// Low→30%, Middle→60%, High→100%) via a Fisher-Yates partial shuffle, so the
/// selection is a uniform sample rather than a prefix.
pub fn select_audience(mut eligible: Vec<AgentId>, trend: &Trend, rng: &mut impl Rng) -> Vec<AgentId> {
    let fraction = trend.coverage_level.audience_fraction();
    let target = ((eligible.len() as f64) * fraction).round() as usize;
    if target >= eligible.len() {
        return eligible;
    }
    for i in 0..target {
        let j = rng.random_range(i..eligible.len());
        eligible.swap(i, j);
    }
    eligible.truncate(target);
    eligible
}

/// Applies one trend's effect on one reader (§4.7). `affinity` is the
/// reader's profession's `1..5` affinity for the trend's topic; "match" is
/// `affinity > 3` per spec. The caller is responsible for the exposure-gate
/// pre-filter (§9 Open Question (b)) — this always records the exposure,
/// reacting or not, since the audience filter excludes recently-exposed
/// agents regardless of outcome.
pub fn process_reader(agent: &mut Agent, trend: &Trend, affinity: u8, now: SimMinute, rng: &mut impl Rng) -> ReaderOutcome {
    agent.record_exposure(trend.id, now);

    let p = (trend.virality() / 5.0)
        * (agent.attribute(crate::types::Attribute::TrendReceptivity) / 5.0)
        * (affinity as f64 / 5.0)
        * rng.random_range(0.8..=1.2);
    let reacts = rng.random_bool(p.clamp(0.0, 1.0));
    if !reacts {
        return ReaderOutcome { history: Vec::new(), reacted: false, delta_energy: 0.0, followup_in: None };
    }

    let is_match = affinity > 3;
    let (delta_receptivity, delta_energy) = match (trend.sentiment, is_match) {
        (Sentiment::Positive, true) => (0.01, 0.02),
        (Sentiment::Positive, false) => (0.0, 0.015),
        (Sentiment::Negative, true) => (0.01, -0.015),
        (Sentiment::Negative, false) => (0.01, -0.010),
    };
    let delta_social_status = (trend.virality() - 1.0) * 0.02;
    let delta_time_budget = -(0.5 * trend.coverage_level.coverage_factor());

    let history = agent.apply_trend_influence(delta_receptivity, delta_energy, delta_social_status, delta_time_budget, now);

    let dist = Exp::new(FOLLOWUP_LAMBDA).expect("lambda > 0");
    let draw: f64 = dist.sample(rng);
    let followup_in = Some(draw.clamp(FOLLOWUP_MIN, FOLLOWUP_MAX));

    ReaderOutcome { history, reacted: true, delta_energy, followup_in }
}

/// The author's own `social_status` delta once the influence pass finishes
/// (§4.7 PostEffect): `clamp(Σenergy * ln(n+1)/ln(10) * signed_sentiment /
/// 50, -1, 1)`, where `n` is the total number of readers processed and
/// `Σenergy` is the sum of each reader's `Δenergy_level` (zero for readers
/// who didn't react).
pub fn author_post_effect(sum_delta_energy: f64, readers: u64, sentiment: Sentiment) -> f64 {
    if readers == 0 {
        return 0.0;
    }
    let signed_sentiment = match sentiment {
        Sentiment::Positive => 1.0,
        Sentiment::Negative => -1.0,
    };
    let delta = sum_delta_energy * ((readers as f64) + 1.0).ln() / 10f64.ln() * signed_sentiment / 50.0;
    delta.clamp(-1.0, 1.0)
}
