use rand::Rng;

use crate::agent::{ActionCandidate, Agent, AttributeHistoryRecord};
use crate::config::{ActionEffects, CapsimConfig};
use crate::error::{CapsimError, CapsimResult};
use crate::events::EventKind;
use crate::trend::Trend;
use crate::types::{Attribute, CoverageLevel, PurchaseLevel, SimMinute, Topic, TrendId};

/// One follow-up event an action wants scheduled (§4.6). Admission (§4.2)
/// and the WARNING+counter on refusal are the caller's responsibility —
/// it owns the `EventQueue` and already applies that policy uniformly for
/// every event source (bootstrap, actions, influence follow-ups).
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    pub timestamp: SimMinute,
    pub kind: EventKind,
}

/// What executing one action produced (§4.6). `created_trend` is set only
/// by a POST that originates a new trend.
#[derive(Debug, Default)]
pub struct ActionOutcome {
    pub history: Vec<AttributeHistoryRecord>,
    pub created_trend: Option<Trend>,
    pub schedule: Vec<ScheduleRequest>,
}

/// Context a POST needs to originate a Trend (§4.5) that only the Engine can
/// supply: the next `TrendId`, the post's topic/parent, the author
/// profession's affinity for that topic, and `coverage_level`, which is
/// derived from the mean social_status of the whole agent population and so
/// cannot be computed from a single `Agent`.
pub struct PostContext {
    pub trend_id: TrendId,
    pub topic: Topic,
    pub parent: Option<TrendId>,
    pub affinity: u8,
    pub coverage_level: CoverageLevel,
}

/// POST (§4.6): applies the author's effect row, originates a Trend, and
/// requests a TREND_INFLUENCE follow-up at `now + 5`. Returns `Ok(None)` if
/// the gate fails on re-check (§4.6 "cancelled silently... except for a
/// debug log") rather than surfacing `GateFailed` as an error.
pub fn execute_post(
    agent: &mut Agent,
    config: &CapsimConfig,
    effects: &ActionEffects,
    ctx: PostContext,
    now: SimMinute,
    rng: &mut impl Rng,
) -> CapsimResult<Option<ActionOutcome>> {
    let history = match absorb_gate_failure(agent.apply(ActionCandidate::Post, config, effects, now))? {
        Some(h) => h,
        None => return Ok(None),
    };

    let trend = Trend::create(
        ctx.trend_id,
        ctx.topic,
        agent.id,
        ctx.parent,
        now,
        agent.attribute(Attribute::SocialStatus),
        ctx.affinity,
        agent.attribute(Attribute::EnergyLevel),
        ctx.coverage_level,
        rng,
    );
    let schedule = vec![ScheduleRequest {
        timestamp: now + 5.0,
        kind: EventKind::TrendInfluence { trend: trend.id },
    }];

    Ok(Some(ActionOutcome { history, created_trend: Some(trend), schedule }))
}

/// SELF_DEV (§4.6): applies the effect row; no follow-up event.
pub fn execute_self_dev(
    agent: &mut Agent,
    config: &CapsimConfig,
    effects: &ActionEffects,
    now: SimMinute,
) -> CapsimResult<Option<ActionOutcome>> {
    let history = match absorb_gate_failure(agent.apply(ActionCandidate::SelfDev, config, effects, now))? {
        Some(h) => h,
        None => return Ok(None),
    };
    Ok(Some(ActionOutcome { history, ..Default::default() }))
}

/// PURCHASE_Lk (§4.6): applies the tier's effect row and spends
/// `financial_capability`; `purchases_today` accounting happens inside
/// `Agent::apply`.
pub fn execute_purchase(
    agent: &mut Agent,
    level: PurchaseLevel,
    config: &CapsimConfig,
    effects: &ActionEffects,
    now: SimMinute,
) -> CapsimResult<Option<ActionOutcome>> {
    let history = match absorb_gate_failure(agent.apply(ActionCandidate::Purchase(level), config, effects, now))? {
        Some(h) => h,
        None => return Ok(None),
    };
    Ok(Some(ActionOutcome { history, ..Default::default() }))
}

/// Converts a `GateFailed` error into `Ok(None)` with a debug log (§4.6,
/// §7); any other error propagates to the caller unchanged.
fn absorb_gate_failure(
    result: CapsimResult<Vec<AttributeHistoryRecord>>,
) -> CapsimResult<Option<Vec<AttributeHistoryRecord>>> {
    match result {
        Ok(history) => Ok(Some(history)),
        Err(CapsimError::GateFailed { agent, reason }) => {
            tracing::debug!(?agent, reason, "action cancelled: gate failed on re-check");
            Ok(None)
        }
        Err(other) => Err(other),
    }
}
