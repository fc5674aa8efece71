use rand::Rng;
use serde::Serialize;

use crate::types::{AgentId, CoverageLevel, Sentiment, SimMinute, Topic, TrendId};

/// Weights for the base-virality formula (§4.5):
/// `raw = ALPHA*(social_status/5) + BETA*(affinity/5) + GAMMA*(energy_level/5)`.
const ALPHA: f64 = 0.5;
const BETA: f64 = 0.3;
const GAMMA: f64 = 0.2;

/// Per-interaction virality growth rate (§4.5):
/// `new = min(5, base + GROWTH * ln(total_interactions + 1))`.
const GROWTH: f64 = 0.05;

/// A propagating unit of attention (§3, §4.5). `base_virality_score` is fixed
/// at creation; the effective virality reported by [`Trend::virality`] grows
/// logarithmically with `total_interactions` on top of that base.
#[derive(Debug, Clone, Serialize)]
pub struct Trend {
    pub id: TrendId,
    pub topic: Topic,
    pub originator: AgentId,
    pub parent: Option<TrendId>,
    pub created_at: SimMinute,
    pub base_virality_score: f64,
    pub coverage_level: CoverageLevel,
    pub sentiment: Sentiment,
    pub total_interactions: u64,
    pub last_interaction_at: SimMinute,
    pub archived: bool,
}

impl Trend {
    /// Creates a trend from its originating post (§4.5). `author_social_status`
    /// and `author_energy_level` are both on the `[0, 5]` scale; `affinity`
    /// is the profession's `1..5` affinity for `topic`. `coverage_level` is
    /// derived by the caller from the mean social status of agents whose
    /// profession has non-zero affinity for `topic` (§4.5) — computing that
    /// mean requires the full agent population, which lives on the Engine,
    /// not here; see [`coverage_level_from_mean_social_status`].
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        id: TrendId,
        topic: Topic,
        originator: AgentId,
        parent: Option<TrendId>,
        now: SimMinute,
        author_social_status: f64,
        affinity: u8,
        author_energy_level: f64,
        coverage_level: CoverageLevel,
        rng: &mut impl Rng,
    ) -> Self {
        let raw = ALPHA * (author_social_status / 5.0)
            + BETA * (affinity as f64 / 5.0)
            + GAMMA * (author_energy_level / 5.0);
        let jitter = rng.random_range(0.8..=1.2);
        let base = (raw * jitter).clamp(0.0, 5.0);
        let sentiment = if rng.random_bool(0.5) { Sentiment::Positive } else { Sentiment::Negative };
        Trend {
            id,
            topic,
            originator,
            parent,
            created_at: now,
            base_virality_score: base,
            coverage_level,
            sentiment,
            total_interactions: 0,
            last_interaction_at: now,
            archived: false,
        }
    }

    /// Effective virality (§4.5): the base score plus logarithmic growth
    /// from interactions, capped at 5.0.
    pub fn virality(&self) -> f64 {
        (self.base_virality_score + GROWTH * ((self.total_interactions as f64) + 1.0).ln()).min(5.0)
    }

    /// One TREND_INFLUENCE dispatch completed against this trend (§4.5):
    /// runs exactly once per event regardless of audience size.
    pub fn record_interaction(&mut self, now: SimMinute) {
        self.total_interactions += 1;
        self.last_interaction_at = now;
    }

    /// Whether this trend should be archived at the next daily tick (§4.5,
    /// I4): no interaction for at least `archive_threshold_minutes`.
    pub fn is_archivable(&self, now: SimMinute, archive_threshold_minutes: f64) -> bool {
        !self.archived && now - self.last_interaction_at > archive_threshold_minutes
    }

    pub fn archive(&mut self) {
        self.archived = true;
    }
}

/// Coverage tier from the mean social status (on `[0, 5]`) of agents whose
/// profession has non-zero affinity for the trend's topic (§4.5): normalised
/// to `[0, 1]`, `<0.33` Low, `<0.66` Middle, else High.
pub fn coverage_level_from_mean_social_status(mean_social_status: f64) -> CoverageLevel {
    let normalized = (mean_social_status / 5.0).clamp(0.0, 1.0);
    if normalized < 0.33 {
        CoverageLevel::Low
    } else if normalized < 0.66 {
        CoverageLevel::Middle
    } else {
        CoverageLevel::High
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn rng(seed: u64) -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(seed)
    }

    #[test]
    fn base_virality_weights_author_status_most_heavily() {
        let mut r = rng(1);
        let high_status =
            Trend::create(TrendId(1), Topic::Culture, AgentId(1), None, 0.0, 5.0, 1, 1.0, CoverageLevel::Low, &mut r);
        let mut r2 = rng(1);
        let low_status =
            Trend::create(TrendId(2), Topic::Culture, AgentId(1), None, 0.0, 0.0, 1, 1.0, CoverageLevel::Low, &mut r2);
        assert!(high_status.base_virality_score > low_status.base_virality_score);
    }

    #[test]
    fn base_virality_stays_within_zero_five() {
        let mut r = rng(7);
        for _ in 0..100 {
            let t = Trend::create(
                TrendId(1),
                Topic::Science,
                AgentId(1),
                None,
                0.0,
                5.0,
                5,
                5.0,
                CoverageLevel::High,
                &mut r,
            );
            assert!((0.0..=5.0).contains(&t.base_virality_score));
        }
    }

    #[test]
    fn interactions_grow_virality_logarithmically() {
        let mut r = rng(2);
        let mut trend = Trend::create(TrendId(1), Topic::Science, AgentId(1), None, 0.0, 1.0, 1, 1.0, CoverageLevel::Low, &mut r);
        let before = trend.virality();
        trend.record_interaction(10.0);
        let after_one = trend.virality();
        trend.record_interaction(20.0);
        let after_two = trend.virality();
        assert!(after_one > before);
        assert!(after_two > after_one);
        assert!((after_two - after_one) < (after_one - before));
    }

    #[test]
    fn virality_never_exceeds_five() {
        let mut r = rng(3);
        let mut trend =
            Trend::create(TrendId(1), Topic::Economic, AgentId(1), None, 0.0, 5.0, 5, 5.0, CoverageLevel::High, &mut r);
        for i in 0..100_000 {
            trend.record_interaction(i as f64);
        }
        assert!(trend.virality() <= 5.0);
    }

    #[test]
    fn coverage_level_thresholds() {
        assert_eq!(coverage_level_from_mean_social_status(0.0), CoverageLevel::Low);
        assert_eq!(coverage_level_from_mean_social_status(1.0), CoverageLevel::Low);
        assert_eq!(coverage_level_from_mean_social_status(2.0), CoverageLevel::Middle);
        assert_eq!(coverage_level_from_mean_social_status(4.0), CoverageLevel::High);
        assert_eq!(coverage_level_from_mean_social_status(5.0), CoverageLevel::High);
    }

    #[test]
    fn archivable_after_threshold_of_inactivity() {
        let mut r = rng(4);
        let mut trend =
            Trend::create(TrendId(1), Topic::Health, AgentId(1), None, 0.0, 1.0, 1, 1.0, CoverageLevel::Low, &mut r);
        trend.last_interaction_at = 0.0;
        assert!(!trend.is_archivable(100.0, 200.0));
        assert!(trend.is_archivable(300.0, 200.0));
        trend.archive();
        assert!(!trend.is_archivable(500.0, 200.0));
    }
}
