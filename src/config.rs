use crate::error::CapsimError;
use crate::types::{Attribute, Interest, Profession, Topic};

/// Runtime-tunable options (§6.1). Consumed read-only by the Engine; the
/// file/env/CLI layer that produces one is out of scope (§1).
#[derive(Debug, Clone)]
pub struct CapsimConfig {
    pub sim_speed_factor: f64,
    pub max_queue_size: usize,
    pub batch_size: usize,
    pub batch_retry_backoffs: Vec<f64>,
    pub decide_score_threshold: f64,
    pub trend_archive_threshold_days: u32,
    pub post_cooldown_min: f64,
    pub self_dev_cooldown_min: f64,
    pub max_purchases_day: u32,
    pub shutdown_timeout_sec: u64,
    pub energy_recovery_interval_min: f64,
    pub cache_ttl_min: f64,
    pub cache_max_size: usize,
    /// Open Question (b): minimum gap before a trend can re-expose the same
    /// agent (§9). Default 1440.
    pub exposure_reset_min: f64,
}

impl CapsimConfig {
    pub fn canonical() -> Self {
        CapsimConfig {
            sim_speed_factor: 60.0,
            max_queue_size: 5000,
            batch_size: 100,
            batch_retry_backoffs: vec![1.0, 2.0, 4.0],
            decide_score_threshold: 0.25,
            trend_archive_threshold_days: 3,
            post_cooldown_min: 60.0,
            self_dev_cooldown_min: 30.0,
            max_purchases_day: 5,
            shutdown_timeout_sec: 30,
            energy_recovery_interval_min: 1440.0,
            cache_ttl_min: 2880.0,
            cache_max_size: 10_000,
            exposure_reset_min: 1440.0,
        }
    }

    /// Reject configurations that can never produce a meaningful run.
    pub fn validate(&self) -> Result<(), CapsimError> {
        if self.sim_speed_factor <= 0.0 {
            return Err(CapsimError::ConfigError("sim_speed_factor must be > 0".into()));
        }
        if self.max_queue_size == 0 {
            return Err(CapsimError::ConfigError("max_queue_size must be > 0".into()));
        }
        if self.batch_size == 0 {
            return Err(CapsimError::ConfigError("batch_size must be > 0".into()));
        }
        if self.decide_score_threshold < 0.0 {
            return Err(CapsimError::ConfigError("decide_score_threshold must be >= 0".into()));
        }
        if self.max_purchases_day == 0 {
            return Err(CapsimError::ConfigError("max_purchases_day must be > 0".into()));
        }
        Ok(())
    }

    pub fn archive_threshold_minutes(&self) -> f64 {
        self.trend_archive_threshold_days as f64 * crate::types::MINUTES_PER_DAY
    }
}

/// `min, max` inclusive range for a scalar attribute within one profession.
#[derive(Debug, Clone, Copy)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub fn midpoint(self) -> f64 {
        (self.min + self.max) / 2.0
    }

    pub fn sample(self, rng: &mut impl rand::Rng) -> f64 {
        if self.min >= self.max {
            self.min
        } else {
            rng.random_range(self.min..=self.max)
        }
    }
}

/// `profession × attribute → [min, max]` draw range at agent creation, and
/// the restoration target for `time_budget` at DAILY_RESET (§4.8, Open
/// Question (a)).
#[derive(Debug, Clone)]
pub struct ProfessionAttributeRanges {
    table: [[Range; 5]; 12],
}

const ATTRS: [Attribute; 5] = [
    Attribute::FinancialCapability,
    Attribute::TrendReceptivity,
    Attribute::SocialStatus,
    Attribute::EnergyLevel,
    Attribute::TimeBudget,
];

impl ProfessionAttributeRanges {
    pub fn get(&self, profession: Profession, attribute: Attribute) -> Range {
        let attr_idx = ATTRS.iter().position(|a| *a == attribute).expect("exhaustive");
        self.table[profession.index()][attr_idx]
    }

    pub fn canonical() -> Self {
        // Each row is [financial_capability, trend_receptivity, social_status,
        // energy_level, time_budget]. Professions with higher-status work
        // (Businessman, Politician) skew financial_capability/social_status
        // up; Unemployed skews them down; everyone's energy/time_budget
        // range is wide since it's agent-specific rather than profession-specific.
        let row = |fc: (f64, f64), tr: (f64, f64), ss: (f64, f64), el: (f64, f64), tb: (f64, f64)| {
            [
                Range { min: fc.0, max: fc.1 },
                Range { min: tr.0, max: tr.1 },
                Range { min: ss.0, max: ss.1 },
                Range { min: el.0, max: el.1 },
                Range { min: tb.0, max: tb.1 },
            ]
        };
        ProfessionAttributeRanges {
            table: [
                row((1.0, 3.0), (1.5, 3.5), (1.0, 2.5), (2.0, 4.0), (2.0, 4.0)), // ShopClerk
                row((1.0, 3.0), (1.0, 3.0), (1.0, 2.5), (1.5, 3.5), (1.5, 3.5)), // Worker
                row((2.0, 4.0), (2.0, 4.0), (2.0, 4.0), (2.0, 4.0), (1.0, 3.0)), // Developer
                row((3.0, 5.0), (3.0, 5.0), (3.5, 5.0), (2.0, 4.0), (2.0, 4.0)), // Politician
                row((1.5, 3.5), (3.0, 5.0), (2.0, 4.0), (2.0, 4.0), (3.0, 5.0)), // Blogger
                row((3.0, 5.0), (2.0, 4.0), (3.0, 5.0), (2.0, 4.0), (1.5, 3.5)), // Businessman
                row((0.5, 2.5), (2.0, 4.0), (1.5, 3.5), (3.0, 5.0), (3.0, 5.0)), // SpiritualMentor
                row((1.0, 3.0), (1.5, 3.5), (2.0, 4.0), (2.0, 4.0), (3.0, 5.0)), // Philosopher
                row((0.0, 1.5), (1.0, 3.0), (0.0, 2.0), (1.5, 4.0), (4.0, 5.0)), // Unemployed
                row((1.5, 3.5), (1.5, 3.5), (2.0, 4.0), (1.5, 3.5), (2.0, 4.0)), // Teacher
                row((1.0, 3.0), (3.0, 5.0), (2.0, 4.0), (2.0, 4.5), (3.0, 5.0)), // Artist
                row((2.5, 4.5), (1.5, 3.5), (3.0, 5.0), (1.5, 3.5), (1.0, 3.0)), // Doctor
            ],
        }
    }
}

/// `profession × interest → [lo, hi]` draw range at agent creation (§3).
#[derive(Debug, Clone)]
pub struct InterestRanges {
    table: [[Range; 6]; 12],
}

impl InterestRanges {
    pub fn get(&self, profession: Profession, interest: Interest) -> Range {
        self.table[profession.index()][interest.index()]
    }

    pub fn canonical() -> Self {
        // Built from TopicInterestMapping + AffinityMap so the interest an
        // agent's own profession maps to (via its strongest topic affinity)
        // starts higher than the rest; every profession still gets a
        // non-zero floor on every interest.
        let affinity = AffinityMap::canonical();
        let mapping = TopicInterestMapping::canonical();
        let mut table = [[Range { min: 0.2, max: 1.0 }; 6]; 12];
        for profession in Profession::ALL {
            for topic in Topic::ALL {
                let a = affinity.get(profession, topic) as f64; // 1..5
                let interest = mapping.interest_for(topic);
                let idx = interest.index();
                let lo = 0.2 + 0.3 * (a - 1.0);
                let hi = lo + 1.5;
                table[profession.index()][idx] = Range { min: lo, max: hi };
            }
        }
        InterestRanges { table }
    }
}

/// `profession × topic → 1..5` affinity (§3).
#[derive(Debug, Clone)]
pub struct AffinityMap {
    table: [[u8; 7]; 12],
}

impl AffinityMap {
    pub fn get(&self, profession: Profession, topic: Topic) -> u8 {
        self.table[profession.index()][topic.index()]
    }

    pub fn canonical() -> Self {
        use Profession::*;
        // Rows: ShopClerk, Worker, Developer, Politician, Blogger, Businessman,
        // SpiritualMentor, Philosopher, Unemployed, Teacher, Artist, Doctor.
        // Cols: Economic, Health, Spiritual, Conspiracy, Science, Culture, Sport.
        let mut table = [[2u8; 7]; 12];
        let set = |t: &mut [[u8; 7]; 12], p: Profession, topic: Topic, v: u8| {
            t[p.index()][topic.index()] = v;
        };
        set(&mut table, ShopClerk, Topic::Economic, 4);
        set(&mut table, ShopClerk, Topic::Culture, 3);
        set(&mut table, Worker, Topic::Economic, 3);
        set(&mut table, Worker, Topic::Sport, 4);
        set(&mut table, Developer, Topic::Science, 5);
        set(&mut table, Developer, Topic::Economic, 3);
        set(&mut table, Politician, Topic::Economic, 5);
        set(&mut table, Politician, Topic::Conspiracy, 4);
        set(&mut table, Blogger, Topic::Culture, 5);
        set(&mut table, Blogger, Topic::Conspiracy, 4);
        set(&mut table, Businessman, Topic::Economic, 5);
        set(&mut table, Businessman, Topic::Science, 3);
        set(&mut table, SpiritualMentor, Topic::Spiritual, 5);
        set(&mut table, SpiritualMentor, Topic::Health, 3);
        set(&mut table, Philosopher, Topic::Spiritual, 4);
        set(&mut table, Philosopher, Topic::Science, 4);
        set(&mut table, Unemployed, Topic::Conspiracy, 4);
        set(&mut table, Unemployed, Topic::Sport, 3);
        set(&mut table, Teacher, Topic::Science, 4);
        set(&mut table, Teacher, Topic::Culture, 4);
        set(&mut table, Artist, Topic::Culture, 5);
        set(&mut table, Artist, Topic::Spiritual, 3);
        set(&mut table, Doctor, Topic::Health, 5);
        set(&mut table, Doctor, Topic::Science, 4);
        AffinityMap { table }
    }
}

/// Bidirectional `Topic <-> Interest` mapping (§3). Each topic maps to
/// exactly one dominant interest category.
#[derive(Debug, Clone)]
pub struct TopicInterestMapping {
    table: [Interest; 7],
}

impl TopicInterestMapping {
    pub fn interest_for(&self, topic: Topic) -> Interest {
        self.table[topic.index()]
    }

    pub fn canonical() -> Self {
        TopicInterestMapping {
            table: [
                Interest::Economics,    // Economic
                Interest::Wellbeing,    // Health
                Interest::Spirituality, // Spiritual
                Interest::Society,      // Conspiracy
                Interest::Knowledge,    // Science
                Interest::Creativity,   // Culture
                Interest::Wellbeing,    // Sport
            ],
        }
    }
}

/// `profession -> multiplier` used by the purchase-score candidate (§4.4).
#[derive(Debug, Clone)]
pub struct ShopWeights {
    table: [f64; 12],
}

impl ShopWeights {
    pub fn get(&self, profession: Profession) -> f64 {
        self.table[profession.index()]
    }

    pub fn canonical() -> Self {
        use Profession::*;
        let mut table = [1.0f64; 12];
        table[ShopClerk.index()] = 1.3;
        table[Businessman.index()] = 1.5;
        table[Politician.index()] = 1.2;
        table[Unemployed.index()] = 0.6;
        table[Worker.index()] = 0.9;
        ShopWeights { table }
    }
}

/// Per-action attribute deltas (§3 ActionEffects, §4.6).
#[derive(Debug, Clone, Copy)]
pub struct EffectRow {
    pub time_budget: f64,
    pub energy_level: f64,
    pub social_status: f64,
}

#[derive(Debug, Clone)]
pub struct ActionEffects {
    pub post: EffectRow,
    pub self_dev: EffectRow,
    pub purchase_l1: EffectRow,
    pub purchase_l2: EffectRow,
    pub purchase_l3: EffectRow,
}

impl ActionEffects {
    pub fn purchase(&self, level: crate::types::PurchaseLevel) -> EffectRow {
        match level {
            crate::types::PurchaseLevel::L1 => self.purchase_l1,
            crate::types::PurchaseLevel::L2 => self.purchase_l2,
            crate::types::PurchaseLevel::L3 => self.purchase_l3,
        }
    }

    pub fn canonical() -> Self {
        ActionEffects {
            post: EffectRow { time_budget: -0.20, energy_level: -0.50, social_status: 0.10 },
            self_dev: EffectRow { time_budget: -1.00, energy_level: 0.80, social_status: 0.0 },
            // Purchase effect rows scale cost/benefit with tier; financial_capability
            // is spent separately in `ActionExecutor` via the purchase price, not here.
            purchase_l1: EffectRow { time_budget: -0.10, energy_level: 0.05, social_status: 0.02 },
            purchase_l2: EffectRow { time_budget: -0.20, energy_level: 0.10, social_status: 0.05 },
            purchase_l3: EffectRow { time_budget: -0.40, energy_level: 0.15, social_status: 0.12 },
        }
    }
}
