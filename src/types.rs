use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct AgentId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TrendId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RunId(pub u64);

/// Simulation time in minutes (1440 per simulated day). Unlike the teacher's
/// `Day`, this is a float — events can fire at any sub-minute offset (e.g.
/// TREND_INFLUENCE at `now + 5`).
pub type SimMinute = f64;

pub const MINUTES_PER_DAY: f64 = 1440.0;

/// One of the twelve professions an agent is drawn from. Order matches the
/// declaration order in spec §3 and is used as the iteration/index order for
/// `ProfessionAttributeRanges` and `AffinityMap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Profession {
    ShopClerk,
    Worker,
    Developer,
    Politician,
    Blogger,
    Businessman,
    SpiritualMentor,
    Philosopher,
    Unemployed,
    Teacher,
    Artist,
    Doctor,
}

impl Profession {
    pub const ALL: [Profession; 12] = [
        Profession::ShopClerk,
        Profession::Worker,
        Profession::Developer,
        Profession::Politician,
        Profession::Blogger,
        Profession::Businessman,
        Profession::SpiritualMentor,
        Profession::Philosopher,
        Profession::Unemployed,
        Profession::Teacher,
        Profession::Artist,
        Profession::Doctor,
    ];

    pub fn index(self) -> usize {
        Self::ALL.iter().position(|p| *p == self).expect("Profession::ALL is exhaustive")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Topic {
    Economic,
    Health,
    Spiritual,
    Conspiracy,
    Science,
    Culture,
    Sport,
}

impl Topic {
    pub const ALL: [Topic; 7] = [
        Topic::Economic,
        Topic::Health,
        Topic::Spiritual,
        Topic::Conspiracy,
        Topic::Science,
        Topic::Culture,
        Topic::Sport,
    ];

    pub fn index(self) -> usize {
        Self::ALL.iter().position(|t| *t == self).expect("Topic::ALL is exhaustive")
    }
}

/// The six interest categories tracked per-agent and mapped to/from `Topic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Interest {
    Economics,
    Wellbeing,
    Spirituality,
    Knowledge,
    Creativity,
    Society,
}

impl Interest {
    pub const ALL: [Interest; 6] = [
        Interest::Economics,
        Interest::Wellbeing,
        Interest::Spirituality,
        Interest::Knowledge,
        Interest::Creativity,
        Interest::Society,
    ];

    pub fn index(self) -> usize {
        Self::ALL.iter().position(|i| *i == self).expect("Interest::ALL is exhaustive")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Sentiment {
    Positive,
    Negative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CoverageLevel {
    Low,
    Middle,
    High,
}

impl CoverageLevel {
    /// Fraction of the eligible audience reached (§4.7).
    pub fn audience_fraction(self) -> f64 {
        match self {
            CoverageLevel::Low => 0.30,
            CoverageLevel::Middle => 0.60,
            CoverageLevel::High => 1.00,
        }
    }

    /// `coverage_factor` used in the reader's Δtime_budget (§4.7).
    pub fn coverage_factor(self) -> f64 {
        match self {
            CoverageLevel::Low => 0.2,
            CoverageLevel::Middle => 0.4,
            CoverageLevel::High => 0.6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Initializing,
    Running,
    Stopping,
    Completed,
    Failed,
    ForceStopped,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::ForceStopped)
    }
}

/// Scalar attributes mutated through `Agent::apply` (§4.4). Used as the
/// `attribute` field on history records and as the key into per-action
/// effect tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Attribute {
    FinancialCapability,
    TrendReceptivity,
    SocialStatus,
    EnergyLevel,
    TimeBudget,
}

/// Purchase tiers (§3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PurchaseLevel {
    L1,
    L2,
    L3,
}

impl PurchaseLevel {
    /// `financial_capability` threshold required to purchase at this level (§4.4).
    pub fn threshold(self) -> f64 {
        match self {
            PurchaseLevel::L1 => 0.05,
            PurchaseLevel::L2 => 0.50,
            PurchaseLevel::L3 => 2.00,
        }
    }
}

/// Reason codes recorded on attribute-history entries (§3 Attribute-history record).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MutationReason {
    Post,
    SelfDev,
    Purchase(PurchaseLevel),
    TrendInfluence,
    PostEffect,
    DailyReset,
    EnergyRecovery,
}
