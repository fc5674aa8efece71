use thiserror::Error;

use crate::types::{AgentId, TrendId};

/// Crate-wide error type. Variants map 1:1 onto the error kinds named in
/// spec §7. Most are absorbed by the component that raises them (see the
/// doc comment on each variant); only the ones marked "fatal" ever leave
/// `Engine::bootstrap` / `Engine::run` as an `Err`.
#[derive(Debug, Error)]
pub enum CapsimError {
    /// Malformed or missing configuration. Fatal at bootstrap.
    #[error("invalid configuration: {0}")]
    ConfigError(String),

    /// Bootstrap refused because a run with non-terminal status already
    /// exists. Returned to the caller; no state is written.
    #[error("an active simulation already exists")]
    ActiveSimulationExists,

    /// Admission to the event queue was refused (§4.2). Absorbed by the
    /// caller as a WARNING + counter increment; never propagated.
    #[error("event queue is full (capacity exhausted)")]
    QueueFull,

    /// A gate re-check failed at execution time (§4.6). Absorbed silently
    /// except for a debug log.
    #[error("gate re-check failed for agent {agent:?}: {reason}")]
    GateFailed { agent: AgentId, reason: String },

    /// A batch commit failed but retries remain. Absorbed by the Repository's
    /// retry loop.
    #[error("transient persistence failure (attempt {attempt}): {source}")]
    PersistenceTransient {
        attempt: u32,
        #[source]
        source: std::io::Error,
    },

    /// All retries exhausted for a batch. CRITICAL log + counter; the
    /// simulation continues.
    #[error("persistence failed after exhausting retries: {0}")]
    PersistenceFatal(String),

    /// A defensive check caught state outside its invariant (§3 I1–I6).
    /// Fatal: the Run is marked FAILED and the engine aborts.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// Shutdown drain exceeded `SHUTDOWN_TIMEOUT_SEC`. CRITICAL; status
    /// becomes FORCE_STOPPED.
    #[error("shutdown drain exceeded the configured timeout")]
    ShutdownTimeout,

    /// A dispatch-time trend lookup in the Influence Processor came up
    /// empty (§4.7). Fatal: propagated through `run()`'s existing
    /// mark-FAILED-and-abort branch like any other dispatch error.
    #[error(transparent)]
    TrendLookup(#[from] TrendNotFound),
}

impl CapsimError {
    pub fn invariant(msg: impl Into<String>) -> Self {
        CapsimError::InvariantViolation(msg.into())
    }

    pub fn gate_failed(agent: AgentId, reason: impl Into<String>) -> Self {
        CapsimError::GateFailed { agent, reason: reason.into() }
    }
}

/// Narrower error for trend lookups that fail inside the Influence Processor;
/// kept distinct from `CapsimError` (and converted via `#[from]`) since a
/// missing trend is a programming error within a single dispatch, not a
/// simulation-level condition.
#[derive(Debug, Error)]
#[error("trend {0:?} not found")]
pub struct TrendNotFound(pub TrendId);

pub type CapsimResult<T> = Result<T, CapsimError>;
