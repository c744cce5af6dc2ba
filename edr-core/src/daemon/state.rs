//! Sync cycle phases and their transitions.

use std::fmt;

/// Where the daemon is within a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    /// Listing documents; `attempt` starts at 1
    Fetching { attempt: u32 },
    Reconciling,
    Persisting,
    /// Cycle abandoned, logged before returning to idle
    Failed { reason: String },
}

/// Something that happened during a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseEvent {
    Start,
    Retry,
    Fetched,
    Reconciled,
    Persisted,
    Fail(String),
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition: {event:?} in phase {from}")]
pub struct InvalidTransition {
    pub from: SyncPhase,
    pub event: PhaseEvent,
}

impl SyncPhase {
    /// Next phase after `event`, or an error if `event` cannot happen here.
    pub fn advance(&self, event: PhaseEvent) -> Result<SyncPhase, InvalidTransition> {
        use PhaseEvent as E;
        use SyncPhase as P;

        let next = match (self, &event) {
            (P::Idle, E::Start) => P::Fetching { attempt: 1 },
            (P::Fetching { attempt }, E::Retry) => P::Fetching {
                attempt: attempt + 1,
            },
            (P::Fetching { .. }, E::Fetched) => P::Reconciling,
            (P::Reconciling, E::Reconciled) => P::Persisting,
            (P::Persisting, E::Persisted) => P::Idle,
            (P::Fetching { .. } | P::Reconciling | P::Persisting, E::Fail(reason)) => P::Failed {
                reason: reason.clone(),
            },
            (P::Failed { .. }, E::Reset) => P::Idle,
            _ => {
                return Err(InvalidTransition {
                    from: self.clone(),
                    event,
                })
            }
        };
        Ok(next)
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncPhase::Fetching { .. } | SyncPhase::Reconciling | SyncPhase::Persisting
        )
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPhase::Idle => write!(f, "idle"),
            SyncPhase::Fetching { attempt } => write!(f, "fetching (attempt {})", attempt),
            SyncPhase::Reconciling => write!(f, "reconciling"),
            SyncPhase::Persisting => write!(f, "persisting"),
            SyncPhase::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}
