//! Review urgency scoring
//!
//! The score adds how old a document is to how long it has gone without an
//! edit, both in whole days. Pure functions only.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::DocumentRecord;

/// Lowest score that counts as `High`.
pub const HIGH_THRESHOLD: u32 = 5;

/// Highest score that is still `High`; anything above is `Critical`.
pub const CRITICAL_ABOVE: u32 = 10;

/// Discrete urgency bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PriorityTier {
    #[default]
    Normal,
    High,
    Critical,
}

impl PriorityTier {
    pub fn from_score(score: u32) -> Self {
        if score > CRITICAL_ABOVE {
            PriorityTier::Critical
        } else if score >= HIGH_THRESHOLD {
            PriorityTier::High
        } else {
            PriorityTier::Normal
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PriorityTier::Normal => "Normal",
            PriorityTier::High => "High",
            PriorityTier::Critical => "Critical",
        }
    }
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

impl FromStr for PriorityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "normal" => Ok(PriorityTier::Normal),
            "high" => Ok(PriorityTier::High),
            "critical" => Ok(PriorityTier::Critical),
            other => Err(format!("unknown priority tier: {}", other)),
        }
    }
}

/// Score and tier, always produced together, with the two day counts the
/// score is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Priority {
    pub score: u32,
    pub tier: PriorityTier,
    pub days_old: u32,
    pub days_since_update: u32,
}

/// Whole days from `then` to `now`, clamped at zero for timestamps in the
/// future.
pub fn days_since(then: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    let days = (now - then).num_days().max(0);
    u32::try_from(days).unwrap_or(u32::MAX)
}

/// Urgency of a document created at `created_at` and last edited at
/// `modified_at`, as seen at `now`.
pub fn score(created_at: DateTime<Utc>, modified_at: DateTime<Utc>, now: DateTime<Utc>) -> Priority {
    let days_old = days_since(created_at, now);
    let days_since_update = days_since(modified_at, now);
    let score = days_old.saturating_add(days_since_update);
    Priority {
        score,
        tier: PriorityTier::from_score(score),
        days_old,
        days_since_update,
    }
}

/// Order records most urgent first. Equal scores keep their relative order.
pub fn rank_by_urgency(records: &mut [DocumentRecord]) {
    records.sort_by(|a, b| b.priority_score.cmp(&a.priority_score));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(PriorityTier::from_score(0), PriorityTier::Normal);
        assert_eq!(PriorityTier::from_score(4), PriorityTier::Normal);
        assert_eq!(PriorityTier::from_score(5), PriorityTier::High);
        assert_eq!(PriorityTier::from_score(10), PriorityTier::High);
        assert_eq!(PriorityTier::from_score(11), PriorityTier::Critical);
    }

    #[test]
    fn test_score_adds_age_and_dormancy() {
        let p = score(now() - Duration::days(12), now() - Duration::days(1), now());
        assert_eq!(p.score, 13);
        assert_eq!(p.tier, PriorityTier::Critical);
        assert_eq!((p.days_old, p.days_since_update), (12, 1));
    }

    #[test]
    fn test_partial_days_are_floored() {
        let created = now() - Duration::days(4) - Duration::hours(23);
        let modified = now() - Duration::hours(23);
        assert_eq!(score(created, modified, now()).score, 4);
    }

    #[test]
    fn test_future_timestamps_clamp_to_zero() {
        let future = now() + Duration::days(3);
        let p = score(future, future, now());
        assert_eq!(p.score, 0);
        assert_eq!(p.tier, PriorityTier::Normal);

        assert_eq!(score(now() - Duration::days(6), future, now()).score, 6);
    }

    #[test]
    fn test_tier_labels_round_trip() {
        for tier in [PriorityTier::Normal, PriorityTier::High, PriorityTier::Critical] {
            assert_eq!(tier.label().parse::<PriorityTier>().unwrap(), tier);
        }
        assert!("urgent".parse::<PriorityTier>().is_err());
    }
}
