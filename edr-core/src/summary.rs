//! Review summary
//!
//! Aggregates over the tracking table: how many reviews sit in each status
//! and tier, how the open work is spread across architects, and which open
//! reviews are most urgent.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::{DocumentRecord, ReviewStatus};
use crate::priority::{rank_by_urgency, PriorityTier};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UrgentDocument {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub status: ReviewStatus,
    pub priority_score: u32,
    pub priority_tier: PriorityTier,
    pub link: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReviewSummary {
    pub total: usize,
    /// Reviews not yet approved, completed or archived
    pub open: usize,
    /// Records whose document has dropped out of the listing
    pub missing: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_tier: BTreeMap<String, usize>,
    /// Owner → status → count
    pub by_owner: BTreeMap<String, BTreeMap<String, usize>>,
    pub most_urgent: Vec<UrgentDocument>,
}

impl ReviewSummary {
    /// Summarize `records`, listing up to `top` of the most urgent open
    /// reviews.
    pub fn from_records<'a>(
        records: impl IntoIterator<Item = &'a DocumentRecord>,
        top: usize,
    ) -> Self {
        let mut summary = ReviewSummary::default();
        for status in ReviewStatus::ALL {
            summary.by_status.insert(status.label().to_string(), 0);
        }
        for tier in [PriorityTier::Critical, PriorityTier::High, PriorityTier::Normal] {
            summary.by_tier.insert(tier.label().to_string(), 0);
        }

        let mut open = Vec::new();
        for record in records {
            summary.total += 1;
            *summary
                .by_status
                .entry(record.status.label().to_string())
                .or_default() += 1;
            *summary
                .by_tier
                .entry(record.priority_tier.label().to_string())
                .or_default() += 1;
            *summary
                .by_owner
                .entry(record.owner.clone())
                .or_default()
                .entry(record.status.label().to_string())
                .or_default() += 1;

            if record.missing_since.is_some() {
                summary.missing += 1;
            }
            if record.status.is_open() {
                summary.open += 1;
                open.push(record.clone());
            }
        }

        rank_by_urgency(&mut open);
        summary.most_urgent = open
            .into_iter()
            .take(top)
            .map(|record| UrgentDocument {
                id: record.id,
                name: record.name,
                owner: record.owner,
                status: record.status,
                priority_score: record.priority_score,
                priority_tier: record.priority_tier,
                link: record.link,
            })
            .collect();
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn record(id: &str, owner: &str, status: ReviewStatus, score: u32) -> DocumentRecord {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        DocumentRecord {
            id: id.to_string(),
            name: format!("Doc {}", id),
            owner: owner.to_string(),
            created_at: at,
            modified_at: at + Duration::days(1),
            status,
            days_old: score,
            days_since_update: 0,
            priority_score: score,
            priority_tier: PriorityTier::from_score(score),
            link: String::new(),
            last_editor: owner.to_string(),
            missing_since: None,
            notes: String::new(),
        }
    }

    #[test]
    fn test_counts_and_workload() {
        let records = vec![
            record("a", "Priya", ReviewStatus::Pending, 14),
            record("b", "Priya", ReviewStatus::Approved, 30),
            record("c", "Rahul", ReviewStatus::InReview, 6),
            record("d", "Rahul", ReviewStatus::InReview, 2),
        ];

        let summary = ReviewSummary::from_records(&records, 10);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.open, 3);
        assert_eq!(summary.by_status["In Review"], 2);
        assert_eq!(summary.by_status["Archived"], 0);
        assert_eq!(summary.by_tier["Critical"], 2);
        assert_eq!(summary.by_tier["High"], 1);
        assert_eq!(summary.by_owner["Priya"]["Approved"], 1);
        assert_eq!(summary.by_owner["Rahul"]["In Review"], 2);
    }

    #[test]
    fn test_most_urgent_excludes_closed_reviews() {
        let records = vec![
            record("closed", "Priya", ReviewStatus::Completed, 40),
            record("low", "Rahul", ReviewStatus::Pending, 1),
            record("high", "Rahul", ReviewStatus::NeedsChanges, 12),
            record("mid", "Anu", ReviewStatus::InReview, 7),
        ];

        let summary = ReviewSummary::from_records(&records, 2);
        let ids: Vec<&str> = summary.most_urgent.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid"]);
    }

    #[test]
    fn test_empty_table() {
        let summary = ReviewSummary::from_records(std::iter::empty(), 5);
        assert_eq!(summary.total, 0);
        assert!(summary.most_urgent.is_empty());
        assert_eq!(summary.by_status.len(), ReviewStatus::ALL.len());
    }
}
