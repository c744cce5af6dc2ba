//! Merge of a fresh listing with the persisted table
//!
//! New documents become `Pending` rows. Known documents get their
//! sync-owned fields refreshed and their score recomputed, while `status`,
//! `notes`, `owner` and `created_at` stay as stored. Documents that drop out
//! of the listing are kept. Pure: no I/O, `now` is passed in.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{DocumentRecord, SourceDocument, UNKNOWN_PERSON};

/// What happens to a stored record whose document is no longer listed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingDocumentPolicy {
    /// Leave the record exactly as it is
    #[default]
    Retain,
    /// Stamp `missing_since` once, leave everything else
    Flag,
}

/// Result of one merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub records: BTreeMap<String, DocumentRecord>,
    /// First seen in this snapshot
    pub created: Vec<String>,
    /// Sync-owned fields changed
    pub updated: Vec<String>,
    /// Listed, nothing changed
    pub unchanged: Vec<String>,
    /// Stored but not listed
    pub missing: Vec<String>,
    /// Missing records stamped in this merge
    pub flagged: Vec<String>,
}

impl Reconciliation {
    /// Ids whose record differs from what was stored.
    pub fn dirty_ids(&self) -> impl Iterator<Item = &String> {
        self.created
            .iter()
            .chain(self.updated.iter())
            .chain(self.flagged.iter())
    }

    pub fn dirty_count(&self) -> usize {
        self.created.len() + self.updated.len() + self.flagged.len()
    }
}

/// Merge `fresh` into `prior` as of `now`.
pub fn reconcile(
    fresh: &[SourceDocument],
    prior: &BTreeMap<String, DocumentRecord>,
    now: DateTime<Utc>,
    policy: MissingDocumentPolicy,
) -> Reconciliation {
    let mut result = Reconciliation {
        records: prior.clone(),
        ..Default::default()
    };
    let mut seen: HashSet<&str> = HashSet::with_capacity(fresh.len());

    for doc in fresh {
        if !seen.insert(doc.id.as_str()) {
            debug!(id = %doc.id, "Duplicate id in listing, keeping first occurrence");
            continue;
        }

        match prior.get(&doc.id) {
            None => {
                result
                    .records
                    .insert(doc.id.clone(), DocumentRecord::discovered(doc, now));
                result.created.push(doc.id.clone());
            }
            Some(existing) => {
                let refreshed = refresh(existing, doc, now);
                if refreshed == *existing {
                    result.unchanged.push(doc.id.clone());
                } else {
                    result.updated.push(doc.id.clone());
                    result.records.insert(doc.id.clone(), refreshed);
                }
            }
        }
    }

    for (id, record) in prior {
        if seen.contains(id.as_str()) {
            continue;
        }
        result.missing.push(id.clone());

        if policy == MissingDocumentPolicy::Flag && record.missing_since.is_none() {
            let mut flagged = record.clone();
            flagged.missing_since = Some(now);
            result.records.insert(id.clone(), flagged);
            result.flagged.push(id.clone());
        }
    }

    result
}

/// Refresh a stored record from its listing entry.
fn refresh(existing: &DocumentRecord, doc: &SourceDocument, now: DateTime<Utc>) -> DocumentRecord {
    let mut record = existing.clone();
    record.name = doc.name.clone();
    record.modified_at = doc.modified_at;
    record.link = doc.link.clone();
    record.last_editor = doc.last_editor.clone();
    record.missing_since = None;

    // Owner is fixed at discovery; only a placeholder gets replaced.
    if record.owner == UNKNOWN_PERSON && doc.owner != UNKNOWN_PERSON {
        record.owner = doc.owner.clone();
    }

    record.rescore(now);
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ReviewStatus;
    use crate::priority::PriorityTier;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn doc(id: &str, created_days_ago: i64, modified_days_ago: i64) -> SourceDocument {
        SourceDocument {
            id: id.to_string(),
            name: format!("Design {}", id),
            owner: "Priya".to_string(),
            created_at: now() - Duration::days(created_days_ago),
            modified_at: now() - Duration::days(modified_days_ago),
            link: format!("https://docs.google.com/document/d/{}/edit", id),
            last_editor: "Rahul".to_string(),
        }
    }

    #[test]
    fn test_owner_placeholder_is_filled_but_real_owner_kept() {
        let mut prior = BTreeMap::new();
        let mut unknown = DocumentRecord::discovered(&doc("a", 3, 1), now());
        unknown.owner = UNKNOWN_PERSON.to_string();
        prior.insert("a".to_string(), unknown);
        prior.insert("b".to_string(), DocumentRecord::discovered(&doc("b", 3, 1), now()));

        let mut renamed = doc("b", 3, 1);
        renamed.owner = "Somebody Else".to_string();

        let result = reconcile(&[doc("a", 3, 1), renamed], &prior, now(), MissingDocumentPolicy::Retain);
        assert_eq!(result.records["a"].owner, "Priya");
        assert_eq!(result.records["b"].owner, "Priya");
        assert_eq!(result.updated, vec!["a".to_string()]);
        assert_eq!(result.unchanged, vec!["b".to_string()]);
    }

    #[test]
    fn test_duplicate_listing_entries_keep_first() {
        let mut second = doc("a", 3, 1);
        second.name = "Shadow copy".to_string();

        let result = reconcile(&[doc("a", 3, 1), second], &BTreeMap::new(), now(), MissingDocumentPolicy::Retain);
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records["a"].name, "Design a");
        assert_eq!(result.created.len(), 1);
    }

    #[test]
    fn test_reappearing_document_clears_flag() {
        let mut record = DocumentRecord::discovered(&doc("a", 8, 2), now());
        record.missing_since = Some(now() - Duration::days(1));
        record.status = ReviewStatus::InReview;
        let prior = BTreeMap::from([("a".to_string(), record)]);

        let result = reconcile(&[doc("a", 8, 2)], &prior, now(), MissingDocumentPolicy::Flag);
        let merged = &result.records["a"];
        assert_eq!(merged.missing_since, None);
        assert_eq!(merged.status, ReviewStatus::InReview);
        assert_eq!(merged.priority_tier, PriorityTier::High);
        assert_eq!(result.updated, vec!["a".to_string()]);
    }

    #[test]
    fn test_dirty_ids_cover_created_updated_and_flagged() {
        let prior = BTreeMap::from([
            ("kept".to_string(), DocumentRecord::discovered(&doc("kept", 2, 2), now() - Duration::days(1))),
            ("gone".to_string(), DocumentRecord::discovered(&doc("gone", 2, 2), now())),
        ]);

        let result = reconcile(&[doc("kept", 2, 2), doc("new", 0, 0)], &prior, now(), MissingDocumentPolicy::Flag);
        let dirty: Vec<&String> = result.dirty_ids().collect();
        assert_eq!(dirty, vec!["new", "kept", "gone"]);
        assert_eq!(result.dirty_count(), 3);
        assert_eq!(result.missing, vec!["gone".to_string()]);
    }
}
