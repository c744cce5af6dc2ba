//! Demo rows for showing the dashboard without a real review folder.

use chrono::{DateTime, Duration, Utc};
use edr_core::model::{DocumentRecord, ReviewStatus, SourceDocument};
use edr_core::store::{DocumentStore, StoreError};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::info;

const ARCHITECTS: [&str; 6] = ["Arnab", "Anushka", "Rahul", "Priya", "Anu", "Lasya"];

const FILLER_STATUSES: [ReviewStatus; 5] = [
    ReviewStatus::Pending,
    ReviewStatus::InReview,
    ReviewStatus::NeedsChanges,
    ReviewStatus::Approved,
    ReviewStatus::Completed,
];

struct Scenario {
    name: String,
    owner: String,
    days_old: i64,
    status: ReviewStatus,
}

fn pick<R: Rng>(rng: &mut R, choices: &[&str]) -> String {
    choices.choose(rng).copied().unwrap_or("Unknown").to_string()
}

fn scenarios<R: Rng>(rng: &mut R, filler: usize) -> Vec<Scenario> {
    let mut list = vec![
        Scenario {
            name: "Legacy Auth System Migration".to_string(),
            owner: pick(rng, &["Anu", "Anushka"]),
            days_old: 15,
            status: ReviewStatus::Pending,
        },
        Scenario {
            name: "Hotfix: Payment Gateway Bug".to_string(),
            owner: "Anushka".to_string(),
            days_old: 1,
            status: ReviewStatus::NeedsChanges,
        },
        Scenario {
            name: "Q4 API Spec Proposal".to_string(),
            owner: "Rahul".to_string(),
            days_old: 8,
            status: ReviewStatus::Pending,
        },
        Scenario {
            name: "New User Onboarding Flow".to_string(),
            owner: "Priya".to_string(),
            days_old: 0,
            status: ReviewStatus::InReview,
        },
        Scenario {
            name: "Data Privacy Policy Update".to_string(),
            owner: pick(rng, &["Anu", "Anushka"]),
            days_old: 3,
            status: ReviewStatus::Approved,
        },
    ];

    for n in 1..=filler {
        list.push(Scenario {
            name: format!("Module {} Architecture", n),
            owner: pick(rng, &ARCHITECTS),
            days_old: rng.gen_range(0..=5),
            status: FILLER_STATUSES
                .choose(rng)
                .copied()
                .unwrap_or(ReviewStatus::Pending),
        });
    }
    list
}

/// Write the demo rows that are not in the store yet. Returns how many were
/// written.
pub async fn seed<R: Rng>(
    store: &dyn DocumentStore,
    rng: &mut R,
    filler: usize,
    now: DateTime<Utc>,
) -> Result<usize, StoreError> {
    let existing = store.read_all().await?.records;
    let mut written = 0;

    for (n, scenario) in scenarios(rng, filler).into_iter().enumerate() {
        let id = format!("demo_id_{}", n);
        if existing.contains_key(&id) {
            continue;
        }

        let created_at = now - Duration::days(scenario.days_old);
        let modified_at = (created_at + Duration::hours(rng.gen_range(1..=24))).min(now);
        let doc = SourceDocument {
            link: format!("https://docs.google.com/document/d/{}/edit", id),
            id,
            name: scenario.name,
            owner: scenario.owner,
            created_at,
            modified_at,
            last_editor: "Demo".to_string(),
        };

        let mut record = DocumentRecord::discovered(&doc, now);
        record.status = scenario.status;
        store.upsert(&record, None).await?;
        written += 1;
    }

    info!(written, store = store.id(), "Seeded demo documents");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use edr_core::priority::PriorityTier;
    use edr_core::store::MemoryStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[tokio::test]
    async fn test_seed_writes_scenarios_once() {
        let store = MemoryStore::new();
        let now = Utc.with_ymd_and_hms(2024, 10, 1, 12, 0, 0).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        let written = seed(&store, &mut rng, 5, now).await.unwrap();
        assert_eq!(written, 10);

        let records = store.records();
        let legacy = &records["demo_id_0"];
        assert_eq!(legacy.status, ReviewStatus::Pending);
        assert_eq!(legacy.priority_tier, PriorityTier::Critical);
        assert!(legacy.owner == "Anu" || legacy.owner == "Anushka");
        assert_eq!(legacy.link, "https://docs.google.com/document/d/demo_id_0/edit");

        assert_eq!(records["demo_id_3"].status, ReviewStatus::InReview);
        assert!(records.values().all(|r| r.modified_at <= now));

        let again = seed(&store, &mut rng, 5, now).await.unwrap();
        assert_eq!(again, 0);
    }
}
