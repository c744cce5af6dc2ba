//! Column layout of the tracking worksheet.
//!
//! Sync-owned columns come first (A..L) so an update of an existing row is a
//! single contiguous range that never touches the user-owned Status and
//! Notes columns (M..N).

use crate::model::{parse_timestamp, DocumentRecord, MalformedRecordError, ReviewStatus};
use crate::priority::PriorityTier;

pub const HEADERS: [&str; 14] = [
    "Document ID",
    "Document Name",
    "Owner",
    "Created Date",
    "Last Modified",
    "Days Old",
    "Days Since Update",
    "Priority Score",
    "Priority Tier",
    "Google Doc Link",
    "Last Editor",
    "Missing Since",
    "Status",
    "Notes",
];

pub const COLUMN_COUNT: usize = HEADERS.len();

/// Number of leading columns the sync owns.
pub const SYNC_OWNED_COLUMNS: usize = 12;

pub const LAST_COLUMN: &str = "N";
pub const LAST_SYNC_OWNED_COLUMN: &str = "L";

const ID: usize = 0;
const NAME: usize = 1;
const OWNER: usize = 2;
const CREATED: usize = 3;
const MODIFIED: usize = 4;
const DAYS_OLD: usize = 5;
const DAYS_SINCE_UPDATE: usize = 6;
pub const SCORE: usize = 7;
pub const TIER: usize = 8;
const LINK: usize = 9;
const EDITOR: usize = 10;
const MISSING: usize = 11;
pub const STATUS: usize = 12;
pub const NOTES: usize = 13;

/// Every cell of a row, in column order.
pub fn record_to_row(record: &DocumentRecord) -> Vec<String> {
    let mut row = sync_owned_cells(record);
    row.push(record.status.label().to_string());
    row.push(record.notes.clone());
    row
}

/// Cells A..L of a row.
pub fn sync_owned_cells(record: &DocumentRecord) -> Vec<String> {
    vec![
        record.id.clone(),
        record.name.clone(),
        record.owner.clone(),
        record.created_at.to_rfc3339(),
        record.modified_at.to_rfc3339(),
        record.days_old.to_string(),
        record.days_since_update.to_string(),
        record.priority_score.to_string(),
        record.priority_tier.label().to_string(),
        record.link.clone(),
        record.last_editor.clone(),
        record
            .missing_since
            .map(|t| t.to_rfc3339())
            .unwrap_or_default(),
    ]
}

/// Whether a row carries no data at all.
pub fn is_blank(row: &[String]) -> bool {
    row.iter().all(|cell| cell.trim().is_empty())
}

/// Read a row back. Short rows are padded; the API drops trailing blanks.
///
/// Derived columns are read leniently (a damaged score is recomputed on the
/// next cycle anyway); identity, timestamps and status must be valid.
pub fn row_to_record(row: &[String]) -> Result<DocumentRecord, MalformedRecordError> {
    let cell = |index: usize| row.get(index).map(|c| c.trim()).unwrap_or("");

    let id = cell(ID);
    if id.is_empty() {
        return Err(MalformedRecordError::MissingField {
            id: None,
            field: "Document ID",
        });
    }
    let id_owned = Some(id.to_string());

    let timestamp = |index: usize, field: &'static str| {
        let value = cell(index);
        if value.is_empty() {
            return Err(MalformedRecordError::MissingField {
                id: id_owned.clone(),
                field,
            });
        }
        parse_timestamp(value).ok_or_else(|| MalformedRecordError::InvalidField {
            id: id_owned.clone(),
            field,
            value: value.to_string(),
        })
    };

    let created_at = timestamp(CREATED, "Created Date")?;
    let modified_at = timestamp(MODIFIED, "Last Modified")?;

    let status = match cell(STATUS) {
        "" => ReviewStatus::Pending,
        text => text
            .parse::<ReviewStatus>()
            .map_err(|_| MalformedRecordError::InvalidField {
                id: id_owned.clone(),
                field: "Status",
                value: text.to_string(),
            })?,
    };

    let days_old = parse_count(cell(DAYS_OLD)).unwrap_or(0);
    let days_since_update = parse_count(cell(DAYS_SINCE_UPDATE)).unwrap_or(0);
    let priority_score = parse_count(cell(SCORE)).unwrap_or(0);
    let priority_tier = cell(TIER)
        .parse::<PriorityTier>()
        .unwrap_or_else(|_| PriorityTier::from_score(priority_score));

    let missing_since = match cell(MISSING) {
        "" => None,
        value => parse_timestamp(value),
    };

    Ok(DocumentRecord {
        id: id.to_string(),
        name: cell(NAME).to_string(),
        owner: cell(OWNER).to_string(),
        created_at,
        modified_at,
        status,
        days_old,
        days_since_update,
        priority_score,
        priority_tier,
        link: cell(LINK).to_string(),
        last_editor: cell(EDITOR).to_string(),
        missing_since,
        notes: row.get(NOTES).cloned().unwrap_or_default(),
    })
}

fn parse_count(value: &str) -> Option<u32> {
    value.parse::<u32>().ok().or_else(|| {
        value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v.floor() as u32)
    })
}

/// Column letter for a zero-based index (A..Z is all this layout needs).
pub fn column_letter(index: usize) -> char {
    (b'A' + (index.min(25) as u8)) as char
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record() -> DocumentRecord {
        DocumentRecord {
            id: "doc-1".to_string(),
            name: "Ledger sharding".to_string(),
            owner: "Rahul".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
            modified_at: Utc.with_ymd_and_hms(2024, 5, 3, 8, 0, 0).unwrap(),
            status: ReviewStatus::NeedsChanges,
            days_old: 5,
            days_since_update: 2,
            priority_score: 7,
            priority_tier: PriorityTier::High,
            link: "https://docs.google.com/document/d/doc-1/edit".to_string(),
            last_editor: "Anu".to_string(),
            missing_since: None,
            notes: "see comments".to_string(),
        }
    }

    fn cells(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_row_shape_matches_headers() {
        let row = record_to_row(&record());
        assert_eq!(row.len(), COLUMN_COUNT);
        assert_eq!(row[STATUS], "Needs Changes");
        assert_eq!(sync_owned_cells(&record()).len(), SYNC_OWNED_COLUMNS);
        assert_eq!(column_letter(SYNC_OWNED_COLUMNS - 1).to_string(), LAST_SYNC_OWNED_COLUMN);
        assert_eq!(column_letter(COLUMN_COUNT - 1).to_string(), LAST_COLUMN);
        assert_eq!(row_to_record(&row).unwrap(), record());
    }

    #[test]
    fn test_short_row_defaults_user_fields() {
        let row = cells(&[
            "doc-2",
            "Queue design",
            "Priya",
            "2024-05-01 08:00:00",
            "2024-05-02T08:00:00Z",
            "2",
            "1",
            "3",
            "Normal",
        ]);
        let parsed = row_to_record(&row).unwrap();
        assert_eq!(parsed.status, ReviewStatus::Pending);
        assert_eq!((parsed.days_old, parsed.days_since_update), (2, 1));
        assert_eq!(parsed.notes, "");
        assert_eq!(parsed.last_editor, "");
        assert_eq!(parsed.missing_since, None);
    }

    #[test]
    fn test_damaged_derived_columns_are_tolerated() {
        let mut row = record_to_row(&record());
        row[SCORE] = "12.0".to_string();
        row[TIER] = "???".to_string();
        row[DAYS_OLD] = "n/a".to_string();
        let parsed = row_to_record(&row).unwrap();
        assert_eq!(parsed.priority_score, 12);
        assert_eq!(parsed.priority_tier, PriorityTier::Critical);
        assert_eq!(parsed.days_old, 0);
    }

    #[test]
    fn test_invalid_rows_are_rejected() {
        let mut row = record_to_row(&record());
        row[STATUS] = "Shipped".to_string();
        assert!(matches!(
            row_to_record(&row),
            Err(MalformedRecordError::InvalidField { field: "Status", .. })
        ));

        let mut row = record_to_row(&record());
        row[CREATED] = String::new();
        assert!(matches!(
            row_to_record(&row),
            Err(MalformedRecordError::MissingField { field: "Created Date", .. })
        ));

        assert!(row_to_record(&cells(&["", "No id"])).is_err());
        assert!(is_blank(&cells(&["", "  "])));
    }
}
