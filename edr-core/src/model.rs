//! Review document records
//!
//! Three shapes of the same document:
//! - `RawDocument`: what the Drive listing returns, every field optional
//! - `SourceDocument`: a validated listing entry
//! - `DocumentRecord`: a row of the tracking table, sync-owned metadata plus
//!   the user-owned `status` and `notes`

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::priority::{self, PriorityTier};

/// Placeholder used when an owner or editor cannot be determined.
pub const UNKNOWN_PERSON: &str = "Unknown";

/// Review status, edited by dashboard users only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReviewStatus {
    /// Newly discovered, nobody has picked it up
    #[default]
    Pending,
    /// A reviewer is working through it
    InReview,
    /// Sent back to the author
    NeedsChanges,
    /// Signed off
    Approved,
    /// Review closed out
    Completed,
    /// No longer tracked actively
    Archived,
}

impl ReviewStatus {
    pub const ALL: [ReviewStatus; 6] = [
        ReviewStatus::Pending,
        ReviewStatus::InReview,
        ReviewStatus::NeedsChanges,
        ReviewStatus::Approved,
        ReviewStatus::Completed,
        ReviewStatus::Archived,
    ];

    /// Text shown in the sheet's status dropdown.
    pub fn label(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "Pending",
            ReviewStatus::InReview => "In Review",
            ReviewStatus::NeedsChanges => "Needs Changes",
            ReviewStatus::Approved => "Approved",
            ReviewStatus::Completed => "Completed",
            ReviewStatus::Archived => "Archived",
        }
    }

    /// Whether the review still needs attention.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            ReviewStatus::Pending | ReviewStatus::InReview | ReviewStatus::NeedsChanges
        )
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown review status: {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for ReviewStatus {
    type Err = UnknownStatus;

    /// Accepts the sheet label in any case, with or without spaces
    /// (`In Review`, `in review`, `InReview`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_')
            .collect::<String>()
            .to_lowercase();

        ReviewStatus::ALL
            .into_iter()
            .find(|status| status.label().replace(' ', "").to_lowercase() == wanted)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// The columns dashboard users own. The sync never overwrites them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFields {
    pub status: ReviewStatus,
    pub notes: String,
}

/// A row of the tracking table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Drive file id, unique across syncs
    pub id: String,
    /// Display title
    pub name: String,
    /// Architect who owns the design
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub status: ReviewStatus,
    /// Whole days since creation, as of the last scoring
    pub days_old: u32,
    /// Whole days since the last edit, as of the last scoring
    pub days_since_update: u32,
    pub priority_score: u32,
    pub priority_tier: PriorityTier,
    /// Link to open the document
    pub link: String,
    /// Last person who modified the document
    pub last_editor: String,
    /// Set when the document stopped showing up in the listing
    pub missing_since: Option<DateTime<Utc>>,
    pub notes: String,
}

impl DocumentRecord {
    /// Build the record for a document seen for the first time.
    pub fn discovered(doc: &SourceDocument, now: DateTime<Utc>) -> Self {
        let priority = priority::score(doc.created_at, doc.modified_at, now);
        Self {
            id: doc.id.clone(),
            name: doc.name.clone(),
            owner: doc.owner.clone(),
            created_at: doc.created_at,
            modified_at: doc.modified_at,
            status: ReviewStatus::Pending,
            days_old: priority.days_old,
            days_since_update: priority.days_since_update,
            priority_score: priority.score,
            priority_tier: priority.tier,
            link: doc.link.clone(),
            last_editor: doc.last_editor.clone(),
            missing_since: None,
            notes: String::new(),
        }
    }

    pub fn user_fields(&self) -> UserFields {
        UserFields {
            status: self.status,
            notes: self.notes.clone(),
        }
    }

    pub fn apply_user_fields(&mut self, fields: &UserFields) {
        self.status = fields.status;
        self.notes = fields.notes.clone();
    }

    /// Copy every sync-owned column from `other`, leaving `status` and
    /// `notes` alone.
    pub fn merge_sync_fields(&mut self, other: &DocumentRecord) {
        self.name = other.name.clone();
        self.owner = other.owner.clone();
        self.created_at = other.created_at;
        self.modified_at = other.modified_at;
        self.days_old = other.days_old;
        self.days_since_update = other.days_since_update;
        self.priority_score = other.priority_score;
        self.priority_tier = other.priority_tier;
        self.link = other.link.clone();
        self.last_editor = other.last_editor.clone();
        self.missing_since = other.missing_since;
    }

    /// Recompute score and tier together against `now`.
    pub fn rescore(&mut self, now: DateTime<Utc>) {
        let priority = priority::score(self.created_at, self.modified_at, now);
        self.days_old = priority.days_old;
        self.days_since_update = priority.days_since_update;
        self.priority_score = priority.score;
        self.priority_tier = priority.tier;
    }
}

/// A person as reported by the Drive API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrivePerson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
}

/// A file entry exactly as the listing returned it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_view_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modifying_user: Option<DrivePerson>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owners: Vec<DrivePerson>,
}

impl RawDocument {
    /// Entry with the four required fields set.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        created: DateTime<Utc>,
        modified: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Some(id.into()),
            name: Some(name.into()),
            created_time: Some(created.to_rfc3339()),
            modified_time: Some(modified.to_rfc3339()),
            ..Default::default()
        }
    }

    pub fn with_editor(mut self, display_name: impl Into<String>) -> Self {
        self.last_modifying_user = Some(DrivePerson {
            display_name: Some(display_name.into()),
            email_address: None,
        });
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.web_view_link = Some(link.into());
        self
    }
}

/// A listing entry that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub link: String,
    pub last_editor: String,
}

/// A row that is missing required data. Skipped, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedRecordError {
    #[error("record {id:?} is missing required field `{field}`")]
    MissingField {
        id: Option<String>,
        field: &'static str,
    },

    #[error("record {id:?} has invalid `{field}`: {value:?}")]
    InvalidField {
        id: Option<String>,
        field: &'static str,
        value: String,
    },

    #[error("record {id} appears more than once")]
    DuplicateId { id: String },
}

impl MalformedRecordError {
    pub fn id(&self) -> Option<&str> {
        match self {
            MalformedRecordError::MissingField { id, .. }
            | MalformedRecordError::InvalidField { id, .. } => id.as_deref(),
            MalformedRecordError::DuplicateId { id } => Some(id.as_str()),
        }
    }
}

impl TryFrom<RawDocument> for SourceDocument {
    type Error = MalformedRecordError;

    fn try_from(raw: RawDocument) -> Result<Self, Self::Error> {
        let id = non_empty(raw.id).ok_or(MalformedRecordError::MissingField {
            id: None,
            field: "id",
        })?;
        let file_name = non_empty(raw.name).ok_or_else(|| MalformedRecordError::MissingField {
            id: Some(id.clone()),
            field: "name",
        })?;
        let created_at = required_time(&id, "createdTime", raw.created_time)?;
        let modified_at = required_time(&id, "modifiedTime", raw.modified_time)?;

        let (name, architect) = split_title(&file_name);
        let owner = architect
            .or_else(|| raw.owners.into_iter().find_map(|p| non_empty(p.display_name)))
            .unwrap_or_else(|| UNKNOWN_PERSON.to_string());
        let last_editor = raw
            .last_modifying_user
            .and_then(|p| non_empty(p.display_name))
            .unwrap_or_else(|| UNKNOWN_PERSON.to_string());
        let link = non_empty(raw.web_view_link)
            .unwrap_or_else(|| format!("https://docs.google.com/document/d/{}/edit", id));

        Ok(SourceDocument {
            id,
            name,
            owner,
            created_at,
            modified_at,
            link,
            last_editor,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required_time(
    id: &str,
    field: &'static str,
    value: Option<String>,
) -> Result<DateTime<Utc>, MalformedRecordError> {
    let value = non_empty(value).ok_or_else(|| MalformedRecordError::MissingField {
        id: Some(id.to_string()),
        field,
    })?;
    parse_timestamp(&value).ok_or_else(|| MalformedRecordError::InvalidField {
        id: Some(id.to_string()),
        field,
        value,
    })
}

/// Split `"Topic - [Architect]"` into the topic and the architect.
///
/// The split happens on the last `" - "`; brackets around the architect are
/// dropped. Without a separator the whole name is the topic.
pub fn split_title(file_name: &str) -> (String, Option<String>) {
    let trimmed = file_name.trim();
    match trimmed.rsplit_once(" - ") {
        Some((topic, architect)) => {
            let architect = architect.trim().replace(['[', ']'], "");
            let architect = architect.trim();
            let topic = topic.trim();
            if topic.is_empty() {
                return (trimmed.to_string(), None);
            }
            let architect = (!architect.is_empty()).then(|| architect.to_string());
            (topic.to_string(), architect)
        }
        None => (trimmed.to_string(), None),
    }
}

/// Parse a timestamp as written by Drive, by this crate, or by hand in the
/// sheet. Values without an offset are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
