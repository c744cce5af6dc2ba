//! Google Sheets v4 backed tracking table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use super::layout::{self, HEADERS, LAST_COLUMN, LAST_SYNC_OWNED_COLUMN, SCORE, STATUS, TIER};
use super::{DocumentStore, StoreError, StoreSnapshot};
use crate::auth::TokenSource;
use crate::google;
use crate::model::{DocumentRecord, MalformedRecordError, ReviewStatus, UserFields};
use crate::priority::PriorityTier;

pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";
pub const DEFAULT_WORKSHEET: &str = "Active Reviews";
pub const SYNC_STATUS_WORKSHEET: &str = "Sync Status";

/// First data row; row 1 holds the headers.
const FIRST_DATA_ROW: usize = 2;

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValueUpdate<'a> {
    range: &'a str,
    major_dimension: &'static str,
    values: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendResponse {
    #[serde(default)]
    updates: Option<AppendUpdates>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendUpdates {
    #[serde(default)]
    updated_range: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetInfo {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    #[serde(default)]
    sheet_id: Option<i64>,
    title: String,
}

#[derive(Debug, Deserialize)]
struct BatchUpdateResponse {
    #[serde(default)]
    replies: Vec<BatchReply>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchReply {
    #[serde(default)]
    add_sheet: Option<SheetEntry>,
}

/// Where each document sits in the worksheet, from the last full read.
#[derive(Debug, Default)]
struct RowIndex {
    rows: HashMap<String, usize>,
    /// Ids whose row exists but does not parse
    unreadable: HashMap<String, String>,
}

enum Lookup {
    NotLoaded,
    Row(usize),
    Unreadable(String),
    Absent,
}

/// Tracking table stored in a worksheet of a spreadsheet.
pub struct SheetsStore {
    client: Client,
    base_url: String,
    spreadsheet_id: String,
    worksheet: String,
    tokens: Arc<dyn TokenSource>,
    layout_ready: OnceCell<()>,
    row_index: Mutex<Option<RowIndex>>,
}

impl SheetsStore {
    pub fn new(spreadsheet_id: impl Into<String>, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            client: Client::new(),
            base_url: SHEETS_API_BASE.to_string(),
            spreadsheet_id: spreadsheet_id.into(),
            worksheet: DEFAULT_WORKSHEET.to_string(),
            tokens,
            layout_ready: OnceCell::new(),
            row_index: Mutex::new(None),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_worksheet(mut self, worksheet: impl Into<String>) -> Self {
        self.worksheet = worksheet.into();
        self
    }

    fn a1(sheet: &str, range: &str) -> String {
        format!("'{}'!{}", sheet.replace('\'', "''"), range)
    }

    fn tracking_range(&self, range: &str) -> String {
        Self::a1(&self.worksheet, range)
    }

    fn values_url(&self, range: &str) -> String {
        format!(
            "{}/{}/values/{}",
            self.base_url,
            self.spreadsheet_id,
            urlencoding::encode(range)
        )
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let token = self.tokens.access_token().await?;
        let response = request
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(google::transport)?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(google::failure_from(response).await.into())
        }
    }

    async fn read_values(&self, range: &str) -> Result<Vec<Vec<String>>, StoreError> {
        let response = self.send(self.client.get(self.values_url(range))).await?;
        let body: ValueRange = response
            .json()
            .await
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))?;

        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    async fn write_values(&self, range: &str, values: Vec<Vec<String>>) -> Result<(), StoreError> {
        let body = ValueUpdate {
            range,
            major_dimension: "ROWS",
            values,
        };
        self.send(
            self.client
                .put(self.values_url(range))
                .query(&[("valueInputOption", "RAW")])
                .json(&body),
        )
        .await?;
        Ok(())
    }

    /// Append rows after the table, returning the row number written.
    async fn append_row(&self, row: Vec<String>) -> Result<Option<usize>, StoreError> {
        let range = self.tracking_range(&format!("A:{}", LAST_COLUMN));
        let body = ValueUpdate {
            range: &range,
            major_dimension: "ROWS",
            values: vec![row],
        };
        let response = self
            .send(
                self.client
                    .post(format!("{}:append", self.values_url(&range)))
                    .query(&[
                        ("valueInputOption", "RAW"),
                        ("insertDataOption", "INSERT_ROWS"),
                    ])
                    .json(&body),
            )
            .await?;

        let appended: AppendResponse = response
            .json()
            .await
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))?;

        Ok(appended
            .updates
            .and_then(|u| u.updated_range)
            .and_then(|r| first_row_of_range(&r)))
    }

    async fn batch_update(&self, requests: Vec<Value>) -> Result<BatchUpdateResponse, StoreError> {
        let response = self
            .send(
                self.client
                    .post(format!("{}/{}:batchUpdate", self.base_url, self.spreadsheet_id))
                    .json(&serde_json::json!({ "requests": requests })),
            )
            .await?;
        response
            .json()
            .await
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))
    }

    /// Create missing worksheets, the header row and the Status dropdown,
    /// once per store.
    async fn ensure_layout(&self) -> Result<(), StoreError> {
        self.layout_ready
            .get_or_try_init(|| async move {
                let response = self
                    .send(
                        self.client
                            .get(format!("{}/{}", self.base_url, self.spreadsheet_id))
                            .query(&[("fields", "sheets.properties(sheetId,title)")]),
                    )
                    .await?;
                let info: SpreadsheetInfo = response
                    .json()
                    .await
                    .map_err(|e| StoreError::InvalidResponse(e.to_string()))?;

                let mut tracking_sheet = info
                    .sheets
                    .iter()
                    .find(|s| s.properties.title == self.worksheet)
                    .map(|s| s.properties.sheet_id);
                let created = tracking_sheet.is_none();

                let missing: Vec<&str> = [self.worksheet.as_str(), SYNC_STATUS_WORKSHEET]
                    .into_iter()
                    .filter(|title| !info.sheets.iter().any(|s| s.properties.title == *title))
                    .collect();

                if !missing.is_empty() {
                    let requests = missing
                        .iter()
                        .map(|title| {
                            serde_json::json!({ "addSheet": { "properties": { "title": title } } })
                        })
                        .collect();
                    let reply = self.batch_update(requests).await?;
                    info!(worksheets = ?missing, "Created worksheets");

                    if created {
                        tracking_sheet = reply
                            .replies
                            .into_iter()
                            .filter_map(|r| r.add_sheet)
                            .find(|s| s.properties.title == self.worksheet)
                            .map(|s| s.properties.sheet_id);
                    }
                }

                let header_range = self.tracking_range(&format!("A1:{}1", LAST_COLUMN));
                let current = self.read_values(&header_range).await?;
                let matches = current
                    .first()
                    .map(|row| row.iter().map(String::as_str).eq(HEADERS.iter().copied()))
                    .unwrap_or(false);
                if !matches {
                    let headers: Vec<String> = HEADERS.iter().map(|h| h.to_string()).collect();
                    self.write_values(&header_range, vec![headers]).await?;
                    info!(worksheet = %self.worksheet, "Wrote header row");
                }

                match tracking_sheet.flatten() {
                    Some(sheet_id) => {
                        // Rules added again would stack, so only a fresh sheet gets them.
                        let mut requests = vec![status_validation(sheet_id)];
                        if created {
                            requests.extend(tier_formatting(sheet_id));
                        }
                        self.batch_update(requests).await?;
                        debug!(sheet_id, created, "Installed status validation");
                    }
                    None => warn!(
                        worksheet = %self.worksheet,
                        "Worksheet id unknown, Status column left unvalidated"
                    ),
                }
                Ok::<(), StoreError>(())
            })
            .await?;
        Ok(())
    }

    /// Full read that also rebuilds the row index.
    async fn load(&self) -> Result<StoreSnapshot, StoreError> {
        self.ensure_layout().await?;

        let range = self.tracking_range(&format!("A{}:{}", FIRST_DATA_ROW, LAST_COLUMN));
        let rows = self.read_values(&range).await?;

        let mut snapshot = StoreSnapshot::default();
        let mut index = RowIndex::default();

        for (offset, row) in rows.iter().enumerate() {
            if layout::is_blank(row) {
                continue;
            }
            match layout::row_to_record(row) {
                Ok(record) => {
                    if snapshot.records.contains_key(&record.id) {
                        snapshot
                            .malformed
                            .push(MalformedRecordError::DuplicateId { id: record.id });
                        continue;
                    }
                    index.rows.insert(record.id.clone(), FIRST_DATA_ROW + offset);
                    snapshot.records.insert(record.id.clone(), record);
                }
                Err(err) => {
                    if let Some(id) = err.id() {
                        index.unreadable.insert(id.to_string(), err.to_string());
                    }
                    snapshot.malformed.push(err);
                }
            }
        }

        debug!(
            rows = snapshot.records.len(),
            malformed = snapshot.malformed.len(),
            "Read tracking table"
        );
        *self.row_index.lock().await = Some(index);
        Ok(snapshot)
    }

    async fn lookup(&self, id: &str) -> Lookup {
        let index = self.row_index.lock().await;
        let Some(index) = index.as_ref() else {
            return Lookup::NotLoaded;
        };
        if let Some(row_number) = index.rows.get(id) {
            Lookup::Row(*row_number)
        } else if let Some(reason) = index.unreadable.get(id) {
            Lookup::Unreadable(reason.clone())
        } else {
            Lookup::Absent
        }
    }

    /// Find a row and its current contents.
    ///
    /// Rows only appear through this store, so an id missing from a loaded
    /// index is absent. A cached position that now holds another id means
    /// the sheet was re-sorted; the index is rebuilt once. A row that exists
    /// but no longer parses is an error, never "absent": appending would
    /// give the id a second row.
    async fn locate(&self, id: &str) -> Result<Option<(usize, DocumentRecord)>, StoreError> {
        match self.lookup(id).await {
            Lookup::Row(row_number) => {
                let range = self.tracking_range(&format!("A{0}:{1}{0}", row_number, LAST_COLUMN));
                let rows = self.read_values(&range).await?;
                match rows.first().map(|row| layout::row_to_record(row)) {
                    Some(Ok(record)) if record.id == id => return Ok(Some((row_number, record))),
                    Some(Err(err)) if err.id() == Some(id) => {
                        return Err(StoreError::Unreadable {
                            id: id.to_string(),
                            reason: err.to_string(),
                        })
                    }
                    _ => debug!(id, row_number, "Cached row position is stale, re-indexing"),
                }
            }
            Lookup::Unreadable(reason) => {
                return Err(StoreError::Unreadable {
                    id: id.to_string(),
                    reason,
                })
            }
            Lookup::Absent => return Ok(None),
            Lookup::NotLoaded => {}
        }

        let mut snapshot = self.load().await?;
        match self.lookup(id).await {
            Lookup::Row(row_number) => Ok(snapshot.records.remove(id).map(|record| (row_number, record))),
            Lookup::Unreadable(reason) => Err(StoreError::Unreadable {
                id: id.to_string(),
                reason,
            }),
            Lookup::Absent | Lookup::NotLoaded => Ok(None),
        }
    }
}

/// Grid range over rows 2.. of columns `first..=last`.
fn data_columns(sheet_id: i64, first: usize, last: usize) -> Value {
    serde_json::json!({
        "sheetId": sheet_id,
        "startRowIndex": FIRST_DATA_ROW - 1,
        "startColumnIndex": first,
        "endColumnIndex": last + 1,
    })
}

/// Strict dropdown of the review statuses on the Status column.
fn status_validation(sheet_id: i64) -> Value {
    let values: Vec<Value> = ReviewStatus::ALL
        .iter()
        .map(|status| serde_json::json!({ "userEnteredValue": status.label() }))
        .collect();
    serde_json::json!({
        "setDataValidation": {
            "range": data_columns(sheet_id, STATUS, STATUS),
            "rule": {
                "condition": { "type": "ONE_OF_LIST", "values": values },
                "showCustomUi": true,
                "strict": true,
            }
        }
    })
}

/// Background colour of the score and tier cells by tier.
fn tier_formatting(sheet_id: i64) -> Vec<Value> {
    let tier_cell = format!("${}{}", layout::column_letter(TIER), FIRST_DATA_ROW);
    [
        (PriorityTier::Critical, (1.0, 0.8, 0.8)),
        (PriorityTier::High, (1.0, 1.0, 0.8)),
        (PriorityTier::Normal, (0.8, 1.0, 0.8)),
    ]
    .into_iter()
    .enumerate()
    .map(|(index, (tier, (red, green, blue)))| {
        serde_json::json!({
            "addConditionalFormatRule": {
                "index": index,
                "rule": {
                    "ranges": [data_columns(sheet_id, SCORE, TIER)],
                    "booleanRule": {
                        "condition": {
                            "type": "CUSTOM_FORMULA",
                            "values": [{ "userEnteredValue": format!("={}=\"{}\"", tier_cell, tier.label()) }]
                        },
                        "format": { "backgroundColor": { "red": red, "green": green, "blue": blue } }
                    }
                }
            }
        })
    })
    .collect()
}

fn cell_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Row number at the start of an A1 range such as `'Active Reviews'!A7:L7`.
fn first_row_of_range(range: &str) -> Option<usize> {
    let cells = range.rsplit_once('!').map(|(_, cells)| cells).unwrap_or(range);
    let start = cells.split(':').next()?;
    let digits: String = start
        .chars()
        .skip_while(|c| c.is_ascii_alphabetic() || *c == '$')
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[async_trait]
impl DocumentStore for SheetsStore {
    fn id(&self) -> &str {
        &self.spreadsheet_id
    }

    async fn read_all(&self) -> Result<StoreSnapshot, StoreError> {
        self.load().await
    }

    async fn read_row(&self, id: &str) -> Result<Option<DocumentRecord>, StoreError> {
        self.ensure_layout().await?;
        Ok(self.locate(id).await?.map(|(_, record)| record))
    }

    async fn upsert(
        &self,
        record: &DocumentRecord,
        expected: Option<&UserFields>,
    ) -> Result<(), StoreError> {
        self.ensure_layout().await?;

        match (self.locate(&record.id).await?, expected) {
            (Some((row_number, live)), Some(expected)) if live.user_fields() == *expected => {
                let range = self.tracking_range(&format!(
                    "A{0}:{1}{0}",
                    row_number, LAST_SYNC_OWNED_COLUMN
                ));
                self.write_values(&range, vec![layout::sync_owned_cells(record)])
                    .await?;
                debug!(id = %record.id, row_number, "Updated row");
                Ok(())
            }
            (Some((_, live)), _) => Err(StoreError::Conflict {
                id: record.id.clone(),
                current: Some(live.user_fields()),
            }),
            (None, None) => {
                let row_number = self.append_row(layout::record_to_row(record)).await?;
                let mut index = self.row_index.lock().await;
                let indexed = match (row_number, index.as_mut()) {
                    (Some(n), Some(cached)) => {
                        cached.rows.insert(record.id.clone(), n);
                        true
                    }
                    _ => false,
                };
                if !indexed {
                    warn!(id = %record.id, "Append did not report its row, dropping row index");
                    *index = None;
                }
                debug!(id = %record.id, ?row_number, "Appended row");
                Ok(())
            }
            (None, Some(_)) => Err(StoreError::Conflict {
                id: record.id.clone(),
                current: None,
            }),
        }
    }

    async fn mark_synced(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.ensure_layout().await?;
        let range = Self::a1(SYNC_STATUS_WORKSHEET, "A1:B1");
        self.write_values(&range, vec![vec!["Last Synced".to_string(), at.to_rfc3339()]])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_row_of_range() {
        assert_eq!(first_row_of_range("'Active Reviews'!A7:L7"), Some(7));
        assert_eq!(first_row_of_range("Sheet1!$A$12:$L$12"), Some(12));
        assert_eq!(first_row_of_range("A3"), Some(3));
        assert_eq!(first_row_of_range("'Active Reviews'!A:N"), None);
    }

    #[test]
    fn test_a1_quotes_sheet_names() {
        assert_eq!(SheetsStore::a1("Active Reviews", "A1:L1"), "'Active Reviews'!A1:L1");
        assert_eq!(SheetsStore::a1("Bob's", "A1"), "'Bob''s'!A1");
    }

    #[test]
    fn test_status_validation_lists_every_status() {
        let request = status_validation(42);
        let rule = &request["setDataValidation"]["rule"];
        assert_eq!(rule["strict"], true);
        let values: Vec<&str> = rule["condition"]["values"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["userEnteredValue"].as_str().unwrap())
            .collect();
        assert_eq!(
            values,
            vec!["Pending", "In Review", "Needs Changes", "Approved", "Completed", "Archived"]
        );
        let range = &request["setDataValidation"]["range"];
        assert_eq!(range["startColumnIndex"], STATUS);
        assert_eq!(range["startRowIndex"], 1);
    }

    #[test]
    fn test_tier_formatting_keys_on_tier_column() {
        let rules = tier_formatting(42);
        assert_eq!(rules.len(), 3);
        let formula = rules[0]["addConditionalFormatRule"]["rule"]["booleanRule"]["condition"]
            ["values"][0]["userEnteredValue"]
            .as_str()
            .unwrap();
        assert_eq!(formula, "=$I2=\"Critical\"");
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(Value::String("x".into())), "x");
        assert_eq!(cell_text(serde_json::json!(12)), "12");
        assert_eq!(cell_text(Value::Null), "");
    }
}
