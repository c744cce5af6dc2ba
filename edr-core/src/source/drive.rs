//! Google Drive v3 listing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use tracing::{debug, info};

use super::{DocumentSource, FetchError, FolderFilter};
use crate::auth::TokenSource;
use crate::google;
use crate::model::RawDocument;

pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

const FILE_FIELDS: &str = "nextPageToken, files(id, name, createdTime, modifiedTime, \
webViewLink, lastModifyingUser(displayName), owners(displayName))";

const DEFAULT_PAGE_SIZE: u32 = 100;

/// One page of `files.list`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<RawDocument>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Lists review documents in a Drive folder.
pub struct DriveSource {
    client: Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
    page_size: u32,
}

impl DriveSource {
    pub fn new(tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            client: Client::new(),
            base_url: DRIVE_API_BASE.to_string(),
            tokens,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Use another API root (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    async fn fetch_page(
        &self,
        filter: &FolderFilter,
        page_token: Option<&str>,
    ) -> Result<FileList, FetchError> {
        let token = self.tokens.access_token().await?;
        let page_size = self.page_size.to_string();
        let query = filter.query();

        let mut params: Vec<(&str, &str)> = vec![
            ("q", query.as_str()),
            ("pageSize", page_size.as_str()),
            ("fields", FILE_FIELDS),
            ("supportsAllDrives", "true"),
            ("includeItemsFromAllDrives", "true"),
        ];
        if let Some(page_token) = page_token {
            params.push(("pageToken", page_token));
        }

        let response = self
            .client
            .get(format!("{}/files", self.base_url))
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .query(&params)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(google::transport)?;

        if !response.status().is_success() {
            return Err(google::failure_from(response).await.into());
        }

        response
            .json::<FileList>()
            .await
            .map_err(|e| FetchError::Transient(format!("invalid listing response: {}", e)))
    }
}

#[async_trait]
impl DocumentSource for DriveSource {
    fn id(&self) -> &str {
        "google-drive"
    }

    async fn list_tracked_documents(
        &self,
        filter: &FolderFilter,
    ) -> Result<Vec<RawDocument>, FetchError> {
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let page = self.fetch_page(filter, page_token.as_deref()).await?;
            pages += 1;
            debug!(page = pages, files = page.files.len(), "Fetched listing page");
            documents.extend(page.files);

            match page.next_page_token {
                Some(next) if !next.is_empty() && Some(&next) != page_token.as_ref() => {
                    page_token = Some(next);
                }
                _ => break,
            }
        }

        info!(
            folder = %filter.folder_id,
            documents = documents.len(),
            pages,
            "Listed tracked documents"
        );
        Ok(documents)
    }
}
