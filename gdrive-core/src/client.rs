use std::collections::BTreeMap;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";
const FILE_LIST_FIELDS: &str = "nextPageToken,items(id,title,mimeType,modifiedDate,md5Checksum,\
downloadUrl,exportLinks,parents(id,isRoot),labels/trashed)";

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl DriveClient {
    pub fn new(token: impl Into<String>) -> Result<Self, DriveError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, DriveError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    pub fn access_token(&self) -> &str {
        &self.token
    }

    pub async fn get_about(&self) -> Result<About, DriveError> {
        let mut url = self.endpoint("/drive/v2/about")?;
        url.query_pairs_mut()
            .append_pair("fields", "user(displayName,emailAddress),rootFolderId");
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Fetches a single page of the file listing.
    pub async fn list_files(
        &self,
        page_token: Option<&str>,
        max_results: Option<u32>,
    ) -> Result<FileList, DriveError> {
        let mut url = self.endpoint("/drive/v2/files")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("fields", FILE_LIST_FIELDS);
            if let Some(max_results) = max_results {
                query.append_pair("maxResults", &max_results.to_string());
            }
            if let Some(page_token) = page_token {
                query.append_pair("pageToken", page_token);
            }
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Walks every page of the listing. A failing page fails the whole call;
    /// callers never see a partial listing.
    pub async fn list_all_files(&self, page_size: u32) -> Result<Vec<DriveFile>, DriveError> {
        let page_size = page_size.max(1);
        let mut page_token: Option<String> = None;
        let mut items = Vec::new();
        loop {
            let page = self
                .list_files(page_token.as_deref(), Some(page_size))
                .await?;
            items.extend(page.items);
            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        Ok(items)
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, DriveError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DriveError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(DriveError::Api { status, body })
        }
    }
}

impl DriveError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            DriveError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct About {
    #[serde(default)]
    pub user: Option<AboutUser>,
    #[serde(default)]
    pub root_folder_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AboutUser {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub title: String,
    pub mime_type: String,
    #[serde(default)]
    pub modified_date: Option<String>,
    #[serde(default)]
    pub md5_checksum: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub export_links: BTreeMap<String, String>,
    #[serde(default)]
    pub parents: Vec<ParentReference>,
    #[serde(default)]
    pub labels: FileLabels,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    pub fn is_trashed(&self) -> bool {
        self.labels.trashed
    }

    /// Id of the containing folder, or `None` when the file sits at the root
    /// of the drive (or has no parent visible to the caller).
    pub fn parent_id(&self) -> Option<&str> {
        match self.parents.first() {
            Some(parent) if !parent.is_root => Some(parent.id.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentReference {
    pub id: String,
    #[serde(default)]
    pub is_root: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FileLabels {
    #[serde(default)]
    pub trashed: bool,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub items: Vec<DriveFile>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}
