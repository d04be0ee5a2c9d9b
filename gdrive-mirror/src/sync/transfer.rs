use std::{
    io,
    path::{Path, PathBuf},
};

use futures_util::StreamExt;
use md5::Context;
use rand::Rng;
use rand::distributions::Alphanumeric;
use reqwest::Client;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use url::Url;

use super::conversion::ConversionTable;
use super::index::{EntryContent, RemoteEntry};

/// Downloads are staged as `.gdrive-mirror-<tag>.partial` next to their
/// target until they are verified.
pub const STAGING_PREFIX: &str = ".gdrive-mirror-";
pub const STAGING_SUFFIX: &str = ".partial";
const STAGING_TAG_LEN: usize = 12;
const STAGING_ATTEMPTS: usize = 8;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("download integrity check failed: expected {expected_md5}, got {actual_md5}")]
    IntegrityMismatch {
        expected_md5: String,
        actual_md5: String,
    },
}

/// Result of fetching one entry's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Content is complete and verified in the returned staging file, ready
    /// to be renamed over the target.
    Staged(PathBuf),
    /// The entry has no retrievable content in this run.
    NoContent,
}

#[derive(Clone)]
pub struct TransferClient {
    http: Client,
    token: String,
}

impl TransferClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_http(Client::new(), token)
    }

    pub fn with_http(http: Client, token: impl Into<String>) -> Self {
        Self {
            http,
            token: token.into(),
        }
    }

    /// Fetches the bytes of `entry` next to `target` without touching
    /// `target` itself. Binary content is checked against the listed MD5;
    /// exported documents have no checksum to verify.
    pub async fn fetch(
        &self,
        entry: &RemoteEntry,
        conversion: &ConversionTable,
        target: &Path,
    ) -> Result<FetchOutcome, TransferError> {
        let (href, expected_md5) = match &entry.content {
            EntryContent::Binary { download_url } => {
                (download_url.as_str(), entry.content_hash.as_deref())
            }
            EntryContent::Export(_) => match conversion.select(entry) {
                Some((_, href)) => (href, None),
                None => return Ok(FetchOutcome::NoContent),
            },
            EntryContent::Folder | EntryContent::Unavailable => {
                return Ok(FetchOutcome::NoContent);
            }
        };
        let partial = self.download_to_partial(href, target, expected_md5).await?;
        Ok(FetchOutcome::Staged(partial))
    }

    pub async fn download_to_partial(
        &self,
        href: &str,
        target: &Path,
        expected_md5: Option<&str>,
    ) -> Result<PathBuf, TransferError> {
        let url = Url::parse(href)?;
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?;

        let parent = target.parent().unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent).await?;
        let (file, partial) = create_staging_file(parent).await?;
        match write_stream(response, file, expected_md5).await {
            Ok(()) => Ok(partial),
            Err(err) => {
                let _ = tokio::fs::remove_file(&partial).await;
                Err(err)
            }
        }
    }
}

async fn write_stream(
    response: reqwest::Response,
    mut file: tokio::fs::File,
    expected_md5: Option<&str>,
) -> Result<(), TransferError> {
    let mut stream = response.bytes_stream();
    let mut md5 = Context::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        md5.consume(&chunk);
    }

    file.flush().await?;
    file.sync_all().await?;

    if let Some(expected_md5) = expected_md5 {
        let actual_md5 = format!("{:x}", md5.compute());
        if !actual_md5.eq_ignore_ascii_case(expected_md5) {
            return Err(TransferError::IntegrityMismatch {
                expected_md5: expected_md5.to_ascii_lowercase(),
                actual_md5,
            });
        }
    }
    Ok(())
}

/// Opens a fresh staging file in `dir`. Never reuses an existing name.
async fn create_staging_file(dir: &Path) -> io::Result<(tokio::fs::File, PathBuf)> {
    for _ in 0..STAGING_ATTEMPTS {
        let tag: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(STAGING_TAG_LEN)
            .map(char::from)
            .collect();
        let path = dir.join(format!("{STAGING_PREFIX}{tag}{STAGING_SUFFIX}"));
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((file, path)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free staging name in {}", dir.display()),
    ))
}

pub fn is_staging_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| {
            name.len() > STAGING_PREFIX.len() + STAGING_SUFFIX.len()
                && name.starts_with(STAGING_PREFIX)
                && name.ends_with(STAGING_SUFFIX)
        })
}
