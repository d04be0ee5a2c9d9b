use std::io;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use md5::Context as Md5Context;
use thiserror::Error;
use tokio::io::AsyncReadExt;

pub const HASH_BLOCK_SIZE: usize = 8192;

#[derive(Debug, Error)]
pub enum DiffError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("expected a regular file at {0}")]
    NotAFile(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchResult {
    pub hash_matches: bool,
    pub mtime_matches: bool,
}

impl MatchResult {
    pub fn is_in_sync(&self) -> bool {
        self.hash_matches && self.mtime_matches
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diff {
    Absent,
    Present(MatchResult),
}

/// Compares the file at `local` with the remote hash and modification time.
///
/// Without an expected hash (exported documents) the content is judged by
/// the timestamp alone, so `hash_matches` mirrors `mtime_matches`.
pub async fn compare(
    local: &Path,
    expected_hash: Option<&str>,
    expected_mtime: i64,
) -> Result<Diff, DiffError> {
    let metadata = match tokio::fs::metadata(local).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Diff::Absent),
        Err(err) => return Err(err.into()),
    };
    if !metadata.is_file() {
        return Err(DiffError::NotAFile(local.to_path_buf()));
    }

    let mtime_matches = mtime_secs(&metadata) == expected_mtime;
    let hash_matches = match expected_hash {
        Some(expected) => md5_file(local).await?.eq_ignore_ascii_case(expected),
        None => mtime_matches,
    };
    Ok(Diff::Present(MatchResult {
        hash_matches,
        mtime_matches,
    }))
}

/// Lowercase hex MD5 of the whole file, read in fixed-size blocks.
pub async fn md5_file(path: &Path) -> io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut ctx = Md5Context::new();
    let mut buf = vec![0u8; HASH_BLOCK_SIZE];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        ctx.consume(&buf[..read]);
    }
    Ok(format!("{:x}", ctx.compute()))
}

pub fn mtime_secs(metadata: &std::fs::Metadata) -> i64 {
    FileTime::from_last_modification_time(metadata).unix_seconds()
}

/// Sets both access and modification time to `unix_secs`.
pub fn set_mtime(path: &Path, unix_secs: i64) -> io::Result<()> {
    let stamp = FileTime::from_unix_time(unix_secs, 0);
    filetime::set_file_times(path, stamp, stamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn hex(body: &[u8]) -> String {
        format!("{:x}", md5::compute(body))
    }

    #[tokio::test]
    async fn missing_file_is_absent() {
        let dir = tempdir().unwrap();
        let diff = compare(&dir.path().join("nope.txt"), Some("abc"), 1)
            .await
            .unwrap();
        assert_eq!(diff, Diff::Absent);
    }

    #[tokio::test]
    async fn identical_file_is_in_sync() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();
        set_mtime(&path, 1_393_668_000).unwrap();

        let diff = compare(&path, Some(&hex(b"hello")), 1_393_668_000)
            .await
            .unwrap();
        assert_eq!(
            diff,
            Diff::Present(MatchResult {
                hash_matches: true,
                mtime_matches: true
            })
        );
    }

    #[tokio::test]
    async fn hash_comparison_ignores_case() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();
        set_mtime(&path, 5).unwrap();

        let upper = hex(b"hello").to_ascii_uppercase();
        let Diff::Present(result) = compare(&path, Some(&upper), 5).await.unwrap() else {
            panic!("expected present");
        };
        assert!(result.is_in_sync());
    }

    #[tokio::test]
    async fn clock_drift_only_flags_mtime() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();
        set_mtime(&path, 1_000).unwrap();

        let Diff::Present(result) = compare(&path, Some(&hex(b"hello")), 2_000).await.unwrap()
        else {
            panic!("expected present");
        };
        assert!(result.hash_matches);
        assert!(!result.mtime_matches);
    }

    #[tokio::test]
    async fn different_content_is_flagged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"local edit").unwrap();
        set_mtime(&path, 1_000).unwrap();

        let Diff::Present(result) = compare(&path, Some(&hex(b"hello")), 1_000).await.unwrap()
        else {
            panic!("expected present");
        };
        assert!(!result.hash_matches);
        assert!(result.mtime_matches);
    }

    #[tokio::test]
    async fn hashless_entries_follow_mtime() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Report.pdf");
        std::fs::write(&path, b"%PDF").unwrap();
        set_mtime(&path, 1_000).unwrap();

        let Diff::Present(result) = compare(&path, None, 1_001).await.unwrap() else {
            panic!("expected present");
        };
        assert!(!result.hash_matches);
        assert!(!result.mtime_matches);
    }

    #[tokio::test]
    async fn directory_in_place_of_file_is_an_error() {
        let dir = tempdir().unwrap();
        let err = compare(dir.path(), Some("abc"), 1).await.unwrap_err();
        assert!(matches!(err, DiffError::NotAFile(_)));
    }

    #[tokio::test]
    async fn hashes_files_larger_than_one_block() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let body: Vec<u8> = (0..HASH_BLOCK_SIZE * 3 + 17).map(|i| i as u8).collect();
        std::fs::write(&path, &body).unwrap();

        assert_eq!(md5_file(&path).await.unwrap(), hex(&body));
    }
}
