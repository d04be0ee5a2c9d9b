use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

const BACKUP_STAMP: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]_[hour]:[minute]:[second]");

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("time format error: {0}")]
    Format(#[from] time::error::Format),
    #[error("path has no file name: {0}")]
    MissingFileName(PathBuf),
}

/// Local wall-clock time, falling back to UTC when the offset is unknown.
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// `<YYYY-MM-DD_HH:MM:SS>-<basename>` for a file moved aside at `at`.
pub fn backup_file_name(original: &Path, at: OffsetDateTime) -> Result<String, BackupError> {
    let name = original
        .file_name()
        .ok_or_else(|| BackupError::MissingFileName(original.to_path_buf()))?;
    let stamp = at.format(BACKUP_STAMP)?;
    Ok(format!("{stamp}-{}", name.to_string_lossy()))
}

/// Holds superseded and orphaned local files. Nothing moved here is ever
/// overwritten: a name already taken within the same second gets a numeric
/// suffix.
#[derive(Debug, Clone)]
pub struct BackupArea {
    root: PathBuf,
}

impl BackupArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn stash(&self, file: &Path, at: OffsetDateTime) -> Result<PathBuf, BackupError> {
        ensure_private_dir(&self.root).await?;
        let name = backup_file_name(file, at)?;
        let target = self.free_slot(&name).await?;
        move_file(file, &target).await?;
        Ok(target)
    }

    async fn free_slot(&self, name: &str) -> io::Result<PathBuf> {
        let mut candidate = self.root.join(name);
        let mut suffix = 1u32;
        while tokio::fs::try_exists(&candidate).await? {
            candidate = self.root.join(format!("{name}.{suffix}"));
            suffix += 1;
        }
        Ok(candidate)
    }
}

async fn ensure_private_dir(dir: &Path) -> io::Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder.create(dir).await
}

/// Rename, or copy and remove when the backup root is on another device.
async fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            if tokio::fs::copy(from, to).await.is_err() {
                let _ = tokio::fs::remove_file(to).await;
                return Err(rename_err);
            }
            tokio::fs::remove_file(from).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use time::macros::datetime;

    #[test]
    fn names_backups_with_timestamp_prefix() {
        let at = datetime!(2014-03-01 09:05:07 UTC);
        let name = backup_file_name(Path::new("Docs/Report.txt"), at).unwrap();
        assert_eq!(name, "2014-03-01_09:05:07-Report.txt");
    }

    #[test]
    fn root_path_has_no_backup_name() {
        let at = datetime!(2014-03-01 09:05:07 UTC);
        assert!(matches!(
            backup_file_name(Path::new("/"), at),
            Err(BackupError::MissingFileName(_))
        ));
    }

    #[tokio::test]
    async fn stash_moves_file_unchanged() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("A/B.txt");
        std::fs::create_dir_all(source.parent().unwrap()).unwrap();
        std::fs::write(&source, b"original").unwrap();

        let area = BackupArea::new(dir.path().join(".Backups"));
        let at = datetime!(2014-03-01 09:05:07 UTC);
        let stored = area.stash(&source, at).await.unwrap();

        assert!(!source.exists());
        assert_eq!(
            stored,
            dir.path().join(".Backups/2014-03-01_09:05:07-B.txt")
        );
        assert_eq!(std::fs::read(stored).unwrap(), b"original");
    }

    #[tokio::test]
    async fn stash_never_overwrites_earlier_backup() {
        let dir = tempdir().unwrap();
        let area = BackupArea::new(dir.path().join(".Backups"));
        let at = datetime!(2014-03-01 09:05:07 UTC);

        let first = dir.path().join("one/B.txt");
        let second = dir.path().join("two/B.txt");
        for (path, body) in [(&first, b"first"), (&second, b"other")] {
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, body).unwrap();
        }

        let a = area.stash(&first, at).await.unwrap();
        let b = area.stash(&second, at).await.unwrap();

        assert_ne!(a, b);
        assert_eq!(std::fs::read(a).unwrap(), b"first");
        assert_eq!(std::fs::read(b).unwrap(), b"other");
    }
}
