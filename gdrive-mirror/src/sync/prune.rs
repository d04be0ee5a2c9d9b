use std::collections::HashMap;
use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use super::backup::{self, BackupArea};
use super::diff::md5_file;
use super::transfer::is_staging_file;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expectation {
    AnyContent,
    Hashes(Vec<String>),
}

/// Local paths the current listing accounts for, keyed by path relative to
/// the mirror root. A path matches when one of its expected hashes equals
/// the local file's hash, or unconditionally when it was registered without
/// a hash.
#[derive(Debug, Default, Clone)]
pub struct ExpectedFiles {
    by_path: HashMap<PathBuf, Expectation>,
}

impl ExpectedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, relative: impl Into<PathBuf>, hash: Option<&str>) {
        let relative = relative.into();
        let Some(hash) = hash else {
            self.by_path.insert(relative, Expectation::AnyContent);
            return;
        };
        match self
            .by_path
            .entry(relative)
            .or_insert_with(|| Expectation::Hashes(Vec::new()))
        {
            Expectation::AnyContent => {}
            Expectation::Hashes(hashes) => hashes.push(hash.to_ascii_lowercase()),
        }
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    fn expectation(&self, relative: &Path) -> Option<&Expectation> {
        self.by_path.get(relative)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    pub scanned: usize,
    pub kept: usize,
    pub pruned: usize,
    pub failed: usize,
    /// Staging files left behind by an interrupted download.
    pub stale_staging: usize,
    pub dirs_removed: usize,
}

/// Files found under the root, plus the number of subtrees that could not
/// be read and were skipped.
#[derive(Debug, Default, PartialEq, Eq)]
struct LocalScan {
    files: Vec<PathBuf>,
    unreadable: usize,
}

/// Moves local files that the listing no longer accounts for into the backup
/// area, then removes directories left empty. `reserved` holds paths
/// relative to `root` that neither pass may enter. Unreadable directories
/// are logged and skipped; only a failure to start the walk is an error.
pub async fn prune(
    root: &Path,
    reserved: &[PathBuf],
    expected: &ExpectedFiles,
    backups: &BackupArea,
) -> io::Result<PruneReport> {
    let mut report = PruneReport::default();
    let scan = {
        let root = root.to_path_buf();
        let reserved = reserved.to_vec();
        tokio::task::spawn_blocking(move || local_files(&root, &reserved))
            .await
            .map_err(io::Error::other)?
    };
    report.failed += scan.unreadable;

    for relative in scan.files {
        report.scanned += 1;
        let absolute = root.join(&relative);
        match is_accounted_for(&absolute, &relative, expected).await {
            Ok(true) => {
                report.kept += 1;
                continue;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(action = "error", path = %relative.display(), %err, "cannot inspect local file");
                report.failed += 1;
                continue;
            }
        }
        if is_staging_file(&relative) {
            match tokio::fs::remove_file(&absolute).await {
                Ok(()) => {
                    report.stale_staging += 1;
                    debug!(action = "prune", path = %relative.display(), "removed stale staging file");
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(action = "error", path = %relative.display(), %err, "failed to remove staging file");
                }
            }
            continue;
        }
        match backups.stash(&absolute, backup::now()).await {
            Ok(stored) => {
                report.pruned += 1;
                warn!(
                    action = "prune",
                    path = %relative.display(),
                    backup = %stored.display(),
                    "moved orphaned file to backup"
                );
            }
            Err(err) => {
                report.failed += 1;
                warn!(action = "error", path = %relative.display(), %err, "failed to move orphaned file");
            }
        }
    }

    report.dirs_removed = {
        let root = root.to_path_buf();
        let reserved = reserved.to_vec();
        tokio::task::spawn_blocking(move || remove_empty_dirs(&root, &reserved))
            .await
            .map_err(io::Error::other)?
    };
    Ok(report)
}

async fn is_accounted_for(
    absolute: &Path,
    relative: &Path,
    expected: &ExpectedFiles,
) -> io::Result<bool> {
    match expected.expectation(relative) {
        None => Ok(false),
        Some(Expectation::AnyContent) => Ok(true),
        Some(Expectation::Hashes(hashes)) => {
            let local = md5_file(absolute).await?;
            Ok(hashes.iter().any(|hash| *hash == local))
        }
    }
}

fn is_reserved(root: &Path, path: &Path, reserved: &[PathBuf]) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    reserved.iter().any(|item| relative.starts_with(item))
}

fn local_files(root: &Path, reserved: &[PathBuf]) -> LocalScan {
    let walk = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !is_reserved(root, e.path(), reserved))
        .map(|entry| entry.map(|e| (e.path().to_path_buf(), e.file_type().is_file())));
    collect_files(root, walk)
}

/// Walk errors only cost the subtree they occur in; walkdir carries on with
/// the next sibling.
fn collect_files<E: Display>(
    root: &Path,
    walk: impl Iterator<Item = Result<(PathBuf, bool), E>>,
) -> LocalScan {
    let mut scan = LocalScan::default();
    for entry in walk {
        let (path, is_file) = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(action = "error", %err, "cannot read local directory, skipping it");
                scan.unreadable += 1;
                continue;
            }
        };
        if !is_file {
            continue;
        }
        if let Ok(relative) = path.strip_prefix(root) {
            scan.files.push(relative.to_path_buf());
        }
    }
    scan
}

fn remove_empty_dirs(root: &Path, reserved: &[PathBuf]) -> usize {
    let mut removed = 0;
    for entry in WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_entry(|e| !is_reserved(root, e.path(), reserved))
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_dir() {
            continue;
        }
        // Non-empty and permission-denied directories simply stay.
        if std::fs::remove_dir(entry.path()).is_ok() {
            debug!(path = %entry.path().display(), "removed empty directory");
            removed += 1;
        }
    }
    removed
}
