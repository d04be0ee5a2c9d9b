use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::backup::{self, BackupArea, BackupError};
use super::conversion::ConversionTable;
use super::diff::{self, Diff, DiffError};
use super::index::{IndexError, MetadataIndex, RemoteEntry};
use super::paths::{LocalPathDecision, PathError, PathResolver};
use super::prune::{self, ExpectedFiles, PruneReport};
use super::transfer::{FetchOutcome, TransferClient, TransferError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("compare error: {0}")]
    Diff(#[from] DiffError),
    #[error("backup error: {0}")]
    Backup(#[from] BackupError),
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("entry {0} has no usable modification time")]
    MissingModified(String),
}

impl EngineError {
    /// Whether the error invalidates the whole run rather than one entry.
    pub fn is_fatal(&self) -> bool {
        match self {
            EngineError::Index(_) => true,
            EngineError::Path(err) => err.is_fatal(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub root: PathBuf,
    /// Quarantine for trashed entries, relative to `root`.
    pub trash_dir: PathBuf,
    /// Backup area, relative to `root`.
    pub backup_dir: PathBuf,
    pub ignore_mimetypes: HashSet<String>,
    pub conversion: ConversionTable,
    /// Paths relative to `root` that pruning never enters.
    pub reserved: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    Downloaded,
    Replaced { backup: PathBuf },
    Unchanged,
    MtimeCorrected,
    NoContent,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub downloaded: usize,
    pub backed_up: usize,
    pub unchanged: usize,
    pub mtime_corrected: usize,
    pub no_content: usize,
    pub ignored: usize,
    pub collisions: usize,
    pub failed: usize,
    pub prune: PruneReport,
}

impl SyncReport {
    fn record(&mut self, outcome: &EntryOutcome) {
        match outcome {
            EntryOutcome::Downloaded => self.downloaded += 1,
            EntryOutcome::Replaced { .. } => {
                self.downloaded += 1;
                self.backed_up += 1;
            }
            EntryOutcome::Unchanged => self.unchanged += 1,
            EntryOutcome::MtimeCorrected => self.mtime_corrected += 1,
            EntryOutcome::NoContent => self.no_content += 1,
        }
    }

    pub fn log_summary(&self) {
        info!(
            action = "summary",
            downloaded = self.downloaded,
            backed_up = self.backed_up,
            unchanged = self.unchanged,
            touched = self.mtime_corrected,
            no_content = self.no_content,
            ignored = self.ignored,
            collisions = self.collisions,
            failed = self.failed,
            pruned = self.prune.pruned,
            prune_failed = self.prune.failed,
            stale_staging = self.prune.stale_staging,
            dirs_removed = self.prune.dirs_removed,
            "sync finished"
        );
    }
}

/// One entry paired with the local path it owns for this run.
#[derive(Debug)]
pub struct PlannedEntry<'a> {
    pub entry: &'a RemoteEntry,
    pub decision: LocalPathDecision,
}

pub struct Reconciler {
    settings: SyncSettings,
    transfer: TransferClient,
    backups: BackupArea,
}

impl Reconciler {
    pub fn new(settings: SyncSettings, transfer: TransferClient) -> Self {
        let backups = BackupArea::new(settings.root.join(&settings.backup_dir));
        Self {
            settings,
            transfer,
            backups,
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Resolves every entry before anything touches the disk, so corrupt
    /// parent links abort the run with the local tree untouched. When two
    /// entries resolve to the same path the most recently modified one wins,
    /// ties broken by the greater id.
    pub fn plan<'a>(
        &self,
        index: &'a MetadataIndex,
        report: &mut SyncReport,
    ) -> Result<Vec<PlannedEntry<'a>>, EngineError> {
        let resolver = PathResolver::new(index, &self.settings.conversion, &self.settings.trash_dir);
        let mut by_path: BTreeMap<PathBuf, PlannedEntry<'a>> = BTreeMap::new();

        for entry in index.all() {
            if entry.is_folder() || self.settings.ignore_mimetypes.contains(&entry.mime_type) {
                debug!(action = "ignore", id = %entry.id, mime_type = %entry.mime_type, "not mirrored");
                report.ignored += 1;
                continue;
            }
            let decision = match resolver.resolve(entry) {
                Ok(decision) => decision,
                Err(err) if err.is_fatal() => return Err(err.into()),
                Err(err) => {
                    warn!(action = "error", id = %entry.id, %err, "cannot place entry");
                    report.failed += 1;
                    continue;
                }
            };

            let relative = decision.relative_path.clone();
            let planned = PlannedEntry { entry, decision };
            let Some(existing) = by_path.get(&relative) else {
                by_path.insert(relative, planned);
                continue;
            };
            report.collisions += 1;
            let (winner, loser) = if newer(entry, existing.entry) {
                (entry, existing.entry)
            } else {
                (existing.entry, entry)
            };
            warn!(
                action = "collision",
                path = %relative.display(),
                kept = %winner.id,
                dropped = %loser.id,
                "entries share a local path"
            );
            if winner.id == entry.id {
                by_path.insert(relative, planned);
            }
        }
        Ok(by_path.into_values().collect())
    }

    /// Applies the per-entry decision table. Errors on one entry are logged
    /// and counted; only planning errors end the pass early.
    pub async fn reconcile(
        &self,
        index: &MetadataIndex,
    ) -> Result<(SyncReport, ExpectedFiles), EngineError> {
        let mut report = SyncReport::default();
        let planned = self.plan(index, &mut report)?;
        let mut expected = ExpectedFiles::new();

        for PlannedEntry { entry, decision } in planned {
            let relative = &decision.relative_path;
            match self.reconcile_entry(entry, relative).await {
                Ok(outcome) => {
                    let hash = match outcome {
                        EntryOutcome::NoContent => None,
                        _ => entry.content_hash.as_deref(),
                    };
                    expected.insert(relative.clone(), hash);
                    report.record(&outcome);
                }
                Err(err) => {
                    error!(action = "error", id = %entry.id, path = %relative.display(), %err, "entry not synced");
                    expected.insert(relative.clone(), None);
                    report.failed += 1;
                }
            }
        }
        Ok((report, expected))
    }

    pub async fn reconcile_entry(
        &self,
        entry: &RemoteEntry,
        relative: &Path,
    ) -> Result<EntryOutcome, EngineError> {
        let modified = entry
            .modified
            .ok_or_else(|| EngineError::MissingModified(entry.id.clone()))?;
        let target = self.settings.root.join(relative);
        let local = diff::compare(&target, entry.content_hash.as_deref(), modified).await?;
        match local {
            Diff::Present(result) if result.is_in_sync() => {
                debug!(action = "skip", id = %entry.id, path = %relative.display(), "up to date");
                return Ok(EntryOutcome::Unchanged);
            }
            Diff::Present(result) if result.hash_matches => {
                diff::set_mtime(&target, modified)?;
                info!(action = "touch", id = %entry.id, path = %relative.display(), "corrected modification time");
                return Ok(EntryOutcome::MtimeCorrected);
            }
            Diff::Present(_) | Diff::Absent => {}
        }

        let partial = match self
            .transfer
            .fetch(entry, &self.settings.conversion, &target)
            .await?
        {
            FetchOutcome::Staged(partial) => partial,
            FetchOutcome::NoContent => {
                warn!(action = "no_content", id = %entry.id, path = %relative.display(), "nothing to download");
                return Ok(EntryOutcome::NoContent);
            }
        };

        let backup = match local {
            Diff::Present(_) => match self.backups.stash(&target, backup::now()).await {
                Ok(stored) => {
                    info!(
                        action = "backup",
                        id = %entry.id,
                        path = %relative.display(),
                        backup = %stored.display(),
                        "moved divergent local copy aside"
                    );
                    Some(stored)
                }
                Err(err) => {
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(err.into());
                }
            },
            Diff::Absent => None,
        };

        install(&partial, &target, modified).await?;
        info!(action = "download", id = %entry.id, path = %relative.display(), "downloaded");
        Ok(match backup {
            Some(backup) => EntryOutcome::Replaced { backup },
            None => EntryOutcome::Downloaded,
        })
    }

    pub async fn prune(&self, expected: &ExpectedFiles) -> Result<PruneReport, EngineError> {
        Ok(prune::prune(
            &self.settings.root,
            &self.settings.reserved,
            expected,
            &self.backups,
        )
        .await?)
    }

    /// Full pass: every entry is reconciled before pruning starts.
    pub async fn run(&self, index: &MetadataIndex) -> Result<SyncReport, EngineError> {
        let (mut report, expected) = self.reconcile(index).await?;
        report.prune = self.prune(&expected).await?;
        report.log_summary();
        Ok(report)
    }
}

/// Moves verified content over `target`. The staging file never outlives a
/// failed rename.
async fn install(partial: &Path, target: &Path, modified: i64) -> io::Result<()> {
    if let Err(err) = tokio::fs::rename(partial, target).await {
        let _ = tokio::fs::remove_file(partial).await;
        return Err(err);
    }
    diff::set_mtime(target, modified)
}

fn newer(candidate: &RemoteEntry, current: &RemoteEntry) -> bool {
    (candidate.modified, candidate.id.as_str()) > (current.modified, current.id.as_str())
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
