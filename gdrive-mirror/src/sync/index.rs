use std::collections::{BTreeMap, HashMap};

use gdrive_core::DriveFile;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::warn;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("duplicate entry id in listing: {0}")]
    DuplicateId(String),
}

/// How the bytes of an entry can be obtained, if at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryContent {
    Folder,
    Binary { download_url: String },
    /// Native document; target mime type -> export URL.
    Export(BTreeMap<String, String>),
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub id: String,
    pub title: String,
    pub mime_type: String,
    /// Whole Unix seconds. `None` when the listing carried no usable
    /// timestamp; such an entry can still parent others but is never synced.
    pub modified: Option<i64>,
    pub content_hash: Option<String>,
    pub parent_id: Option<String>,
    pub is_trashed: bool,
    pub content: EntryContent,
}

impl RemoteEntry {
    pub fn from_drive_file(file: DriveFile) -> Self {
        let modified = file
            .modified_date
            .as_deref()
            .and_then(|value| parse_modified(&file.id, value));
        let parent_id = file.parent_id().map(str::to_string);
        let is_trashed = file.is_trashed();
        let content = if file.is_folder() {
            EntryContent::Folder
        } else if let Some(download_url) = file.download_url {
            EntryContent::Binary { download_url }
        } else if !file.export_links.is_empty() {
            EntryContent::Export(file.export_links)
        } else {
            EntryContent::Unavailable
        };

        Self {
            id: file.id,
            title: file.title,
            mime_type: file.mime_type,
            modified,
            content_hash: file.md5_checksum,
            parent_id,
            is_trashed,
            content,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.content, EntryContent::Folder)
    }

    pub fn export_targets(&self) -> Option<&BTreeMap<String, String>> {
        match &self.content {
            EntryContent::Export(targets) => Some(targets),
            _ => None,
        }
    }
}

/// Read-only snapshot of the remote listing for one run. Entries live in an
/// arena; parent links are resolved through the id map.
#[derive(Debug, Default)]
pub struct MetadataIndex {
    entries: Vec<RemoteEntry>,
    by_id: HashMap<String, usize>,
}

impl MetadataIndex {
    pub fn from_entries<I>(entries: I) -> Result<Self, IndexError>
    where
        I: IntoIterator<Item = RemoteEntry>,
    {
        let mut index = Self::default();
        for entry in entries {
            if index.by_id.contains_key(&entry.id) {
                return Err(IndexError::DuplicateId(entry.id));
            }
            index.by_id.insert(entry.id.clone(), index.entries.len());
            index.entries.push(entry);
        }
        Ok(index)
    }

    pub fn from_drive_files(files: Vec<DriveFile>) -> Result<Self, IndexError> {
        Self::from_entries(files.into_iter().map(RemoteEntry::from_drive_file))
    }

    pub fn lookup(&self, id: &str) -> Option<&RemoteEntry> {
        self.by_id.get(id).map(|&slot| &self.entries[slot])
    }

    pub fn all(&self) -> &[RemoteEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_modified(id: &str, value: &str) -> Option<i64> {
    match OffsetDateTime::parse(value, &Rfc3339) {
        Ok(parsed) => Some(parsed.unix_timestamp()),
        Err(err) => {
            warn!(id, value, %err, "unparseable modification time");
            None
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{file, folder};
    use super::*;
    use gdrive_core::{FileLabels, ParentReference};

    fn drive_file(id: &str, mime_type: &str) -> DriveFile {
        DriveFile {
            id: id.into(),
            title: format!("{id}.bin"),
            mime_type: mime_type.into(),
            modified_date: Some("2014-03-01T10:00:00.250Z".into()),
            md5_checksum: None,
            download_url: None,
            export_links: BTreeMap::new(),
            parents: vec![ParentReference {
                id: "root-id".into(),
                is_root: true,
            }],
            labels: FileLabels::default(),
        }
    }

    #[test]
    fn lookup_finds_entries_by_id() {
        let index = MetadataIndex::from_entries(vec![
            folder("1", "A", None),
            file("2", "B.txt", Some("1"), b"abc", 10, "http://x/2"),
        ])
        .unwrap();

        assert_eq!(index.len(), 2);
        assert_eq!(index.lookup("2").unwrap().title, "B.txt");
        assert!(index.lookup("3").is_none());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = MetadataIndex::from_entries(vec![folder("1", "A", None), folder("1", "B", None)])
            .unwrap_err();
        assert!(matches!(err, IndexError::DuplicateId(id) if id == "1"));
    }

    #[test]
    fn drive_file_with_download_url_is_binary() {
        let mut raw = drive_file("f", "text/plain");
        raw.download_url = Some("https://download.example/f".into());
        raw.md5_checksum = Some("abc".into());

        let entry = RemoteEntry::from_drive_file(raw);
        assert_eq!(
            entry.content,
            EntryContent::Binary {
                download_url: "https://download.example/f".into()
            }
        );
        assert_eq!(entry.content_hash.as_deref(), Some("abc"));
        assert_eq!(entry.parent_id, None);
        // 2014-03-01T10:00:00Z, milliseconds dropped.
        assert_eq!(entry.modified, Some(1_393_668_000));
    }

    #[test]
    fn drive_file_with_export_links_is_exportable() {
        let mut raw = drive_file("d", "application/vnd.google-apps.document");
        raw.export_links
            .insert("application/pdf".into(), "https://export.example/d".into());
        raw.parents = vec![ParentReference {
            id: "folder".into(),
            is_root: false,
        }];

        let entry = RemoteEntry::from_drive_file(raw);
        assert_eq!(entry.export_targets().map(|t| t.len()), Some(1));
        assert_eq!(entry.parent_id.as_deref(), Some("folder"));
    }

    #[test]
    fn folders_and_empty_files_are_classified() {
        let entry = RemoteEntry::from_drive_file(drive_file("x", gdrive_core::FOLDER_MIME_TYPE));
        assert!(entry.is_folder());

        let entry =
            RemoteEntry::from_drive_file(drive_file("y", "application/vnd.google-apps.form"));
        assert_eq!(entry.content, EntryContent::Unavailable);
    }

    #[test]
    fn bad_timestamps_stay_in_the_index_without_a_time() {
        let mut unparseable = drive_file("t", "text/plain");
        unparseable.modified_date = Some("yesterday".into());
        let mut missing = drive_file("m", gdrive_core::FOLDER_MIME_TYPE);
        missing.modified_date = None;

        let index = MetadataIndex::from_drive_files(vec![
            drive_file("good", "text/plain"),
            unparseable,
            missing,
        ])
        .unwrap();

        assert_eq!(index.len(), 3);
        assert_eq!(index.lookup("good").unwrap().modified, Some(1_393_668_000));
        assert_eq!(index.lookup("t").unwrap().modified, None);
        assert!(index.lookup("m").unwrap().is_folder());
    }
}
