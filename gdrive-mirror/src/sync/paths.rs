use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::conversion::ConversionTable;
use super::index::{MetadataIndex, RemoteEntry};

#[derive(Debug, Error)]
pub enum PathError {
    #[error("entry {id} references parent {parent_id} which is not in the listing")]
    MissingParent { id: String, parent_id: String },
    #[error("parent chain of entry {id} loops back through {repeated}")]
    Cycle { id: String, repeated: String },
    #[error("entry {id} has a title that cannot be used as a file name: {title:?}")]
    UnsupportedTitle { id: String, title: String },
}

impl PathError {
    /// Broken parent links mean the listing itself is corrupt; a bad title
    /// only affects the entry that carries it.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PathError::UnsupportedTitle { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathClass {
    Trashed,
    RootChild,
    NestedChild,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPathDecision {
    pub relative_path: PathBuf,
    pub class: PathClass,
}

pub struct PathResolver<'a> {
    index: &'a MetadataIndex,
    conversion: &'a ConversionTable,
    trash_dir: &'a Path,
}

impl<'a> PathResolver<'a> {
    pub fn new(
        index: &'a MetadataIndex,
        conversion: &'a ConversionTable,
        trash_dir: &'a Path,
    ) -> Self {
        Self {
            index,
            conversion,
            trash_dir,
        }
    }

    pub fn resolve(&self, entry: &RemoteEntry) -> Result<LocalPathDecision, PathError> {
        let mut file_name = file_name_for(entry)?;
        if let Some(extension) = self.conversion.extension_for(entry) {
            file_name.push_str(extension);
        }

        if entry.is_trashed {
            return Ok(LocalPathDecision {
                relative_path: self.trash_dir.join(file_name),
                class: PathClass::Trashed,
            });
        }

        let Some(first_parent) = entry.parent_id.as_deref() else {
            return Ok(LocalPathDecision {
                relative_path: PathBuf::from(file_name),
                class: PathClass::RootChild,
            });
        };

        // Walk towards the root, collecting folder names leaf-first.
        let mut visited: HashSet<&str> = HashSet::from([entry.id.as_str()]);
        let mut ancestors = Vec::new();
        let mut next = Some(first_parent);
        while let Some(parent_id) = next {
            if !visited.insert(parent_id) {
                return Err(PathError::Cycle {
                    id: entry.id.clone(),
                    repeated: parent_id.to_string(),
                });
            }
            let parent = self
                .index
                .lookup(parent_id)
                .ok_or_else(|| PathError::MissingParent {
                    id: entry.id.clone(),
                    parent_id: parent_id.to_string(),
                })?;
            ancestors.push(file_name_for(parent)?);
            next = parent.parent_id.as_deref();
        }

        let mut relative_path: PathBuf = ancestors.iter().rev().collect();
        relative_path.push(file_name);
        Ok(LocalPathDecision {
            relative_path,
            class: PathClass::NestedChild,
        })
    }
}

/// Maps a title onto a single path component. Separators are replaced, and
/// titles that would escape or alias the parent directory are rejected.
fn file_name_for(entry: &RemoteEntry) -> Result<String, PathError> {
    let title = entry.title.as_str();
    if title.is_empty() || title == "." || title == ".." {
        return Err(PathError::UnsupportedTitle {
            id: entry.id.clone(),
            title: title.to_string(),
        });
    }
    Ok(title.replace(['/', '\0'], "_"))
}
