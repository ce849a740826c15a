use crate::error::IngestError;
use std::fmt;
use std::path::{Component, Path};
use std::str::FromStr;

const CHUNK_SEPARATOR: char = '#';

/// How a corpus file maps to its document id in the vector store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum IdScheme {
    /// `judgment` for `2019/judgment.pdf`. Collides on duplicate names.
    FileStem,
    /// `2019_judgment` for `2019/judgment.pdf`.
    FolderAndStem,
    /// `cases/2019/judgment` for `cases/2019/judgment.pdf` under the root.
    #[default]
    RelativePath,
}

impl IdScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdScheme::FileStem => "file-stem",
            IdScheme::FolderAndStem => "folder-and-stem",
            IdScheme::RelativePath => "relative-path",
        }
    }
}

impl fmt::Display for IdScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdScheme {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "file-stem" | "stem" => Ok(IdScheme::FileStem),
            "folder-and-stem" | "folder" => Ok(IdScheme::FolderAndStem),
            "relative-path" | "path" => Ok(IdScheme::RelativePath),
            other => Err(format!(
                "unknown id scheme `{other}` (expected file-stem, folder-and-stem or relative-path)"
            )),
        }
    }
}

pub fn document_id(root: &Path, path: &Path, scheme: IdScheme) -> Result<String, IngestError> {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .filter(|stem| !stem.is_empty())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;

    match scheme {
        IdScheme::FileStem => Ok(stem),
        IdScheme::FolderAndStem => {
            let folder = parent_folder_name(path).unwrap_or_default();
            if folder.is_empty() {
                Ok(stem)
            } else {
                Ok(format!("{folder}_{stem}"))
            }
        }
        IdScheme::RelativePath => {
            let relative = path.strip_prefix(root).unwrap_or(path);
            let mut parts = relative
                .parent()
                .map(|parent| {
                    parent
                        .components()
                        .filter_map(|component| match component {
                            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
                            _ => None,
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            parts.push(stem);
            Ok(parts.join("/"))
        }
    }
}

pub fn parent_folder_name(path: &Path) -> Option<String> {
    path.parent()
        .and_then(|parent| parent.file_name())
        .map(|name| name.to_string_lossy().to_string())
}

pub fn chunk_id(document_id: &str, index: usize) -> String {
    format!("{document_id}{CHUNK_SEPARATOR}{index}")
}

/// Strips a trailing chunk suffix (`#<digits>`) from a store id.
pub fn document_id_of(store_id: &str) -> &str {
    match store_id.rsplit_once(CHUNK_SEPARATOR) {
        Some((document, index))
            if !document.is_empty()
                && !index.is_empty()
                && index.bytes().all(|byte| byte.is_ascii_digit()) =>
        {
            document
        }
        _ => store_id,
    }
}

/// Chunk number of a `doc#<n>` id, `None` for whole-document ids.
pub fn chunk_index_of(store_id: &str) -> Option<usize> {
    let document = document_id_of(store_id);
    if document.len() == store_id.len() {
        return None;
    }
    store_id[document.len() + 1..].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn duplicate_names_in_different_folders_stay_unique() {
        let root = PathBuf::from("/corpus");
        let first = document_id(&root, &root.join("2019/order.pdf"), IdScheme::RelativePath).unwrap();
        let second = document_id(&root, &root.join("2020/order.pdf"), IdScheme::RelativePath).unwrap();

        assert_eq!(first, "2019/order");
        assert_eq!(second, "2020/order");
    }

    #[test]
    fn folder_and_stem_matches_year_folder_layout() {
        let root = PathBuf::from("/corpus");
        let id = document_id(&root, &root.join("2019/order.PDF"), IdScheme::FolderAndStem).unwrap();
        assert_eq!(id, "2019_order");

        let stem = document_id(&root, &root.join("2019/order.pdf"), IdScheme::FileStem).unwrap();
        assert_eq!(stem, "order");
    }

    #[test]
    fn chunk_suffix_is_stripped_only_when_numeric() {
        assert_eq!(document_id_of(&chunk_id("2019/order", 3)), "2019/order");
        assert_eq!(document_id_of("2019/order"), "2019/order");
        assert_eq!(chunk_index_of(&chunk_id("2019/order", 12)), Some(12));
        assert_eq!(chunk_index_of("2019/order"), None);
        assert_eq!(chunk_index_of("case#draft"), None);
        assert_eq!(document_id_of("case#b"), "case#b");
        assert_eq!(document_id_of("#4"), "#4");
    }

    #[test]
    fn scheme_parses_from_cli_values() {
        assert_eq!("relative-path".parse::<IdScheme>(), Ok(IdScheme::RelativePath));
        assert_eq!("Stem".parse::<IdScheme>(), Ok(IdScheme::FileStem));
        assert!("sha".parse::<IdScheme>().is_err());
    }
}
