use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::metadata::Category;

/// Folder name used for host documents that were never saved.
pub const UNSAVED_DOCUMENT: &str = "unsaved_document";

const MAX_PREFIX_CHARS: usize = 50;
const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S-%3f";

/// Destination tree: `<base>/<document>/<category>/<file>.png`.
#[derive(Clone, Debug)]
pub struct OutputLayout {
    base_dir: PathBuf,
}

impl OutputLayout {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Always a direct child of the base folder; see [`safe_document_name`].
    pub fn document_dir(&self, document: &str) -> PathBuf {
        self.base_dir.join(safe_document_name(document))
    }

    pub fn category_dir(&self, document: &str, category: Category) -> PathBuf {
        self.document_dir(document).join(category.as_str())
    }
}

pub fn document_folder_name(document: Option<&Path>) -> String {
    document
        .and_then(Path::file_stem)
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.trim().is_empty())
        .unwrap_or_else(|| UNSAVED_DOCUMENT.to_string())
}

/// Single path component for a document folder: separators and drive colons
/// become `_`, and names that would resolve outside the parent (`.`, `..`,
/// empty) fall back to [`UNSAVED_DOCUMENT`].
pub fn safe_document_name(document: &str) -> String {
    let name: String = document
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_control() => '_',
            other => other,
        })
        .collect();
    match name.as_str() {
        "" | "." | ".." => UNSAVED_DOCUMENT.to_string(),
        _ => name,
    }
}

/// Job display name made safe for a file name and capped at 50 characters.
pub fn file_prefix(name: &str) -> String {
    let prefix: String = name
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' => '_',
            other => other,
        })
        .take(MAX_PREFIX_CHARS)
        .collect();
    if prefix.is_empty() {
        "image".to_string()
    } else {
        prefix
    }
}

pub fn file_name(prefix: &str, timestamp: NaiveDateTime, category: Category, index: usize) -> String {
    format!(
        "{prefix}_{}_{category}_{index}.png",
        timestamp.format(FILE_TIMESTAMP_FORMAT)
    )
}

/// `folder/file_name`, or `stem-N.png` with the first free `N` if taken.
pub fn unique_path(folder: &Path, file_name: &str) -> PathBuf {
    let candidate = folder.join(file_name);
    if !candidate.exists() {
        return candidate;
    }
    let stem = file_name.strip_suffix(".png").unwrap_or(file_name);
    let mut suffix = 1usize;
    loop {
        let candidate = folder.join(format!("{stem}-{suffix}.png"));
        if !candidate.exists() {
            return candidate;
        }
        suffix += 1;
    }
}
