use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};

use crate::metadata::{decode, Category, GenerationRecord};
use crate::storage::layout::OutputLayout;

/// One auto-saved image found on disk.
#[derive(Debug, Clone)]
pub struct SavedImage {
    pub path: PathBuf,
    pub category: Category,
    pub modified: SystemTime,
    /// `None` when the file carries no readable record.
    pub record: Option<GenerationRecord>,
}

/// Lists saved images of a document, newest first.
///
/// A document or category folder that does not exist yet yields nothing.
pub fn list_saved_images(
    layout: &OutputLayout,
    document: &str,
    category: Option<Category>,
    limit: usize,
) -> Result<Vec<SavedImage>> {
    let categories = match category {
        Some(category) => vec![category],
        None => Category::ALL.to_vec(),
    };

    let mut found = Vec::new();
    for category in categories {
        let folder = layout.category_dir(document, category);
        for (path, modified) in png_entries(&folder)? {
            found.push((path, category, modified));
        }
    }
    found.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| b.0.cmp(&a.0)));
    found.truncate(limit);

    Ok(found
        .into_iter()
        .map(|(path, category, modified)| {
            let record = match decode(&path) {
                Ok(decoded) => decoded.record,
                Err(err) => {
                    tracing::warn!("skipping record of {}: {err}", path.display());
                    None
                }
            };
            SavedImage {
                path,
                category,
                modified,
                record,
            }
        })
        .collect())
}

fn png_entries(folder: &Path) -> Result<Vec<(PathBuf, SystemTime)>> {
    let entries = match fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("read {}", folder.display())),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let is_png = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
        if !is_png {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        files.push((path, metadata.modified()?));
    }
    Ok(files)
}
