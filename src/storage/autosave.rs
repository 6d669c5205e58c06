use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Result;
use chrono::Local;

use crate::config::Settings;
use crate::error::AutoSaveError;
use crate::jobs::{Job, OutputImage};
use crate::metadata::codec::{self, METADATA_KEYWORD};
use crate::metadata::{Category, GenerationRecord};
use crate::storage::layout::{file_name, file_prefix, unique_path, OutputLayout};
use crate::storage::writer::{ImageWriter, PngFileWriter};

/// Saves finished job output under `<base>/<document>/<category>/`, one PNG
/// per image with the generation record embedded.
///
/// Every call writes new timestamped files; nothing is ever overwritten.
pub struct AutoSaveOrganizer<W = PngFileWriter> {
    layout: OutputLayout,
    enabled: bool,
    writer: W,
}

impl AutoSaveOrganizer<PngFileWriter> {
    pub fn new(settings: &Settings) -> Self {
        Self::with_writer(settings, PngFileWriter)
    }
}

impl<W: ImageWriter> AutoSaveOrganizer<W> {
    pub fn with_writer(settings: &Settings, writer: W) -> Self {
        Self {
            layout: OutputLayout::new(settings.auto_save_folder.clone()),
            enabled: settings.auto_save_enabled,
            writer,
        }
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Job-finished hook: saves only when auto-save is switched on.
    pub fn on_job_finished(&self, job: &Job, document: &str) -> Result<usize, AutoSaveError> {
        if !self.enabled || !job.is_finished() {
            return Ok(0);
        }
        self.save_job_images(job, document)
    }

    /// Writes every result of `job` and returns how many were saved.
    ///
    /// A failing image is logged and skipped; only a destination folder that
    /// cannot be created aborts the batch.
    pub fn save_job_images(&self, job: &Job, document: &str) -> Result<usize, AutoSaveError> {
        if job.results.is_empty() {
            return Ok(0);
        }
        let category = Category::classify(job.kind, job.params.strength_or_full());
        let folder = self.layout.category_dir(document, category);
        create_folder(&folder)?;
        tracing::info!(
            job = %job.id,
            images = job.results.len(),
            kind = job.kind.label(),
            strength = ?job.params.strength,
            "auto-save to {} as {category}",
            folder.display()
        );

        let prefix = file_prefix(&job.params.name);
        let total = job.results.len();
        let mut saved = 0;
        for (index, image) in job.results.iter().enumerate() {
            let name = file_name(&prefix, Local::now().naive_local(), category, index);
            let path = unique_path(&folder, &name);
            match self.save_image(job, index, category, image, &path) {
                Ok(payload_len) => {
                    saved += 1;
                    tracing::info!(
                        "auto-save: image {}/{total} saved to {} ({payload_len} bytes of metadata)",
                        index + 1,
                        path.display()
                    );
                }
                Err(err) => {
                    tracing::warn!("auto-save failed for {}: {err:#}", path.display());
                }
            }
        }
        Ok(saved)
    }

    /// Saves every finished job of a history; a failing job is logged and
    /// skipped.
    pub fn save_history<'a, I>(&self, jobs: I, document: &str) -> Result<usize, AutoSaveError>
    where
        I: IntoIterator<Item = &'a Job>,
    {
        if !self.enabled {
            return Ok(0);
        }
        create_folder(&self.layout.document_dir(document))?;

        let mut total = 0;
        for job in jobs {
            if !job.is_finished() {
                continue;
            }
            match self.save_job_images(job, document) {
                Ok(count) => {
                    tracing::info!("auto-save: saved {count} images from job {}", job.id);
                    total += count;
                }
                Err(err) => {
                    tracing::warn!("auto-save: failed to save job {}: {err}", job.id);
                }
            }
        }
        tracing::info!("auto-save: total images saved from history: {total}");
        Ok(total)
    }

    fn save_image(
        &self,
        job: &Job,
        index: usize,
        category: Category,
        image: &OutputImage,
        path: &Path,
    ) -> Result<usize> {
        let record = GenerationRecord::from_job(job, index, category);
        let payload = codec::encode(&record)?;
        let payload_len = payload.len();
        let text = BTreeMap::from([(METADATA_KEYWORD.to_string(), payload)]);
        self.writer.save(path, image, &text)?;
        Ok(payload_len)
    }
}

fn create_folder(folder: &Path) -> Result<(), AutoSaveError> {
    fs::create_dir_all(folder).map_err(|source| AutoSaveError::Destination {
        path: folder.to_path_buf(),
        source,
    })
}
