//! Embeds generation parameters in saved PNG files, files finished job
//! output by document and category, and renders the embedded records back
//! as text.

pub mod config;
pub mod error;
pub mod image_processing;
pub mod jobs;
pub mod metadata;
pub mod presenter;
pub mod storage;

pub use config::Settings;
pub use error::{AutoSaveError, ChunkError, MetadataError};
pub use jobs::{Job, JobKind, JobParams, OutputImage};
pub use metadata::{Category, DecodedImage, GenerationRecord};
pub use presenter::{render_decoded, render_job, render_record};
pub use storage::{AutoSaveOrganizer, ImageWriter, OutputLayout, PngFileWriter};
