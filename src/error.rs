use std::path::PathBuf;

use thiserror::Error;

/// Failures while reading or writing embedded generation metadata.
///
/// Only `ImageUnreadable` stops a decode; the other variants are collected as
/// issues on the decoded image and simply mean less metadata is available.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("no AI metadata chunk found")]
    ChunkNotFound,

    #[error("invalid metadata JSON in '{keyword}': {source}")]
    JsonParse {
        keyword: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported compression method {method} in '{keyword}'")]
    UnsupportedCompression { keyword: String, method: u8 },

    #[error("failed to inflate '{keyword}': {source}")]
    Decompress {
        keyword: String,
        #[source]
        source: std::io::Error,
    },

    #[error("image unreadable: {}: {reason}", .path.display())]
    ImageUnreadable { path: PathBuf, reason: String },

    #[error("failed to serialize metadata: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("not a PNG stream")]
    NotPng,

    #[error("chunk stream truncated at offset {0}")]
    Truncated(usize),

    #[error("invalid text chunk keyword: {0:?}")]
    InvalidKeyword(String),

    #[error("PNG stream has no IHDR chunk")]
    MissingHeader,
}

#[derive(Debug, Error)]
pub enum AutoSaveError {
    #[error("cannot create destination folder {}: {source}", .path.display())]
    Destination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
