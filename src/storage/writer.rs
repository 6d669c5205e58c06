use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::image_processing::encode_png;
use crate::jobs::OutputImage;
use crate::metadata::chunks::insert_text_chunks;

/// Persists one image together with its side-channel text entries.
pub trait ImageWriter {
    fn save(&self, path: &Path, image: &OutputImage, text: &BTreeMap<String, String>) -> Result<()>;
}

/// Writes PNG files with `tEXt`/`iTXt` entries placed after the header.
#[derive(Clone, Copy, Debug, Default)]
pub struct PngFileWriter;

impl ImageWriter for PngFileWriter {
    fn save(&self, path: &Path, image: &OutputImage, text: &BTreeMap<String, String>) -> Result<()> {
        let png = encode_png(&image.pixels, image.width, image.height)?;
        let png = insert_text_chunks(&png, text.iter().map(|(key, value)| (key.as_str(), value.as_str())))?;
        write_file(path, &png)
    }
}

/// Writes through a sibling `.part` file so a failed write leaves nothing
/// behind under the final name.
fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut staging = path.as_os_str().to_owned();
    staging.push(".part");
    let staging = PathBuf::from(staging);
    fs::write(&staging, data)?;
    if let Err(err) = fs::rename(&staging, path) {
        let _ = fs::remove_file(&staging);
        return Err(err.into());
    }
    Ok(())
}
