use std::io::Cursor;

use anyhow::{anyhow, Result};
use image::{DynamicImage, ImageFormat, ImageReader, RgbaImage};

/// Generic facts about an image file, shown when no generation metadata is
/// available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageProperties {
    pub file_name: Option<String>,
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
    pub file_size: u64,
}

impl ImageProperties {
    pub fn probe(bytes: &[u8], file_name: Option<String>) -> Result<Self> {
        let mime_type = detect_mime_type(bytes).ok_or_else(|| anyhow!("unrecognized image format"))?;
        let (width, height) = get_dimensions(bytes, mime_type)?;
        Ok(Self {
            file_name,
            width,
            height,
            mime_type: mime_type.to_string(),
            file_size: bytes.len() as u64,
        })
    }

    pub fn dimensions(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    pub fn format_name(&self) -> &str {
        format_name(&self.mime_type)
    }

    pub fn file_size_kb(&self) -> String {
        format!("{:.1} KB", self.file_size as f64 / 1024.0)
    }
}

pub fn encode_png(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let rgba = RgbaImage::from_raw(width, height, pixels.to_vec())
        .ok_or_else(|| anyhow!("invalid rgba buffer"))?;
    let mut output = Vec::new();
    DynamicImage::ImageRgba8(rgba)
        .write_to(&mut Cursor::new(&mut output), ImageFormat::Png)
        .map_err(|err| anyhow!("encode png failed: {err}"))?;
    Ok(output)
}

/// Reads only the header; pixel data is not decoded.
pub fn get_dimensions(bytes: &[u8], mime_type: &str) -> Result<(u32, u32)> {
    let format = mime_to_format(mime_type)?;
    ImageReader::with_format(Cursor::new(bytes), format)
        .into_dimensions()
        .map_err(|err| anyhow!("decode image failed: {err}"))
}

pub fn detect_mime_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if bytes.starts_with(b"BM") {
        return Some("image/bmp");
    }
    None
}

pub fn mime_to_format(mime_type: &str) -> Result<ImageFormat> {
    match mime_type {
        "image/png" => Ok(ImageFormat::Png),
        "image/jpeg" | "image/jpg" => Ok(ImageFormat::Jpeg),
        "image/gif" => Ok(ImageFormat::Gif),
        "image/webp" => Ok(ImageFormat::WebP),
        "image/bmp" => Ok(ImageFormat::Bmp),
        _ => Err(anyhow!("unsupported mime type: {mime_type}")),
    }
}

pub fn format_name(mime_type: &str) -> &str {
    match mime_type {
        "image/png" => "PNG",
        "image/jpeg" | "image/jpg" => "JPEG",
        "image/gif" => "GIF",
        "image/webp" => "WEBP",
        "image/bmp" => "BMP",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_reads_png_header() {
        let png = encode_png(&[0; 3 * 2 * 4], 3, 2).expect("encode");
        let properties = ImageProperties::probe(&png, Some("a.png".to_string())).expect("probe");
        assert_eq!(properties.dimensions(), "3x2");
        assert_eq!(properties.format_name(), "PNG");
        assert_eq!(properties.file_size, png.len() as u64);
    }

    #[test]
    fn probe_rejects_unknown_bytes() {
        assert!(ImageProperties::probe(b"not an image", None).is_err());
    }

    #[test]
    fn encode_rejects_short_buffer() {
        assert!(encode_png(&[0; 4], 2, 2).is_err());
    }
}
