use std::fs;
use std::path::Path;

use crate::error::{ChunkError, MetadataError};
use crate::image_processing::ImageProperties;
use crate::metadata::GenerationRecord;
use crate::metadata::chunks::{insert_text_chunks, ChunkReader, TextChunk, TextChunkKind};

/// Keyword written on save; kept for readers of earlier files.
pub const METADATA_KEYWORD: &str = "metadata";

/// Keywords accepted on read, highest priority first.
pub const RECOGNIZED_KEYWORDS: [&str; 4] = ["AI_METADATA_JSON", "AI", "AI_META", METADATA_KEYWORD];

pub const MAX_PAYLOAD_BYTES: usize = 4000;

const ELLIPSIS: &str = "...";

/// Serializes a record to compact JSON no larger than [`MAX_PAYLOAD_BYTES`].
///
/// Oversized records are replaced by their essential subset; if that still
/// does not fit, its longest text field (usually the prompt) is shortened
/// until it does.
pub fn encode(record: &GenerationRecord) -> Result<String, MetadataError> {
    let payload = serde_json::to_string(record)?;
    if payload.len() <= MAX_PAYLOAD_BYTES {
        return Ok(payload);
    }
    tracing::debug!(
        size = payload.len(),
        "metadata exceeds {MAX_PAYLOAD_BYTES} bytes, keeping essential fields"
    );

    let mut essential = record.essential();
    let mut payload = serde_json::to_string(&essential)?;
    while payload.len() > MAX_PAYLOAD_BYTES {
        let excess = payload.len() - MAX_PAYLOAD_BYTES;
        let longest = [
            &mut essential.prompt,
            &mut essential.generation_type,
            &mut essential.timestamp,
        ]
        .into_iter()
        .max_by_key(|field| field.len());
        let Some(field) = longest.filter(|field| !field.is_empty()) else {
            break;
        };
        shorten(field, excess);
        payload = serde_json::to_string(&essential)?;
    }
    Ok(payload)
}

/// Drops at least `excess` characters plus room for the ellipsis; every
/// dropped char shrinks the JSON by at least one byte. A field too short to
/// keep anything is cleared, so repeated calls always make progress.
fn shorten(field: &mut String, excess: usize) {
    let chars = field.chars().count();
    if chars <= ELLIPSIS.len() {
        field.clear();
        return;
    }
    let keep = chars.saturating_sub(excess + ELLIPSIS.len());
    *field = field.chars().take(keep).chain(ELLIPSIS.chars()).collect();
}

pub fn decode_payload(payload: &str) -> Result<GenerationRecord, MetadataError> {
    parse_record(METADATA_KEYWORD, payload)
}

fn parse_record(keyword: &str, payload: &str) -> Result<GenerationRecord, MetadataError> {
    serde_json::from_str(payload.trim()).map_err(|source| MetadataError::JsonParse {
        keyword: keyword.to_string(),
        source,
    })
}

/// Stores an encoded payload in `png` under [`METADATA_KEYWORD`].
pub fn embed(png: &[u8], payload: &str) -> Result<Vec<u8>, ChunkError> {
    insert_text_chunks(png, [(METADATA_KEYWORD, payload)])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTextEntry {
    pub keyword: String,
    pub kind: TextChunkKind,
    pub value: String,
}

#[derive(Debug)]
pub struct DecodedImage {
    pub record: Option<GenerationRecord>,
    /// Keyword of the chunk the record came from.
    pub source_keyword: Option<String>,
    /// Every other text chunk, in file order, duplicates included.
    pub raw: Vec<RawTextEntry>,
    /// Recoverable problems met while looking for the record.
    pub issues: Vec<MetadataError>,
    pub properties: ImageProperties,
}

impl DecodedImage {
    pub fn generation_type(&self) -> Option<&str> {
        self.record.as_ref().map(|record| record.generation_type.as_str())
    }

    pub fn has_unsupported_compression(&self) -> bool {
        self.issues
            .iter()
            .any(|issue| matches!(issue, MetadataError::UnsupportedCompression { .. }))
    }

    pub fn generic_properties(&self) -> Vec<(&'static str, String)> {
        let mut properties = Vec::with_capacity(4);
        if let Some(name) = &self.properties.file_name {
            properties.push(("File", name.clone()));
        }
        properties.push(("Dimensions", self.properties.dimensions()));
        properties.push(("Format", self.properties.format_name().to_string()));
        properties.push(("File size", self.properties.file_size_kb()));
        properties
    }
}

/// Reads the generation record embedded in the image at `path`.
///
/// Only an unreadable file is an error; missing or broken metadata degrades
/// to a result carrying raw text entries and image properties.
pub fn decode(path: &Path) -> Result<DecodedImage, MetadataError> {
    let bytes = fs::read(path).map_err(|err| MetadataError::ImageUnreadable {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());
    decode_with_source(&bytes, path, file_name)
}

pub fn decode_bytes(bytes: &[u8], file_name: Option<String>) -> Result<DecodedImage, MetadataError> {
    let source = Path::new(file_name.as_deref().unwrap_or("<memory>")).to_path_buf();
    decode_with_source(bytes, &source, file_name)
}

fn decode_with_source(
    bytes: &[u8],
    source: &Path,
    file_name: Option<String>,
) -> Result<DecodedImage, MetadataError> {
    let properties = ImageProperties::probe(bytes, file_name).map_err(|err| MetadataError::ImageUnreadable {
        path: source.to_path_buf(),
        reason: err.to_string(),
    })?;
    let mut decoded = DecodedImage {
        record: None,
        source_keyword: None,
        raw: Vec::new(),
        issues: Vec::new(),
        properties,
    };

    let texts = match ChunkReader::new(bytes) {
        Ok(reader) => collect_text_chunks(reader, source),
        Err(_) => Vec::new(),
    };

    let mut candidates: Vec<(bool, usize, usize)> = texts
        .iter()
        .enumerate()
        .filter_map(|(index, text)| {
            keyword_rank(&text.keyword).map(|rank| (text.is_compressed(), rank, index))
        })
        .collect();
    candidates.sort_unstable();
    if candidates.is_empty() {
        decoded.issues.push(MetadataError::ChunkNotFound);
    }

    let mut winner = None;
    for (_, _, index) in candidates {
        let text = &texts[index];
        match text.text().and_then(|payload| parse_record(&text.keyword, &payload)) {
            Ok(record) => {
                decoded.record = Some(record);
                decoded.source_keyword = Some(text.keyword.clone());
                winner = Some(index);
                break;
            }
            Err(err) => {
                tracing::debug!("skipping {} '{}' in {}: {err}", text.kind.tag(), text.keyword, source.display());
                decoded.issues.push(err);
            }
        }
    }

    for (index, text) in texts.iter().enumerate() {
        if winner == Some(index) {
            continue;
        }
        let value = match text.text() {
            Ok(value) => value,
            Err(MetadataError::UnsupportedCompression { method, .. }) => {
                format!("unsupported compression method {method}")
            }
            Err(err) => format!("unreadable: {err}"),
        };
        decoded.raw.push(RawTextEntry {
            keyword: text.keyword.clone(),
            kind: text.kind,
            value,
        });
    }

    Ok(decoded)
}

fn collect_text_chunks<'a>(reader: ChunkReader<'a>, source: &Path) -> Vec<TextChunk<'a>> {
    let mut texts = Vec::new();
    for chunk in reader {
        match chunk {
            Ok(chunk) => texts.extend(TextChunk::parse(&chunk)),
            Err(err) => {
                tracing::warn!("stopped reading chunks of {}: {err}", source.display());
                break;
            }
        }
    }
    texts
}

fn keyword_rank(keyword: &str) -> Option<usize> {
    RECOGNIZED_KEYWORDS.iter().position(|candidate| *candidate == keyword)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_processing::encode_png;
    use crate::jobs::JobKind;
    use crate::metadata::LoraEntry;
    use crate::metadata::chunks::{text_chunk, write_chunk, IHDR, MAX_INFLATED_BYTES, PNG_SIGNATURE, ZTXT};
    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use std::io::Write;

    fn sample_record() -> GenerationRecord {
        let mut record = GenerationRecord::new(
            "a lighthouse at dusk, dramatic sky",
            987_654_321,
            0.75,
            "Refine",
            "2024-05-01 08:30:00",
        );
        record.negative_prompt = Some("blurry, low quality".to_string());
        record.style = Some("cinematic.json".to_string());
        record.checkpoint = Some("juggernaut_xl.safetensors".to_string());
        record.sampler = Some("dpmpp_2m".to_string());
        record.loras = Some(vec![
            LoraEntry { name: "add_detail".to_string(), strength: 0.65 },
            LoraEntry { name: "film_grain".to_string(), strength: 1.0 },
        ]);
        record.job_kind = Some(JobKind::Diffusion);
        record.batch_index = Some(1);
        record.total_images = Some(4);
        record.extra.insert("param_steps".to_string(), "28".to_string());
        record.extra.insert("param_cfg".to_string(), "6.5".to_string());
        record
    }

    fn png_with(chunks: &[([u8; 4], Vec<u8>)]) -> Vec<u8> {
        let base = encode_png(&[10; 4 * 4 * 4], 4, 4).expect("encode");
        let mut out = PNG_SIGNATURE.to_vec();
        for chunk in ChunkReader::new(&base).expect("png") {
            let chunk = chunk.expect("chunk");
            write_chunk(&mut out, &chunk.kind, chunk.data);
            if chunk.kind == IHDR {
                for (kind, data) in chunks {
                    write_chunk(&mut out, kind, data);
                }
            }
        }
        out
    }

    fn text(keyword: &str, payload: &str) -> ([u8; 4], Vec<u8>) {
        text_chunk(keyword, payload).expect("text chunk")
    }

    fn ztxt(keyword: &str, method: u8, payload: &str) -> ([u8; 4], Vec<u8>) {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload.as_bytes()).expect("compress");
        let mut data = keyword.as_bytes().to_vec();
        data.push(0);
        data.push(method);
        data.extend(encoder.finish().expect("finish"));
        (ZTXT, data)
    }

    #[test]
    fn payload_round_trip() -> anyhow::Result<()> {
        let record = sample_record();
        let payload = encode(&record)?;
        assert!(payload.starts_with("{\"prompt\":"));
        assert!(!payload.contains('\n'));
        assert_eq!(decode_payload(&payload)?, record);
        Ok(())
    }

    #[test]
    fn file_round_trip() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("render.png");
        let record = sample_record();
        let png = embed(&encode_png(&[0; 8 * 8 * 4], 8, 8)?, &encode(&record)?)?;
        std::fs::write(&path, png)?;

        let decoded = decode(&path)?;
        assert_eq!(decoded.record.as_ref(), Some(&record));
        assert_eq!(decoded.source_keyword.as_deref(), Some(METADATA_KEYWORD));
        assert!(decoded.raw.is_empty());
        assert!(decoded.issues.is_empty());
        assert_eq!(decoded.properties.file_name.as_deref(), Some("render.png"));
        Ok(())
    }

    #[test]
    fn non_ascii_record_round_trips() -> anyhow::Result<()> {
        let mut record = sample_record();
        record.prompt = "un phare au crépuscule, 灯台".to_string();
        let png = embed(&encode_png(&[0; 4], 1, 1)?, &encode(&record)?)?;
        let decoded = decode_bytes(&png, None)?;
        assert_eq!(decoded.record, Some(record));
        Ok(())
    }

    #[test]
    fn oversized_record_keeps_essentials() -> anyhow::Result<()> {
        let mut record = sample_record();
        for index in 0..20 {
            record.extra.insert(format!("param_note_{index}"), "n".repeat(450));
        }
        assert!(serde_json::to_string(&record)?.len() > MAX_PAYLOAD_BYTES);

        let payload = encode(&record)?;
        assert!(payload.len() <= MAX_PAYLOAD_BYTES);

        let decoded = decode_payload(&payload)?;
        assert!(decoded.truncated);
        assert_eq!(decoded.prompt, record.prompt);
        assert_eq!(decoded.seed, record.seed);
        assert_eq!(decoded.strength, record.strength);
        assert_eq!(decoded.generation_type, record.generation_type);
        assert_eq!(decoded.timestamp, record.timestamp);
        assert_eq!(decoded.negative_prompt, None);
        assert_eq!(decoded.style, None);
        assert_eq!(decoded.checkpoint, None);
        assert_eq!(decoded.sampler, None);
        assert_eq!(decoded.loras, None);
        assert_eq!(decoded.job_kind, None);
        assert_eq!(decoded.batch_index, None);
        assert_eq!(decoded.total_images, None);
        assert!(decoded.extra.is_empty());
        Ok(())
    }

    #[test]
    fn oversized_prompt_is_shortened() -> anyhow::Result<()> {
        let mut record = sample_record();
        record.prompt = "é\"".repeat(3000);
        let payload = encode(&record)?;
        assert!(payload.len() <= MAX_PAYLOAD_BYTES);

        let decoded = decode_payload(&payload)?;
        assert!(decoded.truncated);
        assert!(decoded.prompt.ends_with("..."));
        assert!(record.prompt.starts_with(decoded.prompt.trim_end_matches("...")));
        Ok(())
    }

    #[test]
    fn oversized_label_fields_are_shortened() -> anyhow::Result<()> {
        let record = GenerationRecord::new("p", 1, 0.5, "X".repeat(5000), "T".repeat(3000));
        let payload = encode(&record)?;
        assert!(payload.len() <= MAX_PAYLOAD_BYTES, "{} bytes", payload.len());

        let decoded = decode_payload(&payload)?;
        assert!(decoded.truncated);
        assert_eq!(decoded.prompt, "p");
        assert!(decoded.generation_type.starts_with('X'));
        assert!(decoded.generation_type.ends_with("..."));
        assert!(decoded.timestamp.starts_with('T'));
        Ok(())
    }

    #[test]
    fn strengths_survive_round_trip_exactly() -> anyhow::Result<()> {
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut next_unit = move || {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            // 52 random mantissa bits give a value in [1, 2)
            f64::from_bits(0x3FF0_0000_0000_0000 | (state >> 12)) - 1.0
        };

        for _ in 0..5_000 {
            let mut record = sample_record();
            record.strength = next_unit();
            record.loras = Some(vec![LoraEntry {
                name: "detail".to_string(),
                strength: next_unit() * 2.0,
            }]);
            let decoded = decode_payload(&encode(&record)?)?;
            assert_eq!(decoded.strength.to_bits(), record.strength.to_bits());
            assert_eq!(decoded.loras, record.loras);
        }
        Ok(())
    }

    #[test]
    fn image_without_metadata_degrades_to_properties() -> anyhow::Result<()> {
        let png = png_with(&[text("Software", "Krita")]);
        let decoded = decode_bytes(&png, Some("plain.png".to_string()))?;

        assert!(decoded.record.is_none());
        assert_eq!(decoded.generation_type(), None);
        assert!(matches!(decoded.issues.as_slice(), [MetadataError::ChunkNotFound]));
        assert_eq!(
            decoded.raw,
            [RawTextEntry {
                keyword: "Software".to_string(),
                kind: TextChunkKind::Text,
                value: "Krita".to_string(),
            }]
        );
        let properties = decoded.generic_properties();
        assert!(properties.contains(&("Dimensions", "4x4".to_string())));
        assert!(properties.contains(&("Format", "PNG".to_string())));
        Ok(())
    }

    #[test]
    fn unsupported_compression_is_marked() -> anyhow::Result<()> {
        let png = png_with(&[ztxt("AI", 1, "{}")]);
        let decoded = decode_bytes(&png, None)?;

        assert!(decoded.record.is_none());
        assert!(decoded.has_unsupported_compression());
        assert!(matches!(
            decoded.issues.as_slice(),
            [MetadataError::UnsupportedCompression { method: 1, keyword }] if keyword == "AI"
        ));
        assert_eq!(decoded.raw.len(), 1);
        assert_eq!(decoded.raw[0].value, "unsupported compression method 1");
        Ok(())
    }

    #[test]
    fn zlib_candidate_decodes() -> anyhow::Result<()> {
        let record = sample_record();
        let png = png_with(&[ztxt("AI_META", 0, &encode(&record)?)]);
        let decoded = decode_bytes(&png, None)?;
        assert_eq!(decoded.record, Some(record));
        assert_eq!(decoded.source_keyword.as_deref(), Some("AI_META"));
        Ok(())
    }

    #[test]
    fn uncompressed_candidate_wins_and_others_stay_raw() -> anyhow::Result<()> {
        let mut compressed = sample_record();
        compressed.seed = 1;
        let mut legacy = sample_record();
        legacy.seed = 2;
        let mut preferred = sample_record();
        preferred.seed = 3;

        let png = png_with(&[
            ztxt("AI_METADATA_JSON", 0, &encode(&compressed)?),
            text("metadata", &encode(&legacy)?),
            text("AI", &encode(&preferred)?),
        ]);
        let decoded = decode_bytes(&png, None)?;

        assert_eq!(decoded.record.as_ref().map(|record| record.seed), Some(3));
        assert_eq!(decoded.source_keyword.as_deref(), Some("AI"));
        let raw_keys: Vec<&str> = decoded.raw.iter().map(|entry| entry.keyword.as_str()).collect();
        assert_eq!(raw_keys, ["AI_METADATA_JSON", "metadata"]);
        assert_eq!(decoded.raw[0].kind, TextChunkKind::Compressed);
        Ok(())
    }

    #[test]
    fn broken_json_falls_through_to_next_candidate() -> anyhow::Result<()> {
        let record = sample_record();
        let png = png_with(&[text("AI", "{not json"), text("metadata", &encode(&record)?)]);
        let decoded = decode_bytes(&png, None)?;

        assert_eq!(decoded.record, Some(record));
        assert!(matches!(
            decoded.issues.as_slice(),
            [MetadataError::JsonParse { keyword, .. }] if keyword == "AI"
        ));
        assert_eq!(decoded.raw.len(), 1);
        assert_eq!(decoded.raw[0].value, "{not json");
        Ok(())
    }

    #[test]
    fn jpeg_has_properties_only() -> anyhow::Result<()> {
        let mut jpeg = Vec::new();
        image::DynamicImage::ImageRgb8(image::RgbImage::new(5, 3))
            .write_to(&mut std::io::Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)?;
        let decoded = decode_bytes(&jpeg, Some("photo.jpg".to_string()))?;
        assert!(decoded.record.is_none());
        assert_eq!(decoded.properties.dimensions(), "5x3");
        assert_eq!(decoded.properties.format_name(), "JPEG");
        Ok(())
    }

    #[test]
    fn unreadable_sources_are_errors() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let missing = temp.path().join("missing.png");
        assert!(matches!(decode(&missing), Err(MetadataError::ImageUnreadable { .. })));

        let garbage = temp.path().join("garbage.png");
        std::fs::write(&garbage, b"definitely not an image")?;
        assert!(matches!(decode(&garbage), Err(MetadataError::ImageUnreadable { .. })));
        Ok(())
    }

    #[test]
    fn corrupt_crc_chunk_is_ignored_by_decode() -> anyhow::Result<()> {
        let record = sample_record();
        let (kind, data) = text("AI", "{\"prompt\":\"damaged\"}");
        let damaged_len = data.len();
        let mut png = png_with(&[(kind, data), text("metadata", &encode(&record)?)]);
        // signature, then the 25-byte IHDR, then the damaged chunk
        let crc_end = PNG_SIGNATURE.len() + 25 + 8 + damaged_len + 4;
        png[crc_end - 1] ^= 0xFF;

        let decoded = decode_bytes(&png, None)?;
        assert_eq!(decoded.record, Some(record));
        assert_eq!(decoded.source_keyword.as_deref(), Some(METADATA_KEYWORD));
        assert!(decoded.raw.is_empty());
        assert!(decoded.issues.is_empty());
        assert_eq!(decoded.properties.dimensions(), "4x4");
        Ok(())
    }

    #[test]
    fn truncated_image_keeps_leading_metadata() -> anyhow::Result<()> {
        let record = sample_record();
        let png = png_with(&[text("metadata", &encode(&record)?), text("Software", "Krita")]);
        let idat = png
            .windows(4)
            .position(|window| window == b"IDAT")
            .expect("IDAT chunk");
        let cut = &png[..idat + 4 + 2];

        let decoded = decode_bytes(cut, None)?;
        assert_eq!(decoded.record, Some(record));
        assert_eq!(decoded.raw.len(), 1);
        assert_eq!(decoded.raw[0].keyword, "Software");
        assert_eq!(decoded.properties.file_size, cut.len() as u64);
        Ok(())
    }

    #[test]
    fn oversized_compressed_text_is_not_inflated() -> anyhow::Result<()> {
        let bomb = "a".repeat(MAX_INFLATED_BYTES + 1);
        let png = png_with(&[ztxt("Comment", 0, &bomb), ztxt("AI", 0, &bomb)]);

        let decoded = decode_bytes(&png, None)?;
        assert!(decoded.record.is_none());
        assert!(decoded.issues.iter().any(|issue| matches!(
            issue,
            MetadataError::Decompress { keyword, .. } if keyword == "AI"
        )));
        assert_eq!(decoded.raw.len(), 2);
        for entry in &decoded.raw {
            assert!(entry.value.starts_with("unreadable: "), "{}", entry.value);
            assert!(entry.value.len() < 1024);
        }
        Ok(())
    }
}
