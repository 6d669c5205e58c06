//! PNG chunk stream access.
//!
//! A PNG file is an 8-byte signature followed by chunks laid out as
//! `length (u32 BE) | type (4 bytes) | data | crc32(type ++ data)`. Text
//! metadata lives in `tEXt`, `zTXt` and `iTXt` chunks; everything here walks
//! the length fields, so chunk payloads that happen to contain chunk type
//! names are never misread.

use std::io::{self, Read};

use flate2::Crc;
use flate2::read::ZlibDecoder;

use crate::error::{ChunkError, MetadataError};

pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

pub const IHDR: [u8; 4] = *b"IHDR";
pub const IEND: [u8; 4] = *b"IEND";
pub const TEXT: [u8; 4] = *b"tEXt";
pub const ZTXT: [u8; 4] = *b"zTXt";
pub const ITXT: [u8; 4] = *b"iTXt";

/// Compression method 0 is the only one defined by PNG (zlib/deflate).
pub const COMPRESSION_ZLIB: u8 = 0;

/// Upper bound on the inflated size of a compressed text chunk.
pub const MAX_INFLATED_BYTES: usize = 1 << 20;

const MAX_KEYWORD_LEN: usize = 79;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub kind: [u8; 4],
    pub data: &'a [u8],
}

impl Chunk<'_> {
    pub fn kind_str(&self) -> &str {
        std::str::from_utf8(&self.kind).unwrap_or("????")
    }
}

/// Iterates the chunks of a PNG stream, stopping after `IEND` or at the first
/// structural error. Chunks with a mismatched CRC are skipped.
pub struct ChunkReader<'a> {
    bytes: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> ChunkReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self, ChunkError> {
        if !bytes.starts_with(&PNG_SIGNATURE) {
            return Err(ChunkError::NotPng);
        }
        Ok(Self {
            bytes,
            offset: PNG_SIGNATURE.len(),
            done: false,
        })
    }

    fn read_next(&mut self) -> Result<Option<Chunk<'a>>, ChunkError> {
        loop {
            if self.offset == self.bytes.len() {
                return Ok(None);
            }
            let start = self.offset;
            let header = self
                .bytes
                .get(start..start + 8)
                .ok_or(ChunkError::Truncated(start))?;
            let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
            let kind = [header[4], header[5], header[6], header[7]];
            let data_start = start + 8;
            let data_end = data_start
                .checked_add(length)
                .ok_or(ChunkError::Truncated(start))?;
            let data = self
                .bytes
                .get(data_start..data_end)
                .ok_or(ChunkError::Truncated(start))?;
            let stored_crc = self
                .bytes
                .get(data_end..data_end + 4)
                .ok_or(ChunkError::Truncated(start))?;
            self.offset = data_end + 4;

            let chunk = Chunk { kind, data };
            let stored_crc = u32::from_be_bytes([stored_crc[0], stored_crc[1], stored_crc[2], stored_crc[3]]);
            if chunk_crc(&kind, data) != stored_crc {
                tracing::debug!("skipping {} chunk at offset {start}: CRC mismatch", chunk.kind_str());
                continue;
            }
            if kind == IEND {
                self.done = true;
            }
            return Ok(Some(chunk));
        }
    }
}

impl<'a> Iterator for ChunkReader<'a> {
    type Item = Result<Chunk<'a>, ChunkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_next() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

pub fn chunk_crc(kind: &[u8; 4], data: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(kind);
    crc.update(data);
    crc.sum()
}

pub fn write_chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    out.extend_from_slice(&chunk_crc(kind, data).to_be_bytes());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextChunkKind {
    Text,
    Compressed,
    International,
}

impl TextChunkKind {
    pub fn tag(self) -> &'static str {
        match self {
            TextChunkKind::Text => "tEXt",
            TextChunkKind::Compressed => "zTXt",
            TextChunkKind::International => "iTXt",
        }
    }
}

/// A parsed text chunk; the payload stays borrowed until [`TextChunk::text`]
/// is asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk<'a> {
    pub kind: TextChunkKind,
    pub keyword: String,
    /// `None` when the payload is stored as-is.
    pub compression: Option<u8>,
    payload: &'a [u8],
}

impl<'a> TextChunk<'a> {
    /// Returns `None` for non-text chunks and for text chunks missing their
    /// keyword separator.
    pub fn parse(chunk: &Chunk<'a>) -> Option<Self> {
        let kind = match chunk.kind {
            TEXT => TextChunkKind::Text,
            ZTXT => TextChunkKind::Compressed,
            ITXT => TextChunkKind::International,
            _ => return None,
        };
        let data: &'a [u8] = chunk.data;
        let Some(separator) = data.iter().position(|byte| *byte == 0) else {
            tracing::debug!("{} chunk without keyword separator", chunk.kind_str());
            return None;
        };
        let keyword = latin1(&data[..separator]);
        let rest = &data[separator + 1..];

        let (compression, payload) = match kind {
            TextChunkKind::Text => (None, rest),
            TextChunkKind::Compressed => {
                let (&method, payload) = rest.split_first()?;
                (Some(method), payload)
            }
            TextChunkKind::International => {
                let flag = *rest.first()?;
                let method = *rest.get(1)?;
                // language tag and translated keyword, both null-terminated
                let after_flags = rest.get(2..)?;
                let language_end = after_flags.iter().position(|byte| *byte == 0)?;
                let after_language = &after_flags[language_end + 1..];
                let translated_end = after_language.iter().position(|byte| *byte == 0)?;
                let payload = &after_language[translated_end + 1..];
                let compression = if flag == 0 { None } else { Some(method) };
                (compression, payload)
            }
        };

        Some(Self {
            kind,
            keyword,
            compression,
            payload,
        })
    }

    pub fn is_compressed(&self) -> bool {
        self.compression.is_some()
    }

    pub fn text(&self) -> Result<String, MetadataError> {
        match self.compression {
            None => Ok(self.decode_text(self.payload.to_vec())),
            Some(COMPRESSION_ZLIB) => {
                let mut inflated = Vec::new();
                ZlibDecoder::new(self.payload)
                    .take(MAX_INFLATED_BYTES as u64 + 1)
                    .read_to_end(&mut inflated)
                    .map_err(|source| MetadataError::Decompress {
                        keyword: self.keyword.clone(),
                        source,
                    })?;
                if inflated.len() > MAX_INFLATED_BYTES {
                    return Err(MetadataError::Decompress {
                        keyword: self.keyword.clone(),
                        source: io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("inflated text exceeds {MAX_INFLATED_BYTES} bytes"),
                        ),
                    });
                }
                Ok(self.decode_text(inflated))
            }
            Some(method) => Err(MetadataError::UnsupportedCompression {
                keyword: self.keyword.clone(),
                method,
            }),
        }
    }

    fn decode_text(&self, bytes: Vec<u8>) -> String {
        // tEXt/zTXt are nominally Latin-1, but writers routinely store UTF-8.
        match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(err) if self.kind == TextChunkKind::International => {
                String::from_utf8_lossy(err.as_bytes()).into_owned()
            }
            Err(err) => latin1(err.as_bytes()),
        }
    }
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| char::from(*byte)).collect()
}

fn validate_keyword(keyword: &str) -> Result<(), ChunkError> {
    let valid = !keyword.is_empty()
        && keyword.len() <= MAX_KEYWORD_LEN
        && keyword.chars().all(|c| c.is_ascii() && !c.is_ascii_control())
        && !keyword.starts_with(' ')
        && !keyword.ends_with(' ');
    if valid {
        Ok(())
    } else {
        Err(ChunkError::InvalidKeyword(keyword.to_string()))
    }
}

/// Chunk type and body for an uncompressed text entry: `tEXt` for ASCII
/// payloads, `iTXt` otherwise so UTF-8 stays well-formed.
pub fn text_chunk(keyword: &str, text: &str) -> Result<([u8; 4], Vec<u8>), ChunkError> {
    validate_keyword(keyword)?;
    let mut data = Vec::with_capacity(keyword.len() + text.len() + 5);
    data.extend_from_slice(keyword.as_bytes());
    data.push(0);
    if text.is_ascii() {
        data.extend_from_slice(text.as_bytes());
        return Ok((TEXT, data));
    }
    // compression flag, compression method, empty language tag, empty translated keyword
    data.extend_from_slice(&[0, 0, 0, 0]);
    data.extend_from_slice(text.as_bytes());
    Ok((ITXT, data))
}

/// Re-emits `png` with the given text entries placed right after `IHDR`.
pub fn insert_text_chunks<'e, I>(png: &[u8], entries: I) -> Result<Vec<u8>, ChunkError>
where
    I: IntoIterator<Item = (&'e str, &'e str)>,
{
    let mut encoded = Vec::new();
    for (keyword, text) in entries {
        encoded.push(text_chunk(keyword, text)?);
    }

    let mut out = Vec::with_capacity(png.len() + encoded.iter().map(|(_, data)| data.len() + 12).sum::<usize>());
    out.extend_from_slice(&PNG_SIGNATURE);
    let mut header_seen = false;
    for chunk in ChunkReader::new(png)? {
        let chunk = chunk?;
        write_chunk(&mut out, &chunk.kind, chunk.data);
        if chunk.kind == IHDR && !header_seen {
            header_seen = true;
            for (kind, data) in &encoded {
                write_chunk(&mut out, kind, data);
            }
        }
    }
    if !header_seen {
        return Err(ChunkError::MissingHeader);
    }
    Ok(out)
}
