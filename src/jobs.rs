use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Diffusion,
    Animation,
    Upscaling,
}

impl JobKind {
    pub fn label(self) -> &'static str {
        match self {
            JobKind::Diffusion => "Diffusion",
            JobKind::Animation => "Animation",
            JobKind::Upscaling => "Upscaling",
        }
    }
}

/// RGBA8 pixel buffer produced by a generation job.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl OutputImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let count = (width as usize).saturating_mul(height as usize);
        let pixels = rgba.iter().copied().cycle().take(count * 4).collect();
        Self::new(width, height, pixels)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct JobParams {
    /// Display name shown in the history; used as the file name prefix.
    pub name: String,
    pub prompt: String,
    pub seed: i64,
    /// `None` for jobs that carry no strength (treated as a full generation).
    pub strength: Option<f64>,
    pub metadata: Map<String, Value>,
}

impl JobParams {
    pub fn strength_or_full(&self) -> f64 {
        self.strength.unwrap_or(1.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub params: JobParams,
    pub timestamp: NaiveDateTime,
    pub results: Vec<OutputImage>,
}

impl Job {
    pub fn is_finished(&self) -> bool {
        !self.results.is_empty()
    }
}
