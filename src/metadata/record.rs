use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::jobs::{Job, JobKind};
use crate::metadata::Category;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const EXTRA_PREFIX: &str = "param_";
pub const MAX_EXTRA_VALUE_CHARS: usize = 500;

/// Job metadata keys that map onto dedicated record fields.
const RESERVED_KEYS: [&str; 6] = [
    "prompt",
    "negative_prompt",
    "style",
    "checkpoint",
    "sampler",
    "loras",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoraEntry {
    pub name: String,
    pub strength: f64,
}

impl LoraEntry {
    /// Reads one `{name, strength, enabled}` object; disabled entries yield `None`.
    fn from_value(value: &Value) -> Option<Self> {
        let entry = value.as_object()?;
        if !entry.get("enabled").and_then(Value::as_bool).unwrap_or(true) {
            return None;
        }
        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .map(clean_metadata_value)
            .unwrap_or_else(|| "Unknown".to_string());
        let strength = entry.get("strength").and_then(Value::as_f64).unwrap_or(1.0);
        Some(Self { name, strength })
    }
}

/// Generation parameters embedded next to a saved image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    pub seed: i64,
    pub strength: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loras: Option<Vec<LoraEntry>>,
    pub generation_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_kind: Option<JobKind>,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_images: Option<u32>,
    /// Free-form job parameters, keyed `param_<name>`.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub truncated: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl GenerationRecord {
    pub fn new(
        prompt: impl Into<String>,
        seed: i64,
        strength: f64,
        generation_type: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: None,
            seed,
            strength,
            style: None,
            checkpoint: None,
            sampler: None,
            loras: None,
            generation_type: generation_type.into(),
            job_kind: None,
            timestamp: timestamp.into(),
            batch_index: None,
            total_images: None,
            extra: BTreeMap::new(),
            truncated: false,
        }
    }

    /// Builds the record for output image `index` of a finished job.
    pub fn from_job(job: &Job, index: usize, category: Category) -> Self {
        let params = &job.params;
        let mut extra = BTreeMap::new();

        let loras = match params.metadata.get("loras") {
            Some(Value::Array(items)) => Some(items.iter().filter_map(LoraEntry::from_value).collect()),
            Some(other) => {
                extra.insert(format!("{EXTRA_PREFIX}loras"), extra_value(other));
                None
            }
            None => None,
        };

        for (key, value) in &params.metadata {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            extra.insert(format!("{EXTRA_PREFIX}{key}"), extra_value(value));
        }

        let mut record = Self::new(
            clean_metadata_value(&params.prompt),
            params.seed,
            params.strength_or_full(),
            category.as_str(),
            job.timestamp.format(TIMESTAMP_FORMAT).to_string(),
        );
        record.negative_prompt = text_field(&params.metadata, "negative_prompt");
        record.style = text_field(&params.metadata, "style");
        record.checkpoint = text_field(&params.metadata, "checkpoint");
        record.sampler = text_field(&params.metadata, "sampler");
        record.loras = loras;
        record.job_kind = Some(job.kind);
        record.batch_index = Some(u32::try_from(index).unwrap_or(u32::MAX));
        record.total_images = Some(u32::try_from(job.results.len()).unwrap_or(u32::MAX));
        record.extra = extra;
        record
    }

    /// The reduced record stored when the full one exceeds the size budget.
    pub fn essential(&self) -> Self {
        let mut reduced = Self::new(
            self.prompt.clone(),
            self.seed,
            self.strength,
            self.generation_type.clone(),
            self.timestamp.clone(),
        );
        reduced.truncated = true;
        reduced
    }

    /// Extra parameters with the `param_` prefix stripped.
    pub fn extra_params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.extra.iter().map(|(key, value)| {
            let name = key.strip_prefix(EXTRA_PREFIX).unwrap_or(key);
            (name, value.as_str())
        })
    }
}

/// Removes control characters (except tab and line breaks) and Unicode
/// non-characters, then trims surrounding whitespace.
pub fn clean_metadata_value(value: &str) -> String {
    let cleaned: String = value.chars().filter(|c| !is_noise(*c)).collect();
    cleaned.trim().to_string()
}

fn is_noise(c: char) -> bool {
    matches!(
        c,
        '\u{0}'..='\u{8}' | '\u{b}' | '\u{c}' | '\u{e}'..='\u{1f}' | '\u{7f}' | '\u{fffd}' | '\u{fffe}' | '\u{ffff}'
    )
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn text_field(metadata: &Map<String, Value>, key: &str) -> Option<String> {
    let value = clean_metadata_value(&value_to_string(metadata.get(key)?));
    if value.is_empty() { None } else { Some(value) }
}

fn extra_value(value: &Value) -> String {
    let cleaned = clean_metadata_value(&value_to_string(value));
    if cleaned.chars().count() <= MAX_EXTRA_VALUE_CHARS {
        return cleaned;
    }
    let mut capped: String = cleaned.chars().take(MAX_EXTRA_VALUE_CHARS - 3).collect();
    capped.push_str("...");
    capped
}
