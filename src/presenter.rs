//! Plain-text rendering of generation records for the metadata panel.

use chrono::NaiveDateTime;

use crate::jobs::Job;
use crate::metadata::record::TIMESTAMP_FORMAT;
use crate::metadata::{Category, DecodedImage, GenerationRecord, LoraEntry};

const RULE_WIDTH: usize = 40;
const DISPLAY_TIMESTAMP_FORMAT: &str = "%d/%m/%Y at %H:%M";

#[derive(Default)]
struct Sections {
    lines: Vec<String>,
}

impl Sections {
    fn heading(&mut self, title: &str) {
        if !self.lines.is_empty() {
            self.lines.push(String::new());
        }
        self.lines.push(title.to_string());
        self.lines.push("─".repeat(RULE_WIDTH));
    }

    fn line(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    fn field(&mut self, label: &str, value: impl AsRef<str>) {
        self.lines.push(format!("{label}: {}", value.as_ref()));
    }

    fn finish(self) -> String {
        self.lines.join("\n")
    }
}

pub fn render_record(record: &GenerationRecord) -> String {
    let mut sections = Sections::default();
    write_record(&mut sections, record, None);
    sections.finish()
}

/// Renders an in-memory job the way its saved images would be shown.
pub fn render_job(job: &Job) -> String {
    let category = Category::classify(job.kind, job.params.strength_or_full());
    let record = GenerationRecord::from_job(job, 0, category);
    let name = job.params.name.trim();
    let name = (!name.is_empty() && name != job.params.prompt.trim()).then_some(name);

    let mut sections = Sections::default();
    write_record(&mut sections, &record, name);
    sections.finish()
}

/// Record layout when the image carries one, followed by the remaining text
/// entries and the image properties.
pub fn render_decoded(decoded: &DecodedImage) -> String {
    let mut sections = Sections::default();
    match &decoded.record {
        Some(record) => {
            sections.line("=== AI METADATA ===");
            sections.line("");
            write_record(&mut sections, record, None);
            if !decoded.raw.is_empty() {
                sections.heading("OTHER METADATA");
                write_raw(&mut sections, decoded);
            }
        }
        None => {
            sections.line("=== AVAILABLE METADATA ===");
            sections.line("");
            if decoded.raw.is_empty() {
                sections.line("No text metadata found.");
            } else {
                write_raw(&mut sections, decoded);
            }
        }
    }

    sections.heading("IMAGE");
    for (label, value) in decoded.generic_properties() {
        sections.field(label, value);
    }
    sections.finish()
}

fn write_record(sections: &mut Sections, record: &GenerationRecord, name: Option<&str>) {
    sections.heading("PROMPT");
    sections.line(record.prompt.as_str());
    if let Some(name) = name {
        sections.heading("NAME");
        sections.line(name);
    }

    sections.heading("PARAMETERS");
    sections.field("Seed", record.seed.to_string());
    sections.field("Strength", format!("{:.1}%", record.strength * 100.0));
    if let Some(style) = &record.style {
        sections.field(label("style"), style);
    }

    let technical = technical_lines(record);
    if !technical.is_empty() {
        sections.heading("TECHNICAL");
        for line in technical {
            sections.line(line);
        }
    }

    sections.heading("INFORMATION");
    if let Some(kind) = record.job_kind {
        sections.field("Type", kind.label());
    }
    sections.field("Category", &record.generation_type);
    sections.field("Generated", display_timestamp(&record.timestamp));
    if let Some(total) = record.total_images.filter(|total| *total > 1) {
        sections.field("Images", total.to_string());
    }
    if record.truncated {
        sections.line("Metadata was shortened to fit in the image.");
    }
}

fn technical_lines(record: &GenerationRecord) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(checkpoint) = &record.checkpoint {
        lines.push(format!("{}: {checkpoint}", label("checkpoint")));
    }
    if let Some(sampler) = &record.sampler {
        lines.push(format!("{}: {sampler}", label("sampler")));
    }
    if let Some(loras) = record.loras.as_deref().filter(|loras| !loras.is_empty()) {
        lines.push(format!("{}: {}", label("loras"), format_loras(loras)));
    }
    if let Some(negative) = &record.negative_prompt {
        lines.push(format!("Negative: {negative}"));
    }
    for (key, value) in record.extra_params() {
        lines.push(format!("{}: {value}", label(key)));
    }
    lines
}

fn write_raw(sections: &mut Sections, decoded: &DecodedImage) {
    for entry in &decoded.raw {
        sections.field(&entry.keyword, &entry.value);
    }
}

fn format_loras(loras: &[LoraEntry]) -> String {
    loras
        .iter()
        .map(|lora| format!("{} ({})", lora.name, format_strength(lora.strength)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Shortest decimal form, keeping one decimal place on whole numbers.
fn format_strength(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

fn label(key: &str) -> &str {
    match key {
        "checkpoint" => "Model",
        "sampler" => "Sampler",
        "steps" => "Steps",
        "cfg" => "CFG",
        "loras" => "LoRA",
        "negative_prompt" => "Negative prompt",
        "strength" => "Strength",
        "style" => "Style",
        other => other,
    }
}

fn display_timestamp(raw: &str) -> String {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map(|timestamp| timestamp.format(DISPLAY_TIMESTAMP_FORMAT).to_string())
        .unwrap_or_else(|_| raw.to_string())
}
