//! Free-text to [`PlantRecord`] extraction.
//!
//! The model answers in loosely labeled sections. Each field is an independent
//! first-match scan over the non-blank lines, so section order does not matter
//! and a missing or garbled section only costs that one field.

use crate::models::{CareInstructions, PlantRecord};

pub const DEFAULT_NAME: &str = "Plant Species";
pub const DEFAULT_SCIENTIFIC_NAME: &str = "Unidentified";
pub const DEFAULT_DESCRIPTION: &str = "Detailed botanical insights unavailable";
pub const DEFAULT_ORIGIN: &str = "Global Distribution";
pub const DEFAULT_HEIGHT: &str = "Varies";
pub const DEFAULT_SUNLIGHT: &str = "Adaptable Lighting";
pub const DEFAULT_WATER: &str = "Moderate Hydration";
pub const DEFAULT_CARE: &str = "Basic plant care guidance";

/// Parse a model answer. Never fails; absent sections fall back to defaults.
pub fn parse_plant_info(text: &str) -> PlantRecord {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    PlantRecord {
        name: labeled(&lines, "Common Name:", DEFAULT_NAME),
        scientific_name: labeled(&lines, "Scientific Name:", DEFAULT_SCIENTIFIC_NAME),
        description: labeled(&lines, "Description:", DEFAULT_DESCRIPTION),
        origin: labeled(&lines, "Origin:", DEFAULT_ORIGIN),
        height: labeled(&lines, "Height:", DEFAULT_HEIGHT),
        sunlight: labeled(&lines, "Sunlight:", DEFAULT_SUNLIGHT),
        water: labeled(&lines, "Watering:", DEFAULT_WATER),
        care: CareInstructions {
            instruction1: ordinal(&lines, "1.").unwrap_or_else(|| DEFAULT_CARE.to_string()),
            instruction2: ordinal(&lines, "2.").unwrap_or_default(),
            instruction3: ordinal(&lines, "3.").unwrap_or_default(),
        },
    }
}

/// First line containing `label`, with the label removed and whitespace trimmed.
/// A line that is nothing but the label yields the default.
fn labeled(lines: &[&str], label: &str, default: &str) -> String {
    lines
        .iter()
        .find(|l| l.contains(label))
        .map(|l| l.replacen(label, "", 1).trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// First line starting with the ordinal marker, kept whole.
fn ordinal(lines: &[&str], marker: &str) -> Option<String> {
    lines.iter().find(|l| l.starts_with(marker)).map(|l| l.to_string())
}
