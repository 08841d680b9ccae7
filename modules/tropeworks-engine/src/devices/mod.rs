//! The rhetorical device corpus: definitions loaded once per process, plus
//! the hand-authored structural patterns for a subset of devices.

pub mod patterns;
pub mod variety;

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub use patterns::{pattern_for, StructuralPattern, TropePattern, TROPE_PATTERNS};
pub use variety::{
    exploration_stats, select_varied_tropes, ExplorationStats, SelectionReason, Tone,
    TropeSelection, VarietyOptions, VarietySelector, OVERUSED_DEVICES,
};

const BUNDLED_CORPUS: &str = include_str!("../../data/rhetorical_figures.json");

/// Lowercase, trim and join whitespace runs with underscores.
pub fn normalize_device_id(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("_")
}

/// "rhetorical_question" -> "Rhetorical Question".
pub fn display_name(device_id: &str) -> String {
    device_id
        .split(|c: char| c == '_' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// One row of the corpus file.
#[derive(Debug, Clone, Deserialize)]
pub struct CorpusEntry {
    pub figure_name: String,
    pub definition: String,
    #[serde(default)]
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceDefinition {
    pub id: String,
    pub name: String,
    pub definition: String,
    pub examples: Vec<String>,
}

impl DeviceDefinition {
    pub fn pattern(&self) -> Option<&'static TropePattern> {
        pattern_for(&self.id)
    }
}

/// Name, definition and structural checks for one device, merged from the
/// pattern table and the corpus.
#[derive(Debug, Clone, Copy)]
pub struct TropeDetails<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub description: &'a str,
    pub examples: &'a [&'static str],
    pub pattern: Option<&'static TropePattern>,
    pub minimum_confidence: f32,
}

#[derive(Debug, Clone)]
pub struct DeviceCorpus {
    devices: BTreeMap<String, DeviceDefinition>,
}

impl DeviceCorpus {
    /// Corpus entries plus every patterned device (corpus definitions win).
    pub fn from_entries(entries: impl IntoIterator<Item = CorpusEntry>) -> Self {
        let mut devices: BTreeMap<String, DeviceDefinition> = entries
            .into_iter()
            .filter(|e| !e.figure_name.trim().is_empty())
            .map(|e| {
                let id = normalize_device_id(&e.figure_name);
                let device = DeviceDefinition {
                    name: display_name(&id),
                    id: id.clone(),
                    definition: e.definition,
                    examples: e.examples,
                };
                (id, device)
            })
            .collect();

        for pattern in TROPE_PATTERNS.values() {
            devices
                .entry(pattern.id.to_string())
                .or_insert_with(|| DeviceDefinition {
                    id: pattern.id.to_string(),
                    name: pattern.name.to_string(),
                    definition: pattern.description.to_string(),
                    examples: pattern.examples.iter().map(|e| e.to_string()).collect(),
                });
        }

        Self { devices }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let entries: Vec<CorpusEntry> = serde_json::from_str(raw)?;
        Ok(Self::from_entries(entries))
    }

    /// The corpus shipped with the crate.
    pub fn bundled() -> Self {
        match Self::from_json(BUNDLED_CORPUS) {
            Ok(corpus) => corpus,
            Err(e) => {
                warn!(error = %e, "Bundled device corpus is unreadable, using fallback set");
                Self::fallback()
            }
        }
    }

    /// Load from a configured path. Missing or unreadable files fall back to
    /// a minimal built-in set; this never fails.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::bundled();
        };
        let corpus = std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|raw| Self::from_json(&raw));
        match corpus {
            Ok(corpus) => {
                info!(path = %path.display(), devices = corpus.len(), "Loaded device corpus");
                corpus
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Device corpus unavailable, using fallback set");
                Self::fallback()
            }
        }
    }

    /// Six-entry fallback used when no corpus file can be read.
    pub fn fallback() -> Self {
        let entry = |name: &str, definition: &str| CorpusEntry {
            figure_name: name.to_string(),
            definition: definition.to_string(),
            examples: Vec::new(),
        };
        Self::from_entries([
            entry("Antithesis", "Juxtaposition of contrasting ideas in balanced phrases."),
            entry("Chiasmus", "Reversal of grammatical structures in successive phrases."),
            entry("Zeugma", "One word governs two others in different senses."),
            entry("Anaphora", "Repetition of a word or phrase at the beginning of successive clauses."),
            entry("Litotes", "Understatement by denying the opposite."),
            entry("Synecdoche", "A part standing for the whole, or the whole for a part."),
        ])
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.devices.contains_key(&normalize_device_id(device_id))
    }

    pub fn get(&self, device_id: &str) -> Option<&DeviceDefinition> {
        self.devices.get(&normalize_device_id(device_id))
    }

    pub fn definition(&self, device_id: &str) -> Option<&str> {
        self.get(device_id).map(|d| d.definition.as_str())
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceDefinition> {
        self.devices.values()
    }

    /// Pattern-table details take precedence over corpus-only entries.
    pub fn details(&self, device_id: &str) -> Option<TropeDetails<'_>> {
        let id = normalize_device_id(device_id);
        if let Some(pattern) = pattern_for(&id) {
            return Some(TropeDetails {
                id: pattern.id,
                name: pattern.name,
                description: pattern.description,
                examples: pattern.examples,
                pattern: Some(pattern),
                minimum_confidence: pattern.minimum_confidence,
            });
        }
        self.devices.get(&id).map(|d| TropeDetails {
            id: &d.id,
            name: &d.name,
            description: &d.definition,
            examples: &[],
            pattern: None,
            minimum_confidence: 0.5,
        })
    }
}

impl Default for DeviceCorpus {
    fn default() -> Self {
        Self::bundled()
    }
}
