//! Model-free checks against the structural pattern table.

use serde::Serialize;

use crate::devices::{display_name, normalize_device_id, pattern_for, DeviceCorpus, TropeDetails};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatternMatch {
    pub matched: bool,
    /// Source of every structural pattern that matched.
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VocabularyAlignment {
    pub score: f32,
    pub matched_words: Vec<String>,
}

/// Structural match for a patterned device. Corpus-only devices never match.
pub fn validate_trope_pattern(content: &str, device_id: &str) -> PatternMatch {
    let Some(pattern) = pattern_for(&normalize_device_id(device_id)) else {
        return PatternMatch::default();
    };
    let patterns: Vec<String> = pattern
        .patterns
        .iter()
        .filter(|p| p.is_match(content))
        .map(|p| p.source().into_owned())
        .collect();
    PatternMatch {
        matched: !patterns.is_empty(),
        patterns,
    }
}

/// Share of the device's indicator words present in `content` (substring match).
pub fn check_vocabulary_alignment(content: &str, device_id: &str) -> VocabularyAlignment {
    let Some(pattern) = pattern_for(&normalize_device_id(device_id)) else {
        return VocabularyAlignment::default();
    };
    if pattern.vocabulary.is_empty() {
        return VocabularyAlignment::default();
    }
    let lower = content.to_lowercase();
    let matched_words: Vec<String> = pattern
        .vocabulary
        .iter()
        .filter(|w| lower.contains(&w.to_lowercase()))
        .map(|w| w.to_string())
        .collect();
    VocabularyAlignment {
        score: matched_words.len() as f32 / pattern.vocabulary.len() as f32,
        matched_words,
    }
}

pub fn trope_details<'a>(corpus: &'a DeviceCorpus, device_id: &str) -> Option<TropeDetails<'a>> {
    corpus.details(device_id)
}

/// Instruction block listing the devices a response must use. Unknown ids
/// still appear by display name. Empty input yields an empty string.
pub fn generate_trope_constraint_prompt(corpus: &DeviceCorpus, device_ids: &[String]) -> String {
    let constraints: Vec<String> = device_ids
        .iter()
        .map(|id| match corpus.details(id) {
            Some(details) => {
                let example = details
                    .examples
                    .first()
                    .map(|e| format!("\n  Example: \"{e}\""))
                    .unwrap_or_default();
                format!("- {}: {}{example}", details.name, details.description)
            }
            None => format!("- {}", display_name(&normalize_device_id(id))),
        })
        .collect();

    if constraints.is_empty() {
        return String::new();
    }

    format!(
        "Your response MUST incorporate these rhetorical devices:\n\n{}\n\n\
         Ensure the rhetorical structure is clear and effective.",
        constraints.join("\n\n")
    )
}

/// Mean over devices of `0.7 * structural match + 0.3 * vocabulary score`.
/// Always in [0, 1]; an empty device list scores 0.
pub fn score_trope_alignment(content: &str, device_ids: &[String]) -> f32 {
    if device_ids.is_empty() {
        return 0.0;
    }
    let total: f32 = device_ids
        .iter()
        .map(|id| {
            let structural = if validate_trope_pattern(content, id).matched { 0.7 } else { 0.0 };
            structural + check_vocabulary_alignment(content, id).score * 0.3
        })
        .sum();
    (total / device_ids.len() as f32).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_device_list_scores_zero() {
        assert_eq!(score_trope_alignment("anything at all", &[]), 0.0);
    }

    #[test]
    fn alignment_stays_in_unit_range() {
        let texts = [
            "",
            "Never, never, never give up. Always forever, infinite and endless.",
            "One should eat to live, not live to eat, but first and last.",
            "plain words",
        ];
        let devices = ids(&["hyperbole", "chiasmus", "tmesis", "antithesis", "epizeuxis"]);
        for text in texts {
            let score = score_trope_alignment(text, &devices);
            assert!((0.0..=1.0).contains(&score), "{score} out of range for {text:?}");
        }
    }

    #[test]
    fn structural_match_dominates_score() {
        let score = score_trope_alignment("Less is more.", &ids(&["paradox"]));
        assert!(score >= 0.7);
        assert!(score_trope_alignment("a red shoe", &ids(&["paradox"])) < 0.3);
    }

    #[test]
    fn corpus_only_devices_have_no_patterns() {
        assert!(!validate_trope_pattern("anything", "tmesis").matched);
        assert_eq!(check_vocabulary_alignment("anything", "tmesis").score, 0.0);
    }

    #[test]
    fn vocabulary_alignment_counts_indicators() {
        let alignment = check_vocabulary_alignment("Built tough but gentle, yet light", "antithesis");
        assert!(alignment.matched_words.contains(&"but".to_string()));
        assert!(alignment.matched_words.contains(&"yet".to_string()));
        assert!(alignment.score > 0.0);
    }

    #[test]
    fn constraint_prompt_lists_devices() {
        let corpus = DeviceCorpus::bundled();
        let prompt = generate_trope_constraint_prompt(&corpus, &ids(&["chiasmus", "made_up_device"]));
        assert!(prompt.starts_with("Your response MUST incorporate these rhetorical devices:"));
        assert!(prompt.contains("- Chiasmus: "));
        assert!(prompt.contains("Example: \"One should eat to live, not live to eat\""));
        assert!(prompt.contains("- Made Up Device"));
        assert!(prompt.ends_with("Ensure the rhetorical structure is clear and effective."));

        assert_eq!(generate_trope_constraint_prompt(&corpus, &[]), "");
    }
}
