//! Cheap lexical scoring of generated variants. No model calls.

use std::collections::HashSet;

use tropeworks_common::{ConceptVariant, VariantScores};

use crate::tropes::score_trope_alignment;

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Distinct words over total words; 0 for empty text.
pub fn lexical_uniqueness(text: &str) -> f32 {
    let all = words(text);
    if all.is_empty() {
        return 0.0;
    }
    let unique: HashSet<&String> = all.iter().collect();
    unique.len() as f32 / all.len() as f32
}

/// Share of a variant's vocabulary that no other variant in the batch uses.
/// A lone variant is fully distinct.
pub fn batch_distinctiveness(text: &str, others: &[String]) -> f32 {
    let own: HashSet<String> = words(text).into_iter().collect();
    if own.is_empty() {
        return 0.0;
    }
    if others.is_empty() {
        return 1.0;
    }
    let shared: HashSet<String> = others.iter().flat_map(|o| words(o)).collect();
    own.iter().filter(|w| !shared.contains(*w)).count() as f32 / own.len() as f32
}

/// Length heuristics: a headline of 2 to 12 words and a visual description
/// of 8 to 120 words read as a coherent concept.
pub fn structural_coherence(headline: &str, visual: &str) -> f32 {
    let headline_words = headline.split_whitespace().count();
    let visual_words = visual.split_whitespace().count();
    let headline_score = match headline_words {
        2..=12 => 1.0,
        0 => 0.0,
        _ => 0.5,
    };
    let visual_score = match visual_words {
        8..=120 => 1.0,
        0 => 0.0,
        1..=7 => 0.4,
        _ => 0.7,
    };
    (headline_score + visual_score) / 2.0
}

/// Score one variant against the rest of its batch.
pub fn score_variant(variant: &ConceptVariant, others: &[String]) -> VariantScores {
    let text = variant.combined_text();
    VariantScores {
        originality: lexical_uniqueness(&text),
        trope_alignment: score_trope_alignment(&text, std::slice::from_ref(&variant.rhetorical_device)),
        coherence: structural_coherence(variant.headline(), &variant.visual_description),
        distinctiveness: batch_distinctiveness(&text, others),
        overall: 0.0,
    }
    .with_overall()
}

/// Score a batch in place.
pub fn score_batch(variants: &mut [ConceptVariant]) {
    let texts: Vec<String> = variants.iter().map(ConceptVariant::combined_text).collect();
    for (i, variant) in variants.iter_mut().enumerate() {
        let others: Vec<String> = texts
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, t)| t.clone())
            .collect();
        variant.scores = score_variant(variant, &others);
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn variant(headline: &str, visual: &str, device: &str) -> ConceptVariant {
        ConceptVariant {
            id: Uuid::new_v4(),
            variant_index: 0,
            visual_description: visual.to_string(),
            headlines: vec![headline.to_string()],
            tagline: None,
            body_copy: None,
            rhetorical_device: device.to_string(),
            device_definition: String::new(),
            rhetorical_analysis: None,
            strategic_impact: None,
            scores: VariantScores::default(),
            evolution_path: None,
            seed_origin: None,
        }
    }

    #[test]
    fn uniqueness_ratio() {
        assert_eq!(lexical_uniqueness(""), 0.0);
        assert_eq!(lexical_uniqueness("walk walk walk walk"), 0.25);
        assert_eq!(lexical_uniqueness("Walk lighter, go further"), 1.0);
    }

    #[test]
    fn distinctiveness_against_batch() {
        let others = vec!["walk lighter".to_string()];
        assert_eq!(batch_distinctiveness("walk further", &others), 0.5);
        assert_eq!(batch_distinctiveness("walk further", &[]), 1.0);
        assert_eq!(batch_distinctiveness("", &others), 0.0);
    }

    #[test]
    fn coherence_rewards_sensible_lengths() {
        let visual = "A runner crosses a salt flat at dawn leaving seedlings behind";
        assert_eq!(structural_coherence("Walk Lighter", visual), 1.0);
        assert!((structural_coherence("Walk", "A shoe.") - 0.45).abs() < 1e-6);
        assert_eq!(structural_coherence("", ""), 0.0);
    }

    #[test]
    fn batch_scores_stay_in_range() {
        let mut batch = vec![
            variant("Silent yet loud", "A quiet shoe shouting from a billboard in an empty field", "oxymoron"),
            variant("Walk Lighter", "A runner crosses a salt flat at dawn leaving seedlings behind", "metaphor"),
            variant("x", "", "tmesis"),
        ];
        score_batch(&mut batch);
        for v in &batch {
            for score in [
                v.scores.originality,
                v.scores.trope_alignment,
                v.scores.coherence,
                v.scores.distinctiveness,
                v.scores.overall,
            ] {
                assert!((0.0..=1.0).contains(&score));
            }
        }
        assert!(batch[1].scores.overall > batch[2].scores.overall);
    }
}
