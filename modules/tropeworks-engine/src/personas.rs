//! Fixed creative viewpoints and the rotation policies used to pick them.

use std::collections::HashMap;
use std::sync::LazyLock;

use rand::Rng;
use serde::{Deserialize, Serialize};

use tropeworks_common::Persona;

fn persona(
    id: &str,
    name: &str,
    perspective: &str,
    vocabulary_bias: &[&str],
    temperature_modifier: f32,
    directive: &str,
) -> Persona {
    Persona {
        id: id.to_string(),
        name: name.to_string(),
        perspective: perspective.to_string(),
        vocabulary_bias: vocabulary_bias.iter().map(|w| w.to_string()).collect(),
        temperature_modifier,
        directive: directive.to_string(),
    }
}

pub static PERSONAS: LazyLock<Vec<Persona>> = LazyLock::new(|| {
    vec![
        persona(
            "maverick",
            "Maverick Creative",
            "Category disruption and shock value",
            &["unexpected", "provocative", "disruptive", "radical"],
            0.3,
            "You are a rebellious creative director who treats every category rule as \
             something to break. Look for concepts that unsettle people before they \
             persuade them. Your ideas should feel risky and without precedent.",
        ),
        persona(
            "anthropologist",
            "Cultural Anthropologist",
            "Deep human insights and behavioral patterns",
            &["ritual", "identity", "belonging", "transformation"],
            0.1,
            "You study people the way a field researcher does. Treat advertising as an \
             artifact that exposes how a society lives. Ground every concept in a basic \
             human need such as belonging, identity, change or meaning.",
        ),
        persona(
            "poet",
            "Visual Poet",
            "Metaphorical imagery and sensory language",
            &["luminous", "whisper", "cascade", "dissolve"],
            0.2,
            "You think in images first and sentences second. Every concept should be a \
             sensory experience before it is a message, and beauty is how the meaning \
             arrives.",
        ),
        persona(
            "provocateur",
            "Strategic Provocateur",
            "Business logic with creative tension",
            &["paradox", "tension", "counterintuitive", "leverage"],
            0.15,
            "You hunt for the friction between what the business needs and what the \
             audience expects. Build concepts around a paradox that resolves into a sharp \
             position for the brand.",
        ),
        persona(
            "empath",
            "Empathy Engineer",
            "Emotional resonance and human connection",
            &["intimate", "vulnerable", "authentic", "tender"],
            0.05,
            "You design emotional moments rather than sales pitches. A concept works when \
             the person on the other side feels seen and understood.",
        ),
    ]
});

pub fn personas() -> &'static [Persona] {
    &PERSONAS
}

pub fn persona_by_id(id: &str) -> Option<&'static Persona> {
    PERSONAS.iter().find(|p| p.id == id)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonaRotation {
    /// Round-robin by index.
    Sequential,
    /// Uniform random.
    Random,
    /// Inverse to each persona's share of prior draws.
    #[default]
    Weighted,
}

/// Draw history consulted by weighted rotation.
#[derive(Debug, Clone, Default)]
pub struct PersonaUsage {
    counts: HashMap<String, usize>,
    last: Option<String>,
}

impl PersonaUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, persona: &Persona) {
        *self.counts.entry(persona.id.clone()).or_insert(0) += 1;
        self.last = Some(persona.id.clone());
    }

    pub fn count(&self, persona_id: &str) -> usize {
        self.counts.get(persona_id).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn counts(&self) -> &HashMap<String, usize> {
        &self.counts
    }
}

/// Pick a persona for draw `index`.
///
/// Weighted rotation gives each persona weight `1 - count/total` and never
/// repeats the immediately preceding persona, so no persona can monopolize a
/// run or be starved by one.
pub fn select_persona<R: Rng + ?Sized>(
    index: usize,
    rotation: PersonaRotation,
    usage: &PersonaUsage,
    rng: &mut R,
) -> &'static Persona {
    let all = personas();
    match rotation {
        PersonaRotation::Sequential => &all[index % all.len()],
        PersonaRotation::Random => &all[rng.random_range(0..all.len())],
        PersonaRotation::Weighted => {
            let total = usage.total().max(1) as f32;
            let weights: Vec<f32> = all
                .iter()
                .map(|p| {
                    if all.len() > 1 && usage.last.as_deref() == Some(p.id.as_str()) {
                        0.0
                    } else {
                        1.0 - usage.count(&p.id) as f32 / total
                    }
                })
                .collect();

            let total_weight: f32 = weights.iter().sum();
            if total_weight <= 0.0 {
                return &all[index % all.len()];
            }

            let mut remaining = rng.random_range(0.0..total_weight);
            for (persona, weight) in all.iter().zip(&weights) {
                if *weight <= 0.0 {
                    continue;
                }
                if remaining < *weight {
                    return persona;
                }
                remaining -= weight;
            }
            // Float drift: fall back to the last eligible persona.
            all.iter()
                .zip(&weights)
                .rev()
                .find(|(_, w)| **w > 0.0)
                .map(|(p, _)| p)
                .unwrap_or(&all[index % all.len()])
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn registry_has_five_distinct_personas() {
        let ids: Vec<&str> = personas().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["maverick", "anthropologist", "poet", "provocateur", "empath"]);
        assert_eq!(persona_by_id("poet").unwrap().temperature_modifier, 0.2);
        assert!(persona_by_id("accountant").is_none());
    }

    #[test]
    fn sequential_rotation_is_round_robin() {
        let mut rng = StdRng::seed_from_u64(1);
        let usage = PersonaUsage::new();
        let picks: Vec<&str> = (0..7)
            .map(|i| select_persona(i, PersonaRotation::Sequential, &usage, &mut rng).id.as_str())
            .collect();
        assert_eq!(
            picks,
            ["maverick", "anthropologist", "poet", "provocateur", "empath", "maverick", "anthropologist"]
        );
    }

    #[test]
    fn weighted_rotation_converges_to_uniform() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut usage = PersonaUsage::new();
        let draws = 2000;

        for i in 0..draws {
            let persona = select_persona(i, PersonaRotation::Weighted, &usage, &mut rng);
            usage.record(persona);
        }

        let expected = draws as f32 / personas().len() as f32;
        for persona in personas() {
            let observed = usage.count(&persona.id) as f32;
            assert!(
                (observed - expected).abs() / expected < 0.15,
                "{} drawn {observed} times, expected about {expected}",
                persona.id
            );
        }
    }

    #[test]
    fn weighted_rotation_never_repeats_immediately() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut usage = PersonaUsage::new();
        let mut previous: Option<String> = None;

        for i in 0..500 {
            let persona = select_persona(i, PersonaRotation::Weighted, &usage, &mut rng);
            assert_ne!(previous.as_deref(), Some(persona.id.as_str()));
            previous = Some(persona.id.clone());
            usage.record(persona);
        }
    }

    #[test]
    fn random_rotation_stays_in_registry() {
        let mut rng = StdRng::seed_from_u64(3);
        let usage = PersonaUsage::new();
        for i in 0..50 {
            let persona = select_persona(i, PersonaRotation::Random, &usage, &mut rng);
            assert!(persona_by_id(&persona.id).is_some());
        }
    }
}
