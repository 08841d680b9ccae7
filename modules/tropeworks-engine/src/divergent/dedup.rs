//! Pool deduplication: embedding collisions, persona saturation and
//! theme-cluster overlap.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use tropeworks_common::{cosine_similarity, CreativeSeed};

/// Seeds more similar than this are treated as duplicates.
pub const SIMILARITY_THRESHOLD: f32 = 0.92;
pub const MAX_SEEDS_PER_PERSONA: usize = 3;
/// Below this many survivors the pool is topped up with relaxed rules.
pub const MIN_POOL_SIZE: usize = 5;
/// Theme overlap is only enforced once this many seeds are accepted.
const THEME_CHECK_AFTER: usize = 2;

/// Keyword clusters for imagery that tends to dominate a pool. A word may
/// sit in more than one cluster ("trial" is both legal and medical).
const THEME_CLUSTERS: &[(&str, &[&str])] = &[
    ("legal", &["court", "courtroom", "trial", "judge", "jury", "verdict", "lawyer", "law", "testimony", "witness"]),
    ("medical", &["doctor", "hospital", "surgery", "diagnosis", "patient", "prescription", "trial", "pulse", "heartbeat"]),
    ("culinary", &["recipe", "chef", "kitchen", "cook", "cooking", "flavor", "taste", "menu", "ingredient"]),
    ("sports", &["race", "marathon", "finish", "athlete", "stadium", "coach", "trophy", "sprint"]),
    ("military", &["battle", "army", "soldier", "war", "weapon", "march", "battlefield"]),
    ("space", &["planet", "orbit", "galaxy", "star", "stars", "astronaut", "cosmos", "moon"]),
    ("ocean", &["ocean", "sea", "wave", "waves", "tide", "shore", "underwater"]),
    ("nature", &["forest", "tree", "trees", "seed", "bloom", "roots", "moss", "garden"]),
    ("urban", &["city", "street", "subway", "skyline", "traffic", "concrete"]),
    ("religious", &["church", "prayer", "ritual", "altar", "sacred", "pilgrim"]),
];

/// Theme-cluster tags present in `idea`, matched on whole words.
pub fn theme_tags(idea: &str) -> BTreeSet<&'static str> {
    let words: HashSet<String> = idea
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    THEME_CLUSTERS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| words.contains(*k)))
        .map(|(tag, _)| *tag)
        .collect()
}

/// Accept seeds in order, rejecting any that
/// - embeds within [`SIMILARITY_THRESHOLD`] of an accepted seed,
/// - comes from a persona already used [`MAX_SEEDS_PER_PERSONA`] times,
/// - shares a theme tag with the accepted set once two seeds are in.
///
/// Seeds without embeddings never collide. When fewer than
/// [`MIN_POOL_SIZE`] survive, rejected seeds are added back in order as long
/// as their idea text is new.
pub fn deduplicate_seeds(seeds: Vec<CreativeSeed>) -> Vec<CreativeSeed> {
    let mut accepted: Vec<CreativeSeed> = Vec::new();
    let mut rejected: Vec<CreativeSeed> = Vec::new();
    let mut persona_counts: HashMap<String, usize> = HashMap::new();
    let mut represented: BTreeSet<&'static str> = BTreeSet::new();

    for seed in seeds {
        let collides = seed.embedding.as_deref().is_some_and(|e| {
            accepted.iter().any(|a| {
                a.embedding
                    .as_deref()
                    .is_some_and(|other| cosine_similarity(e, other) > SIMILARITY_THRESHOLD)
            })
        });
        let persona_full =
            persona_counts.get(&seed.persona_id).copied().unwrap_or(0) >= MAX_SEEDS_PER_PERSONA;
        let tags = theme_tags(&seed.idea);
        let theme_overlap =
            accepted.len() >= THEME_CHECK_AFTER && tags.iter().any(|t| represented.contains(t));

        if collides || persona_full || theme_overlap {
            debug!(
                persona = %seed.persona_id,
                collides,
                persona_full,
                theme_overlap,
                "Seed rejected during dedup"
            );
            rejected.push(seed);
            continue;
        }

        *persona_counts.entry(seed.persona_id.clone()).or_insert(0) += 1;
        represented.extend(tags);
        accepted.push(seed);
    }

    if accepted.len() < MIN_POOL_SIZE && !rejected.is_empty() {
        let mut seen: HashSet<String> = accepted.iter().map(|s| idea_key(&s.idea)).collect();
        for seed in rejected {
            if accepted.len() >= MIN_POOL_SIZE {
                break;
            }
            if seen.insert(idea_key(&seed.idea)) {
                accepted.push(seed);
            }
        }
    }

    accepted
}

fn idea_key(idea: &str) -> String {
    idea.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    fn seed(idea: &str, persona: &str) -> CreativeSeed {
        CreativeSeed {
            id: Uuid::new_v4(),
            idea: idea.to_string(),
            persona_id: persona.to_string(),
            distinctiveness: 0.6,
            coherence: 0.7,
            compatible_devices: vec!["zeugma".into()],
            embedding: None,
            created_at: Utc::now(),
        }
    }

    fn ideas(seeds: &[CreativeSeed]) -> Vec<&str> {
        seeds.iter().map(|s| s.idea.as_str()).collect()
    }

    #[test]
    fn tags_match_whole_words() {
        assert_eq!(
            theme_tags("The court hears a trial of sneakers"),
            BTreeSet::from(["legal", "medical"])
        );
        assert!(theme_tags("courteous trials").is_empty());
    }

    #[test]
    fn theme_overlap_rejects_later_seed() {
        let pool = vec![
            seed("Shoes that forget the road", "maverick"),
            seed("A court puts the trial of fast fashion on record", "poet"),
            seed("Soles carved from driftwood", "empath"),
            seed("Every court trial ends in a barefoot verdict", "anthropologist"),
            seed("Laces as a tightrope", "provocateur"),
            seed("The quiet arithmetic of recycled rubber", "maverick"),
            seed("A sneaker that apologizes", "poet"),
        ];
        let unique = deduplicate_seeds(pool);
        assert!(!ideas(&unique).contains(&"Every court trial ends in a barefoot verdict"));
        assert_eq!(unique.len(), 6);
    }

    #[test]
    fn theme_overlap_ignored_before_two_accepted() {
        let pool = vec![
            seed("A court of sneakers", "maverick"),
            seed("The jury wears sneakers", "poet"),
        ];
        assert_eq!(deduplicate_seeds(pool).len(), 2);
    }

    #[test]
    fn persona_cap_limits_each_persona() {
        let pool: Vec<CreativeSeed> = (0..8)
            .map(|i| seed(&format!("idea number {i}"), if i < 4 { "maverick" } else { "poet" }))
            .collect();
        let unique = deduplicate_seeds(pool);
        let mavericks = unique.iter().filter(|s| s.persona_id == "maverick").count();
        let poets = unique.iter().filter(|s| s.persona_id == "poet").count();
        assert_eq!((mavericks, poets), (3, 3));
    }

    #[test]
    fn tops_up_with_distinct_text_when_too_few_survive() {
        let pool = vec![
            seed("one", "maverick"),
            seed("two", "maverick"),
            seed("three", "maverick"),
            seed("four", "maverick"),
            seed("FOUR", "maverick"),
            seed("five", "maverick"),
        ];
        let unique = deduplicate_seeds(pool);
        assert_eq!(ideas(&unique), vec!["one", "two", "three", "four", "five"]);
    }

    #[test]
    fn embedding_collisions_are_rejected() {
        let mut a = seed("alpha idea", "maverick");
        a.embedding = Some(vec![1.0, 0.0]);
        let mut b = seed("beta idea", "poet");
        b.embedding = Some(vec![0.99, 0.01]);
        let mut c = seed("gamma idea", "empath");
        c.embedding = Some(vec![0.0, 1.0]);
        let d = seed("delta idea", "provocateur");
        let e = seed("epsilon idea", "anthropologist");
        let f = seed("zeta idea", "anthropologist");
        let unique = deduplicate_seeds(vec![a, b, c, d, e, f]);
        assert_eq!(
            ideas(&unique),
            vec!["alpha idea", "gamma idea", "delta idea", "epsilon idea", "zeta idea"]
        );
    }
}
