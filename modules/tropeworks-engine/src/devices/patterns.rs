//! Hand-authored structural patterns for the devices that can be checked
//! without a model. Everything else in the corpus is validated by the model.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

/// A single structural check against content.
#[derive(Debug)]
pub enum StructuralPattern {
    Regex(Regex),
    Sequence(SequenceMatcher),
}

/// Word-sequence checks for repetition figures. The `regex` crate has no
/// back-references, so these are matched over tokenized clauses instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceMatcher {
    /// A B ... B A, the mirrored pair separated from the first.
    Chiasmus,
    /// "the X of Y ... the Y of X".
    ReversedGenitive,
    /// Two clauses open with the same two words.
    Anaphora,
    /// Consecutive clauses end on the same word.
    Epistrophe,
    /// A clause ends on the word the next one begins with.
    Anadiplosis,
    /// The same word twice in immediate succession.
    Epizeuxis,
    /// Three consecutive words sharing an initial letter.
    Alliteration,
    /// A sentence begins and ends with the same word.
    Epanalepsis,
}

impl StructuralPattern {
    pub fn is_match(&self, content: &str) -> bool {
        match self {
            StructuralPattern::Regex(re) => re.is_match(content),
            StructuralPattern::Sequence(matcher) => matcher.is_match(content),
        }
    }

    /// Human-readable form, reported as match evidence.
    pub fn source(&self) -> Cow<'_, str> {
        match self {
            StructuralPattern::Regex(re) => Cow::Borrowed(re.as_str()),
            StructuralPattern::Sequence(matcher) => Cow::Owned(format!("<{matcher:?}>")),
        }
    }

    /// Literal keywords (three letters or more) appearing in a regex pattern.
    pub fn keywords(&self) -> Vec<String> {
        let StructuralPattern::Regex(re) = self else {
            return Vec::new();
        };
        let unescaped = RE_ESCAPE.replace_all(re.as_str(), " ");
        RE_KEYWORD
            .find_iter(&unescaped)
            .map(|m| m.as_str().to_lowercase())
            .collect()
    }
}

static RE_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\[A-Za-z]|\(\?[a-z]+\)").expect("valid escape regex"));
static RE_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Za-z]{3,}\b").expect("valid keyword regex"));
static RE_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9']+").expect("valid word regex"));

const FUNCTION_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "of", "to", "in", "on", "is", "it", "be", "for", "at", "as",
    "by", "with", "that", "this",
];

fn is_function_word(word: &str) -> bool {
    FUNCTION_WORDS.contains(&word)
}

fn words(text: &str) -> Vec<String> {
    RE_WORD
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

fn split_words(content: &str, delimiters: &[char]) -> Vec<Vec<String>> {
    content
        .split(|c: char| delimiters.contains(&c))
        .map(words)
        .filter(|w| !w.is_empty())
        .collect()
}

const CLAUSE_DELIMITERS: &[char] = &[',', ';', ':', '.', '!', '?', '\n'];
const SENTENCE_DELIMITERS: &[char] = &['.', '!', '?', '\n'];

impl SequenceMatcher {
    pub fn is_match(self, content: &str) -> bool {
        match self {
            SequenceMatcher::Chiasmus => chiasmus(content),
            SequenceMatcher::ReversedGenitive => reversed_genitive(content),
            SequenceMatcher::Anaphora => {
                let mut seen = HashSet::new();
                split_words(content, CLAUSE_DELIMITERS)
                    .into_iter()
                    .filter(|c| c.len() >= 2)
                    .any(|c| !seen.insert((c[0].clone(), c[1].clone())))
            }
            SequenceMatcher::Epistrophe => {
                let clauses = split_words(content, CLAUSE_DELIMITERS);
                clauses.windows(2).any(|pair| {
                    pair[0].len() >= 2
                        && pair[1].len() >= 2
                        && pair[0].last() == pair[1].last()
                })
            }
            SequenceMatcher::Anadiplosis => {
                let clauses = split_words(content, CLAUSE_DELIMITERS);
                clauses.windows(2).any(|pair| match (pair[0].last(), pair[1].first()) {
                    (Some(end), Some(start)) => end == start && !is_function_word(end),
                    _ => false,
                })
            }
            SequenceMatcher::Epizeuxis => words(content)
                .windows(2)
                .any(|w| w[0] == w[1] && w[0].len() >= 3),
            SequenceMatcher::Alliteration => words(content)
                .into_iter()
                .filter(|w| !is_function_word(w))
                .collect::<Vec<_>>()
                .windows(3)
                .any(|w| {
                    let initial = w[0].chars().next();
                    initial.is_some_and(|c| c.is_alphabetic())
                        && w.iter().all(|x| x.chars().next() == initial)
                }),
            SequenceMatcher::Epanalepsis => split_words(content, SENTENCE_DELIMITERS)
                .iter()
                .any(|s| s.len() >= 3 && s.first() == s.last() && !is_function_word(&s[0])),
        }
    }
}

fn chiasmus(content: &str) -> bool {
    let ws = words(content);
    for i in 0..ws.len() {
        let a = &ws[i];
        if is_function_word(a) {
            continue;
        }
        for j in (i + 1)..ws.len().min(i + 3) {
            let b = &ws[j];
            if b == a || is_function_word(b) {
                continue;
            }
            // the mirrored pair must start at least one word after the first pair ends
            for k in (j + 2)..ws.len() {
                if &ws[k] != b {
                    continue;
                }
                if ((k + 1)..ws.len().min(k + 3)).any(|l| &ws[l] == a) {
                    return true;
                }
            }
        }
    }
    false
}

fn reversed_genitive(content: &str) -> bool {
    let ws = words(content);
    let genitives: Vec<(&str, &str, usize)> = ws
        .windows(4)
        .enumerate()
        .filter(|(_, w)| w[0] == "the" && w[2] == "of")
        .map(|(i, w)| (w[1].as_str(), w[3].as_str(), i))
        .collect();
    genitives.iter().any(|(x, y, i)| {
        x != y
            && genitives
                .iter()
                .any(|(x2, y2, j)| j > i && x2 == y && y2 == x)
    })
}

// =============================================================================
// Pattern table
// =============================================================================

#[derive(Debug)]
pub struct TropePattern {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub patterns: Vec<StructuralPattern>,
    pub vocabulary: &'static [&'static str],
    pub examples: &'static [&'static str],
    pub minimum_confidence: f32,
}

fn re(pattern: &str) -> StructuralPattern {
    StructuralPattern::Regex(
        Regex::new(&format!("(?i){pattern}")).expect("valid device pattern"),
    )
}

fn seq(matcher: SequenceMatcher) -> StructuralPattern {
    StructuralPattern::Sequence(matcher)
}

pub static TROPE_PATTERNS: LazyLock<BTreeMap<&'static str, TropePattern>> = LazyLock::new(|| {
    let table = vec![
        TropePattern {
            id: "antithesis",
            name: "Antithesis",
            description: "Juxtaposition of contrasting ideas in balanced phrases",
            patterns: vec![
                re(r"\b(\w+)\s+(?:but|yet|while|whereas)\s+(\w+)\b"),
                re(r"\bnot\s+(\w+)[,;]\s*but\s+(\w+)\b"),
                re(r"\b(\w+)\s+versus\s+(\w+)\b"),
                re(r"\b(\w+)\s+against\s+(\w+)\b"),
                re(r"\b(\w+)\s+and\s+(\w+)\s+clash"),
            ],
            vocabulary: &["but", "yet", "while", "whereas", "versus", "against", "contrast", "oppose"],
            examples: &[
                "One small step for man, one giant leap for mankind",
                "Speech is silver, but silence is golden",
            ],
            minimum_confidence: 0.6,
        },
        TropePattern {
            id: "paradox",
            name: "Paradox",
            description: "Self-contradictory statement that reveals deeper truth",
            patterns: vec![
                re(r"\b(\w+)\s+(?:is|are|was|were)\s+(?:the\s+)?(?:only|true|real)\s+(\w+)\b"),
                re(r"\bless\s+is\s+more\b"),
                re(r"\bmore\s+is\s+less\b"),
                re(r"\bto\s+(\w+)\s+(?:is\s+)?to\s+(\w+)\b"),
                seq(SequenceMatcher::ReversedGenitive),
            ],
            vocabulary: &["paradox", "contradiction", "impossibly", "yet", "strange", "truth"],
            examples: &["The only constant is change", "Less is more", "I must be cruel to be kind"],
            minimum_confidence: 0.65,
        },
        TropePattern {
            id: "metaphor",
            name: "Metaphor",
            description: "Direct comparison stating one thing is another",
            patterns: vec![
                re(r"\b(\w+)\s+(?:is|are|was|were)\s+(?:a|an|the)\s+(\w+)\b"),
                re(r"\b(\w+)\s+of\s+(\w+)\b"),
                re(r"\bthe\s+(\w+)\s+(\w+ed)\b"),
                re(r"\b(\w+)\s+becomes?\s+(\w+)\b"),
                re(r"\btransforms?\s+into\s+(\w+)\b"),
            ],
            vocabulary: &["is", "becomes", "transforms", "embodies", "represents"],
            examples: &["Time is money", "Life is a journey", "The world is a stage"],
            minimum_confidence: 0.5,
        },
        TropePattern {
            id: "hyperbole",
            name: "Hyperbole",
            description: "Deliberate exaggeration for emphasis",
            patterns: vec![
                re(r"\b(?:never|always|forever|infinite|endless|eternal)\b"),
                re(r"\b(?:million|billion|trillion|thousand)\s+(?:times|years|miles)\b"),
                re(r"\b(?:the\s+)?(?:best|worst|greatest|smallest|biggest)\s+(?:ever|in\s+the\s+world|of\s+all\s+time)\b"),
                re(r"\bso\s+(\w+)\s+(?:that|it)\b"),
                re(r"\b(?:nothing|everything|everyone|no\s+one)\s+(?:can|will|could)\b"),
            ],
            vocabulary: &[
                "never", "always", "forever", "infinite", "endless", "ultimate", "absolute", "every",
                "nothing",
            ],
            examples: &["I have told you a million times", "This bag weighs a ton"],
            minimum_confidence: 0.55,
        },
        TropePattern {
            id: "chiasmus",
            name: "Chiasmus",
            description: "Reversal of grammatical structures in successive phrases (ABBA pattern)",
            patterns: vec![seq(SequenceMatcher::Chiasmus)],
            vocabulary: &["not", "but", "first", "last", "begin", "end", "rise", "fall"],
            examples: &[
                "One should eat to live, not live to eat",
                "Never let a fool kiss you or a kiss fool you",
            ],
            minimum_confidence: 0.7,
        },
        TropePattern {
            id: "oxymoron",
            name: "Oxymoron",
            description: "Combination of contradictory terms",
            patterns: vec![
                re(r"\b(silent|loud)\s+(scream|whisper|noise|sound)\b"),
                re(r"\b(beautiful|ugly)\s+(disaster|mess|chaos)\b"),
                re(r"\b(dark|bright)\s+(light|darkness|shadow)\b"),
                re(r"\b(living|dead)\s+(death|life|corpse)\b"),
                re(r"\b(bitter|sweet)\s+(sweet|bitter|taste)\b"),
                re(r"\b(cruel|kind)\s+(kindness|cruelty)\b"),
            ],
            vocabulary: &["silent scream", "deafening silence", "living dead", "bittersweet", "alone together"],
            examples: &["Deafening silence", "Bittersweet", "Cruel kindness"],
            minimum_confidence: 0.75,
        },
        TropePattern {
            id: "personification",
            name: "Personification",
            description: "Attribution of human qualities to non-human entities",
            patterns: vec![
                re(r"\b(?:the\s+)?(\w+)\s+(?:whispers?|speaks?|breathes?|lives?|dies?|sleeps?|wakes?)\b"),
                re(r"\b(?:the\s+)?(\w+)\s+(?:feels?|thinks?|knows?|wants?|loves?|hates?)\b"),
                re(r"\b(?:the\s+)?(\w+)\s+(?:dances?|sings?|cries?|laughs?|smiles?)\b"),
                re(r"\b(?:the\s+)?(\w+)\s+(?:reaches?|grabs?|embraces?|touches?)\b"),
            ],
            vocabulary: &["whisper", "speaks", "breathes", "lives", "feels", "dances", "cries", "heart"],
            examples: &["The wind whispered secrets", "Time waits for no one"],
            minimum_confidence: 0.6,
        },
        TropePattern {
            id: "juxtaposition",
            name: "Juxtaposition",
            description: "Placing contrasting elements side by side",
            patterns: vec![
                re(r"\bside\s+by\s+side\b"),
                re(r"\b(\w+)\s+(?:meets?|and)\s+(\w+)\b"),
                re(r"\bcollision\s+of\s+(\w+)\b"),
                re(r"\bbetween\s+(\w+)\s+and\s+(\w+)\b"),
                re(r"\b(\w+)\s+(?:alongside|beside|next\s+to)\s+(\w+)\b"),
            ],
            vocabulary: &["side by side", "together", "collision", "meets", "between", "contrast"],
            examples: &["Rich and poor side by side", "The collision of old and new"],
            minimum_confidence: 0.55,
        },
        TropePattern {
            id: "anaphora",
            name: "Anaphora",
            description: "Repetition of a word or phrase at the beginning of successive clauses",
            patterns: vec![seq(SequenceMatcher::Anaphora)],
            vocabulary: &["i", "we", "every", "with", "through"],
            examples: &[
                "We shall fight on the beaches, we shall fight on the landing grounds",
                "Every step, every breath, every mile",
            ],
            minimum_confidence: 0.7,
        },
        TropePattern {
            id: "epistrophe",
            name: "Epistrophe",
            description: "Repetition of a word or phrase at the end of successive clauses",
            patterns: vec![seq(SequenceMatcher::Epistrophe)],
            vocabulary: &["again", "forever", "always", "never"],
            examples: &[
                "See no evil, hear no evil, speak no evil",
                "Government of the people, by the people, for the people",
            ],
            minimum_confidence: 0.7,
        },
        TropePattern {
            id: "synecdoche",
            name: "Synecdoche",
            description: "Part represents the whole or vice versa",
            patterns: vec![
                re(r"\b(?:all\s+)?(?:hands|heads|eyes|ears|hearts|souls|minds)\s+(?:on\s+deck|in\s+the|together)\b"),
                re(r"\b(?:boots|wheels|sails)\s+on\s+the\s+ground\b"),
                re(r"\bunder\s+(?:my|your|one)\s+roof\b"),
            ],
            vocabulary: &["hands", "heads", "wheels", "boots", "roof", "bread"],
            examples: &["All hands on deck", "Give us this day our daily bread"],
            minimum_confidence: 0.6,
        },
        TropePattern {
            id: "metonymy",
            name: "Metonymy",
            description: "Substitution of related concept for another",
            patterns: vec![
                re(r"\bthe\s+(?:crown|throne|white\s+house|pentagon|kremlin|hollywood)\b"),
                re(r"\bthe\s+(?:pen|sword|press|stage)\b"),
                re(r"\bsuits?\b.*\b(?:business|corporate|office)\b"),
            ],
            vocabulary: &["crown", "throne", "pen", "sword", "hollywood", "wall street", "washington"],
            examples: &["The pen is mightier than the sword", "The crown announced new policies"],
            minimum_confidence: 0.6,
        },
        TropePattern {
            id: "zeugma",
            name: "Zeugma",
            description: "One word governs two others in different senses",
            patterns: vec![
                re(r"\b\w+\s+(?:his|her|their|my|your|our)\s+\w+\s+and\s+(?:his|her|their|my|your|our)\s+\w+\b"),
                re(r"\b(?:lost|took|broke|caught|held)\s+\w+\s+\w+\s+and\s+\w+"),
            ],
            vocabulary: &["and", "lost", "took", "broke", "caught", "held"],
            examples: &["She broke his car and his heart", "He lost his coat and his temper"],
            minimum_confidence: 0.6,
        },
        TropePattern {
            id: "anadiplosis",
            name: "Anadiplosis",
            description: "The last word of one clause begins the next",
            patterns: vec![seq(SequenceMatcher::Anadiplosis)],
            vocabulary: &["leads", "becomes", "turns", "into"],
            examples: &["Fear leads to anger. Anger leads to hate. Hate leads to suffering"],
            minimum_confidence: 0.65,
        },
        TropePattern {
            id: "epizeuxis",
            name: "Epizeuxis",
            description: "Immediate repetition of a word for emphasis",
            patterns: vec![seq(SequenceMatcher::Epizeuxis)],
            vocabulary: &["never", "again", "now", "alone", "words"],
            examples: &["Never, never, never give up", "Words, words, words"],
            minimum_confidence: 0.65,
        },
        TropePattern {
            id: "epanalepsis",
            name: "Epanalepsis",
            description: "A clause or sentence begins and ends with the same word",
            patterns: vec![seq(SequenceMatcher::Epanalepsis)],
            vocabulary: &["again", "once", "still"],
            examples: &["The king is dead, long live the king", "Blood will have blood"],
            minimum_confidence: 0.65,
        },
        TropePattern {
            id: "alliteration",
            name: "Alliteration",
            description: "Repetition of initial consonant sounds in neighboring words",
            patterns: vec![seq(SequenceMatcher::Alliteration)],
            vocabulary: &["bold", "bright", "brave", "silent", "sweet", "wild"],
            examples: &["Peter Piper picked a peck of pickled peppers", "Bold, bright, brave"],
            minimum_confidence: 0.55,
        },
        TropePattern {
            id: "rhetorical_question",
            name: "Rhetorical Question",
            description: "A question asked for effect rather than for an answer",
            patterns: vec![
                re(r"\b(?:who|what|why|how|isn't|aren't|doesn't|don't|wouldn't|can't)\b[^?]*\?"),
                re(r"\?\s*$"),
            ],
            vocabulary: &["why", "what", "who", "how", "really", "ever"],
            examples: &["Who doesn't want to be happy?", "Isn't it time you slowed down?"],
            minimum_confidence: 0.5,
        },
        TropePattern {
            id: "litotes",
            name: "Litotes",
            description: "Understatement by denying the opposite",
            patterns: vec![
                re(r"\bnot\s+(?:un|in|im|dis)\w+"),
                re(r"\bnot\s+(?:bad|too\s+shabby|the\s+worst|without|half\s+bad)\b"),
                re(r"\bno\s+(?:small|mean|easy)\s+\w+"),
            ],
            vocabulary: &["not", "no", "hardly", "without", "small", "mean"],
            examples: &["Not bad at all", "It was no small feat"],
            minimum_confidence: 0.6,
        },
        TropePattern {
            id: "polysyndeton",
            name: "Polysyndeton",
            description: "Deliberate use of many conjunctions in close succession",
            patterns: vec![
                re(r"\b\w+\s+and\s+\w+\s+and\s+\w+\s+and\b"),
                re(r"\b\w+\s+or\s+\w+\s+or\s+\w+\s+or\b"),
                re(r"\band\s+\w+\s+and\s+\w+\s+and\s+\w+"),
            ],
            vocabulary: &["and", "or", "nor"],
            examples: &["We laughed and danced and sang and cried"],
            minimum_confidence: 0.6,
        },
    ];

    table.into_iter().map(|p| (p.id, p)).collect()
});

pub fn pattern_for(device_id: &str) -> Option<&'static TropePattern> {
    TROPE_PATTERNS.get(device_id)
}

pub fn patterned_ids() -> impl Iterator<Item = &'static str> {
    TROPE_PATTERNS.keys().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(id: &str, text: &str) -> bool {
        pattern_for(id)
            .unwrap()
            .patterns
            .iter()
            .any(|p| p.is_match(text))
    }

    #[test]
    fn table_has_about_twenty_devices() {
        assert_eq!(TROPE_PATTERNS.len(), 20);
        for (id, pattern) in TROPE_PATTERNS.iter() {
            assert_eq!(*id, pattern.id);
            assert!(!pattern.patterns.is_empty(), "{id} has no patterns");
            assert!(!pattern.vocabulary.is_empty(), "{id} has no vocabulary");
            assert!(!pattern.examples.is_empty(), "{id} has no examples");
        }
    }

    #[test]
    fn chiasmus_detects_abba() {
        assert!(matches("chiasmus", "One should eat to live, not live to eat."));
        assert!(matches("chiasmus", "Never let a fool kiss you or a kiss fool you"));
        assert!(!matches("chiasmus", "Walk further. Run faster."));
    }

    #[test]
    fn anaphora_detects_repeated_openings() {
        assert!(matches(
            "anaphora",
            "We shall fight on the beaches, we shall fight on the landing grounds"
        ));
        assert!(!matches("anaphora", "Rain falls. Sun rises."));
    }

    #[test]
    fn epistrophe_detects_repeated_endings() {
        assert!(matches("epistrophe", "See no evil, hear no evil, speak no evil"));
        assert!(!matches("epistrophe", "See the light, hear the music"));
    }

    #[test]
    fn anadiplosis_chains_clauses() {
        assert!(matches("anadiplosis", "Fear leads to anger. Anger leads to hate."));
        assert!(!matches("anadiplosis", "Fear leads to anger. Hate leads to suffering."));
    }

    #[test]
    fn epizeuxis_and_alliteration() {
        assert!(matches("epizeuxis", "Never, never, never give up"));
        assert!(!matches("epizeuxis", "Never give up"));
        assert!(matches("alliteration", "Peter Piper picked a peck"));
        assert!(!matches("alliteration", "Quiet rivers run under stone"));
    }

    #[test]
    fn epanalepsis_matches_bookended_sentence() {
        assert!(matches("epanalepsis", "Blood will have blood."));
        assert!(!matches("epanalepsis", "Blood will have water."));
    }

    #[test]
    fn reversed_genitive_counts_for_paradox() {
        assert!(SequenceMatcher::ReversedGenitive
            .is_match("the beauty of truth is the truth of beauty"));
        assert!(!SequenceMatcher::ReversedGenitive.is_match("the beauty of truth"));
    }

    #[test]
    fn regex_patterns_are_case_insensitive() {
        assert!(matches("hyperbole", "FOREVER young"));
        assert!(matches("oxymoron", "a Deafening Silent Scream"));
        assert!(matches("antithesis", "Built tough but gentle on the planet"));
    }

    #[test]
    fn keywords_skip_escape_sequences() {
        let pattern = re(r"\bnot\s+(\w+)[,;]\s*but\s+(\w+)\b");
        let keywords = pattern.keywords();
        assert_eq!(keywords, vec!["not".to_string(), "but".to_string()]);
        assert!(seq(SequenceMatcher::Chiasmus).keywords().is_empty());
    }
}
