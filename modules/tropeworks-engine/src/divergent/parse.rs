//! Parsing of the structured "DIRECTION [N]:" exploration response.

use std::sync::LazyLock;

use regex::Regex;

use tropeworks_common::ParseFailure;

static RE_DIRECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\**DIRECTION\s*\[?\s*\d+\s*\]?\s*\**\s*:\**").expect("valid direction marker")
});

/// One creative direction. Missing fields stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Direction {
    pub entry_point: Option<String>,
    pub connection: Option<String>,
    pub core_tension: Option<String>,
    pub provocative_phrase: Option<String>,
    pub visual_spark: Option<String>,
}

impl Direction {
    /// Phrase, tension, visual and connection joined into one idea string.
    pub fn idea(&self) -> String {
        [
            &self.provocative_phrase,
            &self.core_tension,
            &self.visual_spark,
            &self.connection,
        ]
        .into_iter()
        .filter_map(|f| f.as_deref())
        .collect::<Vec<_>>()
        .join(" | ")
    }
}

fn field(section: &str, label: &str) -> Option<String> {
    section.lines().find_map(|line| {
        let line = line.trim().trim_start_matches(['-', '*', ' ']);
        let (head, rest) = line.split_once(':')?;
        if !head.trim_matches('*').trim().eq_ignore_ascii_case(label) {
            return None;
        }
        let value = rest.trim().trim_matches('*').trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Split on direction markers and extract labelled fields from each section.
/// Sections with no recognized field are skipped.
pub fn parse_directions(response: &str) -> Result<Vec<Direction>, ParseFailure> {
    let directions: Vec<Direction> = RE_DIRECTION
        .split(response)
        .filter(|section| !section.trim().is_empty())
        .map(|section| Direction {
            entry_point: field(section, "Entry Point"),
            connection: field(section, "Connection"),
            core_tension: field(section, "Core Tension"),
            provocative_phrase: field(section, "Provocative Phrase"),
            visual_spark: field(section, "Visual Spark"),
        })
        .filter(|d| *d != Direction::default())
        .collect();

    if directions.is_empty() {
        return Err(ParseFailure::NoDirections);
    }
    Ok(directions)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = "Here you go.\n\n\
DIRECTION [1]:\n\
Entry Point: The shoe's last step\n\
Connection: Geology, sediment layers\n\
Core Tension: Walking forward means leaving less behind\n\
Provocative Phrase: Every step unwrites a footprint\n\
Visual Spark: Soles pressing fossils into rock\n\n\
**DIRECTION [2]:**\n\
- **Entry Point:** A sneaker's afterlife\n\
- **Provocative Phrase:** Worn out, grown in\n\
- **Visual Spark:** Sneakers sprouting moss\n";

    #[test]
    fn parses_plain_and_markdown_sections() {
        let directions = parse_directions(RESPONSE).unwrap();
        assert_eq!(directions.len(), 2);
        assert_eq!(
            directions[0].idea(),
            "Every step unwrites a footprint | Walking forward means leaving less behind | \
             Soles pressing fossils into rock | Geology, sediment layers"
        );
        assert_eq!(directions[1].entry_point.as_deref(), Some("A sneaker's afterlife"));
        assert_eq!(directions[1].idea(), "Worn out, grown in | Sneakers sprouting moss");
    }

    #[test]
    fn unstructured_text_is_a_parse_failure() {
        assert_eq!(
            parse_directions("I can't help with that."),
            Err(ParseFailure::NoDirections)
        );
        assert_eq!(parse_directions(""), Err(ParseFailure::NoDirections));
    }
}
