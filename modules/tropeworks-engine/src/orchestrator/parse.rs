//! Parsing of the sectioned variant response:
//!
//! ```text
//! # Headline
//! ## Tagline
//! **Visual Concept:** ...
//! **Body Copy:** ...
//! **Headlines:**
//! - Option 1: ...
//! **Rhetorical Analysis:** ...
//! **Strategic Impact:** ...
//! ```

use std::sync::LazyLock;

use regex::Regex;

use tropeworks_common::ParseFailure;

/// Alternate headlines longer than this are treated as prose, not headlines.
const MAX_HEADLINE_CHARS: usize = 100;

static RE_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\*{0,2}\s*(visual concept|body copy|headlines|rhetorical analysis|strategic impact)\s*\*{0,2}\s*:\s*\*{0,2}\s*(.*)$",
    )
    .expect("valid section marker")
});

static RE_OPTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(option\s*\d+\s*:|\d+[.)])\s*").expect("valid option prefix"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Visual,
    Body,
    Headlines,
    Analysis,
    Impact,
}

impl Section {
    fn from_label(label: &str) -> Option<Self> {
        match label.to_lowercase().as_str() {
            "visual concept" => Some(Section::Visual),
            "body copy" => Some(Section::Body),
            "headlines" => Some(Section::Headlines),
            "rhetorical analysis" => Some(Section::Analysis),
            "strategic impact" => Some(Section::Impact),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedVariant {
    pub headline: Option<String>,
    pub tagline: Option<String>,
    pub visual: String,
    pub body_copy: Option<String>,
    /// Main headline first, then the alternates.
    pub headlines: Vec<String>,
    pub rhetorical_analysis: Option<String>,
    pub strategic_impact: Option<String>,
}

fn clean(text: &str) -> String {
    text.replace("**", "").trim().to_string()
}

fn append(target: &mut String, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    if !target.is_empty() {
        target.push(' ');
    }
    target.push_str(text);
}

fn non_empty(text: String) -> Option<String> {
    (!text.is_empty()).then_some(text)
}

#[derive(Default)]
struct SectionText {
    visual: String,
    body: String,
    analysis: String,
    impact: String,
}

impl SectionText {
    fn get_mut(&mut self, section: Section) -> Option<&mut String> {
        match section {
            Section::Visual => Some(&mut self.visual),
            Section::Body => Some(&mut self.body),
            Section::Analysis => Some(&mut self.analysis),
            Section::Impact => Some(&mut self.impact),
            Section::Headlines => None,
        }
    }
}

fn push_headline(headlines: &mut Vec<String>, text: &str) {
    let text = clean(&RE_OPTION.replace(text.trim(), ""));
    let text = text.trim_matches('"').trim();
    if !text.is_empty() && text.chars().count() < MAX_HEADLINE_CHARS {
        headlines.push(text.to_string());
    }
}

pub fn parse_variant(response: &str) -> Result<ParsedVariant, ParseFailure> {
    let mut headline = None;
    let mut tagline = None;
    let mut text = SectionText::default();
    let mut headlines: Vec<String> = Vec::new();
    let mut section: Option<Section> = None;

    for line in response.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(rest) = line.strip_prefix("## ") {
            tagline = non_empty(clean(rest));
            section = None;
            continue;
        }
        if let Some(rest) = line.strip_prefix("# ") {
            headline = non_empty(clean(rest));
            section = None;
            continue;
        }
        if let Some(caps) = RE_SECTION.captures(line) {
            section = Section::from_label(&caps[1]);
            match section {
                Some(Section::Headlines) => push_headline(&mut headlines, &caps[2]),
                Some(s) => {
                    if let Some(target) = text.get_mut(s) {
                        append(target, &clean(&caps[2]));
                    }
                }
                None => {}
            }
            continue;
        }

        match section {
            Some(Section::Headlines) => {
                let item = line
                    .strip_prefix("- ")
                    .or_else(|| line.strip_prefix("* "))
                    .or_else(|| RE_OPTION.is_match(line).then_some(line));
                if let Some(item) = item {
                    push_headline(&mut headlines, item);
                }
            }
            Some(s) => {
                if let Some(target) = text.get_mut(s) {
                    append(target, &clean(line));
                }
            }
            None => {}
        }
    }

    if let Some(main) = &headline {
        if !headlines.iter().any(|h| h.eq_ignore_ascii_case(main)) {
            headlines.insert(0, main.clone());
        }
    }

    if text.visual.is_empty() {
        return Err(ParseFailure::MissingSection("visual concept"));
    }
    if headlines.is_empty() {
        return Err(ParseFailure::NoHeadlines);
    }

    Ok(ParsedVariant {
        headline,
        tagline,
        visual: text.visual,
        body_copy: non_empty(text.body),
        headlines,
        rhetorical_analysis: non_empty(text.analysis),
        strategic_impact: non_empty(text.impact),
    })
}
