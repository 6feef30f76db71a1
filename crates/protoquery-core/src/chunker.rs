//! Protocol-aware chunking.
//!
//! Text is split at structural boundaries first (headings, list items, blank
//! lines). Units that still exceed the token budget fall back to a
//! sentence-aware sliding window whose windows overlap by a configurable
//! share of the budget.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::ChunkingConfig;
use crate::error::{Error, Result};
use crate::types::{ChunkDraft, ProtocolId, UNLABELED};

static MARKDOWN_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}\s+(.+?)\s*#*$").expect("static regex"));
static NUMBERED_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,2}(?:\.\d{1,2})*\.?\s+(\S.{1,79})$").expect("static regex"));
static SINGLE_LEVEL_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,2}[.)]?\s").expect("static regex"));
static INLINE_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Za-z][A-Za-z ]{2,40}?)\s*:\s*\S").expect("static regex"));
static LIST_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\d{1,3}[.)]\s+|\(\d{1,3}\)\s*|[a-z][.)]\s+|\([a-z]\)\s*|[•‣◦⁃∙*]\s*|[-–—]\s+)").expect("static regex")
});

/// Heading phrases recognised even when they are not written in capitals.
const KNOWN_HEADINGS: &[&str] = &[
    "introduction", "background", "objective", "objectives", "study objectives", "primary objective",
    "primary objectives", "secondary objectives", "study design", "trial design", "population",
    "study population", "eligibility", "eligibility criteria", "inclusion criteria", "exclusion criteria",
    "inclusion", "exclusion", "treatment", "treatments", "study treatment", "intervention", "dosing",
    "dose modifications", "procedures", "study procedures", "assessments", "schedule of assessments",
    "safety", "safety assessments", "adverse events", "efficacy", "endpoints", "efficacy endpoints",
    "statistics", "statistical methods", "statistical considerations", "ethics", "administration",
    "references", "appendix", "pharmacokinetics", "concomitant medications", "withdrawal", "discontinuation",
    "data management",
];

/// Rough token estimate shared by chunking and context budgeting.
pub fn estimate_tokens(text: &str) -> usize {
    let word_count = text.split_whitespace().count();
    (word_count as f32 / 0.75) as usize
}

/// Map a heading title onto the canonical section label used for filtering
/// and cross-protocol alignment.
pub fn section_label(title: &str) -> String {
    let t = normalize_title(title);
    let canonical = [
        ("inclusion", "inclusion criteria"),
        ("exclusion", "exclusion criteria"),
        ("eligibility", "eligibility"),
        ("objective", "objectives"),
        ("background", "background"),
        ("introduction", "background"),
        ("design", "study design"),
        ("treatment", "treatment"),
        ("intervention", "treatment"),
        ("dosing", "treatment"),
        ("dose", "treatment"),
        ("assessment", "assessments"),
        ("procedure", "assessments"),
        ("safety", "safety"),
        ("adverse", "safety"),
        ("efficacy", "efficacy"),
        ("endpoint", "efficacy"),
        ("statistic", "statistics"),
        ("ethic", "ethics"),
        ("admin", "administration"),
        ("appendix", "appendix"),
    ];
    for (needle, label) in canonical {
        if t.contains(needle) {
            return label.to_string();
        }
    }
    if t.is_empty() { UNLABELED.to_string() } else { t }
}

fn normalize_title(title: &str) -> String {
    title.trim().trim_end_matches(':').split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn is_known_heading(title: &str) -> bool { KNOWN_HEADINGS.contains(&normalize_title(title).as_str()) }

fn is_upper_heading(title: &str) -> bool {
    let t = title.trim().trim_end_matches(':');
    let letters = t.chars().filter(|c| c.is_alphabetic()).count();
    letters >= 4
        && t.len() <= 80
        && t.split_whitespace().count() <= 10
        && !t.ends_with('.')
        && !t.chars().any(|c| c.is_ascii_digit())
        && t.chars().filter(|c| c.is_alphabetic()).all(char::is_uppercase)
}

/// Returns the heading title when `line` is a section heading.
///
/// Once a section is open, a single-level numbered line (`3. ...`) is a list
/// item unless its title is a known heading, so capitalised criteria keep
/// their text and do not relabel the items after them.
fn heading_title(line: &str, in_section: bool) -> Option<&str> {
    if let Some(c) = MARKDOWN_HEADING.captures(line) {
        return c.get(1).map(|m| m.as_str());
    }
    if let Some(c) = NUMBERED_HEADING.captures(line) {
        let title = c.get(1)?.as_str();
        if in_section && SINGLE_LEVEL_NUMBER.is_match(line) {
            return is_known_heading(title).then_some(title);
        }
        return (is_upper_heading(title) || is_known_heading(title)).then_some(title);
    }
    (is_upper_heading(line) || is_known_heading(line)).then_some(line)
}

/// `Inclusion: age >= 18` opens an inclusion unit and keeps the whole line.
fn inline_label(line: &str) -> Option<&str> {
    let title = INLINE_LABEL.captures(line)?.get(1)?.as_str();
    is_known_heading(title).then_some(title)
}

/// A structural unit before budget enforcement.
#[derive(Debug)]
struct Unit {
    section: String,
    text: String,
}

fn split_structural(text: &str) -> Vec<Unit> {
    let mut units = Vec::new();
    let mut section = UNLABELED.to_string();
    let mut current: Vec<String> = Vec::new();

    let flush = |current: &mut Vec<String>, section: &str, units: &mut Vec<Unit>| {
        if !current.is_empty() {
            units.push(Unit { section: section.to_string(), text: current.join(" ") });
            current.clear();
        }
    };

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            flush(&mut current, &section, &mut units);
            continue;
        }
        if let Some(title) = heading_title(line, section != UNLABELED) {
            flush(&mut current, &section, &mut units);
            section = section_label(title);
            continue;
        }
        if let Some(title) = inline_label(line) {
            flush(&mut current, &section, &mut units);
            section = section_label(title);
        } else if LIST_ITEM.is_match(line) {
            flush(&mut current, &section, &mut units);
        }
        current.push(line.split_whitespace().collect::<Vec<_>>().join(" "));
    }
    flush(&mut current, &section, &mut units);
    units
}

/// Split on `.`, `!` or `?` followed by whitespace; the punctuation stays
/// with its sentence.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(j, next)) = chars.peek() {
                if next.is_whitespace() {
                    let s = text[start..j].trim();
                    if !s.is_empty() { out.push(s); }
                    start = j;
                }
            } else {
                let s = text[start..i + c.len_utf8()].trim();
                if !s.is_empty() { out.push(s); }
                start = text.len();
            }
        }
    }
    if start < text.len() {
        let s = text[start..].trim();
        if !s.is_empty() { out.push(s); }
    }
    out
}

#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkingConfig { &self.config }

    /// Chunk one protocol's extracted text. Identical input always yields
    /// identical boundaries and ordinals `0..n`.
    pub fn chunk(&self, protocol_id: &ProtocolId, raw_text: &str) -> Result<Vec<ChunkDraft>> {
        if raw_text.trim().is_empty() {
            return Err(Error::EmptyDocument { protocol_id: protocol_id.to_string() });
        }
        let mut drafts = Vec::new();
        for unit in split_structural(raw_text) {
            let pieces = if estimate_tokens(&unit.text) <= self.config.max_tokens {
                vec![unit.text]
            } else {
                self.sliding_windows(protocol_id, &unit.text)?
            };
            for text in pieces {
                let ordinal = u32::try_from(drafts.len())
                    .map_err(|_| Error::InvalidInput(format!("protocol '{protocol_id}' produced too many chunks")))?;
                drafts.push(ChunkDraft { ordinal, section: unit.section.clone(), text });
            }
        }
        if drafts.is_empty() {
            return Err(Error::EmptyDocument { protocol_id: protocol_id.to_string() });
        }
        tracing::debug!(protocol = %protocol_id, chunks = drafts.len(), "chunked document");
        Ok(drafts)
    }

    fn sliding_windows(&self, protocol_id: &ProtocolId, text: &str) -> Result<Vec<String>> {
        let budget = self.config.max_tokens;
        let overlap = self.config.overlap_tokens();
        let sentences: Vec<(&str, usize)> = split_sentences(text).into_iter().map(|s| (s, estimate_tokens(s))).collect();
        if let Some(&(_, tokens)) = sentences.iter().find(|(_, t)| *t > budget) {
            return Err(Error::ChunkTooLarge { protocol_id: protocol_id.to_string(), tokens, budget });
        }

        let join = |w: &[(&str, usize)]| w.iter().map(|(s, _)| *s).collect::<Vec<_>>().join(" ");
        let mut windows = Vec::new();
        let mut current: Vec<(&str, usize)> = Vec::new();
        let mut current_tokens = 0usize;
        // sentences added since the last emitted window
        let mut fresh = 0usize;

        for &(sentence, tokens) in &sentences {
            if current_tokens + tokens > budget && fresh > 0 {
                windows.push(join(&current));
                let mut carried: Vec<(&str, usize)> = Vec::new();
                let mut carried_tokens = 0usize;
                for &(s, t) in current.iter().rev() {
                    if carried_tokens + t > overlap { break; }
                    carried.insert(0, (s, t));
                    carried_tokens += t;
                }
                current = carried;
                current_tokens = carried_tokens;
                fresh = 0;
                while current_tokens + tokens > budget && !current.is_empty() {
                    let (_, t) = current.remove(0);
                    current_tokens -= t;
                }
            }
            current.push((sentence, tokens));
            current_tokens += tokens;
            fresh += 1;
        }
        if fresh > 0 {
            windows.push(join(&current));
        }
        Ok(windows)
    }
}
