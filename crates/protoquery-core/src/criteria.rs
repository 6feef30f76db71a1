//! Eligibility criteria read back from a protocol's inclusion and exclusion
//! chunks.
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::types::{Chunk, ChunkRef};

pub const INCLUSION_SECTION: &str = "inclusion criteria";
pub const EXCLUSION_SECTION: &str = "exclusion criteria";

/// `1.`, `1)`, `(1)`, `a.`, `a)`, `(a)` or a bullet, with the number or
/// letter captured when present.
static MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(\d{1,3})[.)]\s+|\((\d{1,3})\)\s*|([a-z])[.)]\s+|\(([a-z])\)\s*|[•‣◦⁃∙*]\s*|[-–—]\s+)").expect("static regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CriterionKind {
    Inclusion,
    Exclusion,
}

impl CriterionKind {
    pub fn section(self) -> &'static str {
        match self {
            Self::Inclusion => INCLUSION_SECTION,
            Self::Exclusion => EXCLUSION_SECTION,
        }
    }

    pub fn from_section(section: &str) -> Option<Self> {
        match section {
            INCLUSION_SECTION => Some(Self::Inclusion),
            EXCLUSION_SECTION => Some(Self::Exclusion),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inclusion => "inclusion",
            Self::Exclusion => "exclusion",
        }
    }

    fn title(self) -> &'static str {
        match self {
            Self::Inclusion => "Inclusion",
            Self::Exclusion => "Exclusion",
        }
    }
}

impl fmt::Display for CriterionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for CriterionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "inclusion" => Ok(Self::Inclusion),
            "exclusion" => Ok(Self::Exclusion),
            other => Err(Error::InvalidInput(format!("unknown criterion type '{other}' (expected inclusion or exclusion)"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionCategory {
    Demographic,
    Clinical,
    Laboratory,
    PriorTreatment,
    Consent,
    Reproductive,
}

impl CriterionCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Demographic => "demographic",
            Self::Clinical => "clinical",
            Self::Laboratory => "laboratory",
            Self::PriorTreatment => "prior_treatment",
            Self::Consent => "consent",
            Self::Reproductive => "reproductive",
        }
    }
}

impl fmt::Display for CriterionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Word prefixes per category, checked in order.
const CATEGORY_TERMS: &[(CriterionCategory, &[&str])] = &[
    (
        CriterionCategory::Demographic,
        &["age", "year", "old", "adult", "pediatric", "elderly", "male", "female", "gender", "sex", "pregnan", "nursing"],
    ),
    (CriterionCategory::Clinical, &["diagnos", "confirmed", "histolog", "patholog", "disease", "condition"]),
    (
        CriterionCategory::Laboratory,
        &["lab", "hemoglobin", "haemoglobin", "creatinine", "bilirubin", "ast", "alt", "wbc", "platelet"],
    ),
    (CriterionCategory::PriorTreatment, &["prior", "previous", "therap", "treatment", "medication", "drug"]),
    (CriterionCategory::Consent, &["consent", "willing", "able to"]),
    (CriterionCategory::Reproductive, &["contracepti", "birth control", "fertile"]),
];

/// Category of a criterion from its wording; the first family with a match wins.
/// Terms match at the start of a word so `ast` does not fire on `last`.
pub fn categorize(text: &str) -> Option<CriterionCategory> {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()).collect();
    let joined = words.join(" ");
    let hit = |term: &str| {
        if term.contains(' ') {
            joined.contains(term)
        } else {
            words.iter().any(|w| w.starts_with(term))
        }
    };
    CATEGORY_TERMS.iter().find(|(_, terms)| terms.iter().copied().any(hit)).map(|(category, _)| *category)
}

/// Number given by a leading list marker (`3.`, `(3)`, `c)` → 3) and the text
/// after it. Unmarked text is returned whole with no number.
pub fn split_marker(text: &str) -> (Option<u32>, &str) {
    let text = text.trim();
    let Some(caps) = MARKER.captures(text) else {
        return (None, text);
    };
    let rest = text[caps.get(0).map_or(0, |m| m.end())..].trim();
    let number = if let Some(d) = caps.get(1).or_else(|| caps.get(2)) {
        d.as_str().parse().ok()
    } else {
        caps.get(3).or_else(|| caps.get(4)).and_then(|l| l.as_str().bytes().next()).map(|b| u32::from(b - b'a') + 1)
    };
    (number, rest)
}

/// One inclusion or exclusion criterion backed by a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub chunk: ChunkRef,
    pub kind: CriterionKind,
    pub number: u32,
    pub category: Option<CriterionCategory>,
    pub text: String,
}

impl Criterion {
    /// Read a criterion from a chunk. `position` is the 1-based position of the
    /// chunk among its section's chunks and numbers unmarked criteria.
    pub fn from_chunk(chunk: &Chunk, position: u32) -> Option<Self> {
        let kind = CriterionKind::from_section(&chunk.section)?;
        let (number, text) = split_marker(&chunk.text);
        if text.is_empty() {
            return None;
        }
        Some(Self { chunk: chunk.chunk_ref(), kind, number: number.unwrap_or(position), category: categorize(text), text: text.to_string() })
    }

    /// `- **Inclusion #2** [NCT01:3]: text`, the form used in what-if evidence.
    pub fn bullet(&self) -> String { format!("- **{} #{}** [{}]: {}", self.kind.title(), self.number, self.chunk, self.text) }
}

/// Criteria of one protocol, inclusion before exclusion and by number within
/// each. `kind` keeps only one of the two.
pub fn criteria(chunks: &[Chunk], kind: Option<CriterionKind>) -> Vec<Criterion> {
    let mut seen = [0u32; 2];
    let mut out: Vec<Criterion> = chunks
        .iter()
        .filter_map(|c| {
            let k = CriterionKind::from_section(&c.section)?;
            let slot = &mut seen[k as usize];
            *slot += 1;
            Criterion::from_chunk(c, *slot)
        })
        .filter(|c| kind.map_or(true, |k| c.kind == k))
        .collect();
    out.sort_by(|a, b| a.kind.cmp(&b.kind).then(a.number.cmp(&b.number)).then(a.chunk.ordinal.cmp(&b.chunk.ordinal)));
    out
}
