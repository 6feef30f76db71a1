use std::fs;
use std::io::Write;
use tempfile::TempDir;

use figment::providers::{Format, Toml};
use figment::Figment;
use protoquery_core::answer::StructuredAnswer;
use protoquery_core::chunker::{estimate_tokens, section_label, Chunker};
use protoquery_core::config::{ChunkingConfig, Config};
use protoquery_core::extract::PlainTextExtractor;
use protoquery_core::traits::Extractor;
use protoquery_core::types::{ChunkRef, ProtocolId, UNLABELED};
use protoquery_core::{Error, ErrorKind};

const PROTOCOL: &str = "A phase 2 study of drug X.

5. INCLUSION CRITERIA
1. Age 18 years or older at screening.
2. Histologically confirmed diagnosis
   of solid tumor.

Exclusion Criteria:
- Pregnant or breastfeeding.
- Prior therapy with drug X.
";

fn pid(s: &str) -> ProtocolId { ProtocolId::new(s).unwrap() }

#[test]
fn chunks_follow_headings_and_list_items() {
    let chunker = Chunker::default();
    let drafts = chunker.chunk(&pid("NCT00000001"), PROTOCOL).expect("chunk");

    let got: Vec<(u32, &str, &str)> = drafts.iter().map(|d| (d.ordinal, d.section.as_str(), d.text.as_str())).collect();
    assert_eq!(
        got,
        vec![
            (0, UNLABELED, "A phase 2 study of drug X."),
            (1, "inclusion criteria", "1. Age 18 years or older at screening."),
            (2, "inclusion criteria", "2. Histologically confirmed diagnosis of solid tumor."),
            (3, "exclusion criteria", "- Pregnant or breastfeeding."),
            (4, "exclusion criteria", "- Prior therapy with drug X."),
        ]
    );
}

#[test]
fn capitalised_criteria_keep_their_text_and_section() {
    let text = "EXCLUSION CRITERIA\n1. PREGNANT OR BREASTFEEDING WOMEN\n2. Active hepatitis B infection.";
    let drafts = Chunker::default().chunk(&pid("P"), text).unwrap();
    let got: Vec<(&str, &str)> = drafts.iter().map(|d| (d.section.as_str(), d.text.as_str())).collect();
    assert_eq!(
        got,
        vec![
            ("exclusion criteria", "1. PREGNANT OR BREASTFEEDING WOMEN"),
            ("exclusion criteria", "2. Active hepatitis B infection."),
        ]
    );
}

#[test]
fn inline_labels_open_their_own_chunks() {
    let drafts = Chunker::default().chunk(&pid("P"), "Inclusion: age ≥ 18\nExclusion: pregnant").unwrap();
    let got: Vec<(u32, &str, &str)> = drafts.iter().map(|d| (d.ordinal, d.section.as_str(), d.text.as_str())).collect();
    assert_eq!(got, vec![(0, "inclusion criteria", "Inclusion: age ≥ 18"), (1, "exclusion criteria", "Exclusion: pregnant")]);
}

#[test]
fn chunking_is_deterministic() {
    let chunker = Chunker::default();
    let a = chunker.chunk(&pid("P"), PROTOCOL).unwrap();
    let b = chunker.chunk(&pid("P"), PROTOCOL).unwrap();
    assert_eq!(a, b);
}

#[test]
fn empty_document_is_rejected() {
    let err = Chunker::default().chunk(&pid("P"), " \n\t\n").unwrap_err();
    assert!(matches!(err, Error::EmptyDocument { .. }));
    assert_eq!(err.kind(), ErrorKind::Input);
}

#[test]
fn oversized_paragraph_is_windowed_with_overlap() {
    let chunker = Chunker::new(ChunkingConfig { max_tokens: 40, overlap_fraction: 0.25 }).unwrap();
    let paragraph: Vec<String> = (1..=10).map(|i| format!("Sentence number {i} has exactly seven words.")).collect();
    let text = paragraph.join(" ");
    assert!(estimate_tokens(&text) > 40);

    let drafts = chunker.chunk(&pid("P"), &text).unwrap();
    assert_eq!(drafts.len(), 3, "{drafts:#?}");
    assert!(drafts[0].text.starts_with("Sentence number 1 "));
    assert!(drafts[0].text.ends_with("Sentence number 4 has exactly seven words."));
    assert!(drafts[1].text.starts_with("Sentence number 4 "), "second window repeats the tail of the first");
    assert!(drafts[2].text.ends_with("Sentence number 10 has exactly seven words."));
    for (i, d) in drafts.iter().enumerate() { assert_eq!(d.ordinal as usize, i); }
}

#[test]
fn single_sentence_over_budget_fails_instead_of_truncating() {
    let chunker = Chunker::new(ChunkingConfig { max_tokens: 10, overlap_fraction: 0.1 }).unwrap();
    let sentence = vec!["word"; 20].join(" ");
    let err = chunker.chunk(&pid("P"), &sentence).unwrap_err();
    match err {
        Error::ChunkTooLarge { tokens, budget, .. } => {
            assert_eq!(budget, 10);
            assert!(tokens > 10);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn section_labels_are_canonical() {
    assert_eq!(section_label("INCLUSION CRITERIA"), "inclusion criteria");
    assert_eq!(section_label("Key Exclusion Criteria:"), "exclusion criteria");
    assert_eq!(section_label("Schedule of Assessments"), "assessments");
    assert_eq!(section_label("Pharmacokinetics"), "pharmacokinetics");
}

#[test]
fn plain_text_extractor_reads_and_rejects() {
    let tmp = TempDir::new().unwrap();
    let txt = tmp.path().join("p.txt");
    let mut f = fs::File::create(&txt).unwrap();
    writeln!(f, "INCLUSION CRITERIA").unwrap();
    writeln!(f, "1. Adults").unwrap();
    let text = PlainTextExtractor.extract(&txt).expect("extract");
    assert!(text.contains("1. Adults"));

    let pdf = tmp.path().join("p.pdf");
    fs::write(&pdf, b"%PDF-1.7").unwrap();
    assert!(PlainTextExtractor.extract(&pdf).is_err());
}

#[test]
fn config_rejects_inverted_thresholds() {
    let cfg = Config::from_figment(Figment::from(Toml::string("[alignment]\nhigh = 0.7\nlow = 0.9\n")));
    let err = cfg.settings().unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[test]
fn config_overrides_merge_over_defaults() {
    let cfg = Config::from_figment(Figment::from(Toml::string("[ranking]\nrrf_k = 30.0\n[index]\ndim = 8\n")));
    let settings = cfg.settings().expect("settings");
    assert!((settings.ranking.rrf_k - 30.0).abs() < f64::EPSILON);
    assert_eq!(settings.index.dim, 8);
    assert_eq!(settings.ranking.max_results, 50);
    assert_eq!(settings.chunking.max_tokens, 512);
}

#[test]
fn answer_schema_validation() {
    let supplied = vec![ChunkRef::new(pid("P1"), 0), ChunkRef::new(pid("P1"), 3)];

    let fenced = "```json\n{\"answer\": \"Patient is excluded.\", \"citations\": [\"P1:3\", \"[P1:3]\"]}\n```";
    let ok = StructuredAnswer::parse(fenced, &supplied).expect("valid answer");
    assert_eq!(ok.answer, "Patient is excluded.");
    assert_eq!(ok.citations, vec![ChunkRef::new(pid("P1"), 3)]);

    let no_citations = StructuredAnswer::parse("{\"answer\": \"Unclear.\"}", &supplied).unwrap();
    assert!(no_citations.citations.is_empty());

    assert!(StructuredAnswer::parse("The patient is excluded.", &supplied).is_err());
    assert!(StructuredAnswer::parse("{\"answer\": \"x\", \"citations\": [\"P2:1\"]}", &supplied).is_err());
    assert!(StructuredAnswer::parse("{\"answer\": \"  \"}", &supplied).is_err());
}

#[test]
fn chunk_refs_round_trip_through_text() {
    let r: ChunkRef = "NCT:01:7".parse().unwrap();
    assert_eq!(r.protocol_id.as_str(), "NCT:01");
    assert_eq!(r.ordinal, 7);
    assert_eq!(r.to_string(), "NCT:01:7");
    assert!("no-ordinal".parse::<ChunkRef>().is_err());
}
