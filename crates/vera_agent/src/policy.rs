//! Grounding and abstention policy.
//!
//! `classify` is a deterministic function of the resolution outcome and the
//! evidence collected so far: no candidates means UNVERIFIABLE, two near-tied
//! candidates mean AMBIGUOUS, one confident candidate with at least one
//! supporting fact or passage means GROUNDED. A resolved entity with nothing
//! verifiable to say about it is still UNVERIFIABLE. Structured facts
//! dominate narrative text: a passage only grounds a claim when no facts for
//! that entity exist.

use vera_common::prompts::{refusal_ambiguous_entity, refusal_claim, refusal_unknown_entity};
use vera_common::{
    Citation, Claim, ClaimStatus, EntityId, Fact, FactQualifiers, Passage, Resolution,
};

/// Minimum confidence a candidate must clear to survive resolution.
pub const MIN_CONFIDENCE: f64 = 0.5;

/// Two candidates whose confidences differ by less than this are near-tied.
pub const AMBIGUITY_MARGIN: f64 = 0.1;

/// Grounded facts rendered into one claim sentence.
const MAX_FACTS_PER_CLAIM: usize = 3;

/// Everything retrieved during a run, tagged with the step that produced it.
#[derive(Debug, Default)]
pub struct EvidencePool {
    pub facts: Vec<(u32, Fact)>,
    pub passages: Vec<(u32, Passage)>,
}

impl EvidencePool {
    pub fn add_facts(&mut self, step: u32, facts: impl IntoIterator<Item = Fact>) {
        self.facts.extend(facts.into_iter().map(|f| (step, f)));
    }

    pub fn add_passage(&mut self, step: u32, passage: Passage) {
        self.passages.push((step, passage));
    }

    pub fn facts_for(&self, subject: &EntityId) -> Vec<&(u32, Fact)> {
        self.facts
            .iter()
            .filter(|(_, f)| &f.subject == subject)
            .collect()
    }

    pub fn passage_for(&self, entity: &EntityId) -> Option<&(u32, Passage)> {
        self.passages.iter().find(|(_, p)| &p.entity == entity)
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty() && self.passages.is_empty()
    }
}

/// Classify one mention against its resolution outcome and the evidence.
///
/// `resolution` is `None` when the mention was never looked up, which is
/// indistinguishable from a miss for the caller: nothing verifiable exists.
pub fn classify(mention: &str, resolution: Option<&Resolution>, pool: &EvidencePool) -> Claim {
    let Some(resolution) = resolution.filter(|r| !r.is_miss()) else {
        return Claim {
            subject: mention.to_string(),
            status: ClaimStatus::Unverifiable,
            text: refusal_unknown_entity(mention),
            citations: vec![],
        };
    };

    if is_ambiguous(&resolution.candidates) {
        return Claim {
            subject: mention.to_string(),
            status: ClaimStatus::Ambiguous,
            text: refusal_ambiguous_entity(mention),
            citations: vec![],
        };
    }

    let best = &resolution.candidates[0];
    let facts = pool.facts_for(&best.id);
    if !facts.is_empty() {
        return Claim {
            subject: mention.to_string(),
            status: ClaimStatus::Grounded,
            text: grounded_sentence(&best.label, &facts),
            citations: facts
                .iter()
                .take(MAX_FACTS_PER_CLAIM)
                .map(|(step, f)| Citation {
                    step: *step,
                    source: format!("wikidata:{}/{}", f.subject, f.property),
                })
                .collect(),
        };
    }

    // Facts dominate narrative text; a passage only grounds when none exist.
    if let Some((step, passage)) = pool.passage_for(&best.id) {
        return Claim {
            subject: mention.to_string(),
            status: ClaimStatus::Grounded,
            text: first_sentence(&passage.text),
            citations: vec![Citation {
                step: *step,
                source: format!("wikipedia:{}", passage.title),
            }],
        };
    }

    Claim {
        subject: mention.to_string(),
        status: ClaimStatus::Unverifiable,
        text: refusal_claim(&format!(
            "the question's statement about {} is accurate",
            best.label
        )),
        citations: vec![],
    }
}

/// Near-tied top candidates with no disambiguating signal.
fn is_ambiguous(candidates: &[vera_common::EntityCandidate]) -> bool {
    match candidates {
        [first, second, ..] => (first.confidence - second.confidence).abs() < AMBIGUITY_MARGIN,
        _ => false,
    }
}

/// "Alan Turing — employer: Government Code and Cypher School (start:
/// 1938-09-04; end: 1945-09-02)." Values are rendered verbatim from the
/// retrieved facts, with no reformatting of numbers or dates.
fn grounded_sentence(label: &str, facts: &[&(u32, Fact)]) -> String {
    let parts: Vec<String> = facts
        .iter()
        .take(MAX_FACTS_PER_CLAIM)
        .map(|(_, f)| {
            let mut part = format!("{}: {}", f.property_label, f.value.display());
            if !f.qualifiers.is_empty() {
                part.push_str(&format!(" ({})", f.qualifiers.summary()));
            }
            part
        })
        .collect();
    format!("{} — {}.", label, parts.join("; "))
}

fn first_sentence(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.find(". ") {
        Some(pos) => trimmed[..=pos].trim().to_string(),
        None => trimmed.lines().next().unwrap_or("").trim().to_string(),
    }
}

/// True when a qualifier window overlaps the given inclusive year range.
/// Facts with no temporal qualifiers are treated as always in scope.
pub fn qualifiers_overlap_years(qualifiers: &FactQualifiers, from: i32, to: i32) -> bool {
    let year = |date: &Option<String>| -> Option<i32> {
        date.as_deref()
            .and_then(|d| d.split('-').next())
            .and_then(|y| y.parse().ok())
    };
    if let Some(point) = year(&qualifiers.point_in_time) {
        return point >= from && point <= to;
    }
    let start = year(&qualifiers.start);
    let end = year(&qualifiers.end);
    if start.is_none() && end.is_none() {
        return true;
    }
    start.unwrap_or(i32::MIN) <= to && end.unwrap_or(i32::MAX) >= from
}

#[cfg(test)]
mod tests {
    use super::*;
    use vera_common::{EntityCandidate, FactValue, PropertyId};

    fn candidate(qid: &str, label: &str, confidence: f64) -> EntityCandidate {
        EntityCandidate {
            id: EntityId::new(qid),
            label: label.to_string(),
            description: String::new(),
            instance_of: vec![],
            aliases: vec![],
            confidence,
        }
    }

    fn employer_fact() -> Fact {
        Fact {
            subject: EntityId::new("Q7251"),
            subject_label: "Alan Turing".to_string(),
            property: PropertyId::new("P108"),
            property_label: "employer".to_string(),
            value: FactValue::Entity {
                id: EntityId::new("Q2629491"),
                label: "Government Code and Cypher School".to_string(),
            },
            qualifiers: FactQualifiers {
                start: Some("1938-09-04".to_string()),
                end: Some("1945-09-02".to_string()),
                point_in_time: None,
            },
        }
    }

    #[test]
    fn test_unresolved_mention_is_unverifiable() {
        let claim = classify("Dr. Helena Vargass", None, &EvidencePool::default());
        assert_eq!(claim.status, ClaimStatus::Unverifiable);
        assert_eq!(claim.text, "I cannot verify that Dr. Helena Vargass exists.");
        assert!(claim.citations.is_empty());
    }

    #[test]
    fn test_recorded_miss_is_unverifiable() {
        let miss = Resolution::miss("Dr. Helena Vargass");
        let claim = classify("Dr. Helena Vargass", Some(&miss), &EvidencePool::default());
        assert_eq!(claim.status, ClaimStatus::Unverifiable);
    }

    #[test]
    fn test_near_tied_candidates_are_ambiguous() {
        let resolution = Resolution {
            mention: "Springfield".to_string(),
            candidates: vec![
                candidate("Q79848", "Springfield", 0.82),
                candidate("Q28513", "Springfield", 0.78),
            ],
        };
        let claim = classify("Springfield", Some(&resolution), &EvidencePool::default());
        assert_eq!(claim.status, ClaimStatus::Ambiguous);
        assert_eq!(
            claim.text,
            "I cannot determine which Springfield the question refers to."
        );
    }

    #[test]
    fn test_clear_winner_with_fact_is_grounded() {
        let resolution = Resolution {
            mention: "Alan Turing".to_string(),
            candidates: vec![
                candidate("Q7251", "Alan Turing", 0.97),
                candidate("Q20895930", "Alan Turing Building", 0.55),
            ],
        };
        let mut pool = EvidencePool::default();
        pool.add_facts(2, [employer_fact()]);

        let claim = classify("Alan Turing", Some(&resolution), &pool);
        assert_eq!(claim.status, ClaimStatus::Grounded);
        assert!(claim.text.contains("Government Code and Cypher School"));
        assert!(claim.text.contains("start: 1938-09-04"));
        assert_eq!(claim.citations.len(), 1);
        assert_eq!(claim.citations[0].step, 2);
        assert_eq!(claim.citations[0].source, "wikidata:Q7251/P108");
    }

    #[test]
    fn test_facts_dominate_passage() {
        let resolution = Resolution {
            mention: "Alan Turing".to_string(),
            candidates: vec![candidate("Q7251", "Alan Turing", 0.97)],
        };
        let mut pool = EvidencePool::default();
        pool.add_facts(2, [employer_fact()]);
        pool.add_passage(
            3,
            Passage {
                entity: EntityId::new("Q7251"),
                title: "Alan Turing".to_string(),
                text: "Turing worked at GCHQ. More text.".to_string(),
                truncated: false,
            },
        );

        let claim = classify("Alan Turing", Some(&resolution), &pool);
        // The passage names the successor organization; the fact wins.
        assert!(claim.text.contains("Government Code and Cypher School"));
        assert!(!claim.text.contains("GCHQ"));
        assert!(claim.citations.iter().all(|c| c.source.starts_with("wikidata:")));
    }

    #[test]
    fn test_passage_grounds_when_no_facts_exist() {
        let resolution = Resolution {
            mention: "Alan Turing".to_string(),
            candidates: vec![candidate("Q7251", "Alan Turing", 0.97)],
        };
        let mut pool = EvidencePool::default();
        pool.add_passage(
            3,
            Passage {
                entity: EntityId::new("Q7251"),
                title: "Alan Turing".to_string(),
                text: "Alan Turing was an English mathematician. He also ran.".to_string(),
                truncated: false,
            },
        );

        let claim = classify("Alan Turing", Some(&resolution), &pool);
        assert_eq!(claim.status, ClaimStatus::Grounded);
        assert_eq!(claim.text, "Alan Turing was an English mathematician.");
        assert_eq!(claim.citations[0].source, "wikipedia:Alan Turing");
    }

    #[test]
    fn test_resolved_without_support_is_unverifiable() {
        let resolution = Resolution {
            mention: "Alan Turing".to_string(),
            candidates: vec![candidate("Q7251", "Alan Turing", 0.97)],
        };
        let claim = classify("Alan Turing", Some(&resolution), &EvidencePool::default());
        assert_eq!(claim.status, ClaimStatus::Unverifiable);
        assert!(claim.text.starts_with("I cannot verify that"));
    }

    #[test]
    fn test_qualifier_overlap_windows() {
        let wartime = FactQualifiers {
            start: Some("1938-09-04".to_string()),
            end: Some("1945-09-02".to_string()),
            point_in_time: None,
        };
        assert!(qualifiers_overlap_years(&wartime, 1939, 1945));
        assert!(!qualifiers_overlap_years(&wartime, 1950, 1960));

        let open_ended = FactQualifiers {
            start: Some("1948-01-01".to_string()),
            end: None,
            point_in_time: None,
        };
        assert!(qualifiers_overlap_years(&open_ended, 1950, 1960));
        assert!(!qualifiers_overlap_years(&open_ended, 1939, 1945));

        let unqualified = FactQualifiers::default();
        assert!(qualifiers_overlap_years(&unqualified, 1939, 1945));

        let pointed = FactQualifiers {
            start: None,
            end: None,
            point_in_time: Some("1952-03-31".to_string()),
        };
        assert!(pointed.point_in_time.is_some());
        assert!(!qualifiers_overlap_years(&pointed, 1939, 1945));
        assert!(qualifiers_overlap_years(&pointed, 1950, 1955));
    }
}
