//! Answer composition and finalization.
//!
//! Two jobs: scrub retrieval-process references out of the oracle's final
//! text (the user asked a question, not how it was answered), and build the
//! forced answer when the budget runs out or the oracle fails. Forced
//! composition classifies every mention in the working set and renders
//! refusals for anything unverifiable or ambiguous instead of dropping it.

use crate::policy::{classify, EvidencePool};
use crate::tools::protocol::ProtocolState;
use once_cell::sync::Lazy;
use regex::Regex;
use vera_common::prompts::{refusal_collaboration, refusal_relationship};
use vera_common::{Citation, Claim, ClaimStatus};

/// A sentence naming any of these is about the retrieval process, not the
/// answer, and is scrubbed.
static PROCESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(wikidata|wikipedia|sparql|knowledge base|search results?|tool call|entity search|QID)\b|\bQ\d{2,}\b",
    )
    .expect("process reference pattern")
});

/// Leading process phrases trimmed off a sentence that is otherwise factual.
static LEAD_IN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(according to (the )?(wikidata|wikipedia|search results?|retrieved (data|facts?)|the knowledge base),?\s+|based on (the )?(wikidata|wikipedia|search results?|retrieved (data|facts?)|the knowledge base),?\s+)",
    )
    .expect("lead-in pattern")
});

static PYTHON_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<\|python_tag\|>[^<]*").expect("python tag pattern"));

/// True when the text is tool mechanics rather than an answer: a raw JSON
/// payload, a tool-call tag, or an announcement of the next retrieval step.
pub fn is_process_message(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return true;
    }
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return true;
    }
    if trimmed.contains("<|python_tag|>") {
        return true;
    }
    static ANNOUNCE_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)^(let me|i( will|'ll)( now)?|now i( will|'ll)|calling|invoking|searching|fetching|looking up)\b")
            .expect("announcement pattern")
    });
    ANNOUNCE_RE.is_match(trimmed)
}

/// Scrub retrieval-process references from the oracle's final text.
///
/// A pure tool payload finalizes to the empty string; the engine then falls
/// back to forced composition. Sentences that only lead with a process
/// phrase keep their factual remainder; sentences about the process itself
/// are dropped whole.
pub fn finalize_answer_text(raw: &str) -> String {
    let without_tags = PYTHON_TAG_RE.replace_all(raw, "");
    let trimmed = without_tags.trim();
    if is_process_message(trimmed) {
        return String::new();
    }

    let mut kept: Vec<String> = Vec::new();
    for sentence in split_sentences(trimmed) {
        let cleaned = LEAD_IN_RE.replace(sentence.trim(), "");
        let cleaned = capitalize_first(cleaned.trim());
        if cleaned.is_empty() || PROCESS_RE.is_match(&cleaned) {
            continue;
        }
        kept.push(cleaned);
    }
    kept.join(" ").trim().to_string()
}

fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        let is_break = matches!(b, b'.' | b'!' | b'?')
            && bytes.get(i + 1).is_none_or(|next| next.is_ascii_whitespace());
        if is_break {
            sentences.push(&text[start..=i]);
            start = i + 1;
        }
    }
    if start < text.len() {
        let tail = text[start..].trim();
        if !tail.is_empty() {
            sentences.push(tail);
        }
    }
    sentences
}

fn capitalize_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// A refusal sentence, by the pinned wording.
pub fn looks_like_refusal(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("i cannot verify") || lower.contains("i cannot determine")
}

/// The forced answer: text, per-mention claims, and flattened citations.
pub struct ComposedAnswer {
    pub text: String,
    pub claims: Vec<Claim>,
    pub citations: Vec<Citation>,
    pub is_refusal: bool,
}

/// Compose an answer from collected evidence without the oracle.
///
/// Every mention in the working set is classified; UNVERIFIABLE and
/// AMBIGUOUS mentions render as explicit refusals. For a two-entity
/// relationship question with an unverified endpoint, the pairwise refusal
/// replaces the individual ones in the text (the claims keep both).
pub fn compose_forced(
    question: &str,
    mentions: &[String],
    state: &ProtocolState,
    pool: &EvidencePool,
) -> ComposedAnswer {
    let claims: Vec<Claim> = mentions
        .iter()
        .map(|mention| classify(mention, state.lookup(mention), pool))
        .collect();

    let citations: Vec<Citation> = claims
        .iter()
        .flat_map(|c| c.citations.iter().cloned())
        .collect();
    let grounded: Vec<&Claim> = claims
        .iter()
        .filter(|c| c.status == ClaimStatus::Grounded)
        .collect();
    let abstained: Vec<&Claim> = claims
        .iter()
        .filter(|c| c.status != ClaimStatus::Grounded)
        .collect();

    let mut sentences: Vec<String> = grounded.iter().map(|c| c.text.clone()).collect();

    if let Some(pairwise) = pairwise_refusal(question, &claims) {
        sentences.push(pairwise);
    } else {
        sentences.extend(abstained.iter().map(|c| c.text.clone()));
    }

    if sentences.is_empty() {
        sentences.push(
            "I could not verify enough information to answer this question.".to_string(),
        );
    }

    ComposedAnswer {
        text: sentences.join(" "),
        is_refusal: grounded.is_empty(),
        claims,
        citations,
    }
}

/// Pairwise refusal for a two-entity relationship or collaboration question
/// where at least one endpoint is not grounded.
fn pairwise_refusal(question: &str, claims: &[Claim]) -> Option<String> {
    if claims.len() != 2 {
        return None;
    }
    if claims.iter().all(|c| c.status == ClaimStatus::Grounded) {
        return None;
    }
    let lower = question.to_lowercase();
    let collaboration = lower.contains("collaborat")
        || lower.contains("work together")
        || lower.contains("worked together");
    let relationship =
        collaboration || lower.contains("relationship") || lower.contains("related");
    if !relationship {
        return None;
    }
    let (a, b) = (&claims[0].subject, &claims[1].subject);
    Some(if collaboration {
        refusal_collaboration(a, b)
    } else {
        refusal_relationship(a, b)
    })
}
