//! Entity resolution against the Wikidata namespace.
//!
//! A mention goes through EntitySearch, candidates are deduplicated and
//! stripped of Wikimedia-internal items, then scored with a deterministic
//! label-similarity times rank-decay confidence. An empty candidate list is
//! a first-class miss; nothing here ever fabricates an id.

use crate::policy::MIN_CONFIDENCE;
use crate::tools::ToolError;
use crate::wikidata::{SparqlEndpoint, SparqlResults};
use std::collections::HashMap;
use tracing::debug;
use vera_common::{EntityCandidate, EntityId, Resolution};

/// Instance-of labels that mark namespace plumbing, not answerable entities.
const WIKIMEDIA_INTERNAL: [&str; 6] = [
    "Wikimedia category",
    "Wikimedia disambiguation page",
    "Wikimedia template",
    "Wikimedia project page",
    "Wikimedia list article",
    "Wikimedia internal item",
];

/// Honorific prefixes dropped from the search term (the mention keeps them).
const HONORIFICS: [&str; 14] = [
    "dr", "dr.", "prof", "prof.", "mr", "mr.", "mrs", "mrs.", "ms", "ms.", "sir", "dame",
    "lord", "lady",
];

const MAX_INSTANCE_OF: usize = 3;
const MAX_ALIASES: usize = 5;

/// Resolve a surface-form mention to candidate entities, best first.
pub async fn resolve(
    endpoint: &dyn SparqlEndpoint,
    mention: &str,
    type_hint: Option<&str>,
    max_candidates: usize,
) -> Result<Resolution, ToolError> {
    let term = search_term(mention);
    if term.is_empty() {
        return Err(ToolError::Rejected(
            "mention is empty after normalization".to_string(),
        ));
    }

    let sparql = build_search_query(&term, max_candidates);
    let results = endpoint
        .query(&sparql)
        .await
        .map_err(|e| ToolError::Transient(e.to_string()))?;

    let candidates = score_candidates(&term, type_hint, max_candidates, &results);
    debug!(
        "resolved \"{}\" to {} candidate(s)",
        mention,
        candidates.len()
    );

    Ok(Resolution {
        mention: mention.to_string(),
        candidates,
    })
}

/// Search term for a mention: NBSP normalized, whitespace collapsed,
/// leading honorifics dropped.
pub fn search_term(mention: &str) -> String {
    let cleaned = mention.replace('\u{00a0}', " ");
    let mut tokens: Vec<&str> = cleaned.split_whitespace().collect();
    while let Some(first) = tokens.first() {
        if tokens.len() > 1 && HONORIFICS.contains(&first.to_lowercase().as_str()) {
            tokens.remove(0);
        } else {
            break;
        }
    }
    tokens.join(" ")
}

fn build_search_query(term: &str, max_candidates: usize) -> String {
    let escaped = term.replace('\\', "\\\\").replace('"', "\\\"");
    // Twice the candidate cap: type and alias joins repeat rows per entity.
    let row_limit = max_candidates * 2;
    format!(
        "SELECT ?item ?itemLabel ?itemDescription ?typeLabel ?alias WHERE {{\n\
         \x20 SERVICE wikibase:mwapi {{\n\
         \x20   bd:serviceParam wikibase:endpoint \"www.wikidata.org\";\n\
         \x20                   wikibase:api \"EntitySearch\";\n\
         \x20                   mwapi:search \"{escaped}\";\n\
         \x20                   mwapi:language \"en\".\n\
         \x20   ?item wikibase:apiOutputItem mwapi:item.\n\
         \x20 }}\n\
         \x20 OPTIONAL {{ ?item wdt:P31 ?type. }}\n\
         \x20 OPTIONAL {{ ?item skos:altLabel ?alias. FILTER(LANG(?alias) = \"en\") }}\n\
         \x20 SERVICE wikibase:label {{ bd:serviceParam wikibase:language \"en\". }}\n\
         }} LIMIT {row_limit}"
    )
}

struct Accumulated {
    id: EntityId,
    label: String,
    description: String,
    instance_of: Vec<String>,
    aliases: Vec<String>,
}

/// Deduplicate rows by QID, drop namespace plumbing, score and sort.
fn score_candidates(
    term: &str,
    type_hint: Option<&str>,
    max_candidates: usize,
    results: &SparqlResults,
) -> Vec<EntityCandidate> {
    let mut order: Vec<Accumulated> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in results.rows() {
        let Some(qid) = row.get("item").and_then(|v| v.entity_qid()) else {
            continue;
        };
        let slot = *index.entry(qid.to_string()).or_insert_with(|| {
            order.push(Accumulated {
                id: EntityId::new(qid),
                label: row
                    .get("itemLabel")
                    .map(|v| v.value.clone())
                    .unwrap_or_else(|| qid.to_string()),
                description: row
                    .get("itemDescription")
                    .map(|v| v.value.clone())
                    .unwrap_or_default(),
                instance_of: Vec::new(),
                aliases: Vec::new(),
            });
            order.len() - 1
        });

        let acc = &mut order[slot];
        if let Some(type_label) = row.get("typeLabel").map(|v| v.value.as_str()) {
            if !type_label.is_empty()
                && !acc.instance_of.iter().any(|t| t == type_label)
                && acc.instance_of.len() < MAX_INSTANCE_OF
            {
                acc.instance_of.push(type_label.to_string());
            }
        }
        if let Some(alias) = row.get("alias").map(|v| v.value.as_str()) {
            if !alias.is_empty()
                && !acc.aliases.iter().any(|a| a == alias)
                && acc.aliases.len() < MAX_ALIASES
            {
                acc.aliases.push(alias.to_string());
            }
        }
    }

    let mut candidates: Vec<EntityCandidate> = order
        .into_iter()
        .filter(|acc| {
            !acc.instance_of
                .iter()
                .any(|t| WIKIMEDIA_INTERNAL.contains(&t.as_str()))
        })
        .enumerate()
        .map(|(rank, acc)| {
            let confidence = confidence_for(term, type_hint, rank, &acc);
            EntityCandidate {
                id: acc.id,
                label: acc.label,
                description: acc.description,
                instance_of: acc.instance_of,
                aliases: acc.aliases,
                confidence,
            }
        })
        .filter(|c| c.confidence >= MIN_CONFIDENCE)
        .collect();

    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(max_candidates);
    candidates
}

fn confidence_for(
    term: &str,
    type_hint: Option<&str>,
    rank: usize,
    acc: &Accumulated,
) -> f64 {
    let label_score = label_similarity(term, &acc.label);
    let alias_score = acc
        .aliases
        .iter()
        .map(|a| label_similarity(term, a))
        .fold(0.0, f64::max);
    let decay = 1.0 / (1.0 + 0.1 * rank as f64);
    let mut confidence = label_score.max(alias_score) * decay;

    if let Some(hint) = type_hint {
        let keywords = hint_keywords(hint);
        let in_types = keywords.iter().any(|kw| {
            acc.instance_of
                .iter()
                .any(|t| t.to_lowercase().contains(kw))
        });
        if in_types {
            confidence += 0.1;
        } else if keywords
            .iter()
            .any(|kw| acc.description.to_lowercase().contains(kw))
        {
            confidence += 0.05;
        }
    }

    confidence.clamp(0.0, 1.0)
}

/// Character-bigram Dice coefficient, case-insensitive. Exact match is 1.0.
pub fn label_similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    if a == b {
        return 1.0;
    }
    let grams_a = bigrams(&a);
    let grams_b = bigrams(&b);
    if grams_a.is_empty() || grams_b.is_empty() {
        return 0.0;
    }

    let mut counts: HashMap<(char, char), usize> = HashMap::new();
    for gram in &grams_a {
        *counts.entry(*gram).or_insert(0) += 1;
    }
    let mut shared = 0usize;
    for gram in &grams_b {
        if let Some(left) = counts.get_mut(gram) {
            if *left > 0 {
                *left -= 1;
                shared += 1;
            }
        }
    }
    2.0 * shared as f64 / (grams_a.len() + grams_b.len()) as f64
}

fn bigrams(s: &str) -> Vec<(char, char)> {
    let chars: Vec<char> = s.chars().collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

/// Instance-of keywords for an entity-type hint.
fn hint_keywords(hint: &str) -> &'static [&'static str] {
    match hint.to_lowercase().as_str() {
        "person" | "human" | "people" => &["human"],
        "place" | "city" | "town" => &["city", "town", "municipality", "settlement", "capital"],
        "country" | "state" | "nation" => &["country", "sovereign state", "state"],
        "organization" | "organisation" | "company" => {
            &["organization", "business", "enterprise", "company"]
        }
        "university" | "school" | "college" => &["university", "college", "school"],
        "film" | "movie" => &["film"],
        "book" | "novel" => &["book", "literary work", "novel"],
        "band" | "group" => &["musical group", "band"],
        "river" => &["river"],
        "mountain" => &["mountain"],
        "language" => &["language"],
        "award" | "prize" => &["award"],
        _ => &[],
    }
}

/// Observation payload for a resolution outcome.
pub fn render_candidates(resolution: &Resolution) -> String {
    if resolution.is_miss() {
        return format!("No candidates found for \"{}\".", resolution.mention);
    }
    let mut out = format!(
        "Found {} candidate(s) for \"{}\":\n",
        resolution.candidates.len(),
        resolution.mention
    );
    for (i, candidate) in resolution.candidates.iter().enumerate() {
        let description = if candidate.description.is_empty() {
            "no description"
        } else {
            candidate.description.as_str()
        };
        let types = if candidate.instance_of.is_empty() {
            String::new()
        } else {
            format!(" [{}]", candidate.instance_of.join(", "))
        };
        out.push_str(&format!(
            "{}. {} ({}) - {}{} (confidence {:.2})\n",
            i + 1,
            candidate.label,
            candidate.id,
            description,
            types,
            candidate.confidence
        ));
    }
    out.trim_end().to_string()
}
