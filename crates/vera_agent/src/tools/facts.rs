//! Typed fact retrieval for a resolved entity.
//!
//! One dynamic SPARQL query binds the subject and adds a statement/qualifier
//! block per requested property (p:/ps:/pq:), so temporally scoped facts
//! carry their start (P580), end (P582), and point-in-time (P585) dates.
//! The subject must be protocol-authorized: this is where the "no fact
//! without resolution" invariant is enforced.

use crate::tools::{protocol::ProtocolState, ToolError};
use crate::wikidata::{SparqlEndpoint, SparqlResults, SparqlValue};
use std::collections::HashSet;
use tracing::debug;
use vera_common::{
    EntityId, Fact, FactQualifiers, FactValue, PropertyCatalog, PropertyId,
};

/// Values rendered per property in the observation payload.
const MAX_VALUES_PER_PROPERTY: usize = 5;

/// Everything one fetch produced, ready for rendering and grounding.
#[derive(Debug, Clone)]
pub struct FactBundle {
    pub subject: EntityId,
    pub subject_label: String,
    pub description: String,
    /// Properties that survived catalog sanitization, in request order.
    pub requested: Vec<PropertyId>,
    pub facts: Vec<Fact>,
}

/// Fetch typed property values for an authorized entity.
pub async fn fetch(
    endpoint: &dyn SparqlEndpoint,
    catalog: &PropertyCatalog,
    state: &ProtocolState,
    entity: &EntityId,
    properties: &[PropertyId],
) -> Result<FactBundle, ToolError> {
    if !entity.is_well_formed() {
        return Err(ToolError::Rejected(format!(
            "'{}' is not a valid Wikidata QID (expected format: Q12345)",
            entity
        )));
    }
    if !state.is_authorized(entity) {
        return Err(ToolError::Protocol(
            state.unauthorized_subject_message(entity, "fetch_facts"),
        ));
    }

    let requested = catalog.sanitize(properties);
    if requested.is_empty() {
        return Err(ToolError::Rejected(format!(
            "no valid properties requested; accepted properties: {}",
            catalog.prompt_listing()
        )));
    }

    let sparql = build_fact_query(entity, &requested);
    let results = endpoint
        .query(&sparql)
        .await
        .map_err(|e| ToolError::Transient(e.to_string()))?;

    let bundle = bundle_from_results(entity, &requested, catalog, &results);
    debug!(
        "fetched {} fact(s) for {} across {} propert(ies)",
        bundle.facts.len(),
        entity,
        requested.len()
    );
    Ok(bundle)
}

/// One statement/qualifier block per property, labels via the label service.
fn build_fact_query(entity: &EntityId, properties: &[PropertyId]) -> String {
    let mut q = String::from("SELECT ?entityLabel ?entityDescription");
    for property in properties {
        let v = property.var_stem();
        q.push_str(&format!(
            " ?{v}Value ?{v}ValueLabel ?{v}P580 ?{v}P582 ?{v}P585"
        ));
    }
    q.push_str(" WHERE {\n");
    q.push_str(&format!("  BIND(wd:{} AS ?entity)\n", entity.as_str()));
    for property in properties {
        let v = property.var_stem();
        let id = property.as_str();
        q.push_str(&format!(
            "  OPTIONAL {{\n    ?entity p:{id} ?{v}Stmt.\n    ?{v}Stmt ps:{id} ?{v}Value.\n    OPTIONAL {{ ?{v}Stmt pq:P580 ?{v}P580. }}\n    OPTIONAL {{ ?{v}Stmt pq:P582 ?{v}P582. }}\n    OPTIONAL {{ ?{v}Stmt pq:P585 ?{v}P585. }}\n  }}\n"
        ));
    }
    q.push_str("  SERVICE wikibase:label { bd:serviceParam wikibase:language \"en\". }\n");
    q.push_str("} LIMIT 100");
    q
}

fn bundle_from_results(
    entity: &EntityId,
    requested: &[PropertyId],
    catalog: &PropertyCatalog,
    results: &SparqlResults,
) -> FactBundle {
    let subject_label = results
        .first_value("entityLabel")
        .filter(|label| !label.is_empty())
        .unwrap_or(entity.as_str())
        .to_string();
    let description = results
        .first_value("entityDescription")
        .unwrap_or_default()
        .to_string();

    let mut facts = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for property in requested {
        let v = property.var_stem();
        let property_label = catalog.label(property).unwrap_or("").to_string();
        for row in results.rows() {
            let Some(cell) = row.get(&format!("{v}Value")) else {
                continue;
            };
            let value_label = row
                .get(&format!("{v}ValueLabel"))
                .map(|c| c.value.as_str());
            let value = decode_value(cell, value_label);
            let qualifiers = FactQualifiers {
                start: qualifier_date(row.get(&format!("{v}P580"))),
                end: qualifier_date(row.get(&format!("{v}P582"))),
                point_in_time: qualifier_date(row.get(&format!("{v}P585"))),
            };

            let key = format!(
                "{}|{}|{}",
                property,
                value.display(),
                qualifiers.summary()
            );
            if !seen.insert(key) {
                continue;
            }

            facts.push(Fact {
                subject: entity.clone(),
                subject_label: subject_label.clone(),
                property: property.clone(),
                property_label: property_label.clone(),
                value,
                qualifiers,
            });
        }
    }

    FactBundle {
        subject: entity.clone(),
        subject_label,
        description,
        requested: requested.to_vec(),
        facts,
    }
}

/// Value kind from the binding: entity URI, dateTime literal, or plain text.
fn decode_value(cell: &SparqlValue, label: Option<&str>) -> FactValue {
    if let Some(qid) = cell.entity_qid() {
        let label = label.filter(|l| !l.is_empty()).unwrap_or(qid);
        return FactValue::Entity {
            id: EntityId::new(qid),
            label: label.to_string(),
        };
    }
    if cell.is_datetime() || looks_like_datetime(&cell.value) {
        return FactValue::Date {
            date: trim_datetime(&cell.value),
        };
    }
    FactValue::Literal {
        text: cell.value.clone(),
    }
}

fn qualifier_date(cell: Option<&SparqlValue>) -> Option<String> {
    cell.map(|c| trim_datetime(&c.value))
}

/// "1938-09-04T00:00:00Z" has the calendar date up front; keep just that.
fn trim_datetime(value: &str) -> String {
    match value.split_once('T') {
        Some((date, _)) if date.len() >= 10 => date.to_string(),
        _ => value.to_string(),
    }
}

fn looks_like_datetime(value: &str) -> bool {
    let Some((date, time)) = value.split_once('T') else {
        return false;
    };
    if time.is_empty() || date.len() < 10 {
        return false;
    }
    let rest = date.strip_prefix('-').unwrap_or(date);
    rest.chars().all(|c| c.is_ascii_digit() || c == '-')
}

/// Observation payload: entity header, then one line per fact, in the
/// request's property order. Requested properties with no statements are
/// shown explicitly so the oracle does not go looking again.
pub fn render_facts(bundle: &FactBundle, catalog: &PropertyCatalog) -> String {
    let mut out = format!("Entity: {}\nQID: {}\n", bundle.subject_label, bundle.subject);
    if !bundle.description.is_empty() {
        out.push_str(&format!("Description: {}\n", bundle.description));
    }
    out.push('\n');

    for property in &bundle.requested {
        let for_property: Vec<&Fact> = bundle
            .facts
            .iter()
            .filter(|f| &f.property == property)
            .collect();
        if for_property.is_empty() {
            let label = catalog.label(property).unwrap_or("");
            out.push_str(&format!("{}: {} — (no value found)\n", property, label));
            continue;
        }
        for fact in for_property.iter().take(MAX_VALUES_PER_PROPERTY) {
            out.push_str(&fact.render());
            out.push('\n');
        }
        if for_property.len() > MAX_VALUES_PER_PROPERTY {
            out.push_str(&format!(
                "({} more {} values not shown)\n",
                for_property.len() - MAX_VALUES_PER_PROPERTY,
                property
            ));
        }
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wikidata::{FakeEndpoint, ResultsBuilder};
    use vera_common::{EntityCandidate, Resolution};

    fn authorized_state(qid: &str, label: &str) -> ProtocolState {
        let mut state = ProtocolState::new();
        state.register(Resolution {
            mention: label.to_string(),
            candidates: vec![EntityCandidate {
                id: EntityId::new(qid),
                label: label.to_string(),
                description: String::new(),
                instance_of: vec!["human".to_string()],
                aliases: vec![],
                confidence: 0.95,
            }],
        });
        state
    }

    fn turing_employment_results() -> SparqlResults {
        ResultsBuilder::new()
            .row(&[
                ("entityLabel", SparqlValue::literal("Alan Turing")),
                (
                    "entityDescription",
                    SparqlValue::literal("British computer scientist"),
                ),
                ("p108Value", SparqlValue::entity("Q2629491")),
                (
                    "p108ValueLabel",
                    SparqlValue::literal("Government Code and Cypher School"),
                ),
                ("p108P580", SparqlValue::datetime("1938-09-04T00:00:00Z")),
                ("p108P582", SparqlValue::datetime("1945-09-02T00:00:00Z")),
            ])
            .build()
    }

    #[test]
    fn test_query_uses_statement_and_qualifier_paths() {
        let q = build_fact_query(
            &EntityId::new("Q7251"),
            &[PropertyId::new("P108"), PropertyId::new("P569")],
        );
        assert!(q.contains("BIND(wd:Q7251 AS ?entity)"));
        assert!(q.contains("p:P108"));
        assert!(q.contains("ps:P108"));
        assert!(q.contains("pq:P580"));
        assert!(q.contains("pq:P582"));
        assert!(q.contains("pq:P585"));
        assert!(q.contains("?p569Value"));
        assert!(q.contains("LIMIT 100"));
    }

    #[tokio::test]
    async fn test_malformed_qid_rejected_before_network() {
        let fake = FakeEndpoint::new();
        let state = authorized_state("Q7251", "Alan Turing");
        let bad = EntityId::new("search_entity_candidates(...)[0]");

        let result = fetch(&fake, &PropertyCatalog::standard(), &state, &bad, &[]).await;
        match result {
            Err(ToolError::Rejected(reason)) => {
                assert!(reason.contains("not a valid Wikidata QID"));
            }
            other => panic!("expected rejection, got {:?}", other.map(|b| b.facts)),
        }
        assert_eq!(fake.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unauthorized_subject_is_a_protocol_violation() {
        let fake = FakeEndpoint::new();
        let state = ProtocolState::new();

        let result = fetch(
            &fake,
            &PropertyCatalog::standard(),
            &state,
            &EntityId::new("Q7251"),
            &[PropertyId::new("P108")],
        )
        .await;
        match result {
            Err(ToolError::Protocol(reason)) => {
                assert!(reason.contains("Tool-order protocol violation"));
                assert!(reason.contains("resolve_entity"));
            }
            other => panic!("expected protocol violation, got {:?}", other.map(|b| b.facts)),
        }
        assert_eq!(fake.call_count(), 0);
    }

    #[tokio::test]
    async fn test_all_unknown_properties_is_a_rejection() {
        let fake = FakeEndpoint::new();
        let state = authorized_state("Q7251", "Alan Turing");

        let result = fetch(
            &fake,
            &PropertyCatalog::standard(),
            &state,
            &EntityId::new("Q7251"),
            &[PropertyId::new("P99999")],
        )
        .await;
        match result {
            Err(ToolError::Rejected(reason)) => {
                assert!(reason.contains("no valid properties"));
            }
            other => panic!("expected rejection, got {:?}", other.map(|b| b.facts)),
        }
    }

    #[tokio::test]
    async fn test_employment_fact_carries_trimmed_qualifiers() {
        let fake = FakeEndpoint::new().on("p:P108", turing_employment_results());
        let state = authorized_state("Q7251", "Alan Turing");

        let bundle = fetch(
            &fake,
            &PropertyCatalog::standard(),
            &state,
            &EntityId::new("Q7251"),
            &[PropertyId::new("P108")],
        )
        .await
        .unwrap();

        assert_eq!(bundle.facts.len(), 1);
        let fact = &bundle.facts[0];
        assert_eq!(fact.subject.as_str(), "Q7251");
        assert!(matches!(
            &fact.value,
            FactValue::Entity { label, .. } if label == "Government Code and Cypher School"
        ));
        assert_eq!(fact.qualifiers.start.as_deref(), Some("1938-09-04"));
        assert_eq!(fact.qualifiers.end.as_deref(), Some("1945-09-02"));

        let rendered = render_facts(&bundle, &PropertyCatalog::standard());
        assert!(rendered.contains("Entity: Alan Turing"));
        assert!(rendered.contains("QID: Q7251"));
        assert!(rendered.contains("P108: employer"));
        assert!(rendered.contains("start: 1938-09-04"));
        assert!(rendered.contains("end: 1945-09-02"));
    }

    #[tokio::test]
    async fn test_date_values_are_trimmed_to_calendar_dates() {
        let results = ResultsBuilder::new()
            .row(&[
                ("entityLabel", SparqlValue::literal("Alan Turing")),
                ("p569Value", SparqlValue::datetime("1912-06-23T00:00:00Z")),
            ])
            .build();
        let fake = FakeEndpoint::new().on("p:P569", results);
        let state = authorized_state("Q7251", "Alan Turing");

        let bundle = fetch(
            &fake,
            &PropertyCatalog::standard(),
            &state,
            &EntityId::new("Q7251"),
            &[PropertyId::new("P569")],
        )
        .await
        .unwrap();

        assert!(matches!(
            &bundle.facts[0].value,
            FactValue::Date { date } if date == "1912-06-23"
        ));
    }

    #[tokio::test]
    async fn test_duplicate_bindings_collapse_to_one_fact() {
        let results = ResultsBuilder::new()
            .row(&[
                ("entityLabel", SparqlValue::literal("France")),
                ("p36Value", SparqlValue::entity("Q90")),
                ("p36ValueLabel", SparqlValue::literal("Paris")),
            ])
            .row(&[
                ("entityLabel", SparqlValue::literal("France")),
                ("p36Value", SparqlValue::entity("Q90")),
                ("p36ValueLabel", SparqlValue::literal("Paris")),
            ])
            .build();
        let fake = FakeEndpoint::new().on("p:P36", results);
        let state = authorized_state("Q142", "France");

        let bundle = fetch(
            &fake,
            &PropertyCatalog::standard(),
            &state,
            &EntityId::new("Q142"),
            &[PropertyId::new("P36")],
        )
        .await
        .unwrap();
        assert_eq!(bundle.facts.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_properties_skipped_known_kept() {
        let fake = FakeEndpoint::new().on("p:P36", ResultsBuilder::new().build());
        let state = authorized_state("Q142", "France");

        let bundle = fetch(
            &fake,
            &PropertyCatalog::standard(),
            &state,
            &EntityId::new("Q142"),
            &[PropertyId::new("P99999"), PropertyId::new("P36")],
        )
        .await
        .unwrap();
        assert_eq!(bundle.requested, vec![PropertyId::new("P36")]);
        assert!(bundle.facts.is_empty());

        let rendered = render_facts(&bundle, &PropertyCatalog::standard());
        assert!(rendered.contains("(no value found)"));
    }
}
