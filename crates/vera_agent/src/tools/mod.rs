//! Retrieval tools and their dispatch.
//!
//! The action set is closed: the orchestrator hands a `ToolRequest` variant
//! to `Toolbox::dispatch`, which enforces the tool-order protocol, retries a
//! transient failure once, and renders the observation shown to the oracle.
//! Every path out of dispatch is an outcome, never a panic or a propagated
//! error: a failure that survives the retry reads as "no data found".

pub mod facts;
pub mod narrative;
pub mod protocol;
pub mod query;
pub mod resolver;

use crate::wikidata::SparqlEndpoint;
use narrative::ArticleFetcher;
use protocol::ProtocolState;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use vera_common::{Fact, Passage, PropertyCatalog, Resolution, RunConfig, ToolRequest, ToolStatus};

/// Typed failure of one tool invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Network or timeout failure; retried once, then treated as empty.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Invalid input, rejected before any network call. Not retryable.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Tool-order violation (unresolved subject, narrative before
    /// structured retrieval). Not retryable, no network call.
    #[error("{0}")]
    Protocol(String),
}

/// What a dispatched step produced, for the engine to record as evidence.
#[derive(Debug)]
pub enum DispatchPayload {
    Candidates(Resolution),
    Facts(Vec<Fact>),
    Passage(Option<Passage>),
    Rows(usize),
    Nothing,
}

/// One dispatched step: trace status and summary, oracle observation, and
/// the typed payload.
#[derive(Debug)]
pub struct DispatchResult {
    pub status: ToolStatus,
    pub summary: String,
    pub observation: String,
    pub payload: DispatchPayload,
}

impl DispatchResult {
    fn rejected(reason: String) -> Self {
        Self {
            status: ToolStatus::Rejected,
            summary: format!("rejected: {}", clip(&reason, 80)),
            observation: format!("REJECTED: {reason}"),
            payload: DispatchPayload::Nothing,
        }
    }

    fn failed(tool: &str, reason: String) -> Self {
        Self {
            status: ToolStatus::Failed,
            summary: format!("failed: {}", clip(&reason, 80)),
            observation: format!(
                "TOOL FAILURE ({tool}): {reason}\nTreat this as no data found and continue."
            ),
            payload: DispatchPayload::Nothing,
        }
    }
}

/// The agent's retrieval tools behind their trait seams.
pub struct Toolbox {
    endpoint: Arc<dyn SparqlEndpoint>,
    articles: Arc<dyn ArticleFetcher>,
    catalog: PropertyCatalog,
}

impl Toolbox {
    pub fn new(endpoint: Arc<dyn SparqlEndpoint>, articles: Arc<dyn ArticleFetcher>) -> Self {
        Self {
            endpoint,
            articles,
            catalog: PropertyCatalog::standard(),
        }
    }

    pub fn catalog(&self) -> &PropertyCatalog {
        &self.catalog
    }

    /// Execute one action under the run's protocol state.
    pub async fn dispatch(
        &self,
        request: &ToolRequest,
        state: &mut ProtocolState,
        config: &RunConfig,
    ) -> DispatchResult {
        debug!("dispatching {}", request.name());
        match request {
            ToolRequest::ResolveEntity { mention, type_hint } => {
                self.resolve(mention, type_hint.as_deref(), state, config)
                    .await
            }
            ToolRequest::FetchFacts { entity, properties } => {
                // Counts as a structured attempt whatever the outcome.
                state.mark_structured_attempt();
                let mut outcome = facts::fetch(
                    self.endpoint.as_ref(),
                    &self.catalog,
                    state,
                    entity,
                    properties,
                )
                .await;
                if matches!(outcome, Err(ToolError::Transient(_))) {
                    warn!("fetch_facts transient failure, retrying once");
                    outcome = facts::fetch(
                        self.endpoint.as_ref(),
                        &self.catalog,
                        state,
                        entity,
                        properties,
                    )
                    .await;
                }
                match outcome {
                    Ok(bundle) => {
                        let status = if bundle.facts.is_empty() {
                            ToolStatus::Empty
                        } else {
                            ToolStatus::Ok
                        };
                        DispatchResult {
                            status,
                            summary: format!("{} fact(s) for {}", bundle.facts.len(), entity),
                            observation: facts::render_facts(&bundle, &self.catalog),
                            payload: DispatchPayload::Facts(bundle.facts),
                        }
                    }
                    Err(ToolError::Transient(reason)) => {
                        DispatchResult::failed("fetch_facts", reason)
                    }
                    Err(ToolError::Rejected(reason)) | Err(ToolError::Protocol(reason)) => {
                        DispatchResult::rejected(reason)
                    }
                }
            }
            ToolRequest::ExecuteQuery { sparql, max_rows } => {
                state.mark_structured_attempt();
                let cap = max_rows.unwrap_or(config.max_rows).min(config.max_rows);
                let mut outcome = query::execute_read_only(self.endpoint.as_ref(), sparql, cap).await;
                if matches!(outcome, Err(ToolError::Transient(_))) {
                    warn!("execute_query transient failure, retrying once");
                    outcome = query::execute_read_only(self.endpoint.as_ref(), sparql, cap).await;
                }
                match outcome {
                    Ok(rows) => {
                        let status = if rows.is_empty() {
                            ToolStatus::Empty
                        } else {
                            ToolStatus::Ok
                        };
                        DispatchResult {
                            status,
                            summary: format!("{} row(s)", rows.len()),
                            observation: query::render_rows(&rows),
                            payload: DispatchPayload::Rows(rows.len()),
                        }
                    }
                    Err(ToolError::Transient(reason)) => {
                        DispatchResult::failed("execute_query", reason)
                    }
                    Err(ToolError::Rejected(reason)) | Err(ToolError::Protocol(reason)) => {
                        DispatchResult::rejected(reason)
                    }
                }
            }
            ToolRequest::RetrieveNarrative { entity } => {
                if !state.has_structured_attempt() {
                    return DispatchResult::rejected(protocol::narrative_gate_message().to_string());
                }
                let mut outcome = narrative::retrieve(
                    self.endpoint.as_ref(),
                    self.articles.as_ref(),
                    state,
                    entity,
                    config.max_article_chars,
                )
                .await;
                if matches!(outcome, Err(ToolError::Transient(_))) {
                    warn!("retrieve_narrative transient failure, retrying once");
                    outcome = narrative::retrieve(
                        self.endpoint.as_ref(),
                        self.articles.as_ref(),
                        state,
                        entity,
                        config.max_article_chars,
                    )
                    .await;
                }
                match outcome {
                    Ok(Some(passage)) => DispatchResult {
                        status: ToolStatus::Ok,
                        summary: format!(
                            "article \"{}\" ({} chars{})",
                            passage.title,
                            passage.text.chars().count(),
                            if passage.truncated { ", truncated" } else { "" }
                        ),
                        observation: narrative::render_passage(&passage),
                        payload: DispatchPayload::Passage(Some(passage)),
                    },
                    Ok(None) => DispatchResult {
                        status: ToolStatus::Empty,
                        summary: format!("no article for {}", entity),
                        observation: format!("No encyclopedic article found for {entity}."),
                        payload: DispatchPayload::Passage(None),
                    },
                    Err(ToolError::Transient(reason)) => {
                        DispatchResult::failed("retrieve_narrative", reason)
                    }
                    Err(ToolError::Rejected(reason)) | Err(ToolError::Protocol(reason)) => {
                        DispatchResult::rejected(reason)
                    }
                }
            }
        }
    }

    /// Resolution with idempotent replay: a mention already in the ledger
    /// replays the recorded outcome with no network call and cannot flip it.
    async fn resolve(
        &self,
        mention: &str,
        type_hint: Option<&str>,
        state: &mut ProtocolState,
        config: &RunConfig,
    ) -> DispatchResult {
        if let Some(recorded) = state.lookup(mention).cloned() {
            let status = if recorded.is_miss() {
                ToolStatus::Empty
            } else {
                ToolStatus::Ok
            };
            let mut observation = resolver::render_candidates(&recorded);
            observation.push_str(
                "\n(Replayed: this mention was already resolved in this run and the outcome cannot change.)",
            );
            return DispatchResult {
                status,
                summary: format!(
                    "replayed: {} candidate(s) for \"{}\"",
                    recorded.candidates.len(),
                    mention
                ),
                observation,
                payload: DispatchPayload::Candidates(recorded),
            };
        }

        let mut outcome = resolver::resolve(
            self.endpoint.as_ref(),
            mention,
            type_hint,
            config.max_candidates,
        )
        .await;
        if matches!(outcome, Err(ToolError::Transient(_))) {
            warn!("resolve_entity transient failure, retrying once");
            outcome = resolver::resolve(
                self.endpoint.as_ref(),
                mention,
                type_hint,
                config.max_candidates,
            )
            .await;
        }

        match outcome {
            Ok(resolution) => {
                state.register(resolution.clone());
                let status = if resolution.is_miss() {
                    ToolStatus::Empty
                } else {
                    ToolStatus::Ok
                };
                DispatchResult {
                    status,
                    summary: format!(
                        "{} candidate(s) for \"{}\"",
                        resolution.candidates.len(),
                        mention
                    ),
                    observation: resolver::render_candidates(&resolution),
                    payload: DispatchPayload::Candidates(resolution),
                }
            }
            Err(ToolError::Transient(reason)) => DispatchResult::failed("resolve_entity", reason),
            Err(ToolError::Rejected(reason)) | Err(ToolError::Protocol(reason)) => {
                DispatchResult::rejected(reason)
            }
        }
    }
}

fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wikidata::{FakeEndpoint, ResultsBuilder, SparqlValue};
    use vera_common::EntityId;

    fn turing_search() -> crate::wikidata::SparqlResults {
        ResultsBuilder::new()
            .row(&[
                ("item", SparqlValue::entity("Q7251")),
                ("itemLabel", SparqlValue::literal("Alan Turing")),
                (
                    "itemDescription",
                    SparqlValue::literal("British computer scientist"),
                ),
                ("typeLabel", SparqlValue::literal("human")),
            ])
            .build()
    }

    fn toolbox(endpoint: FakeEndpoint) -> (Toolbox, Arc<FakeEndpoint>) {
        let endpoint = Arc::new(endpoint);
        let articles = Arc::new(narrative::FakeArticles::new());
        (
            Toolbox::new(endpoint.clone(), articles),
            endpoint,
        )
    }

    #[tokio::test]
    async fn test_repeat_resolution_replays_without_network() {
        let (toolbox, endpoint) = toolbox(FakeEndpoint::new().on("EntitySearch", turing_search()));
        let mut state = ProtocolState::new();
        let config = RunConfig::default();
        let request = ToolRequest::ResolveEntity {
            mention: "Alan Turing".to_string(),
            type_hint: None,
        };

        let first = toolbox.dispatch(&request, &mut state, &config).await;
        assert_eq!(first.status, ToolStatus::Ok);
        assert_eq!(endpoint.call_count(), 1);

        let second = toolbox.dispatch(&request, &mut state, &config).await;
        assert_eq!(second.status, ToolStatus::Ok);
        assert!(second.summary.starts_with("replayed"));
        assert!(second.observation.contains("outcome cannot change"));
        // Still exactly one network call.
        assert_eq!(endpoint.call_count(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_once_then_succeeds() {
        let (toolbox, endpoint) = toolbox(
            FakeEndpoint::new().on_after_failures("EntitySearch", 1, turing_search()),
        );
        let mut state = ProtocolState::new();
        let config = RunConfig::default();
        let request = ToolRequest::ResolveEntity {
            mention: "Alan Turing".to_string(),
            type_hint: None,
        };

        let result = toolbox.dispatch(&request, &mut state, &config).await;
        assert_eq!(result.status, ToolStatus::Ok);
        assert_eq!(endpoint.call_count(), 2);
    }

    #[tokio::test]
    async fn test_double_failure_reads_as_no_data() {
        let (toolbox, endpoint) = toolbox(
            FakeEndpoint::new().on_after_failures("EntitySearch", 5, turing_search()),
        );
        let mut state = ProtocolState::new();
        let config = RunConfig::default();
        let request = ToolRequest::ResolveEntity {
            mention: "Alan Turing".to_string(),
            type_hint: None,
        };

        let result = toolbox.dispatch(&request, &mut state, &config).await;
        assert_eq!(result.status, ToolStatus::Failed);
        assert!(result.observation.contains("no data found"));
        // One retry only.
        assert_eq!(endpoint.call_count(), 2);
        // The failure is not recorded as a resolution outcome.
        assert!(state.lookup("Alan Turing").is_none());
    }

    #[tokio::test]
    async fn test_narrative_gated_until_structured_attempt() {
        let (toolbox, endpoint) = toolbox(FakeEndpoint::new().on("EntitySearch", turing_search()));
        let mut state = ProtocolState::new();
        let config = RunConfig::default();

        let resolve = ToolRequest::ResolveEntity {
            mention: "Alan Turing".to_string(),
            type_hint: None,
        };
        toolbox.dispatch(&resolve, &mut state, &config).await;

        let narrative = ToolRequest::RetrieveNarrative {
            entity: EntityId::new("Q7251"),
        };
        let gated = toolbox.dispatch(&narrative, &mut state, &config).await;
        assert_eq!(gated.status, ToolStatus::Rejected);
        assert!(gated.observation.contains("protocol violation"));

        // A structured attempt opens the gate, even one that finds nothing.
        let fetch = ToolRequest::FetchFacts {
            entity: EntityId::new("Q7251"),
            properties: vec![vera_common::PropertyId::new("P108")],
        };
        toolbox.dispatch(&fetch, &mut state, &config).await;

        let calls_before = endpoint.call_count();
        let after = toolbox.dispatch(&narrative, &mut state, &config).await;
        // No article scripted: empty, but the gate no longer rejects.
        assert_eq!(after.status, ToolStatus::Empty);
        assert!(endpoint.call_count() > calls_before);
    }

    #[tokio::test]
    async fn test_rejected_query_counts_as_structured_attempt() {
        let (toolbox, _) = toolbox(FakeEndpoint::new().on("EntitySearch", turing_search()));
        let mut state = ProtocolState::new();
        let config = RunConfig::default();

        let bad_query = ToolRequest::ExecuteQuery {
            sparql: "SELECT ?x WHERE { ?x ?p ?o }".to_string(),
            max_rows: None,
        };
        let result = toolbox.dispatch(&bad_query, &mut state, &config).await;
        assert_eq!(result.status, ToolStatus::Rejected);
        assert!(result.observation.contains("LIMIT"));
        // The rejection still opens the narrative fallback path.
        assert!(state.has_structured_attempt());
    }

    #[tokio::test]
    async fn test_mutating_query_rejected_with_reason() {
        let (toolbox, endpoint) = toolbox(FakeEndpoint::new());
        let mut state = ProtocolState::new();
        let config = RunConfig::default();

        let request = ToolRequest::ExecuteQuery {
            sparql: "DELETE WHERE { ?x ?p ?o } LIMIT 1".to_string(),
            max_rows: Some(5),
        };
        let result = toolbox.dispatch(&request, &mut state, &config).await;
        assert_eq!(result.status, ToolStatus::Rejected);
        assert!(result.observation.contains("not allowed"));
        assert_eq!(endpoint.call_count(), 0);
    }
}
