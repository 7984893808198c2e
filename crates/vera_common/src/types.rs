//! Core data types for the Vera answering pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default decision-loop step budget.
pub const DEFAULT_STEP_BUDGET: u32 = 8;

/// Default sampling temperature for the decision oracle.
pub const DEFAULT_TEMPERATURE: f32 = 0.1;

/// Default model served by the local Ollama daemon.
pub const DEFAULT_MODEL: &str = "qwen2.5:7b-instruct";

/// Max candidates a single resolution returns.
pub const MAX_SEARCH_RESULTS: usize = 10;

/// Default row cap for ad-hoc SPARQL queries.
pub const DEFAULT_SPARQL_LIMIT: usize = 25;

/// Cap on retrieved article text, in characters.
pub const MAX_ARTICLE_CHARS: usize = 8000;

/// Check the `Q` + digits shape of an entity id.
pub fn looks_like_qid(s: &str) -> bool {
    s.len() > 1 && s.starts_with('Q') && s[1..].bytes().all(|b| b.is_ascii_digit())
}

/// Check the `P` + digits shape of a property id.
pub fn looks_like_pid(s: &str) -> bool {
    s.len() > 1 && s.starts_with('P') && s[1..].bytes().all(|b| b.is_ascii_digit())
}

/// Knowledge-base entity identifier ("Q42").
///
/// Construction normalizes case and whitespace; shape is enforced at the
/// tool boundary so that ids arriving over the oracle wire can be rejected
/// with a message instead of a deserialization failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        EntityId(id.into().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_well_formed(&self) -> bool {
        looks_like_qid(&self.0)
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Knowledge-base property identifier ("P569").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyId(String);

impl PropertyId {
    pub fn new(id: impl Into<String>) -> Self {
        PropertyId(id.into().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_well_formed(&self) -> bool {
        looks_like_pid(&self.0)
    }

    /// Lowercased form used as a SPARQL variable stem ("p569").
    pub fn var_stem(&self) -> String {
        self.0.to_lowercase()
    }
}

impl std::fmt::Display for PropertyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One knowledge-base match for a surface-form mention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityCandidate {
    pub id: EntityId,
    pub label: String,
    #[serde(default)]
    pub description: String,
    /// English labels of the entity's classes, at most three.
    #[serde(default)]
    pub instance_of: Vec<String>,
    /// English alternate labels, at most five.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Deterministic match confidence in [0, 1].
    pub confidence: f64,
}

/// Recorded outcome of resolving one mention.
///
/// An empty candidate list is a first-class "no verifiable match". It is
/// distinct from a mention that has not been looked up at all, which has no
/// `Resolution` recorded anywhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub mention: String,
    /// Candidates ordered by descending confidence.
    pub candidates: Vec<EntityCandidate>,
}

impl Resolution {
    pub fn miss(mention: impl Into<String>) -> Self {
        Resolution {
            mention: mention.into(),
            candidates: Vec::new(),
        }
    }

    pub fn is_miss(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn best(&self) -> Option<&EntityCandidate> {
        self.candidates.first()
    }
}

/// A property value with its decoded kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FactValue {
    /// Plain string or number as rendered by the endpoint.
    Literal { text: String },
    /// ISO calendar date, trimmed from an xsd:dateTime binding.
    Date { date: String },
    /// Reference to another entity, with its English label.
    Entity { id: EntityId, label: String },
}

impl FactValue {
    /// Human-readable rendering used in observations and answers.
    pub fn display(&self) -> &str {
        match self {
            FactValue::Literal { text } => text,
            FactValue::Date { date } => date,
            FactValue::Entity { label, .. } => label,
        }
    }
}

/// Statement qualifiers scoping a fact in time. All ISO calendar dates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactQualifiers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point_in_time: Option<String>,
}

impl FactQualifiers {
    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none() && self.point_in_time.is_none()
    }

    /// "start: 1938-09-04; end: 1945-09-02"
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(s) = &self.start {
            parts.push(format!("start: {}", s));
        }
        if let Some(e) = &self.end {
            parts.push(format!("end: {}", e));
        }
        if let Some(p) = &self.point_in_time {
            parts.push(format!("point in time: {}", p));
        }
        parts.join("; ")
    }
}

/// One property statement retrieved for a resolved entity.
///
/// Invariant: `subject` always passed resolution in the same run before the
/// fact was fetched. The protocol state enforces this at dispatch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub subject: EntityId,
    pub subject_label: String,
    pub property: PropertyId,
    pub property_label: String,
    pub value: FactValue,
    #[serde(default, skip_serializing_if = "FactQualifiers::is_empty")]
    pub qualifiers: FactQualifiers,
}

impl Fact {
    /// One-line rendering: "P108: employer — Government Code and Cypher
    /// School (start: 1938-09-04; end: 1945-09-02)".
    pub fn render(&self) -> String {
        let mut line = format!(
            "{}: {} — {}",
            self.property,
            self.property_label,
            self.value.display()
        );
        if !self.qualifiers.is_empty() {
            line.push_str(&format!(" ({})", self.qualifiers.summary()));
        }
        line
    }
}

/// Narrative text retrieved for an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Passage {
    pub entity: EntityId,
    /// Article title the text came from.
    pub title: String,
    pub text: String,
    pub truncated: bool,
}

/// One retrieval action the decision oracle can request.
///
/// The set is closed: the orchestrator matches on the variant and there is
/// no dispatch by tool name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ToolRequest {
    /// Look up candidate entities for a surface-form mention.
    ResolveEntity {
        mention: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        type_hint: Option<String>,
    },
    /// Fetch typed property values for a resolved entity.
    FetchFacts {
        entity: EntityId,
        #[serde(default)]
        properties: Vec<PropertyId>,
    },
    /// Fetch the encyclopedic article for a resolved entity.
    RetrieveNarrative { entity: EntityId },
    /// Run a read-only structured query.
    ExecuteQuery {
        sparql: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_rows: Option<usize>,
    },
}

impl ToolRequest {
    /// Stable name used in traces and observations.
    pub fn name(&self) -> &'static str {
        match self {
            ToolRequest::ResolveEntity { .. } => "resolve_entity",
            ToolRequest::FetchFacts { .. } => "fetch_facts",
            ToolRequest::RetrieveNarrative { .. } => "retrieve_narrative",
            ToolRequest::ExecuteQuery { .. } => "execute_query",
        }
    }
}

/// How a dispatched step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    /// Ran and returned data.
    Ok,
    /// Ran and found nothing.
    Empty,
    /// Refused before any network call (validation or protocol order).
    Rejected,
    /// Failure that survived the single retry, or an oracle failure.
    Failed,
}

/// One orchestrator step: what was requested and what came of it.
///
/// `request` is `None` when the step produced no executable action (the
/// oracle reply was unparseable or the oracle call itself failed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    /// 1-based step number.
    pub step: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<ToolRequest>,
    pub status: ToolStatus,
    /// Short outcome line ("3 candidates", "rejected: no LIMIT clause").
    pub summary: String,
    pub elapsed_ms: u64,
}

/// Why the decision loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The oracle produced final text.
    Composed,
    /// The step budget ran out; composition was forced.
    BudgetExhausted,
    /// The oracle failed twice in a row; composition was forced.
    OracleFailure,
}

/// Append-only audit trail of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTrace {
    pub run_id: Uuid,
    pub question: String,
    pub started_at: DateTime<Utc>,
    /// Step budget the run started with.
    pub budget: u32,
    pub entries: Vec<TraceEntry>,
    pub termination: Termination,
}

impl RunTrace {
    pub fn steps_used(&self) -> u32 {
        self.entries.len() as u32
    }
}

/// Classification of one candidate assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimStatus {
    /// At least one retrieved fact or passage backs the assertion.
    Grounded,
    /// Resolution found nothing, or nothing retrieved supports it.
    Unverifiable,
    /// Several plausible candidates and no disambiguating signal.
    Ambiguous,
}

/// Pointer from a claim back to the evidence behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Trace step that produced the evidence.
    pub step: u32,
    /// Evidence locator, e.g. "wikidata:Q7251/P108" or "wikipedia:Alan Turing".
    pub source: String,
}

/// A candidate assertion about one mention, classified against evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    /// The mention the claim is about.
    pub subject: String,
    pub status: ClaimStatus,
    /// Sentence rendered into the final answer.
    pub text: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

/// How an answer was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMode {
    /// Tool-grounded agent.
    Grounded,
    /// Prompt-only baseline, no retrieval.
    Baseline,
}

/// Terminal result of one run. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub question: String,
    pub text: String,
    pub mode: AnswerMode,
    pub is_refusal: bool,
    #[serde(default)]
    pub claims: Vec<Claim>,
    #[serde(default)]
    pub citations: Vec<Citation>,
    pub trace: RunTrace,
}

impl Answer {
    /// Mentions the answer explicitly abstained on.
    pub fn abstained_mentions(&self) -> Vec<&str> {
        self.claims
            .iter()
            .filter(|c| c.status != ClaimStatus::Grounded)
            .map(|c| c.subject.as_str())
            .collect()
    }

    pub fn grounded_claims(&self) -> impl Iterator<Item = &Claim> {
        self.claims
            .iter()
            .filter(|c| c.status == ClaimStatus::Grounded)
    }
}

/// Immutable per-run configuration.
///
/// Passed by reference into `run`; two concurrent runs with different
/// configs cannot interfere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub model: String,
    pub temperature: f32,
    /// Maximum number of decision-loop steps.
    pub step_budget: u32,
    /// Max candidates a resolution may return.
    pub max_candidates: usize,
    /// Upper bound on rows returned by a structured query.
    pub max_rows: usize,
    /// Cap on retrieved article text, in characters.
    pub max_article_chars: usize,
    /// Per-call timeout for knowledge-base requests, seconds.
    pub tool_timeout_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            step_budget: DEFAULT_STEP_BUDGET,
            max_candidates: MAX_SEARCH_RESULTS,
            max_rows: DEFAULT_SPARQL_LIMIT,
            max_article_chars: MAX_ARTICLE_CHARS,
            tool_timeout_secs: 10,
        }
    }
}

/// Rejected before the decision loop starts. The only fatal error surface:
/// everything after the loop begins degrades to a partial or abstaining
/// `Answer` instead.
#[derive(Debug, thiserror::Error)]
pub enum InvalidRequest {
    #[error("question is empty")]
    EmptyQuestion,
    #[error("step budget must be at least 1")]
    ZeroStepBudget,
    #[error("temperature {0} is out of range (expected 0.0..=2.0)")]
    Temperature(f32),
    #[error("model id is empty")]
    EmptyModel,
}

impl RunConfig {
    /// Reject configurations the loop must never start with.
    pub fn validate(&self) -> Result<(), InvalidRequest> {
        if self.step_budget == 0 {
            return Err(InvalidRequest::ZeroStepBudget);
        }
        if !self.temperature.is_finite() || !(0.0..=2.0).contains(&self.temperature) {
            return Err(InvalidRequest::Temperature(self.temperature));
        }
        if self.model.trim().is_empty() {
            return Err(InvalidRequest::EmptyModel);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qid_shape() {
        assert!(looks_like_qid("Q42"));
        assert!(looks_like_qid("Q7251"));
        assert!(!looks_like_qid("Q"));
        assert!(!looks_like_qid("q42"));
        assert!(!looks_like_qid("Q42b"));
        assert!(!looks_like_qid(
            "search_entity_candidates(entity_name=\"France\")[0][\"qid\"]"
        ));
    }

    #[test]
    fn test_entity_id_normalizes() {
        let id = EntityId::new("  q142 ");
        assert_eq!(id.as_str(), "Q142");
        assert!(id.is_well_formed());
    }

    #[test]
    fn test_resolution_miss_is_first_class() {
        let miss = Resolution::miss("Dr. Helena Vargass");
        assert!(miss.is_miss());
        assert!(miss.best().is_none());
    }

    #[test]
    fn test_fact_render_includes_qualifiers() {
        let fact = Fact {
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
        };
        let line = fact.render();
        assert!(line.contains("P108: employer"));
        assert!(line.contains("start: 1938-09-04"));
        assert!(line.contains("end: 1945-09-02"));
    }

    #[test]
    fn test_tool_request_wire_format() {
        let json = r#"{"action":"fetch_facts","entity":"Q7251","properties":["P108","P569"]}"#;
        let req: ToolRequest = serde_json::from_str(json).unwrap();
        match &req {
            ToolRequest::FetchFacts { entity, properties } => {
                assert_eq!(entity.as_str(), "Q7251");
                assert_eq!(properties.len(), 2);
            }
            other => panic!("unexpected variant: {:?}", other),
        }
        assert_eq!(req.name(), "fetch_facts");
    }

    #[test]
    fn test_tool_request_resolve_without_hint() {
        let json = r#"{"action":"resolve_entity","mention":"Alan Turing"}"#;
        let req: ToolRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.name(), "resolve_entity");
    }

    #[test]
    fn test_run_config_validation() {
        let mut config = RunConfig::default();
        assert!(config.validate().is_ok());

        config.step_budget = 0;
        assert!(matches!(
            config.validate(),
            Err(InvalidRequest::ZeroStepBudget)
        ));

        config = RunConfig {
            temperature: f32::NAN,
            ..RunConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(InvalidRequest::Temperature(_))
        ));
    }

    #[test]
    fn test_answer_abstained_mentions() {
        let answer = Answer {
            question: "q".to_string(),
            text: "t".to_string(),
            mode: AnswerMode::Grounded,
            is_refusal: false,
            claims: vec![
                Claim {
                    subject: "Alan Turing".to_string(),
                    status: ClaimStatus::Grounded,
                    text: String::new(),
                    citations: vec![],
                },
                Claim {
                    subject: "Dr. Helena Vargass".to_string(),
                    status: ClaimStatus::Unverifiable,
                    text: String::new(),
                    citations: vec![],
                },
            ],
            citations: vec![],
            trace: RunTrace {
                run_id: Uuid::new_v4(),
                question: "q".to_string(),
                started_at: Utc::now(),
                budget: 8,
                entries: vec![],
                termination: Termination::Composed,
            },
        };
        assert_eq!(answer.abstained_mentions(), vec!["Dr. Helena Vargass"]);
        assert_eq!(answer.grounded_claims().count(), 1);
    }
}
