//! Decision oracle boundary.
//!
//! The underlying language model is an untrusted black box consulted once
//! per step: it sees the transcript and returns either a tool action or
//! final text, as one JSON object. Parsing is defensive: a reply wrapped in
//! prose has its JSON extracted, lenient field handling covers common model
//! deviations, and anything unparseable is reported to the engine instead of
//! being guessed at.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;
use thiserror::Error;
use vera_common::{EntityId, PropertyId, RunConfig, ToolRequest};

/// One transcript message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// What the oracle decided this step.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Take one retrieval action.
    Act(ToolRequest),
    /// Stop and answer with this text.
    Final(String),
}

/// Failure of the oracle call itself (not of its content).
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle network error: {0}")]
    Network(String),

    #[error("oracle returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("oracle response malformed: {0}")]
    Malformed(String),
}

/// The language-model boundary. Implementations return the raw reply text;
/// interpretation happens in [`parse_decision`] so every backend and fake is
/// parsed identically.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn decide(
        &self,
        messages: &[ChatMessage],
        config: &RunConfig,
    ) -> Result<String, OracleError>;
}

/// Parse a raw oracle reply into a decision. `None` means the reply was not
/// interpretable; the engine records that and keeps the loop going.
pub fn parse_decision(text: &str) -> Option<Decision> {
    let json_text = extract_json(text);
    let value: Value = serde_json::from_str(&json_text).ok()?;
    decision_from_value(&value)
}

/// Extract the JSON object from a reply that may wrap it in prose.
fn extract_json(text: &str) -> String {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => text[start..=end].to_string(),
        _ => text.trim().to_string(),
    }
}

/// Lenient decision decoding: required fields must be present, everything
/// optional tolerates null, wrong-but-recoverable shapes are recovered
/// (a single property string where an array was expected, a numeric
/// max_rows sent as a string).
fn decision_from_value(value: &Value) -> Option<Decision> {
    let action = value.get("action")?.as_str()?;
    match action {
        "final" => {
            let text = value
                .get("text")
                .and_then(|t| t.as_str())
                .unwrap_or("")
                .to_string();
            Some(Decision::Final(text))
        }
        "resolve_entity" => {
            let mention = non_empty_str(value.get("mention"))?;
            let type_hint = non_empty_str(value.get("type_hint"));
            Some(Decision::Act(ToolRequest::ResolveEntity {
                mention,
                type_hint,
            }))
        }
        "fetch_facts" => {
            let entity = EntityId::new(non_empty_str(value.get("entity"))?);
            let properties = match value.get("properties") {
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(|p| p.as_str())
                    .map(PropertyId::new)
                    .collect(),
                Some(Value::String(one)) => vec![PropertyId::new(one.as_str())],
                _ => Vec::new(),
            };
            Some(Decision::Act(ToolRequest::FetchFacts { entity, properties }))
        }
        "retrieve_narrative" => {
            let entity = EntityId::new(non_empty_str(value.get("entity"))?);
            Some(Decision::Act(ToolRequest::RetrieveNarrative { entity }))
        }
        "execute_query" => {
            let sparql = non_empty_str(value.get("sparql"))?;
            let max_rows = value.get("max_rows").and_then(|m| {
                m.as_u64()
                    .map(|n| n as usize)
                    .or_else(|| m.as_str().and_then(|s| s.parse().ok()))
            });
            Some(Decision::Act(ToolRequest::ExecuteQuery { sparql, max_rows }))
        }
        _ => None,
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ============================================================================
// Fake oracle (testing)
// ============================================================================

enum Scripted {
    Reply(String),
    Failure,
}

/// Scripted oracle for deterministic tests. Replies are consumed in order;
/// a run that asks for more than was scripted gets a final refusal so tests
/// fail on content, not on panics.
pub struct FakeOracle {
    script: Mutex<Vec<Scripted>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl FakeOracle {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Script a raw reply.
    pub fn reply(self, raw: &str) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push(Scripted::Reply(raw.to_string()));
        }
        self
    }

    /// Script one network failure.
    pub fn fail_once(self) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push(Scripted::Failure);
        }
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// The transcript the oracle saw on call `index`.
    pub fn transcript_at(&self, index: usize) -> Option<Vec<ChatMessage>> {
        self.calls.lock().ok().and_then(|c| c.get(index).cloned())
    }
}

impl Default for FakeOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DecisionOracle for FakeOracle {
    async fn decide(
        &self,
        messages: &[ChatMessage],
        _config: &RunConfig,
    ) -> Result<String, OracleError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        let mut script = self
            .script
            .lock()
            .map_err(|_| OracleError::Malformed("fake oracle lock poisoned".to_string()))?;
        if script.is_empty() {
            return Ok(
                r#"{"action":"final","text":"I cannot verify that the question can be answered from the scripted replies."}"#
                    .to_string(),
            );
        }
        match script.remove(0) {
            Scripted::Reply(raw) => Ok(raw),
            Scripted::Failure => Err(OracleError::Network(
                "scripted oracle failure".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_final_decision() {
        let decision =
            parse_decision(r#"{"action":"final","text":"The capital of France is Paris."}"#)
                .unwrap();
        assert_eq!(
            decision,
            Decision::Final("The capital of France is Paris.".to_string())
        );
    }

    #[test]
    fn test_parse_tool_decision_wrapped_in_prose() {
        let decision = parse_decision(
            "Sure, I will resolve it first:\n{\"action\":\"resolve_entity\",\"mention\":\"Alan Turing\",\"type_hint\":\"person\"}\nDone.",
        )
        .unwrap();
        match decision {
            Decision::Act(ToolRequest::ResolveEntity { mention, type_hint }) => {
                assert_eq!(mention, "Alan Turing");
                assert_eq!(type_hint.as_deref(), Some("person"));
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn test_parse_recovers_single_property_string() {
        let decision =
            parse_decision(r#"{"action":"fetch_facts","entity":"Q7251","properties":"P108"}"#)
                .unwrap();
        match decision {
            Decision::Act(ToolRequest::FetchFacts { entity, properties }) => {
                assert_eq!(entity.as_str(), "Q7251");
                assert_eq!(properties, vec![PropertyId::new("P108")]);
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn test_parse_recovers_stringly_max_rows() {
        let decision = parse_decision(
            r#"{"action":"execute_query","sparql":"SELECT ?x WHERE {} LIMIT 5","max_rows":"10"}"#,
        )
        .unwrap();
        match decision {
            Decision::Act(ToolRequest::ExecuteQuery { max_rows, .. }) => {
                assert_eq!(max_rows, Some(10));
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_garbage_and_unknown_actions() {
        assert!(parse_decision("not json at all").is_none());
        assert!(parse_decision(r#"{"action":"delete_everything"}"#).is_none());
        assert!(parse_decision(r#"{"action":"resolve_entity","mention":""}"#).is_none());
        assert!(parse_decision(r#"{"action":"resolve_entity"}"#).is_none());
    }

    #[test]
    fn test_final_with_null_text_is_empty_final() {
        let decision = parse_decision(r#"{"action":"final","text":null}"#).unwrap();
        assert_eq!(decision, Decision::Final(String::new()));
    }

    #[tokio::test]
    async fn test_fake_oracle_consumes_script_in_order() {
        let oracle = FakeOracle::new()
            .reply(r#"{"action":"resolve_entity","mention":"France"}"#)
            .fail_once()
            .reply(r#"{"action":"final","text":"done"}"#);
        let config = RunConfig::default();

        let first = oracle.decide(&[], &config).await.unwrap();
        assert!(first.contains("resolve_entity"));
        assert!(oracle.decide(&[], &config).await.is_err());
        let third = oracle.decide(&[], &config).await.unwrap();
        assert!(third.contains("final"));
        assert_eq!(oracle.call_count(), 3);

        // Exhausted script falls back to a refusal, not a panic.
        let exhausted = oracle.decide(&[], &config).await.unwrap();
        assert!(exhausted.contains("cannot verify"));
    }
}
