//! Prompt-only baseline.
//!
//! One round trip to the model, no tools, no evidence, no citations. This
//! exists for side-by-side comparison against the grounded engine: same
//! question, same model, and whatever the model says unchecked. Useful for
//! demonstrating exactly what the grounded protocol buys.

use crate::compose;
use crate::orchestrator::oracle::{ChatMessage, DecisionOracle};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use vera_common::prompts::BASELINE_SYSTEM_PROMPT;
use vera_common::{Answer, AnswerMode, InvalidRequest, RunConfig, RunTrace, Termination};

/// The ungrounded control arm.
pub struct BaselineAgent {
    oracle: Arc<dyn DecisionOracle>,
    config: RunConfig,
}

impl BaselineAgent {
    pub fn new(oracle: Arc<dyn DecisionOracle>, config: RunConfig) -> Self {
        Self { oracle, config }
    }

    /// Ask the model directly. An oracle failure is retried once; a second
    /// failure degrades to an explicit refusal rather than an error, so the
    /// comparison harness always has two answers to show.
    pub async fn run(&self, question: &str) -> Result<Answer, InvalidRequest> {
        let question = question.trim();
        if question.is_empty() {
            return Err(InvalidRequest::EmptyQuestion);
        }
        self.config.validate()?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let transcript = vec![
            ChatMessage::system(BASELINE_SYSTEM_PROMPT),
            ChatMessage::user(question),
        ];

        info!("baseline run {} starting", run_id);

        let raw = match self.oracle.decide(&transcript, &self.config).await {
            Ok(raw) => Ok(raw),
            Err(first) => {
                warn!("baseline oracle call failed, retrying once: {}", first);
                self.oracle.decide(&transcript, &self.config).await
            }
        };

        let (text, termination) = match raw {
            Ok(raw) => (raw.trim().to_string(), Termination::Composed),
            Err(e) => {
                warn!("baseline oracle failed twice: {}", e);
                (
                    "I could not reach the language model to answer this question.".to_string(),
                    Termination::OracleFailure,
                )
            }
        };
        let is_refusal =
            termination == Termination::OracleFailure || compose::looks_like_refusal(&text);

        Ok(Answer {
            question: question.to_string(),
            text,
            mode: AnswerMode::Baseline,
            is_refusal,
            claims: Vec::new(),
            citations: Vec::new(),
            trace: RunTrace {
                run_id,
                question: question.to_string(),
                started_at,
                budget: 0,
                entries: Vec::new(),
                termination,
            },
        })
    }
}
