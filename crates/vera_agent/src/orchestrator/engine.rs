//! The bounded decision loop.
//!
//! `AnswerEngine::run` owns everything a run touches: the transcript shown
//! to the oracle, the tool-order protocol state, the evidence pool, and the
//! trace. Nothing is shared between runs except read-only configuration and
//! client handles, so concurrent runs cannot interfere.
//!
//! The step budget is the only liveness guarantee. It is passed by value
//! into each step and decremented before re-entry; when it reaches zero the
//! engine composes the best available answer and marks every unresolved
//! mention with an explicit refusal instead of dropping it. No failure after
//! the pre-flight validation ever reaches the caller as an error.

use crate::compose::{self, compose_forced};
use crate::mentions::extract_mentions;
use crate::orchestrator::oracle::{
    parse_decision, ChatMessage, Decision, DecisionOracle, OracleError,
};
use crate::policy::EvidencePool;
use crate::tools::{protocol::ProtocolState, DispatchPayload, Toolbox};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;
use vera_common::prompts::{generate_observation, generate_opening_prompt, GROUNDED_SYSTEM_PROMPT};
use vera_common::{
    Answer, AnswerMode, InvalidRequest, RunConfig, RunTrace, Termination, ToolStatus, TraceEntry,
};

/// Raw oracle replies echoed into the transcript are clipped to this.
const MAX_ECHOED_REPLY_CHARS: usize = 2000;

enum StepOutcome {
    /// A tool step happened (or failed); one budget unit was consumed.
    Acted(TraceEntry),
    /// The oracle produced final text.
    Final(String),
    /// The oracle failed twice; force composition.
    OracleDown(TraceEntry),
}

/// The grounded tool-calling agent.
pub struct AnswerEngine {
    oracle: Arc<dyn DecisionOracle>,
    toolbox: Toolbox,
    config: RunConfig,
}

impl AnswerEngine {
    pub fn new(oracle: Arc<dyn DecisionOracle>, toolbox: Toolbox, config: RunConfig) -> Self {
        Self {
            oracle,
            toolbox,
            config,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Answer one question. The only error surface is a malformed question
    /// or configuration, rejected before the loop starts; everything after
    /// degrades to a partial or abstaining answer.
    pub async fn run(&self, question: &str) -> Result<Answer, InvalidRequest> {
        let question = question.trim();
        if question.is_empty() {
            return Err(InvalidRequest::EmptyQuestion);
        }
        self.config.validate()?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let budget = self.config.step_budget;
        let mentions = extract_mentions(question);
        info!(
            "run {} starting: budget {}, {} mention(s)",
            run_id,
            budget,
            mentions.len()
        );

        let mut transcript = vec![
            ChatMessage::system(GROUNDED_SYSTEM_PROMPT),
            ChatMessage::user(generate_opening_prompt(
                question,
                &mentions,
                &self.toolbox.catalog().prompt_listing(),
                budget,
            )),
        ];
        let mut state = ProtocolState::new();
        let mut pool = EvidencePool::default();
        let mut entries: Vec<TraceEntry> = Vec::new();

        let mut remaining = budget;
        let mut termination = Termination::BudgetExhausted;
        let mut oracle_final: Option<String> = None;

        while remaining > 0 {
            let step_no = budget - remaining + 1;
            match self
                .step(step_no, remaining, &mut transcript, &mut state, &mut pool)
                .await
            {
                StepOutcome::Final(text) => {
                    termination = Termination::Composed;
                    oracle_final = Some(text);
                    break;
                }
                StepOutcome::Acted(entry) => {
                    entries.push(entry);
                    remaining -= 1;
                }
                StepOutcome::OracleDown(entry) => {
                    entries.push(entry);
                    termination = Termination::OracleFailure;
                    break;
                }
            }
        }

        let composed = compose_forced(question, &mentions, &state, &pool);
        let finalized = oracle_final
            .as_deref()
            .map(compose::finalize_answer_text)
            .filter(|t| !t.is_empty());
        let (text, is_refusal) = match finalized {
            Some(text) => {
                let is_refusal = compose::looks_like_refusal(&text);
                (text, is_refusal)
            }
            None => (composed.text, composed.is_refusal),
        };

        info!(
            "run {} finished: {:?} after {} step(s)",
            run_id,
            termination,
            entries.len()
        );

        Ok(Answer {
            question: question.to_string(),
            text,
            mode: AnswerMode::Grounded,
            is_refusal,
            claims: composed.claims,
            citations: composed.citations,
            trace: RunTrace {
                run_id,
                question: question.to_string(),
                started_at,
                budget,
                entries,
                termination,
            },
        })
    }

    /// One decision step. `remaining` arrives by value; the caller
    /// decrements it before re-entry.
    async fn step(
        &self,
        step_no: u32,
        remaining: u32,
        transcript: &mut Vec<ChatMessage>,
        state: &mut ProtocolState,
        pool: &mut EvidencePool,
    ) -> StepOutcome {
        let started = Instant::now();

        let raw = match self.decide_with_retry(transcript).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("oracle failed twice, forcing composition: {}", e);
                return StepOutcome::OracleDown(TraceEntry {
                    step: step_no,
                    request: None,
                    status: ToolStatus::Failed,
                    summary: format!("oracle unavailable: {e}"),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }
        };

        let Some(decision) = parse_decision(&raw) else {
            warn!("unparseable oracle reply ({} chars)", raw.len());
            transcript.push(ChatMessage::assistant(clip(&raw, MAX_ECHOED_REPLY_CHARS)));
            transcript.push(ChatMessage::user(format!(
                "Your last reply was not a single valid JSON object. \
                 Reply with exactly one JSON object from the protocol.\n\
                 STEPS REMAINING: {}",
                remaining.saturating_sub(1)
            )));
            return StepOutcome::Acted(TraceEntry {
                step: step_no,
                request: None,
                status: ToolStatus::Failed,
                summary: "unparseable oracle reply".to_string(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
        };

        match decision {
            Decision::Final(text) => StepOutcome::Final(text),
            Decision::Act(request) => {
                let echoed =
                    serde_json::to_string(&request).unwrap_or_else(|_| request.name().to_string());
                transcript.push(ChatMessage::assistant(echoed));

                let result = self.toolbox.dispatch(&request, state, &self.config).await;
                match result.payload {
                    DispatchPayload::Facts(facts) => pool.add_facts(step_no, facts),
                    DispatchPayload::Passage(Some(passage)) => {
                        pool.add_passage(step_no, passage)
                    }
                    _ => {}
                }

                transcript.push(ChatMessage::user(generate_observation(
                    request.name(),
                    &result.observation,
                    remaining.saturating_sub(1),
                )));

                StepOutcome::Acted(TraceEntry {
                    step: step_no,
                    request: Some(request),
                    status: result.status,
                    summary: result.summary,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                })
            }
        }
    }

    async fn decide_with_retry(
        &self,
        transcript: &[ChatMessage],
    ) -> Result<String, OracleError> {
        match self.oracle.decide(transcript, &self.config).await {
            Ok(raw) => Ok(raw),
            Err(first) => {
                warn!("oracle call failed, retrying once: {}", first);
                self.oracle.decide(transcript, &self.config).await
            }
        }
    }
}

fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}
