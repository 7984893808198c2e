//! The bounded decision loop and its oracle boundary.

pub mod engine;
pub mod ollama;
pub mod oracle;

pub use engine::AnswerEngine;
pub use ollama::OllamaOracle;
pub use oracle::{parse_decision, ChatMessage, Decision, DecisionOracle, FakeOracle, OracleError};
