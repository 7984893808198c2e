//! Grounded question answering over Wikidata.
//!
//! The crate is organized around one loop and its boundaries:
//!
//! - [`orchestrator`] runs the bounded decision loop and talks to the
//!   language-model oracle
//! - [`tools`] is the closed set of retrieval actions and the per-run
//!   protocol state that orders them
//! - [`wikidata`] is the SPARQL endpoint boundary
//! - [`policy`] classifies every claim against collected evidence
//! - [`compose`] turns claims into answer text and scrubs process leakage
//! - [`mentions`] seeds the run with entity mentions from the question
//! - [`baseline`] is the ungrounded one-shot control arm

pub mod baseline;
pub mod compose;
pub mod mentions;
pub mod orchestrator;
pub mod policy;
pub mod tools;
pub mod wikidata;

pub use baseline::BaselineAgent;
pub use orchestrator::{AnswerEngine, DecisionOracle, FakeOracle, OllamaOracle};
pub use tools::narrative::{ArticleFetcher, FakeArticles, WikipediaClient};
pub use tools::Toolbox;
pub use wikidata::{FakeEndpoint, SparqlEndpoint, WdqsClient};
