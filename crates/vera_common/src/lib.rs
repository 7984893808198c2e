//! Vera Common - Shared types, prompts, and configuration for Vera
//!
//! Evidence-first question answering over a public knowledge base.
//! Every assertion in an answer must trace back to a retrieval step;
//! anything that cannot is refused, never guessed.

pub mod config;
pub mod prompts;
pub mod properties;
pub mod types;

pub use properties::*;
pub use types::*;
