//! Per-run tool-order protocol state.
//!
//! Structured retrieval may only reference QIDs that entity resolution
//! returned earlier in the same run, and narrative fallback may only run
//! after at least one structured attempt. The state is owned by one run;
//! a fresh run starts with a fresh state and nothing carries over.

use std::collections::HashMap;
use vera_common::{EntityId, Resolution};

/// Cap on QIDs echoed back inside violation messages.
const AUTHORIZED_LIST_CAP: usize = 15;

#[derive(Debug, Default)]
pub struct ProtocolState {
    /// QIDs returned by resolution, in first-seen order.
    authorized: Vec<EntityId>,
    /// Resolution ledger keyed by normalized mention. A recorded miss is
    /// first-class: replays return it without another network call.
    resolutions: HashMap<String, Resolution>,
    structured_attempted: bool,
}

impl ProtocolState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a resolution outcome and authorize its candidate QIDs.
    pub fn register(&mut self, resolution: Resolution) {
        for candidate in &resolution.candidates {
            if !self.authorized.contains(&candidate.id) {
                self.authorized.push(candidate.id.clone());
            }
        }
        self.resolutions
            .insert(normalize_mention(&resolution.mention), resolution);
    }

    pub fn is_authorized(&self, id: &EntityId) -> bool {
        self.authorized.contains(id)
    }

    /// The recorded outcome for a mention, if it was ever resolved.
    pub fn lookup(&self, mention: &str) -> Option<&Resolution> {
        self.resolutions.get(&normalize_mention(mention))
    }

    pub fn resolutions(&self) -> impl Iterator<Item = &Resolution> {
        self.resolutions.values()
    }

    pub fn mark_structured_attempt(&mut self) {
        self.structured_attempted = true;
    }

    pub fn has_structured_attempt(&self) -> bool {
        self.structured_attempted
    }

    /// Violation message for a structured tool referencing an unauthorized QID.
    pub fn unauthorized_subject_message(&self, id: &EntityId, tool: &str) -> String {
        let known = if self.authorized.is_empty() {
            "none yet".to_string()
        } else {
            self.authorized
                .iter()
                .take(AUTHORIZED_LIST_CAP)
                .map(|q| q.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "Tool-order protocol violation: {id} was not returned by resolve_entity in this run. \
             Call resolve_entity first; {tool} may only reference QIDs it returned. \
             Authorized QIDs: {known}."
        )
    }
}

/// Violation message for narrative retrieval before any structured attempt.
pub fn narrative_gate_message() -> &'static str {
    "Tool-order protocol violation: retrieve_narrative requires at least one structured \
     attempt (fetch_facts or execute_query) in this run. Fetch structured facts first; \
     fall back to narrative text only when they are insufficient."
}

/// Ledger key for a mention: NBSP-normalized, whitespace-collapsed, lowercased.
pub fn normalize_mention(mention: &str) -> String {
    mention
        .replace('\u{00a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
