//! Wikidata Query Service client.
//!
//! One `SparqlEndpoint` trait covers every structured retrieval path: entity
//! search, fact fetching, article-title lookup, and oracle-supplied read-only
//! queries. Production code uses `WdqsClient` against the public endpoint;
//! tests use `FakeEndpoint` with scripted responses and call counting.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors from the SPARQL endpoint boundary.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed SPARQL results: {0}")]
    Parse(String),
}

/// One typed cell of a SPARQL JSON binding.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SparqlValue {
    #[serde(rename = "type")]
    pub value_type: String,
    pub value: String,
    #[serde(rename = "xml:lang", default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub datatype: Option<String>,
}

impl SparqlValue {
    pub fn literal(value: &str) -> Self {
        SparqlValue {
            value_type: "literal".to_string(),
            value: value.to_string(),
            lang: Some("en".to_string()),
            datatype: None,
        }
    }

    pub fn uri(value: &str) -> Self {
        SparqlValue {
            value_type: "uri".to_string(),
            value: value.to_string(),
            lang: None,
            datatype: None,
        }
    }

    /// Entity URI for a QID, as WDQS renders it.
    pub fn entity(qid: &str) -> Self {
        Self::uri(&format!("http://www.wikidata.org/entity/{}", qid))
    }

    pub fn datetime(value: &str) -> Self {
        SparqlValue {
            value_type: "literal".to_string(),
            value: value.to_string(),
            lang: None,
            datatype: Some("http://www.w3.org/2001/XMLSchema#dateTime".to_string()),
        }
    }

    /// QID when the value is a Wikidata entity URI.
    pub fn entity_qid(&self) -> Option<&str> {
        self.value.strip_prefix("http://www.wikidata.org/entity/")
    }

    pub fn is_datetime(&self) -> bool {
        self.datatype.as_deref() == Some("http://www.w3.org/2001/XMLSchema#dateTime")
    }
}

/// Variable name to typed cell, one row of results.
pub type SparqlBinding = HashMap<String, SparqlValue>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SparqlHead {
    #[serde(default)]
    pub vars: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SparqlBindingSet {
    #[serde(default)]
    pub bindings: Vec<SparqlBinding>,
}

/// The SPARQL 1.1 JSON results document (`head` / `results` / `bindings`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SparqlResults {
    #[serde(default)]
    pub head: SparqlHead,
    #[serde(default)]
    pub results: SparqlBindingSet,
}

impl SparqlResults {
    pub fn empty() -> Self {
        SparqlResults::default()
    }

    pub fn rows(&self) -> &[SparqlBinding] {
        &self.results.bindings
    }

    pub fn is_empty(&self) -> bool {
        self.results.bindings.is_empty()
    }

    /// The first row's value for a variable, if bound.
    pub fn first_value(&self, var: &str) -> Option<&str> {
        self.results
            .bindings
            .first()
            .and_then(|row| row.get(var))
            .map(|cell| cell.value.as_str())
    }
}

/// Builder for scripted results in tests and fakes.
#[derive(Debug, Default)]
pub struct ResultsBuilder {
    vars: Vec<String>,
    bindings: Vec<SparqlBinding>,
}

impl ResultsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(mut self, cells: &[(&str, SparqlValue)]) -> Self {
        let mut binding = SparqlBinding::new();
        for (var, value) in cells {
            if !self.vars.iter().any(|v| v == var) {
                self.vars.push(var.to_string());
            }
            binding.insert(var.to_string(), value.clone());
        }
        self.bindings.push(binding);
        self
    }

    pub fn build(self) -> SparqlResults {
        SparqlResults {
            head: SparqlHead { vars: self.vars },
            results: SparqlBindingSet {
                bindings: self.bindings,
            },
        }
    }
}

/// Read-only SPARQL execution boundary.
///
/// The resolver, the fact fetcher, the query executor, and the article-title
/// lookup all go through this one seam, so a single fake covers every
/// structured retrieval path in tests.
#[async_trait]
pub trait SparqlEndpoint: Send + Sync {
    async fn query(&self, sparql: &str) -> Result<SparqlResults, EndpointError>;
}

/// Production client for the public Wikidata Query Service.
pub struct WdqsClient {
    http: reqwest::Client,
    endpoint: String,
}

impl WdqsClient {
    pub fn new(endpoint: &str, user_agent: &str, timeout_secs: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(user_agent)
            .build()
            .unwrap_or_default();
        Self {
            http,
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl SparqlEndpoint for WdqsClient {
    async fn query(&self, sparql: &str) -> Result<SparqlResults, EndpointError> {
        debug!("WDQS query ({} chars)", sparql.len());

        let response = self
            .http
            .post(&self.endpoint)
            .header("Accept", "application/sparql-results+json")
            .form(&[("query", sparql)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EndpointError::Status {
                status: status.as_u16(),
                body: clip(&body, 300),
            });
        }

        response
            .json::<SparqlResults>()
            .await
            .map_err(|e| EndpointError::Parse(e.to_string()))
    }
}

fn clip(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    }
}

// ============================================================================
// Fake endpoint (testing)
// ============================================================================

#[derive(Debug)]
struct Script {
    /// Substring the incoming query must contain.
    needle: String,
    results: SparqlResults,
    /// Number of initial matching calls to fail with a transient error.
    fail_first: usize,
}

/// Scripted endpoint for deterministic tests.
///
/// Responses are matched by substring against the incoming query text, in
/// registration order. Unmatched queries return empty results. All queries
/// are logged for assertions.
pub struct FakeEndpoint {
    scripts: Mutex<Vec<Script>>,
    queries: Mutex<Vec<String>>,
}

impl FakeEndpoint {
    /// An endpoint that answers every query with empty results.
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Script results for queries containing `needle`.
    pub fn on(self, needle: &str, results: SparqlResults) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push(Script {
                needle: needle.to_string(),
                results,
                fail_first: 0,
            });
        }
        self
    }

    /// Script results that fail `times` times before succeeding.
    pub fn on_after_failures(self, needle: &str, times: usize, results: SparqlResults) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push(Script {
                needle: needle.to_string(),
                results,
                fail_first: times,
            });
        }
        self
    }

    /// Total queries received.
    pub fn call_count(&self) -> usize {
        self.queries.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Queries received that contain `needle`.
    pub fn calls_containing(&self, needle: &str) -> usize {
        self.queries
            .lock()
            .map(|q| q.iter().filter(|s| s.contains(needle)).count())
            .unwrap_or(0)
    }
}

impl Default for FakeEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SparqlEndpoint for FakeEndpoint {
    async fn query(&self, sparql: &str) -> Result<SparqlResults, EndpointError> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(sparql.to_string());
        }

        let mut scripts = self
            .scripts
            .lock()
            .map_err(|_| EndpointError::Parse("fake endpoint lock poisoned".to_string()))?;

        for script in scripts.iter_mut() {
            if sparql.contains(&script.needle) {
                if script.fail_first > 0 {
                    script.fail_first -= 1;
                    return Err(EndpointError::Status {
                        status: 503,
                        body: "scripted transient failure".to_string(),
                    });
                }
                return Ok(script.results.clone());
            }
        }
        Ok(SparqlResults::empty())
    }
}
