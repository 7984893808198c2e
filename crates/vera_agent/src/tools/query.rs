//! Read-only SPARQL validation and execution.
//!
//! Validation is purely syntactic: comments are stripped, PREFIX/BASE
//! headers are skipped, the first query keyword must be SELECT, every SPARQL
//! Update keyword is rejected by name, and an explicit LIMIT is required.
//! The executor clamps returned rows to min(declared LIMIT, caller cap,
//! MAX_SPARQL_ROWS) and never inspects what the query means.

use crate::tools::ToolError;
use crate::wikidata::SparqlEndpoint;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::debug;

/// Hard upper bound on rows handed back to the oracle.
pub const MAX_SPARQL_ROWS: usize = 50;

/// One result row: variable name to plain value.
pub type SparqlRow = BTreeMap<String, String>;

/// The scan does not parse string literals, so a keyword quoted inside an
/// otherwise read-only SELECT (`FILTER(CONTAINS(?label, "DELETE"))`) is
/// rejected too. Over-rejection is the accepted side of the tradeoff.
static UPDATE_KEYWORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(INSERT|DELETE|DROP|CLEAR|CREATE|LOAD|COPY|MOVE|ADD|WITH)\b")
        .expect("update keyword pattern")
});

static LIMIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bLIMIT\s+(\d+)\b").expect("limit pattern"));

/// Accept exactly one read-only query shape, or say why not.
pub fn validate_read_only_select(sparql: &str) -> Result<(), String> {
    let stripped = strip_comments(sparql);
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        return Err("query is empty".to_string());
    }

    let upper = trimmed.to_uppercase();

    if let Some(found) = UPDATE_KEYWORD_RE.captures(&upper).and_then(|c| c.get(1)) {
        return Err(format!(
            "mutation keyword {} is not allowed; only read-only SELECT queries are accepted",
            found.as_str()
        ));
    }

    match first_query_keyword(&upper) {
        Some(kw) if kw == "SELECT" => {}
        Some(kw) => {
            return Err(format!(
                "{} queries are not accepted; only SELECT queries are",
                kw
            ));
        }
        None => return Err("only SELECT queries are accepted".to_string()),
    }

    if declared_limit(trimmed).is_none() {
        return Err(
            "unbounded result set: a LIMIT clause is required on every query".to_string(),
        );
    }

    Ok(())
}

/// The declared LIMIT, if any. With subqueries the outermost LIMIT comes
/// last in the text, so the last match wins.
pub fn declared_limit(sparql: &str) -> Option<usize> {
    LIMIT_RE
        .captures_iter(sparql)
        .last()
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Validate, execute, and clamp a read-only query.
///
/// `max_rows` is the caller's cap; the effective cap is
/// min(declared LIMIT, max_rows, MAX_SPARQL_ROWS).
pub async fn execute_read_only(
    endpoint: &dyn SparqlEndpoint,
    sparql: &str,
    max_rows: usize,
) -> Result<Vec<SparqlRow>, ToolError> {
    validate_read_only_select(sparql).map_err(ToolError::Rejected)?;

    let cap = declared_limit(&strip_comments(sparql))
        .unwrap_or(MAX_SPARQL_ROWS)
        .min(max_rows)
        .min(MAX_SPARQL_ROWS);

    let results = endpoint
        .query(sparql)
        .await
        .map_err(|e| ToolError::Transient(e.to_string()))?;

    debug!(
        "query returned {} bindings, clamping to {}",
        results.rows().len(),
        cap
    );

    let rows = results
        .rows()
        .iter()
        .take(cap)
        .map(|binding| {
            binding
                .iter()
                .map(|(var, cell)| (var.clone(), cell.value.clone()))
                .collect()
        })
        .collect();
    Ok(rows)
}

/// Rendering of clamped rows for the observation payload.
pub fn render_rows(rows: &[SparqlRow]) -> String {
    let doc = serde_json::json!({
        "row_count": rows.len(),
        "rows": rows,
    });
    serde_json::to_string_pretty(&doc).unwrap_or_else(|_| "{\"rows\": []}".to_string())
}

/// Drop `#` comments. A `#` inside an IRI (`XMLSchema#dateTime`) is kept:
/// only a `#` at line start or after whitespace opens a comment.
fn strip_comments(sparql: &str) -> String {
    sparql
        .lines()
        .map(|line| {
            let bytes = line.as_bytes();
            let mut cut = line.len();
            for (i, b) in bytes.iter().enumerate() {
                if *b == b'#' && (i == 0 || bytes[i - 1].is_ascii_whitespace()) {
                    cut = i;
                    break;
                }
            }
            &line[..cut]
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// First keyword after any PREFIX/BASE headers, on uppercased text.
fn first_query_keyword(upper: &str) -> Option<String> {
    let mut rest = upper.trim_start();
    while rest.starts_with("PREFIX") || rest.starts_with("BASE") {
        match rest.find('>') {
            Some(pos) => rest = rest[pos + 1..].trim_start(),
            None => return None,
        }
    }
    let word: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    if word.is_empty() {
        None
    } else {
        Some(word)
    }
}
