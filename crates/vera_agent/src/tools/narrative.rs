//! Narrative fallback retrieval.
//!
//! Structured facts come first; this path exists for question shapes they
//! cannot cover (biographical prose, relationship descriptions). The entity's
//! English article title is looked up over the SPARQL seam, the article HTML
//! comes from the Wikimedia REST endpoint, and the text is cleaned with
//! scraper + html2text and truncated to the configured character cap.
//! Retrieval is always live: no page is cached between questions.

use crate::tools::{protocol::ProtocolState, ToolError};
use crate::wikidata::SparqlEndpoint;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use vera_common::{EntityId, Passage};

/// Marker appended when the article text is cut at the character cap.
pub const TRUNCATION_MARKER: &str = "\n[article truncated]";

/// Article HTML source. Production fetches from the Wikimedia REST API;
/// tests script pages by title.
#[async_trait]
pub trait ArticleFetcher: Send + Sync {
    /// The article HTML for a title, or `None` when no such article exists.
    async fn fetch_html(&self, title: &str) -> Result<Option<String>, ToolError>;
}

/// Wikimedia REST client (`page/html/{title}`).
pub struct WikipediaClient {
    http: reqwest::Client,
    rest_url: String,
}

impl WikipediaClient {
    pub fn new(rest_url: &str, user_agent: &str, timeout_secs: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(user_agent)
            .build()
            .unwrap_or_default();
        Self {
            http,
            rest_url: rest_url.to_string(),
        }
    }
}

#[async_trait]
impl ArticleFetcher for WikipediaClient {
    async fn fetch_html(&self, title: &str) -> Result<Option<String>, ToolError> {
        let encoded = title.replace(' ', "_");
        let url = format!("{}{}", self.rest_url, encoded);
        debug!("fetching article: {}", url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ToolError::Transient(format!("article fetch failed: {e}")))?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ToolError::Transient(format!(
                "article endpoint returned HTTP {}",
                response.status()
            )));
        }

        let html = response
            .text()
            .await
            .map_err(|e| ToolError::Transient(format!("article body read failed: {e}")))?;
        Ok(Some(html))
    }
}

/// Scripted article source for deterministic tests.
#[derive(Debug, Default)]
pub struct FakeArticles {
    pages: HashMap<String, String>,
}

impl FakeArticles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, title: &str, html: &str) -> Self {
        self.pages.insert(title.to_string(), html.to_string());
        self
    }
}

#[async_trait]
impl ArticleFetcher for FakeArticles {
    async fn fetch_html(&self, title: &str) -> Result<Option<String>, ToolError> {
        Ok(self.pages.get(title).cloned())
    }
}

/// Retrieve the encyclopedic passage for an authorized entity.
///
/// Returns `Ok(None)` when the entity has no English article; that is data,
/// not an error.
pub async fn retrieve(
    endpoint: &dyn SparqlEndpoint,
    articles: &dyn ArticleFetcher,
    state: &ProtocolState,
    entity: &EntityId,
    max_chars: usize,
) -> Result<Option<Passage>, ToolError> {
    if !entity.is_well_formed() {
        return Err(ToolError::Rejected(format!(
            "'{}' is not a valid Wikidata QID (expected format: Q12345)",
            entity
        )));
    }
    if !state.is_authorized(entity) {
        return Err(ToolError::Protocol(
            state.unauthorized_subject_message(entity, "retrieve_narrative"),
        ));
    }

    let Some(title) = lookup_article_title(endpoint, entity).await? else {
        debug!("no English article for {}", entity);
        return Ok(None);
    };

    let Some(html) = articles.fetch_html(&title).await? else {
        return Ok(None);
    };

    let text = clean_article_text(&html)?;
    if text.is_empty() {
        return Ok(None);
    }
    let (text, truncated) = truncate_chars(&text, max_chars);

    Ok(Some(Passage {
        entity: entity.clone(),
        title,
        text,
        truncated,
    }))
}

/// English Wikipedia title for a QID via `schema:about`.
async fn lookup_article_title(
    endpoint: &dyn SparqlEndpoint,
    entity: &EntityId,
) -> Result<Option<String>, ToolError> {
    let sparql = format!(
        "SELECT ?title WHERE {{\n\
         \x20 ?article schema:about wd:{} ;\n\
         \x20          schema:isPartOf <https://en.wikipedia.org/> ;\n\
         \x20          schema:name ?title .\n\
         }} LIMIT 1",
        entity.as_str()
    );
    let results = endpoint
        .query(&sparql)
        .await
        .map_err(|e| ToolError::Transient(e.to_string()))?;
    Ok(results.first_value("title").map(|t| t.to_string()))
}

/// `[text][1]` reference-style links left by html2text.
static LINK_REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]*)\]\[\d+\]").expect("link reference pattern"));

/// `[1]: /wiki/Target` footnote lines emitted below each rendered block.
static FOOTNOTE_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[\d+\]:\s").expect("footnote line pattern"));

/// Paragraph text from Wikimedia REST HTML. Selecting section paragraphs
/// drops infoboxes, navboxes, reference lists, scripts, and styles; each
/// paragraph is converted with html2text, then the reference-style link
/// markup html2text leaves behind is stripped so links flatten to plain
/// words.
fn clean_article_text(html: &str) -> Result<String, ToolError> {
    let document = Html::parse_document(html);
    let paragraphs = Selector::parse("section > p, body > p")
        .map_err(|e| ToolError::Rejected(format!("paragraph selector: {e}")))?;

    let mut blocks: Vec<String> = Vec::new();
    for element in document.select(&paragraphs) {
        let text = html2text::from_read(element.html().as_bytes(), 100);
        let joined = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !FOOTNOTE_LINE_RE.is_match(line))
            .collect::<Vec<_>>()
            .join(" ");
        let cleaned = LINK_REF_RE.replace_all(&joined, "$1").into_owned();
        if !cleaned.is_empty() {
            blocks.push(cleaned);
        }
    }
    Ok(blocks.join("\n\n"))
}

fn truncate_chars(text: &str, max_chars: usize) -> (String, bool) {
    if text.chars().count() <= max_chars {
        return (text.to_string(), false);
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str(TRUNCATION_MARKER);
    (cut, true)
}

/// Observation payload for a retrieved passage.
pub fn render_passage(passage: &Passage) -> String {
    format!("ARTICLE: {}\n\n{}", passage.title, passage.text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wikidata::{FakeEndpoint, ResultsBuilder, SparqlValue};
    use vera_common::{EntityCandidate, Resolution};

    const TURING_HTML: &str = r#"<html><body>
        <section>
            <table class="infobox"><tbody><tr><td>Born 1912</td></tr></tbody></table>
            <p>Alan Turing was an English <a href="/wiki/Mathematician">mathematician</a>.</p>
            <p>He worked at the Government Code and Cypher School.</p>
            <div class="navbox">Navigation junk</div>
            <ol class="references"><li>Citation</li></ol>
        </section>
        <script>console.log("chrome")</script>
    </body></html>"#;

    fn title_results(title: &str) -> crate::wikidata::SparqlResults {
        ResultsBuilder::new()
            .row(&[("title", SparqlValue::literal(title))])
            .build()
    }

    fn authorized(qid: &str) -> ProtocolState {
        let mut state = ProtocolState::new();
        state.register(Resolution {
            mention: "Alan Turing".to_string(),
            candidates: vec![EntityCandidate {
                id: EntityId::new(qid),
                label: "Alan Turing".to_string(),
                description: String::new(),
                instance_of: vec![],
                aliases: vec![],
                confidence: 0.95,
            }],
        });
        state
    }

    #[tokio::test]
    async fn test_retrieve_cleans_chrome_and_keeps_paragraphs() {
        let endpoint = FakeEndpoint::new().on("schema:about wd:Q7251", title_results("Alan Turing"));
        let articles = FakeArticles::new().with_page("Alan Turing", TURING_HTML);
        let state = authorized("Q7251");

        let passage = retrieve(&endpoint, &articles, &state, &EntityId::new("Q7251"), 8000)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(passage.title, "Alan Turing");
        assert!(passage.text.contains("English mathematician."));
        assert!(passage.text.contains("Government Code and Cypher School"));
        // Links flatten to plain words: no [text][1] markup, no footnote URLs.
        assert!(!passage.text.contains("]["));
        assert!(!passage.text.contains("/wiki/"));
        assert!(!passage.text.contains("Navigation junk"));
        assert!(!passage.text.contains("Born 1912"));
        assert!(!passage.text.contains("console.log"));
        assert!(!passage.truncated);
    }

    #[tokio::test]
    async fn test_no_article_title_is_none_not_error() {
        let endpoint = FakeEndpoint::new();
        let articles = FakeArticles::new();
        let state = authorized("Q7251");

        let passage = retrieve(&endpoint, &articles, &state, &EntityId::new("Q7251"), 8000)
            .await
            .unwrap();
        assert!(passage.is_none());
    }

    #[tokio::test]
    async fn test_unauthorized_entity_is_a_protocol_violation() {
        let endpoint = FakeEndpoint::new();
        let articles = FakeArticles::new();
        let state = ProtocolState::new();

        let result = retrieve(&endpoint, &articles, &state, &EntityId::new("Q7251"), 8000).await;
        assert!(matches!(result, Err(ToolError::Protocol(_))));
        assert_eq!(endpoint.call_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_qid_rejected_before_network() {
        let endpoint = FakeEndpoint::new();
        let articles = FakeArticles::new();
        let state = authorized("Q7251");

        let result = retrieve(
            &endpoint,
            &articles,
            &state,
            &EntityId::new("not-a-qid"),
            8000,
        )
        .await;
        assert!(matches!(result, Err(ToolError::Rejected(_))));
        assert_eq!(endpoint.call_count(), 0);
    }

    #[tokio::test]
    async fn test_truncation_applies_marker_at_cap() {
        let long_html = format!("<html><body><section><p>{}</p></section></body></html>", "word ".repeat(500));
        let endpoint = FakeEndpoint::new().on("schema:about wd:Q7251", title_results("Alan Turing"));
        let articles = FakeArticles::new().with_page("Alan Turing", &long_html);
        let state = authorized("Q7251");

        let passage = retrieve(&endpoint, &articles, &state, &EntityId::new("Q7251"), 100)
            .await
            .unwrap()
            .unwrap();
        assert!(passage.truncated);
        assert!(passage.text.ends_with(TRUNCATION_MARKER));
        assert_eq!(
            passage.text.chars().count(),
            100 + TRUNCATION_MARKER.chars().count()
        );
    }

    #[test]
    fn test_render_passage_carries_title() {
        let passage = Passage {
            entity: EntityId::new("Q7251"),
            title: "Alan Turing".to_string(),
            text: "Some text.".to_string(),
            truncated: false,
        };
        let rendered = render_passage(&passage);
        assert!(rendered.starts_with("ARTICLE: Alan Turing"));
        assert!(rendered.contains("Some text."));
    }
}
