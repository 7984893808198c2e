//! Ollama-backed decision oracle.
//!
//! Talks to a local Ollama daemon over `/api/chat` with streaming disabled.
//! Grounded runs request JSON-mode output so the strict one-object protocol
//! holds; the prompt-only baseline uses plain text mode. The model name and
//! temperature come from the per-run configuration, never from process-wide
//! state.

use crate::orchestrator::oracle::{ChatMessage, DecisionOracle, OracleError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use vera_common::RunConfig;

/// Model stays loaded this long after the last request.
const DEFAULT_KEEP_ALIVE: &str = "5m";

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
    options: OllamaOptions,
    keep_alive: &'a str,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

/// Decision oracle over a local Ollama daemon.
pub struct OllamaOracle {
    http: reqwest::Client,
    base_url: String,
    json_mode: bool,
}

impl OllamaOracle {
    pub fn new(base_url: &str, timeout_secs: u64) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            json_mode: true,
        }
    }

    /// Plain-text replies, for the prompt-only baseline.
    pub fn plain_text(mut self) -> Self {
        self.json_mode = false;
        self
    }

    /// Whether the daemon answers at all.
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        self.http.get(&url).send().await.is_ok()
    }
}

#[async_trait]
impl DecisionOracle for OllamaOracle {
    async fn decide(
        &self,
        messages: &[ChatMessage],
        config: &RunConfig,
    ) -> Result<String, OracleError> {
        let url = format!("{}/api/chat", self.base_url);
        let request = OllamaChatRequest {
            model: &config.model,
            messages,
            stream: false,
            format: self.json_mode.then_some("json"),
            options: OllamaOptions {
                temperature: config.temperature,
            },
            keep_alive: DEFAULT_KEEP_ALIVE,
        };

        info!(
            "oracle call [{}], {} message(s), temperature {}",
            config.model,
            messages.len(),
            config.temperature
        );

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| OracleError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Status {
                status: status.as_u16(),
                body: body.chars().take(300).collect(),
            });
        }

        let chat: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| OracleError::Malformed(e.to_string()))?;

        debug!("oracle replied with {} chars", chat.message.content.len());
        Ok(chat.message.content)
    }
}
