//! Configuration management for Vera.
//!
//! Loads settings from /etc/vera/config.toml, a local vera.toml, or uses
//! defaults. Every field has a default so a partial file is fine.

use serde::{Deserialize, Serialize};
use std::fs;
use tracing::{info, warn};

use crate::types::{
    RunConfig, DEFAULT_MODEL, DEFAULT_SPARQL_LIMIT, DEFAULT_STEP_BUDGET, DEFAULT_TEMPERATURE,
    MAX_ARTICLE_CHARS, MAX_SEARCH_RESULTS,
};

/// System config file path
pub const CONFIG_PATH: &str = "/etc/vera/config.toml";

/// Local config file path for fallback
pub const LOCAL_CONFIG_PATH: &str = "vera.toml";

/// Decision-oracle (LLM) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model identifier served by Ollama
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Ollama base URL
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Per-call oracle timeout in seconds
    #[serde(default = "default_oracle_timeout")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_ollama_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_oracle_timeout() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            ollama_url: default_ollama_url(),
            timeout_secs: default_oracle_timeout(),
        }
    }
}

/// Decision-loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum decision-loop steps per question
    #[serde(default = "default_step_budget")]
    pub step_budget: u32,

    /// Max candidates returned per entity resolution
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    /// Default row cap for structured queries
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,

    /// Cap on retrieved article characters
    #[serde(default = "default_max_article_chars")]
    pub max_article_chars: usize,

    /// Per-call knowledge-base timeout in seconds
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
}

fn default_step_budget() -> u32 {
    DEFAULT_STEP_BUDGET
}

fn default_max_candidates() -> usize {
    MAX_SEARCH_RESULTS
}

fn default_max_rows() -> usize {
    DEFAULT_SPARQL_LIMIT
}

fn default_max_article_chars() -> usize {
    MAX_ARTICLE_CHARS
}

fn default_tool_timeout() -> u64 {
    10
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            step_budget: default_step_budget(),
            max_candidates: default_max_candidates(),
            max_rows: default_max_rows(),
            max_article_chars: default_max_article_chars(),
            tool_timeout_secs: default_tool_timeout(),
        }
    }
}

/// Knowledge-base endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikidataConfig {
    /// SPARQL endpoint URL
    #[serde(default = "default_wikidata_endpoint")]
    pub endpoint: String,

    /// User-Agent sent with every request (Wikimedia etiquette)
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_wikidata_endpoint() -> String {
    "https://query.wikidata.org/sparql".to_string()
}

fn default_user_agent() -> String {
    "vera/0.4 (research-demo)".to_string()
}

impl Default for WikidataConfig {
    fn default() -> Self {
        Self {
            endpoint: default_wikidata_endpoint(),
            user_agent: default_user_agent(),
        }
    }
}

/// Narrative-source endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikipediaConfig {
    /// REST HTML endpoint prefix; the article title is appended
    #[serde(default = "default_wikipedia_rest_url")]
    pub rest_url: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_wikipedia_rest_url() -> String {
    "https://en.wikipedia.org/api/rest_v1/page/html/".to_string()
}

impl Default for WikipediaConfig {
    fn default() -> Self {
        Self {
            rest_url: default_wikipedia_rest_url(),
            user_agent: default_user_agent(),
        }
    }
}

/// Full Vera configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VeraConfig {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub wikidata: WikidataConfig,

    #[serde(default)]
    pub wikipedia: WikipediaConfig,
}

impl VeraConfig {
    /// Load config from the standard locations, or return defaults.
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_PATH)
            .or_else(|_| Self::load_from_path(LOCAL_CONFIG_PATH))
            .unwrap_or_else(|e| {
                warn!("Config not found, using defaults: {}", e);
                VeraConfig::default()
            })
    }

    /// Load config from a specific path.
    pub fn load_from_path(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_string(),
            source: e,
        })?;
        let config: VeraConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_string(),
            source: e,
        })?;
        info!("Loaded config from {}", path);
        Ok(config)
    }

    /// Build the immutable per-run configuration from this file model.
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            model: self.llm.model.clone(),
            temperature: self.llm.temperature,
            step_budget: self.agent.step_budget,
            max_candidates: self.agent.max_candidates,
            max_rows: self.agent.max_rows,
            max_article_chars: self.agent.max_article_chars,
            tool_timeout_secs: self.agent.tool_timeout_secs,
        }
    }
}

/// Failed to read or parse a config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = VeraConfig::default();
        assert_eq!(config.llm.model, DEFAULT_MODEL);
        assert_eq!(config.agent.step_budget, DEFAULT_STEP_BUDGET);
        assert_eq!(config.wikidata.endpoint, "https://query.wikidata.org/sparql");
        assert!(config.wikipedia.rest_url.ends_with("/page/html/"));
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
[llm]
model = "custom:7b"
temperature = 0.3

[agent]
step_budget = 3
"#;
        let config: VeraConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.llm.model, "custom:7b");
        assert_eq!(config.agent.step_budget, 3);
        // Defaults for missing fields
        assert_eq!(config.agent.max_rows, DEFAULT_SPARQL_LIMIT);
        assert_eq!(config.llm.ollama_url, "http://127.0.0.1:11434");
    }

    #[test]
    fn test_run_config_mirrors_file() {
        let toml_str = r#"
[agent]
step_budget = 4
max_article_chars = 2000
"#;
        let config: VeraConfig = toml::from_str(toml_str).unwrap();
        let run = config.run_config();
        assert_eq!(run.step_budget, 4);
        assert_eq!(run.max_article_chars, 2000);
        assert!(run.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[llm]\nmodel = \"from-file:1b\"").unwrap();
        let config = VeraConfig::load_from_path(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.llm.model, "from-file:1b");
    }

    #[test]
    fn test_load_missing_file_errors() {
        let err = VeraConfig::load_from_path("/nonexistent/vera.toml");
        assert!(err.is_err());
    }
}
