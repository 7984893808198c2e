//! Command execution: wire the configured clients into an engine, run the
//! question, hand the result to the output layer.

use crate::output;
use anyhow::{bail, Context, Result};
use console::Term;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use vera_agent::{
    AnswerEngine, BaselineAgent, OllamaOracle, Toolbox, WdqsClient, WikipediaClient,
};
use vera_common::config::VeraConfig;
use vera_common::RunConfig;

/// Per-invocation flag overrides layered on top of the config file.
pub struct Overrides {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub budget: Option<u32>,
}

impl Overrides {
    fn apply(&self, mut run: RunConfig) -> RunConfig {
        if let Some(model) = &self.model {
            run.model = model.clone();
        }
        if let Some(temperature) = self.temperature {
            run.temperature = temperature;
        }
        if let Some(budget) = self.budget {
            run.step_budget = budget;
        }
        run
    }
}

/// Load config from an explicit path, or the standard locations.
pub fn load_config(path: Option<&str>) -> Result<VeraConfig> {
    match path {
        Some(path) => {
            VeraConfig::load_from_path(path).with_context(|| format!("loading config {path}"))
        }
        None => Ok(VeraConfig::load()),
    }
}

pub async fn ask(
    config: &VeraConfig,
    question: &str,
    overrides: Overrides,
    trace: bool,
    json: bool,
) -> Result<()> {
    let run = overrides.apply(config.run_config());
    let engine = grounded_engine(config, run).await?;

    let spinner = spinner("consulting the knowledge base...");
    let answer = engine.run(question).await;
    finish(spinner);

    let answer = answer.context("run rejected")?;
    output::print_answer(&answer, trace, json)
}

pub async fn baseline(
    config: &VeraConfig,
    question: &str,
    overrides: Overrides,
    json: bool,
) -> Result<()> {
    let run = overrides.apply(config.run_config());
    let agent = baseline_agent(config, run).await?;

    let spinner = spinner("asking the model directly...");
    let answer = agent.run(question).await;
    finish(spinner);

    let answer = answer.context("run rejected")?;
    output::print_answer(&answer, false, json)
}

pub async fn compare(
    config: &VeraConfig,
    question: &str,
    overrides: Overrides,
    trace: bool,
    json: bool,
) -> Result<()> {
    let run = overrides.apply(config.run_config());
    let engine = grounded_engine(config, run.clone()).await?;
    let agent = baseline_agent(config, run).await?;

    let spinner = spinner("running both agents...");
    let grounded = engine.run(question).await;
    let ungrounded = agent.run(question).await;
    finish(spinner);

    let grounded = grounded.context("grounded run rejected")?;
    let ungrounded = ungrounded.context("baseline run rejected")?;
    output::print_comparison(&grounded, &ungrounded, trace, json)
}

async fn grounded_engine(config: &VeraConfig, run: RunConfig) -> Result<AnswerEngine> {
    let oracle = connected_oracle(config).await?;
    let endpoint = Arc::new(WdqsClient::new(
        &config.wikidata.endpoint,
        &config.wikidata.user_agent,
        run.tool_timeout_secs,
    ));
    let articles = Arc::new(WikipediaClient::new(
        &config.wikipedia.rest_url,
        &config.wikipedia.user_agent,
        run.tool_timeout_secs,
    ));
    let toolbox = Toolbox::new(endpoint, articles);
    Ok(AnswerEngine::new(Arc::new(oracle), toolbox, run))
}

async fn baseline_agent(config: &VeraConfig, run: RunConfig) -> Result<BaselineAgent> {
    let oracle = connected_oracle(config).await?.plain_text();
    Ok(BaselineAgent::new(Arc::new(oracle), run))
}

async fn connected_oracle(config: &VeraConfig) -> Result<OllamaOracle> {
    let oracle = OllamaOracle::new(&config.llm.ollama_url, config.llm.timeout_secs);
    if !oracle.is_available().await {
        bail!(
            "Ollama is not reachable at {}. Start it with: ollama serve",
            config.llm.ollama_url
        );
    }
    Ok(oracle)
}

/// Spinner on stderr while a run is in flight; suppressed when piped.
fn spinner(message: &str) -> Option<ProgressBar> {
    if !Term::stderr().is_term() {
        return None;
    }
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    Some(bar)
}

fn finish(spinner: Option<ProgressBar>) {
    if let Some(bar) = spinner {
        bar.finish_and_clear();
    }
}
