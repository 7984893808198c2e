//! Vera Control - command-line front end for the grounded QA agent.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "veractl")]
#[command(about = "Vera - grounded question answering over Wikidata", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file path (default: /etc/vera/config.toml, then ./vera.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Machine-readable JSON output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question with the tool-grounded agent
    Ask {
        /// The question to answer
        #[arg(required = true)]
        question: Vec<String>,

        /// Model identifier served by Ollama
        #[arg(long)]
        model: Option<String>,

        /// Sampling temperature
        #[arg(long)]
        temperature: Option<f32>,

        /// Decision-loop step budget
        #[arg(long)]
        budget: Option<u32>,

        /// Print the step-by-step trace after the answer
        #[arg(long)]
        trace: bool,
    },

    /// Answer with the prompt-only baseline (no retrieval)
    Baseline {
        /// The question to answer
        #[arg(required = true)]
        question: Vec<String>,

        /// Model identifier served by Ollama
        #[arg(long)]
        model: Option<String>,

        /// Sampling temperature
        #[arg(long)]
        temperature: Option<f32>,
    },

    /// Run the grounded agent and the baseline on the same question
    Compare {
        /// The question to answer
        #[arg(required = true)]
        question: Vec<String>,

        /// Model identifier served by Ollama
        #[arg(long)]
        model: Option<String>,

        /// Sampling temperature
        #[arg(long)]
        temperature: Option<f32>,

        /// Decision-loop step budget
        #[arg(long)]
        budget: Option<u32>,

        /// Print the grounded trace after the comparison
        #[arg(long)]
        trace: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Ask {
            question,
            model,
            temperature,
            budget,
            trace,
        } => {
            let overrides = commands::Overrides {
                model,
                temperature,
                budget,
            };
            commands::ask(&config, &question.join(" "), overrides, trace, cli.json).await
        }
        Commands::Baseline {
            question,
            model,
            temperature,
        } => {
            let overrides = commands::Overrides {
                model,
                temperature,
                budget: None,
            };
            commands::baseline(&config, &question.join(" "), overrides, cli.json).await
        }
        Commands::Compare {
            question,
            model,
            temperature,
            budget,
            trace,
        } => {
            let overrides = commands::Overrides {
                model,
                temperature,
                budget,
            };
            commands::compare(&config, &question.join(" "), overrides, trace, cli.json).await
        }
    }
}
