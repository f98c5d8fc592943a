//! `safeval`: evaluate the factuality of a response from the command line.

mod logging;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use safeval_core::Config;
use safeval_runtime::providers::ProviderRegistry;
use safeval_runtime::{EvaluationPipeline, KnowledgeBaseRetriever, ProviderModel, Strategy};

/// SAF-Eval factuality evaluation
#[derive(Parser)]
#[command(name = "safeval")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate a response and print the result as JSON
    Evaluate {
        /// Config file (YAML or JSON); built-in defaults when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Response text to evaluate
        #[arg(long)]
        response: String,

        /// Question or topic the response answers
        #[arg(long)]
        context: Option<String>,

        /// JSON object mapping entry keys to evidence text
        #[arg(long)]
        knowledge_base: PathBuf,

        /// Provider type; overrides `llm_config.provider`
        #[arg(long)]
        provider: Option<String>,

        /// Extract, check containment and filter relevancy without the model
        #[arg(long)]
        heuristic: bool,
    },

    /// Validate a config file
    ValidateConfig {
        /// Config file (YAML or JSON)
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Evaluate {
            config,
            response,
            context,
            knowledge_base,
            provider,
            heuristic,
        } => {
            let config = match config {
                Some(path) => Config::from_file(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => Config::default(),
            };
            logging::init_logging(&config.logging)?;
            evaluate(config, &response, context.as_deref(), knowledge_base, provider, heuristic).await
        }
        Command::ValidateConfig { path } => match Config::from_file(&path) {
            Ok(config) => {
                println!(
                    "{} is valid ({} categories: {})",
                    path.display(),
                    config.scoring_rubric.len(),
                    config.evaluation_categories().join(", ")
                );
                Ok(())
            }
            Err(e) => bail!("{} is invalid: {}", path.display(), e),
        },
    }
}

async fn evaluate(
    config: Config,
    response: &str,
    context: Option<&str>,
    knowledge_base: PathBuf,
    provider: Option<String>,
    heuristic: bool,
) -> Result<()> {
    let provider_type = provider.unwrap_or_else(|| config.llm_config.provider.clone());
    let provider_config = serde_json::to_value(&config.llm_config.extra)?;

    let registry = ProviderRegistry::with_defaults();
    let provider = registry
        .create(&provider_type, &provider_config)
        .with_context(|| format!("creating provider '{}'", provider_type))?;
    let model = ProviderModel::new(provider, config.llm_config.model.clone());

    let retriever = KnowledgeBaseRetriever::from_json_file(&knowledge_base)?;
    tracing::info!(entries = retriever.len(), "Knowledge base loaded");

    let strategy = if heuristic {
        Strategy::Heuristic
    } else {
        Strategy::Model
    };
    let pipeline = EvaluationPipeline::builder(config)
        .model(Arc::new(model))
        .retriever(Arc::new(retriever))
        .extraction_strategy(strategy)
        .containment_strategy(strategy)
        .relevancy_strategy(strategy)
        .build()?;

    let result = pipeline.run(response, context).await?;

    if let Some(usage) = pipeline.usage() {
        tracing::info!(
            llm_calls = usage.llm_calls,
            cache_hits = usage.cache_hits,
            total_tokens = usage.total_tokens,
            estimated_cost = usage.estimated_cost,
            "Model usage"
        );
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
