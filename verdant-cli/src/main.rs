use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use verdant_core::Config;
use verdant_knowledge::KnowledgeEngine;

mod dataset;

/// Plant-care knowledge base tools.
#[derive(Debug, Parser)]
#[command(name = "verdant", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ingest a JSON dataset of care tips
    Ingest {
        /// Array of records, or a snapshot with an `items` array
        file: PathBuf,
    },
    /// Rank stored tips against a question
    Query {
        text: String,
        #[arg(long)]
        species: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Write the whole corpus to a snapshot file
    Export { file: PathBuf },
    /// Delete every stored tip
    Reset,
    /// Print the number of stored tips
    Count,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = Config::load()?;

    // RUST_LOG wins over the configured level
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_level().into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let settings = config.knowledge_settings();
    info!("Using {} knowledge backend", settings.backend);
    let engine = KnowledgeEngine::open(settings, config.chroma_credentials()).await?;

    match cli.command {
        Command::Ingest { file } => {
            let records = dataset::load_records(&file).await?;
            let report = engine.ingest(&records).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Query {
            text,
            species,
            limit,
        } => {
            let retrieval = engine.retrieve(&text, species.as_deref(), limit).await?;
            let output = json!({
                "backend": retrieval.backend,
                "degraded": retrieval.degraded,
                "results": retrieval.tips(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Export { file } => {
            let count = engine.export_snapshot(&file).await?;
            println!("Exported {} items to {}", count, file.display());
        }
        Command::Reset => {
            engine.reset().await?;
            println!("Knowledge corpus cleared");
        }
        Command::Count => {
            println!("{}", engine.count().await?);
        }
    }

    Ok(())
}
