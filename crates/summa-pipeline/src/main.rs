use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;

use summa_pipeline::{
    format, render, OpenAiExecutor, Pipeline, RunOptions, SemanticScholarClient, Settings,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Markdown,
}

/// Research question → ranked, literature-grounded hypotheses in the
/// Summa disputation format.
#[derive(Debug, Parser)]
#[command(name = "summa-pipeline", version)]
struct Cli {
    /// The research question to investigate.
    question: String,

    /// Domain label injected into the stage prompts.
    #[arg(long)]
    domain: Option<String>,

    /// Objective line injected into framing and generation prompts.
    #[arg(long)]
    objective: Option<String>,

    /// Number of top hypotheses rendered as disputation blocks (1 or 3).
    #[arg(long, default_value_t = render::TOP_N)]
    top: usize,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
    format: OutputFormat,

    /// Write the output to a file instead of stdout.
    #[arg(long)]
    save: Option<PathBuf>,

    /// Print the payload JSON schema and exit.
    #[arg(long)]
    print_schema: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    if cli.print_schema {
        let schema = summa_pipeline::contract::payload_schema();
        println!(
            "{}",
            serde_json::to_string_pretty(&schema).context("failed to serialize schema")?
        );
        return Ok(());
    }
    let settings = Settings::default();

    let executor = OpenAiExecutor::new(&settings);
    let search = SemanticScholarClient::new(&settings);
    let pipeline = Pipeline::new(&executor, &search, &settings);

    let mut options = RunOptions::new(cli.question);
    options.domain = cli.domain;
    options.objective = cli.objective;
    options.top = cli.top;

    let payload = pipeline.run(options).await?;

    let rendered = match cli.format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(&payload).context("failed to serialize payload")?
        }
        OutputFormat::Markdown => format::to_markdown(&payload),
    };

    match cli.save {
        Some(path) => {
            std::fs::write(&path, &rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "output written");
        }
        None => println!("{rendered}"),
    }

    if let Some(error) = &payload.error {
        info!(stage = %error.stage, "run ended partially failed");
        std::process::exit(1);
    }
    Ok(())
}
