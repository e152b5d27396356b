use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod input;
mod interactive;
mod loader;
mod pipeline;
mod presenter;
mod sources;

use config::Config;
use input::{InputSource, PairSource, QuerySource};
use loader::OnnxLoader;
use pipeline::UiContext;
use presenter::{JsonPresenter, Status, StatusSink, TerminalPresenter};
use sources::ImageFetcher;

#[derive(Parser)]
#[command(name = "facematch", version, about = "Decide whether two face images show the same person")]
struct Cli {
    /// Directory or http(s) base URL holding the ONNX models
    #[arg(long, global = true)]
    models: Option<String>,

    /// Distance below which the faces count as the same person
    /// [default: calibrated for the recognition model]
    #[arg(long, global = true)]
    threshold: Option<f32>,

    /// Print one JSON object per status change instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare the images named by the p1 and p2 parameters of a query string
    Query {
        /// e.g. "?p1=https://a/x.jpg&p2=https://a/y.jpg"
        query: String,
    },
    /// Compare two images given as URLs, data URLs or paths
    Compare { first: String, second: String },
    /// Read url/file/compare/quit commands from stdin
    Interactive,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(models) = cli.models {
        config.models = models;
    }
    if cli.threshold.is_some() {
        config.match_threshold = cli.threshold;
    }
    tracing::debug!(?config, "configuration loaded");

    let client = reqwest::Client::builder()
        .user_agent(concat!("facematch/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let fetcher = ImageFetcher::new(client.clone(), config.fetch_timeout);
    let loader = OnnxLoader::from_config(&config, client);

    let sink: Box<dyn StatusSink> = if cli.json {
        Box::new(JsonPresenter::new(std::io::stdout()))
    } else {
        Box::new(TerminalPresenter::new(std::io::stdout()))
    };
    let mut ui = UiContext::new(sink, fetcher, config.match_threshold);

    let source: Box<dyn InputSource> = match cli.command {
        Commands::Query { query } => Box::new(QuerySource::new(query, &config.base_dir)),
        Commands::Compare { first, second } => Box::new(PairSource::new(first, second, &config.base_dir)),
        Commands::Interactive => {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            interactive::run(&mut ui, &loader, stdin, &config.base_dir).await?;
            return Ok(exit_code(ui.status()));
        }
    };

    let status = pipeline::run_once(&mut ui, source.as_ref(), &loader).await;
    Ok(exit_code(&status))
}

fn exit_code(status: &Status) -> ExitCode {
    if failed(status) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// A session fails only when it ends in an error; a mismatch or an
/// interactive session closed before comparing is not a failure.
fn failed(status: &Status) -> bool {
    matches!(status, Status::Error(_))
}
