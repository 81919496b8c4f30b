//! sherlog: explains security-tool output and suggests follow-up steps.
//!
//! Input arrives from a file argument or stdin, gets classified by source
//! tool, and is analyzed by the first available backend (remote API or the
//! bundled local engine). Responses persist in a content-addressed cache so
//! identical requests never recompute.

mod cache;
mod classifier;
mod config;
mod engine;
mod error;
mod fingerprint;
mod pipeline;
mod prompt;
mod providers;
mod report;

use clap::{Parser, Subcommand};
use config::Config;
use error::Error;
use pipeline::{AnalysisRequest, Analyzer};
use report::ReportMode;
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "sherlog")]
#[command(author, version, about = "Explain security-tool output and suggest next steps")]
struct Cli {
    /// File to analyze; reads stdin when omitted.
    file: Option<PathBuf>,

    /// Report shape.
    #[arg(short, long, value_enum, default_value_t = ReportMode::Explain)]
    mode: ReportMode,

    /// Backend to prefer for this request.
    #[arg(short, long)]
    provider: Option<String>,

    /// Route to the local engine only, regardless of configuration.
    #[arg(long)]
    offline: bool,

    /// Skip the response cache for this request.
    #[arg(long)]
    no_cache: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or clear the response cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Show configured backends and their availability.
    Status,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show entry count, capacity, and location.
    Stats,
    /// Remove every cached response.
    Clear,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> error::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if cli.offline {
        config.offline = true;
    }

    let analyzer = Analyzer::from_config(&config)?;

    match cli.command {
        Some(Commands::Cache { action }) => match action {
            CacheAction::Stats => {
                let stats = analyzer.cache().stats();
                println!("entries:  {}", stats.entries);
                println!("capacity: {}", stats.capacity);
                println!("path:     {}", stats.path.display());
                if !analyzer.cache().is_persistent() {
                    println!("warning:  cache database unavailable, running cacheless");
                }
            }
            CacheAction::Clear => {
                let removed = analyzer.cache().clear()?;
                println!("removed {removed} cached responses");
            }
        },
        Some(Commands::Status) => {
            for p in analyzer.router().describe().await {
                let state = if p.available { "available" } else { "unavailable" };
                println!("{:<12} {:<12} {}", p.name, state, p.target);
            }
        }
        None => {
            let payload = read_input(cli.file.as_deref(), config.max_input_bytes)?;
            let output = analyzer
                .analyze(&AnalysisRequest {
                    payload,
                    mode: cli.mode,
                    provider: cli.provider,
                    no_cache: cli.no_cache,
                })
                .await?;

            tracing::debug!(
                fingerprint = output.fingerprint.as_str(),
                cached = output.cached,
                tool = output.classification.tool.as_str(),
                "analysis complete"
            );
            println!("{}", output.report.body);
        }
    }

    Ok(())
}

/// Read the payload from a file or stdin, bounded by `max_bytes`. Oversized
/// input is truncated with a warning; the prompt builder trims further to
/// fit the context budget.
fn read_input(file: Option<&std::path::Path>, max_bytes: usize) -> error::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let read = match file {
        Some(path) => {
            let f = std::fs::File::open(path).map_err(|e| {
                Error::Config(format!("cannot open {}: {e}", path.display()))
            })?;
            f.take(max_bytes as u64 + 1)
                .read_to_end(&mut buf)
                .map_err(|e| Error::Other(e.into()))?
        }
        None => std::io::stdin()
            .lock()
            .take(max_bytes as u64 + 1)
            .read_to_end(&mut buf)
            .map_err(|e| Error::Other(e.into()))?,
    };

    if read > max_bytes {
        tracing::warn!(
            limit = max_bytes,
            "input exceeds the size limit, analyzing the first {max_bytes} bytes"
        );
        buf.truncate(max_bytes);
    }
    Ok(buf)
}
