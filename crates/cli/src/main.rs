//! # boleta CLI entry point
//!
//! Recognizes Chilean receipts from local files or URLs through Google Cloud
//! Vision, and exposes the offline text parser and RUT checker for debugging.
//! Every command prints JSON on stdout.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use boleta_core::{format_rut, validate_rut};
use boleta_ocr::{
    MemoryStore, OcrConfig, ReceiptParser, ReceiptPipeline, RateLimiter, VisionRecognizer,
};

/// Chilean receipt recognition.
#[derive(Parser, Debug)]
#[command(name = "boleta", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to a TOML configuration file.
    #[arg(long, global = true, env = "BOLETA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Recognize and parse a receipt image on disk.
    Analyze {
        /// Image file (JPEG, PNG, PDF page render, ...).
        path: PathBuf,
    },

    /// Download a receipt image and recognize it.
    AnalyzeUrl {
        url: String,
    },

    /// Parse already-recognized receipt text without calling the OCR backend.
    Parse {
        /// Plain-text file holding the OCR output.
        path: PathBuf,
    },

    /// Validate and format a RUT.
    Rut {
        value: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter(cli.verbose))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match load_config(cli.config.as_deref()) {
        Ok(config) => run(cli.command, &config).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

/// `-v` flags win; without them `RUST_LOG` applies, defaulting to `warn`.
fn env_filter(verbose: u8) -> EnvFilter {
    match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    }
}

fn load_config(path: Option<&Path>) -> Result<OcrConfig> {
    match path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "Loading configuration");
            OcrConfig::load(path).with_context(|| format!("loading {}", path.display()))
        }
        None => Ok(OcrConfig::default()),
    }
}

async fn run(command: Commands, config: &OcrConfig) -> Result<u8> {
    match command {
        Commands::Analyze { path } => {
            let image = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let pipeline = build_pipeline(config)?;
            let cancel = cancel_on_ctrl_c();
            let receipt = pipeline.analyze_with_cancel(&image, &cancel).await?;
            print_json(&serde_json::to_value(&receipt)?)?;
            Ok(0)
        }
        Commands::AnalyzeUrl { url } => {
            let pipeline = build_pipeline(config)?;
            let cancel = cancel_on_ctrl_c();
            let receipt = pipeline.analyze_from_url_with_cancel(&url, &cancel).await?;
            print_json(&serde_json::to_value(&receipt)?)?;
            Ok(0)
        }
        Commands::Parse { path } => {
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let receipt = ReceiptParser::new(config.parser.amount_policy).parse(&text)?;
            print_json(&serde_json::to_value(&receipt)?)?;
            Ok(0)
        }
        Commands::Rut { value } => {
            let valid = validate_rut(&value);
            print_json(&rut_report(&value))?;
            Ok(if valid { 0 } else { 2 })
        }
    }
}

fn build_pipeline(config: &OcrConfig) -> Result<ReceiptPipeline<VisionRecognizer>> {
    let recognizer =
        VisionRecognizer::new(&config.vision).context("configuring the Vision recognizer")?;
    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit.max_per_second,
        config.rate_limit.max_per_minute,
    ));
    let pipeline =
        ReceiptPipeline::from_config(recognizer, limiter, config, Box::new(MemoryStore::new()))?;
    Ok(pipeline)
}

/// Token that trips on the first Ctrl-C so a pending limiter wait or download aborts.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trip = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            trip.cancel();
        }
    });
    token
}

fn rut_report(value: &str) -> serde_json::Value {
    let valid = validate_rut(value);
    json!({
        "input": value,
        "valid": valid,
        "formatted": valid.then(|| format_rut(value)),
    })
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
