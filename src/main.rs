//! Chunkflow CLI
//!
//! Stream files through the chunked transform pipeline.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chunkflow::{
    build_runtime, run_analyze, run_copy, run_process, ChunkPredicate, ChunkTransform, Config,
    RunStats,
};

#[derive(Parser)]
#[command(name = "chunkflow")]
#[command(about = "Stream files through a chunked transform pipeline", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Override chunk size in bytes
    #[arg(long, global = true)]
    chunk_size: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a file: size, chunks, lines, words, characters
    Analyze {
        /// File to analyze
        path: PathBuf,
    },

    /// Stream a file through a transform into a destination file
    Process {
        /// Input file
        input: PathBuf,

        /// Output file
        output: PathBuf,

        /// Built-in per-chunk transform to apply
        #[arg(long, value_enum)]
        transform: Option<TransformKind>,

        /// Skip chunks that are entirely whitespace
        #[arg(long)]
        skip_blank: bool,
    },

    /// Copy a file chunk-wise
    Copy {
        /// Input file
        input: PathBuf,

        /// Output file
        output: PathBuf,
    },

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

/// Built-in per-chunk transforms.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum TransformKind {
    Uppercase,
    Lowercase,
}

impl TransformKind {
    fn as_transform(self) -> ChunkTransform {
        match self {
            TransformKind::Uppercase => Arc::new(|bytes: Vec<u8>| Ok(bytes.to_ascii_uppercase())),
            TransformKind::Lowercase => Arc::new(|bytes: Vec<u8>| Ok(bytes.to_ascii_lowercase())),
        }
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze { path } => {
            let config = load_config(&cli.config, cli.chunk_size)?;
            run_blocking(&config, |config, cancel| async move {
                run_analyze(&config, &path, cancel).await.map_err(Into::into)
            })?;
        }

        Commands::Process {
            input,
            output,
            transform,
            skip_blank,
        } => {
            let config = load_config(&cli.config, cli.chunk_size)?;
            let transform = transform.map(TransformKind::as_transform);
            let filter: Option<ChunkPredicate> = if skip_blank {
                Some(Arc::new(|bytes: &[u8]| {
                    Ok(!bytes.iter().all(u8::is_ascii_whitespace))
                }))
            } else {
                None
            };
            run_blocking(&config, |config, cancel| async move {
                run_process(&config, &input, &output, transform, filter, cancel)
                    .await
                    .map_err(Into::into)
            })?;
        }

        Commands::Copy { input, output } => {
            let config = load_config(&cli.config, cli.chunk_size)?;
            run_blocking(&config, |config, cancel| async move {
                run_copy(&config, &input, &output, cancel)
                    .await
                    .map_err(Into::into)
            })?;
        }

        Commands::Validate => {
            let config = load_config(&cli.config, cli.chunk_size)?;
            config.validate()?;
            println!("Configuration is valid");
        }

        Commands::GenerateConfig { output } => {
            generate_config_command(output)?;
        }
    }

    Ok(())
}

fn load_config(path: &PathBuf, chunk_size_override: Option<usize>) -> Result<Config> {
    let mut config = if path.exists() {
        Config::from_file(path)?
    } else {
        Config::default()
    };

    // Apply overrides
    if let Some(chunk_size) = chunk_size_override {
        config.processing.chunk_size = chunk_size;
    }

    config.validate()?;
    Ok(config)
}

/// Run one adapter operation on a fresh runtime, wiring Ctrl-C into the
/// shared cancellation token and reporting statistics afterwards.
fn run_blocking<F, Fut>(config: &Config, op: F) -> Result<()>
where
    F: FnOnce(Config, CancellationToken) -> Fut,
    Fut: std::future::Future<Output = Result<RunStats>>,
{
    let runtime = build_runtime(None)?;
    let config = config.clone();
    let enable_metrics = config.processing.enable_metrics;
    let metrics_path = config.processing.metrics_output_path.clone();

    runtime.block_on(async move {
        let cancel = CancellationToken::new();
        let watcher = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, cancelling run");
                watcher.cancel();
            }
        });

        let stats = op(config, cancel).await?;

        if enable_metrics {
            println!("{}", stats);
            if let Some(path) = &metrics_path {
                stats.save_to_file(path)?;
            }
        }
        Ok(())
    })
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    // Generate a commented YAML config
    let yaml = r#"# Chunkflow Configuration

# === PROCESSING: stage parameters ===
processing:
  # Bytes per read for file sources, items per chunk for arrays
  chunk_size: 65536

  # Items per group for the batch stage
  batch_size: 32

  # Delay in milliseconds after each non-final chunk (0 = no throttling)
  throttle_ms: 0

  # Accumulation threshold for the buffer stage
  buffer_size: 256

  # Ceiling on concurrent sub-batches in the bounded-parallel stage
  parallelism: 4

  # Print run statistics after completion
  enable_metrics: true

  # Optional path to save run statistics JSON
  # metrics_output_path: "stats.json"

# === RETRY: backoff for transient failures ===
retry:
  max_attempts: 3
  initial_backoff_ms: 100
  max_backoff_ms: 10000

# === SECURITY: directories file paths must resolve under ===
allowed_roots:
  - "."
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}
