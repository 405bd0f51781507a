//! Chunkflow
//!
//! Generic streaming/transform pipeline core. Sources (in-memory arrays or
//! files) flow through the pipeline in bounded-size chunks, with support for
//! transformation, filtering, reduction, batching, throttling, buffering,
//! bounded-parallel mapping, round-robin merging of multiple sources, and
//! cooperative cancellation.
//!
//! # Architecture
//!
//! - **Chunk**: the unit of flow, payload plus sequencing metadata
//! - **Chunker**: splits an in-memory source into a lazy chunk stream
//! - **Stages**: lazy chunk-to-chunk operators, composed in declared order
//! - **Merge**: round-robin interleaving of several chunked sources
//! - **Byte-stream adapter**: incremental file analyze/process/copy with
//!   boundary-safe text accounting, behind a path allow-list
//!
//! # Usage
//!
//! ```no_run
//! use chunkflow::{collect_chunks, compose, Stage};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cancel = CancellationToken::new();
//!     let stages: Vec<Stage<i64>> = vec![
//!         Stage::Map(Arc::new(|x| Ok(x * 2))),
//!         Stage::Batch { batch_size: 8 },
//!     ];
//!     let stream = compose((0..100).collect(), 16, stages, cancel.clone())?;
//!     let chunks = collect_chunks(stream, cancel).await?;
//!     println!("{} chunks", chunks.len());
//!     Ok(())
//! }
//! ```

pub mod chunk;
pub mod config;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod retry;

pub use chunk::{Chunk, ChunkMetadata};
pub use config::{Config, ProcessingConfig, RetryConfig};
pub use error::{BoxError, PipelineError};
pub use io::{ChunkPredicate, ChunkTransform, FileStreamer, PathGuard, RunStats, StreamOptions};
pub use pipeline::{
    chunk_items, collect_chunks, compose, compose_reduce, deadline_token, merge_sources,
    ChunkStream, FoldFn, MapFn, Predicate, Stage,
};
pub use retry::{retry_with_backoff, RetryPolicy};

use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Analyze a file under the configuration's allowed roots.
pub async fn run_analyze(
    config: &Config,
    path: &Path,
    cancel: CancellationToken,
) -> Result<RunStats, PipelineError> {
    config.validate()?;
    let streamer = FileStreamer::new(PathGuard::new(&config.allowed_roots)?);
    let options = StreamOptions {
        chunk_size: config.processing.chunk_size,
        transform: None,
        filter: None,
        cancel,
    };
    streamer.analyze(path, &options).await
}

/// Stream a file through an optional filter and transform into a destination.
pub async fn run_process(
    config: &Config,
    input: &Path,
    output: &Path,
    transform: Option<ChunkTransform>,
    filter: Option<ChunkPredicate>,
    cancel: CancellationToken,
) -> Result<RunStats, PipelineError> {
    config.validate()?;
    let streamer = FileStreamer::new(PathGuard::new(&config.allowed_roots)?);
    let options = StreamOptions {
        chunk_size: config.processing.chunk_size,
        transform,
        filter,
        cancel,
    };
    streamer.process_to_file(input, output, &options).await
}

/// Copy a file chunk-wise.
pub async fn run_copy(
    config: &Config,
    input: &Path,
    output: &Path,
    cancel: CancellationToken,
) -> Result<RunStats, PipelineError> {
    config.validate()?;
    let streamer = FileStreamer::new(PathGuard::new(&config.allowed_roots)?);
    let options = StreamOptions {
        chunk_size: config.processing.chunk_size,
        transform: None,
        filter: None,
        cancel,
    };
    streamer.copy_to_file(input, output, &options).await
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> anyhow::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_analyze_with_config_roots() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        tokio::fs::write(&input, "one two three\n").await.unwrap();

        let mut config = Config::default();
        config.allowed_roots = vec![dir.path().to_path_buf()];

        let stats = run_analyze(&config, &input, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(stats.word_count, 3);
        assert_eq!(stats.line_count, 1);
    }

    #[tokio::test]
    async fn test_run_copy_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.txt");
        let output = dir.path().join("b.txt");
        tokio::fs::write(&input, "payload").await.unwrap();

        let mut config = Config::default();
        config.allowed_roots = vec![dir.path().to_path_buf()];

        run_copy(&config, &input, &output, CancellationToken::new())
            .await
            .unwrap();
        let copied = tokio::fs::read_to_string(&output).await.unwrap();
        assert_eq!(copied, "payload");
    }

    #[test]
    fn test_build_runtime() {
        let runtime = build_runtime(Some(2)).unwrap();
        runtime.block_on(async {});
    }
}
