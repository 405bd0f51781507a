//! Chains stage operators into one end-to-end lazy pipeline.

use super::stages::{
    batch_stage, buffer_stage, filter_stage, map_stage, parallel_map_stage, reduce_stage,
    throttle_stage,
};
use super::{ChunkStream, FoldFn, MapFn, Predicate};
use crate::chunk::Chunk;
use crate::error::PipelineError;
use crate::pipeline::chunk_items;
use crate::retry::RetryPolicy;
use futures::StreamExt;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One pipeline stage. The set is closed; `compose` matches it exhaustively.
pub enum Stage<T> {
    /// Per-item transform, item type preserved.
    Map(MapFn<T, T>),

    /// Per-item predicate.
    Filter(Predicate<T>),

    /// Regroup into `batch_size`-item groups, one group per chunk.
    Batch { batch_size: usize },

    /// Sleep after every non-final chunk. Zero disables.
    Throttle { delay: Duration },

    /// Accumulate `buffer_size` items before emitting.
    Buffer { buffer_size: usize },

    /// Bounded-parallel transform with retry on transient failures.
    ParallelMap {
        parallelism: usize,
        transform: MapFn<T, T>,
        retry: RetryPolicy,
    },
}

impl<T> Stage<T> {
    fn name(&self) -> &'static str {
        match self {
            Stage::Map(_) => "map",
            Stage::Filter(_) => "filter",
            Stage::Batch { .. } => "batch",
            Stage::Throttle { .. } => "throttle",
            Stage::Buffer { .. } => "buffer",
            Stage::ParallelMap { .. } => "parallel_map",
        }
    }

    fn validate(&self) -> Result<(), PipelineError> {
        match self {
            Stage::Batch { batch_size: 0 } => {
                Err(PipelineError::invalid("batch_size must be > 0"))
            }
            Stage::Buffer { buffer_size: 0 } => {
                Err(PipelineError::invalid("buffer_size must be > 0"))
            }
            Stage::ParallelMap { parallelism: 0, .. } => {
                Err(PipelineError::invalid("parallelism must be > 0"))
            }
            _ => Ok(()),
        }
    }
}

impl<T> fmt::Debug for Stage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Compose an ordered stage list over a chunked source.
///
/// All stage parameters are validated before any iteration begins. Stages
/// execute in declared order, each consuming the previous stage's lazy
/// output; nothing is materialized beyond the bounds individual stages
/// declare. The same token reaches every stage, so one signal stops the whole
/// pipeline. An empty stage list gives pass-through chunking.
pub fn compose<T>(
    source: Vec<T>,
    chunk_size: usize,
    stages: Vec<Stage<T>>,
    cancel: CancellationToken,
) -> Result<ChunkStream<T>, PipelineError>
where
    T: Clone + Send + Sync + 'static,
{
    for stage in &stages {
        stage.validate()?;
    }

    tracing::debug!(
        "composing pipeline: {} stage(s) over chunk_size {}",
        stages.len(),
        chunk_size
    );

    let mut stream = chunk_items(source, chunk_size, cancel.clone())?;
    for stage in stages {
        stream = match stage {
            Stage::Map(f) => map_stage(stream, f, cancel.clone()),
            Stage::Filter(predicate) => filter_stage(stream, predicate, cancel.clone()),
            Stage::Batch { batch_size } => batch_stage(stream, batch_size, cancel.clone())?,
            Stage::Throttle { delay } => throttle_stage(stream, delay, cancel.clone()),
            Stage::Buffer { buffer_size } => buffer_stage(stream, buffer_size, cancel.clone())?,
            Stage::ParallelMap {
                parallelism,
                transform,
                retry,
            } => parallel_map_stage(
                stream,
                chunk_size,
                parallelism,
                transform,
                retry,
                cancel.clone(),
            )?,
        };
    }
    Ok(stream)
}

/// Compose a pipeline whose terminal stage folds every item into one scalar.
pub async fn compose_reduce<T, A>(
    source: Vec<T>,
    chunk_size: usize,
    stages: Vec<Stage<T>>,
    init: A,
    fold: FoldFn<A, T>,
    cancel: CancellationToken,
) -> Result<A, PipelineError>
where
    T: Clone + Send + Sync + 'static,
{
    let stream = compose(source, chunk_size, stages, cancel.clone())?;
    reduce_stage(stream, init, fold, cancel).await
}

/// Drive a pipeline to its single terminal outcome.
///
/// Returns the materialized chunks on success, the first stage error
/// verbatim, or `Cancelled` when the token stopped the run before the source
/// completed. Never a mix of partial output and silent truncation.
pub async fn collect_chunks<T>(
    mut stream: ChunkStream<T>,
    cancel: CancellationToken,
) -> Result<Vec<Chunk<T>>, PipelineError> {
    let mut chunks = Vec::new();
    let mut completed = false;

    while let Some(item) = stream.next().await {
        let chunk = item?;
        if chunk.is_complete {
            completed = true;
        }
        chunks.push(chunk);
    }

    if !completed && cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    Ok(chunks)
}
