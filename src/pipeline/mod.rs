//! Chunked streaming pipeline: chunker, stage operators, merge, composition.

pub mod chunker;
pub mod compose;
pub mod merge;
pub mod stages;

pub use chunker::chunk_items;
pub use compose::{collect_chunks, compose, compose_reduce, Stage};
pub use merge::merge_sources;
pub use stages::{
    batch_stage, buffer_stage, filter_stage, map_stage, parallel_map_stage, reduce_stage,
    throttle_stage,
};

use crate::chunk::Chunk;
use crate::error::{BoxError, PipelineError};
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Lazy sequence of chunks. Elements are produced on demand as the consumer
/// polls; every emitted chunk is a suspension point.
pub type ChunkStream<T> = BoxStream<'static, Result<Chunk<T>, PipelineError>>;

/// Caller-supplied per-item transform.
pub type MapFn<T, U> = Arc<dyn Fn(T) -> Result<U, BoxError> + Send + Sync>;

/// Caller-supplied per-item predicate.
pub type Predicate<T> = Arc<dyn Fn(&T) -> Result<bool, BoxError> + Send + Sync>;

/// Caller-supplied fold function.
pub type FoldFn<A, T> = Arc<dyn Fn(A, T) -> Result<A, BoxError> + Send + Sync>;

/// Derive a token that self-signals after `after`, or when `parent` signals,
/// whichever comes first. This is how callers compose timeouts; the core has
/// no timeout primitive of its own.
pub fn deadline_token(parent: &CancellationToken, after: Duration) -> CancellationToken {
    let child = parent.child_token();
    let timer = child.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(after) => timer.cancel(),
            _ = timer.cancelled() => {}
        }
    });
    child
}
