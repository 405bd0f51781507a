//! Lazy chunk-to-chunk stage operators.
//!
//! Every stage consumes its upstream one chunk at a time, checks the
//! cancellation token at each iteration step, and propagates the first
//! upstream or user-function error verbatim. User-function errors are fatal
//! to the run and never retried; only the bounded-parallel stage retries, and
//! only on transient I/O conditions.

use super::{ChunkStream, FoldFn, MapFn, Predicate};
use crate::chunk::Chunk;
use crate::error::{classify_user_error, PipelineError};
use crate::retry::{retry_with_backoff, RetryPolicy};
use async_stream::try_stream;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Apply a per-item transform to every chunk.
///
/// Output chunks keep their upstream `index` and `is_complete`.
pub fn map_stage<T, U>(
    mut upstream: ChunkStream<T>,
    f: MapFn<T, U>,
    cancel: CancellationToken,
) -> ChunkStream<U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    let stream = try_stream! {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let item = match upstream.next().await {
                Some(item) => item,
                None => break,
            };
            let mut chunk = item?;

            let data = std::mem::take(&mut chunk.data);
            let mut out = Vec::with_capacity(data.len());
            for item in data {
                out.push(f(item).map_err(PipelineError::user)?);
            }

            yield chunk.map_data(out);
        }
    };
    Box::pin(stream)
}

/// Keep only items satisfying the predicate.
///
/// Emits one output chunk per input chunk (possibly with empty data) and
/// records `metadata.filter_ratio = kept / total`, 0 for an empty input.
pub fn filter_stage<T>(
    mut upstream: ChunkStream<T>,
    predicate: Predicate<T>,
    cancel: CancellationToken,
) -> ChunkStream<T>
where
    T: Send + 'static,
{
    let stream = try_stream! {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let item = match upstream.next().await {
                Some(item) => item,
                None => break,
            };
            let mut chunk = item?;

            let total = chunk.data.len();
            let data = std::mem::take(&mut chunk.data);
            let mut kept = Vec::new();
            for item in data {
                if predicate(&item).map_err(PipelineError::user)? {
                    kept.push(item);
                }
            }

            let ratio = if total == 0 {
                0.0
            } else {
                kept.len() as f64 / total as f64
            };

            let mut out = chunk.map_data(kept);
            out.metadata.filter_ratio = Some(ratio);
            yield out;
        }
    };
    Box::pin(stream)
}

/// Fold every item of the upstream sequence, across chunk boundaries, into a
/// single accumulator.
///
/// Cancellation is checked once per chunk; if observed before the source
/// completes, the partial accumulator is discarded and `Cancelled` is
/// returned.
pub async fn reduce_stage<T, A>(
    mut upstream: ChunkStream<T>,
    init: A,
    fold: FoldFn<A, T>,
    cancel: CancellationToken,
) -> Result<A, PipelineError>
where
    T: Send + 'static,
{
    let mut acc = init;
    let mut completed = false;

    loop {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let item = match upstream.next().await {
            Some(item) => item,
            None => break,
        };
        let chunk = item?;
        completed = chunk.is_complete;

        for item in chunk.data {
            acc = fold(acc, item).map_err(PipelineError::user)?;
        }
    }

    if !completed && cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    Ok(acc)
}

/// Regroup the item stream into groups of `batch_size`, ignoring input chunk
/// boundaries. One group per emitted chunk; the final group may be shorter.
pub fn batch_stage<T>(
    mut upstream: ChunkStream<T>,
    batch_size: usize,
    cancel: CancellationToken,
) -> Result<ChunkStream<T>, PipelineError>
where
    T: Send + 'static,
{
    if batch_size == 0 {
        return Err(PipelineError::invalid(
            "batch_size must be a positive integer",
        ));
    }

    let stream = try_stream! {
        let mut pending: Vec<T> = Vec::new();
        let mut index = 0u64;
        let mut bytes = 0u64;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let item = match upstream.next().await {
                Some(item) => item,
                None => break,
            };
            let mut chunk = item?;
            let source_complete = chunk.is_complete;
            bytes = bytes.max(chunk.bytes_processed);
            pending.append(&mut chunk.data);

            while pending.len() >= batch_size {
                let group: Vec<T> = pending.drain(..batch_size).collect();
                let finished = source_complete && pending.is_empty();
                let mut out = Chunk::new(group, index, finished, bytes);
                out.metadata.batch_size = Some(out.len());
                index += 1;
                yield out;
            }

            if source_complete {
                if !pending.is_empty() {
                    let group = std::mem::take(&mut pending);
                    let mut out = Chunk::new(group, index, true, bytes);
                    out.metadata.batch_size = Some(out.len());
                    yield out;
                }
                break;
            }
        }
    };
    Ok(Box::pin(stream))
}

/// Pass chunks through unchanged, sleeping `delay` after every non-final
/// chunk. A zero delay disables throttling. Cancellation interrupts the sleep.
pub fn throttle_stage<T>(
    mut upstream: ChunkStream<T>,
    delay: Duration,
    cancel: CancellationToken,
) -> ChunkStream<T>
where
    T: Send + 'static,
{
    let stream = try_stream! {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let item = match upstream.next().await {
                Some(item) => item,
                None => break,
            };
            let chunk = item?;
            let pause = !chunk.is_complete && !delay.is_zero();

            yield chunk;

            if pause {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => break,
                }
            }
        }
    };
    Box::pin(stream)
}

/// Accumulate items until `buffer_size` are held, then emit them as one
/// chunk. The upstream's `is_complete` triggers a final flush of whatever
/// remains, even if smaller than `buffer_size`.
///
/// This decouples the arrival granularity of input chunks from the emission
/// granularity of output chunks.
pub fn buffer_stage<T>(
    mut upstream: ChunkStream<T>,
    buffer_size: usize,
    cancel: CancellationToken,
) -> Result<ChunkStream<T>, PipelineError>
where
    T: Send + 'static,
{
    if buffer_size == 0 {
        return Err(PipelineError::invalid(
            "buffer_size must be a positive integer",
        ));
    }

    let stream = try_stream! {
        let mut pending: Vec<T> = Vec::new();
        let mut index = 0u64;
        let mut bytes = 0u64;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let item = match upstream.next().await {
                Some(item) => item,
                None => break,
            };
            let mut chunk = item?;
            let source_complete = chunk.is_complete;
            bytes = bytes.max(chunk.bytes_processed);
            pending.append(&mut chunk.data);

            if pending.len() >= buffer_size {
                let data = std::mem::take(&mut pending);
                let out = Chunk::new(data, index, source_complete, bytes);
                index += 1;
                yield out;
                if source_complete {
                    break;
                }
            } else if source_complete {
                if !pending.is_empty() {
                    let data = std::mem::take(&mut pending);
                    yield Chunk::new(data, index, true, bytes);
                }
                break;
            }
        }
    };
    Ok(Box::pin(stream))
}

/// Bounded-parallel map over windows of `sub_batch_size * parallelism` items.
///
/// Within a window, up to `parallelism` sub-batches run concurrently; the
/// ceiling is a hard invariant enforced by the bounded in-flight set. Every
/// window's sub-batch results are collected before flattening, so item order
/// is preserved within and across sub-batches. Each sub-batch application is
/// retried on transient I/O failure per `policy`; any other failure aborts
/// the run.
pub fn parallel_map_stage<T>(
    mut upstream: ChunkStream<T>,
    sub_batch_size: usize,
    parallelism: usize,
    transform: MapFn<T, T>,
    policy: RetryPolicy,
    cancel: CancellationToken,
) -> Result<ChunkStream<T>, PipelineError>
where
    T: Clone + Send + Sync + 'static,
{
    if sub_batch_size == 0 {
        return Err(PipelineError::invalid(
            "sub_batch_size must be a positive integer",
        ));
    }
    if parallelism == 0 {
        return Err(PipelineError::invalid(
            "parallelism must be a positive integer",
        ));
    }
    let window_size = sub_batch_size
        .checked_mul(parallelism)
        .ok_or_else(|| PipelineError::invalid("window size overflows usize"))?;

    let stream = try_stream! {
        let mut pending: Vec<T> = Vec::new();
        let mut index = 0u64;
        let mut bytes = 0u64;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let item = match upstream.next().await {
                Some(item) => item,
                None => break,
            };
            let mut chunk = item?;
            let source_complete = chunk.is_complete;
            bytes = bytes.max(chunk.bytes_processed);
            pending.append(&mut chunk.data);

            while pending.len() >= window_size {
                let window: Vec<T> = pending.drain(..window_size).collect();
                let data =
                    run_window(window, sub_batch_size, parallelism, &transform, &policy).await?;
                let finished = source_complete && pending.is_empty();
                yield Chunk::new(data, index, finished, bytes);
                index += 1;
            }

            if source_complete {
                if !pending.is_empty() {
                    let window = std::mem::take(&mut pending);
                    let data =
                        run_window(window, sub_batch_size, parallelism, &transform, &policy)
                            .await?;
                    yield Chunk::new(data, index, true, bytes);
                }
                break;
            }
        }
    };
    Ok(Box::pin(stream))
}

/// Transform one window: split into sub-batches, run at most `parallelism`
/// concurrently, then flatten in sub-batch order.
async fn run_window<T>(
    window: Vec<T>,
    sub_batch_size: usize,
    parallelism: usize,
    transform: &MapFn<T, T>,
    policy: &RetryPolicy,
) -> Result<Vec<T>, PipelineError>
where
    T: Clone + Send + Sync + 'static,
{
    let sub_batches: Vec<Vec<T>> = window
        .chunks(sub_batch_size)
        .map(<[T]>::to_vec)
        .collect();

    let results: Vec<Vec<T>> = stream::iter(sub_batches.into_iter().map(|batch| {
        let transform = transform.clone();
        let policy = policy.clone();
        async move { run_sub_batch(batch, transform, policy).await }
    }))
    .buffered(parallelism)
    .try_collect()
    .await?;

    Ok(results.into_iter().flatten().collect())
}

/// Apply the transform to every item of one sub-batch on the blocking pool,
/// retrying transient failures with backoff.
async fn run_sub_batch<T>(
    batch: Vec<T>,
    transform: MapFn<T, T>,
    policy: RetryPolicy,
) -> Result<Vec<T>, PipelineError>
where
    T: Clone + Send + Sync + 'static,
{
    retry_with_backoff(&policy, |_attempt| {
        let batch = batch.clone();
        let transform = transform.clone();
        async move {
            tokio::task::spawn_blocking(move || {
                batch
                    .into_iter()
                    .map(|item| transform(item).map_err(classify_user_error))
                    .collect::<Result<Vec<T>, PipelineError>>()
            })
            .await
            .map_err(PipelineError::user)?
        }
    })
    .await
}
