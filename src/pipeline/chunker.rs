//! Splits an in-memory source into a lazy sequence of fixed-size chunks.

use super::ChunkStream;
use crate::chunk::Chunk;
use crate::error::PipelineError;
use async_stream::try_stream;
use tokio_util::sync::CancellationToken;

/// Chunk an ordered source into contiguous runs of at most `chunk_size` items.
///
/// Chunks are emitted in strict source order; the final chunk may be shorter
/// and is the only one flagged `is_complete`. An empty source yields an empty
/// stream. The cancellation token is checked before each chunk is produced;
/// once signalled the stream ends with no partial chunk and no error item.
///
/// Fails with `InvalidArgument` for `chunk_size == 0`, before any iteration.
pub fn chunk_items<T>(
    items: Vec<T>,
    chunk_size: usize,
    cancel: CancellationToken,
) -> Result<ChunkStream<T>, PipelineError>
where
    T: Send + 'static,
{
    if chunk_size == 0 {
        return Err(PipelineError::invalid(
            "chunk_size must be a positive integer",
        ));
    }

    let total = items.len();
    let item_bytes = std::mem::size_of::<T>() as u64;

    let stream = try_stream! {
        let mut source = items.into_iter();
        let mut index = 0u64;
        let mut emitted = 0usize;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let data: Vec<T> = source.by_ref().take(chunk_size).collect();
            if data.is_empty() {
                break;
            }

            emitted += data.len();
            let is_complete = emitted == total;

            let mut chunk = Chunk::new(data, index, is_complete, emitted as u64 * item_bytes);
            chunk.metadata.progress_pct = Some(emitted as f64 / total as f64 * 100.0);
            index += 1;

            yield chunk;

            if is_complete {
                break;
            }
        }
    };

    Ok(Box::pin(stream))
}
