//! Round-robin interleaving of multiple chunked sources.

use super::ChunkStream;
use crate::error::PipelineError;
use crate::pipeline::chunk_items;
use async_stream::try_stream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

/// Merge several sources into one chunk stream.
///
/// Each source is wrapped in its own chunker. Rounds pull one chunk from each
/// still-active iterator in a fixed order; exhausted iterators are retired and
/// never polled again. Merged chunks are re-indexed by a single shared
/// counter. The merged `is_complete` is set only on a chunk that is both
/// source-locally complete and emitted by the last iterator remaining, since
/// with N sources completion is only well-defined once N-1 have been retired.
///
/// Fails with `InvalidArgument` for an empty source list or a zero
/// `chunk_size`, before any iteration.
pub fn merge_sources<T>(
    sources: Vec<Vec<T>>,
    chunk_size: usize,
    cancel: CancellationToken,
) -> Result<ChunkStream<T>, PipelineError>
where
    T: Send + 'static,
{
    if sources.is_empty() {
        return Err(PipelineError::invalid(
            "merge requires at least one source",
        ));
    }

    let mut active: Vec<ChunkStream<T>> = sources
        .into_iter()
        .map(|source| chunk_items(source, chunk_size, cancel.clone()))
        .collect::<Result<_, _>>()?;

    let stream = try_stream! {
        let mut next_index = 0u64;

        'rounds: while !active.is_empty() {
            if cancel.is_cancelled() {
                break;
            }

            let mut slot = 0;
            while slot < active.len() {
                if cancel.is_cancelled() {
                    break 'rounds;
                }
                match active[slot].next().await {
                    // exhausted without a completion marker (empty source)
                    None => {
                        active.remove(slot);
                    }
                    Some(item) => {
                        let mut chunk = item?;
                        let source_done = chunk.is_complete;
                        chunk.index = next_index;
                        next_index += 1;
                        chunk.is_complete = source_done && active.len() == 1;
                        yield chunk;

                        if source_done {
                            active.remove(slot);
                        } else {
                            slot += 1;
                        }
                    }
                }
            }
        }
    };
    Ok(Box::pin(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;

    async fn collect(stream: ChunkStream<i32>) -> Vec<Chunk<i32>> {
        stream.map(|item| item.unwrap()).collect().await
    }

    #[tokio::test]
    async fn test_merge_exhaustion_with_empty_source() {
        let sources = vec![vec![1, 2, 3], vec![], vec![10, 20, 30, 40, 50]];
        let stream = merge_sources(sources, 2, CancellationToken::new()).unwrap();
        let chunks = collect(stream).await;

        let total: usize = chunks.iter().map(Chunk::len).sum();
        assert_eq!(total, 8);

        // the empty source contributes no chunks and causes no error
        let indices: Vec<u64> = chunks.iter().map(|c| c.index).collect();
        let expected: Vec<u64> = (0..chunks.len() as u64).collect();
        assert_eq!(indices, expected);
    }

    #[tokio::test]
    async fn test_merge_interleaves_round_robin() {
        let sources = vec![vec![1, 2, 3, 4], vec![10, 20, 30, 40]];
        let stream = merge_sources(sources, 2, CancellationToken::new()).unwrap();
        let chunks = collect(stream).await;

        let payloads: Vec<Vec<i32>> = chunks.iter().map(|c| c.data.clone()).collect();
        assert_eq!(
            payloads,
            vec![vec![1, 2], vec![10, 20], vec![3, 4], vec![30, 40]]
        );
    }

    #[tokio::test]
    async fn test_merge_completion_on_last_active_source() {
        let sources = vec![vec![1], vec![10, 20, 30]];
        let stream = merge_sources(sources, 1, CancellationToken::new()).unwrap();
        let chunks = collect(stream).await;

        // the short source's final chunk is not the merged completion
        let complete_flags: Vec<bool> = chunks.iter().map(|c| c.is_complete).collect();
        assert_eq!(complete_flags.iter().filter(|&&c| c).count(), 1);
        assert!(chunks.last().unwrap().is_complete);
        assert_eq!(chunks.last().unwrap().data, vec![30]);
    }

    #[tokio::test]
    async fn test_merge_empty_source_list_rejected() {
        let err = merge_sources(Vec::<Vec<i32>>::new(), 2, CancellationToken::new())
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_merge_all_sources_empty() {
        let sources: Vec<Vec<i32>> = vec![vec![], vec![], vec![]];
        let stream = merge_sources(sources, 4, CancellationToken::new()).unwrap();
        let chunks = collect(stream).await;
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn test_merge_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stream = merge_sources(vec![vec![1, 2], vec![3, 4]], 1, cancel).unwrap();
        let chunks = collect(stream).await;
        assert!(chunks.is_empty());
    }
}
