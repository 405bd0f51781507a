//! The unit of flow through the pipeline.

use serde::Serialize;
use std::time::SystemTime;

/// Stage-specific diagnostics attached to a chunk.
///
/// Additive only; no stage may depend on another stage's metadata for
/// correctness.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChunkMetadata {
    /// Percentage of the source consumed once this chunk is emitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_pct: Option<f64>,

    /// Group size recorded by the batch stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    /// Fraction of items kept by the filter stage (0 for an empty input).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_ratio: Option<f64>,
}

/// One bounded-size unit of data flowing through the pipeline.
///
/// Chunks are created by exactly one stage and consumed by exactly one
/// downstream stage or the caller; transforms build a new chunk rather than
/// mutating an emitted one.
#[derive(Debug, Clone)]
pub struct Chunk<T> {
    /// Ordered payload items.
    pub data: Vec<T>,

    /// Zero-based sequence number, strictly increasing per stream.
    pub index: u64,

    /// True on exactly the chunk that exhausts its source.
    pub is_complete: bool,

    /// Wall-clock creation time. Informational only.
    pub timestamp: SystemTime,

    /// Cumulative bytes emitted so far from this chunk's source.
    pub bytes_processed: u64,

    /// Stage diagnostics.
    pub metadata: ChunkMetadata,
}

impl<T> Chunk<T> {
    /// Create a chunk stamped with the current wall-clock time.
    pub fn new(data: Vec<T>, index: u64, is_complete: bool, bytes_processed: u64) -> Self {
        Self {
            data,
            index,
            is_complete,
            timestamp: SystemTime::now(),
            bytes_processed,
            metadata: ChunkMetadata::default(),
        }
    }

    /// Number of items in the payload.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the payload holds no items.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Rebuild this chunk around transformed payload data, carrying the
    /// sequencing fields forward and restamping the creation time.
    pub fn map_data<U>(self, data: Vec<U>) -> Chunk<U> {
        Chunk {
            data,
            index: self.index,
            is_complete: self.is_complete,
            timestamp: SystemTime::now(),
            bytes_processed: self.bytes_processed,
            metadata: self.metadata,
        }
    }
}
