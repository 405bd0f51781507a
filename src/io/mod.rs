//! File streaming I/O: the byte-stream adapter, path allow-listing, and run
//! statistics.

pub mod byte_stream;
pub mod paths;
pub mod stats;

pub use byte_stream::{ChunkPredicate, ChunkTransform, FileStreamer, StreamOptions};
pub use paths::PathGuard;
pub use stats::{RunStats, StreamMetrics};
