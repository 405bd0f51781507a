//! Throughput accounting for byte-stream runs.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Incrementally updated counters for one run.
#[derive(Debug)]
pub struct StreamMetrics {
    /// Bytes accounted so far
    pub bytes: AtomicU64,

    /// Chunks accounted so far
    pub chunks: AtomicU64,

    /// Line terminators seen
    pub lines: AtomicU64,

    /// Whitespace-delimited tokens seen
    pub words: AtomicU64,

    /// Characters seen
    pub chars: AtomicU64,

    start: Instant,
}

impl StreamMetrics {
    /// Create fresh counters, stamping the run start time.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            bytes: AtomicU64::new(0),
            chunks: AtomicU64::new(0),
            lines: AtomicU64::new(0),
            words: AtomicU64::new(0),
            chars: AtomicU64::new(0),
            start: Instant::now(),
        })
    }

    /// Record bytes accounted.
    pub fn add_bytes(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record one chunk.
    pub fn add_chunk(&self) {
        self.chunks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record line terminators.
    pub fn add_lines(&self, count: u64) {
        self.lines.fetch_add(count, Ordering::Relaxed);
    }

    /// Record words.
    pub fn add_words(&self, count: u64) {
        self.words.fetch_add(count, Ordering::Relaxed);
    }

    /// Record characters.
    pub fn add_chars(&self, count: u64) {
        self.chars.fetch_add(count, Ordering::Relaxed);
    }

    /// Finalize the counters into a snapshot.
    pub fn snapshot(&self) -> RunStats {
        let size_bytes = self.bytes.load(Ordering::Relaxed);
        let chunk_count = self.chunks.load(Ordering::Relaxed);
        let average_chunk_size = if size_bytes == 0 {
            0.0
        } else {
            size_bytes as f64 / chunk_count as f64
        };

        RunStats {
            size_bytes,
            chunk_count,
            line_count: self.lines.load(Ordering::Relaxed),
            word_count: self.words.load(Ordering::Relaxed),
            char_count: self.chars.load(Ordering::Relaxed),
            average_chunk_size,
            processing_time_ms: self.start.elapsed().as_millis() as u64,
        }
    }
}

/// Statistics for one completed (or cancelled) byte-stream run.
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub size_bytes: u64,
    pub chunk_count: u64,
    pub line_count: u64,
    pub word_count: u64,
    pub char_count: u64,
    pub average_chunk_size: f64,
    pub processing_time_ms: u64,
}

impl RunStats {
    /// Save statistics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Run statistics saved to {}", path);
        Ok(())
    }
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Size: {} bytes | Chunks: {} (avg {:.1} bytes) | \
             Lines: {} | Words: {} | Chars: {} | Elapsed: {}ms",
            self.size_bytes,
            self.chunk_count,
            self.average_chunk_size,
            self.line_count,
            self.word_count,
            self.char_count,
            self.processing_time_ms,
        )
    }
}
