//! Incremental file streaming.
//!
//! Reads a source file in fixed-size chunks and either accounts it
//! (`analyze`) or streams it through an optional per-chunk filter and
//! transform into a destination file (`process_to_file`, `copy_to_file`).
//! The whole file is never held in memory; that guarantee is why this adapter
//! exists separately from the in-memory chunker.

use crate::error::{BoxError, PipelineError};
use crate::io::paths::PathGuard;
use crate::io::stats::{RunStats, StreamMetrics};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;

/// Caller-supplied per-chunk byte transform.
pub type ChunkTransform = Arc<dyn Fn(Vec<u8>) -> Result<Vec<u8>, BoxError> + Send + Sync>;

/// Caller-supplied per-chunk predicate. A rejected chunk writes zero bytes.
pub type ChunkPredicate = Arc<dyn Fn(&[u8]) -> Result<bool, BoxError> + Send + Sync>;

/// Options for one streaming run.
#[derive(Clone)]
pub struct StreamOptions {
    /// Bytes per read
    pub chunk_size: usize,

    /// Optional per-chunk transform, applied after the filter
    pub transform: Option<ChunkTransform>,

    /// Optional per-chunk filter, applied before the transform
    pub filter: Option<ChunkPredicate>,

    /// Shared cancellation token
    pub cancel: CancellationToken,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            chunk_size: 65536,
            transform: None,
            filter: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl fmt::Debug for StreamOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamOptions")
            .field("chunk_size", &self.chunk_size)
            .field("transform", &self.transform.is_some())
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

/// Text accounting carried across chunk boundaries.
///
/// Counts match a contiguous scan of the same bytes regardless of where read
/// boundaries fall: the in-word state survives a token split across reads,
/// and a pending-CR flag makes a split CRLF count as one terminator.
/// Characters are counted as non-continuation UTF-8 bytes, which is safe
/// against multi-byte sequences straddling a boundary.
#[derive(Debug, Default)]
struct TextCounter {
    in_word: bool,
    pending_cr: bool,
}

impl TextCounter {
    fn update(&mut self, bytes: &[u8], metrics: &StreamMetrics) {
        let mut lines = 0u64;
        let mut words = 0u64;
        let mut chars = 0u64;

        for &b in bytes {
            if b & 0xC0 != 0x80 {
                chars += 1;
            }

            if self.pending_cr {
                self.pending_cr = false;
                lines += 1;
                if b == b'\n' {
                    // LF completes the CRLF pair already counted
                    self.in_word = false;
                    continue;
                }
            }

            match b {
                b'\n' => {
                    lines += 1;
                    self.in_word = false;
                }
                b'\r' => {
                    self.pending_cr = true;
                    self.in_word = false;
                }
                b if b.is_ascii_whitespace() => {
                    self.in_word = false;
                }
                _ => {
                    if !self.in_word {
                        words += 1;
                    }
                    self.in_word = true;
                }
            }
        }

        metrics.add_lines(lines);
        metrics.add_words(words);
        metrics.add_chars(chars);
    }

    fn finish(&mut self, metrics: &StreamMetrics) {
        if self.pending_cr {
            self.pending_cr = false;
            metrics.add_lines(1);
        }
    }
}

/// Streams files under a path allow-list.
pub struct FileStreamer {
    guard: PathGuard,
}

impl FileStreamer {
    /// Create a streamer. The guard validates every path before a handle is
    /// opened; the streamer never bypasses it.
    pub fn new(guard: PathGuard) -> Self {
        Self { guard }
    }

    /// Account a file without writing anywhere.
    pub async fn analyze(
        &self,
        path: &Path,
        options: &StreamOptions,
    ) -> Result<RunStats, PipelineError> {
        self.run(path, None, options).await
    }

    /// Stream a file through the optional filter and transform into a
    /// destination file. Statistics cover the bytes written.
    ///
    /// Cancellation mid-write leaves the partial destination as-is; callers
    /// needing atomicity write to a temporary path and rename on success.
    pub async fn process_to_file(
        &self,
        input: &Path,
        output: &Path,
        options: &StreamOptions,
    ) -> Result<RunStats, PipelineError> {
        self.run(input, Some(output), options).await
    }

    /// Copy a file chunk-wise with the identity transform and no filter.
    pub async fn copy_to_file(
        &self,
        input: &Path,
        output: &Path,
        options: &StreamOptions,
    ) -> Result<RunStats, PipelineError> {
        let plain = StreamOptions {
            chunk_size: options.chunk_size,
            transform: None,
            filter: None,
            cancel: options.cancel.clone(),
        };
        self.run(input, Some(output), &plain).await
    }

    async fn run(
        &self,
        input: &Path,
        output: Option<&Path>,
        options: &StreamOptions,
    ) -> Result<RunStats, PipelineError> {
        if options.chunk_size == 0 {
            return Err(PipelineError::invalid(
                "chunk_size must be a positive integer",
            ));
        }

        let input_path = self.guard.validate(input)?;
        let mut writer = match output {
            Some(path) => {
                let output_path = self.guard.validate_for_write(path)?;
                let file = File::create(&output_path)
                    .await
                    .map_err(PipelineError::from_io)?;
                Some(BufWriter::new(file))
            }
            None => None,
        };

        let mut reader = File::open(&input_path)
            .await
            .map_err(PipelineError::from_io)?;

        let metrics = StreamMetrics::new();
        let mut counter = TextCounter::default();
        let mut buf = vec![0u8; options.chunk_size];

        loop {
            if options.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let n = reader.read(&mut buf).await.map_err(PipelineError::from_io)?;
            if n == 0 {
                break;
            }
            let chunk = &buf[..n];

            match writer.as_mut() {
                None => {
                    metrics.add_chunk();
                    metrics.add_bytes(n as u64);
                    counter.update(chunk, &metrics);
                }
                Some(writer) => {
                    if let Some(predicate) = &options.filter {
                        if !predicate(chunk).map_err(PipelineError::user)? {
                            continue;
                        }
                    }
                    let out = match &options.transform {
                        Some(transform) => transform(chunk.to_vec()).map_err(PipelineError::user)?,
                        None => chunk.to_vec(),
                    };
                    if out.is_empty() {
                        continue;
                    }

                    writer.write_all(&out).await.map_err(PipelineError::from_io)?;
                    metrics.add_chunk();
                    metrics.add_bytes(out.len() as u64);
                    counter.update(&out, &metrics);
                }
            }
        }

        counter.finish(&metrics);
        if let Some(mut writer) = writer {
            writer.flush().await.map_err(PipelineError::from_io)?;
        }

        let stats = metrics.snapshot();
        tracing::debug!("stream run over {}: {}", input_path.display(), stats);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn streamer_for(dir: &Path) -> FileStreamer {
        FileStreamer::new(PathGuard::new(&[dir.to_path_buf()]).unwrap())
    }

    fn options(chunk_size: usize) -> StreamOptions {
        StreamOptions {
            chunk_size,
            ..StreamOptions::default()
        }
    }

    /// Reference counts from a contiguous scan.
    fn contiguous_counts(content: &str) -> (u64, u64, u64) {
        let mut lines = 0u64;
        let mut rest = content;
        while let Some(pos) = rest.find(|c| c == '\r' || c == '\n') {
            lines += 1;
            let bytes = rest.as_bytes();
            let skip = if bytes[pos] == b'\r' && rest.len() > pos + 1 && bytes[pos + 1] == b'\n' {
                2
            } else {
                1
            };
            rest = &rest[pos + skip..];
        }
        let words = content.split_ascii_whitespace().count() as u64;
        let chars = content.chars().count() as u64;
        (lines, words, chars)
    }

    async fn write_input(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        tokio::fs::write(&path, content).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_analyze_counts_match_contiguous_scan() {
        let dir = tempfile::tempdir().unwrap();
        // terminators deliberately positioned to straddle read boundaries
        let content = "alpha beta\ngamma\r\ndelta epsilon zeta\reta  theta\n\niota";
        let input = write_input(dir.path(), "input.txt", content).await;
        let streamer = streamer_for(dir.path());

        let (lines, words, chars) = contiguous_counts(content);

        for chunk_size in [16usize, 1024, content.len() + 100] {
            let stats = streamer
                .analyze(&input, &options(chunk_size))
                .await
                .unwrap();
            assert_eq!(stats.line_count, lines, "chunk_size={}", chunk_size);
            assert_eq!(stats.word_count, words, "chunk_size={}", chunk_size);
            assert_eq!(stats.char_count, chars, "chunk_size={}", chunk_size);
            assert_eq!(stats.size_bytes, content.len() as u64);
        }
    }

    #[tokio::test]
    async fn test_analyze_split_crlf_counts_once() {
        let dir = tempfile::tempdir().unwrap();
        // chunk_size 3 splits the file as "aa\r" | "\nbb"
        let input = write_input(dir.path(), "crlf.txt", "aa\r\nbb").await;
        let streamer = streamer_for(dir.path());

        let stats = streamer.analyze(&input, &options(3)).await.unwrap();
        assert_eq!(stats.line_count, 1);
        assert_eq!(stats.word_count, 2);
    }

    #[tokio::test]
    async fn test_analyze_multibyte_chars_across_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let content = "héllo wörld"; // contains two 2-byte code points
        let input = write_input(dir.path(), "utf8.txt", content).await;
        let streamer = streamer_for(dir.path());

        for chunk_size in [2usize, 3, 64] {
            let stats = streamer
                .analyze(&input, &options(chunk_size))
                .await
                .unwrap();
            assert_eq!(stats.char_count, content.chars().count() as u64);
        }
    }

    #[tokio::test]
    async fn test_analyze_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), "empty.txt", "").await;
        let streamer = streamer_for(dir.path());

        let stats = streamer.analyze(&input, &options(16)).await.unwrap();
        assert_eq!(stats.size_bytes, 0);
        assert_eq!(stats.chunk_count, 0);
        assert_eq!(stats.average_chunk_size, 0.0);
    }

    #[tokio::test]
    async fn test_process_to_file_uppercase_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let content = "Hello World!\nThis is a streaming transformation demo.";
        let input = write_input(dir.path(), "input.txt", content).await;
        let output = dir.path().join("output.txt");
        let streamer = streamer_for(dir.path());

        let opts = StreamOptions {
            chunk_size: 16384,
            transform: Some(Arc::new(|bytes: Vec<u8>| Ok(bytes.to_ascii_uppercase()))),
            filter: None,
            cancel: CancellationToken::new(),
        };
        let stats = streamer
            .process_to_file(&input, &output, &opts)
            .await
            .unwrap();

        let written = tokio::fs::read_to_string(&output).await.unwrap();
        assert_eq!(
            written,
            "HELLO WORLD!\nTHIS IS A STREAMING TRANSFORMATION DEMO."
        );
        assert_eq!(stats.size_bytes, written.len() as u64);
    }

    #[tokio::test]
    async fn test_filter_rejected_chunk_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), "input.txt", "some text").await;
        let output = dir.path().join("output.txt");
        let streamer = streamer_for(dir.path());

        let opts = StreamOptions {
            chunk_size: 1024,
            transform: None,
            filter: Some(Arc::new(|_: &[u8]| Ok(false))),
            cancel: CancellationToken::new(),
        };
        let stats = streamer
            .process_to_file(&input, &output, &opts)
            .await
            .unwrap();

        assert_eq!(stats.size_bytes, 0);
        assert_eq!(stats.chunk_count, 0);
        let written = tokio::fs::read(&output).await.unwrap();
        assert!(written.is_empty());
    }

    #[tokio::test]
    async fn test_filter_applied_before_transform() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), "input.txt", "keep").await;
        let output = dir.path().join("output.txt");
        let streamer = streamer_for(dir.path());

        // the transform would fail loudly if it ran on a rejected chunk
        let opts = StreamOptions {
            chunk_size: 1024,
            transform: Some(Arc::new(|_: Vec<u8>| Err("transform ran".into()))),
            filter: Some(Arc::new(|_: &[u8]| Ok(false))),
            cancel: CancellationToken::new(),
        };
        let stats = streamer
            .process_to_file(&input, &output, &opts)
            .await
            .unwrap();
        assert_eq!(stats.size_bytes, 0);
    }

    #[tokio::test]
    async fn test_copy_preserves_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let content = "line one\nline two\nbinary-ish \u{00e9}\u{00e8}";
        let input = write_input(dir.path(), "src.txt", content).await;
        let output = dir.path().join("dst.txt");
        let streamer = streamer_for(dir.path());

        let stats = streamer
            .copy_to_file(&input, &output, &options(7))
            .await
            .unwrap();

        let written = tokio::fs::read_to_string(&output).await.unwrap();
        assert_eq!(written, content);
        assert_eq!(stats.size_bytes, content.len() as u64);
        assert!(stats.chunk_count > 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_reports_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), "input.txt", "data").await;
        let streamer = streamer_for(dir.path());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let opts = StreamOptions {
            chunk_size: 4,
            transform: None,
            filter: None,
            cancel,
        };

        let err = streamer.analyze(&input, &opts).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_path_outside_roots_rejected_before_open() {
        let root = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let outside = write_input(other.path(), "input.txt", "data").await;
        let streamer = streamer_for(root.path());

        let err = streamer.analyze(&outside, &options(16)).await.unwrap_err();
        assert!(matches!(err, PipelineError::PathSecurity { .. }));
    }

    #[tokio::test]
    async fn test_zero_chunk_size_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), "input.txt", "data").await;
        let streamer = streamer_for(dir.path());

        let err = streamer.analyze(&input, &options(0)).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_average_chunk_size() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), "input.txt", &"x".repeat(100)).await;
        let streamer = streamer_for(dir.path());

        let stats = streamer.analyze(&input, &options(40)).await.unwrap();
        assert_eq!(stats.chunk_count, 3);
        assert!((stats.average_chunk_size - 100.0 / 3.0).abs() < 1e-9);
    }
}
