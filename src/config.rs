//! Configuration for the chunked streaming pipeline.

use crate::error::PipelineError;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Stage parameters
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Retry configuration for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Base directories file paths must resolve under.
    /// Paths outside this set fail closed before any file is opened.
    #[serde(default = "default_allowed_roots")]
    pub allowed_roots: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            processing: ProcessingConfig::default(),
            retry: RetryConfig::default(),
            allowed_roots: default_allowed_roots(),
        }
    }
}

/// Stage parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Items (or bytes, for file sources) per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Items per group for the batch stage
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Delay inserted after each non-final chunk; 0 disables throttling
    #[serde(default)]
    pub throttle_ms: u64,

    /// Accumulation threshold for the buffer stage
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Ceiling on in-flight sub-batches in the bounded-parallel stage
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Print run statistics after completion
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Optional path to save run statistics JSON after a run completes
    #[serde(default)]
    pub metrics_output_path: Option<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 65536,
            batch_size: 32,
            throttle_ms: 0,
            buffer_size: 256,
            parallelism: 4,
            enable_metrics: true,
            metrics_output_path: None,
        }
    }
}

/// Retry configuration for transient failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Initial backoff in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10000,
        }
    }
}

impl RetryConfig {
    /// Build the backoff schedule used by the bounded-parallel stage.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.initial_backoff_ms),
            multiplier: 2.0,
            max_delay: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => {
                // YAML is a superset of JSON
                serde_yaml::from_str(&contents)?
            }
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration. Fails fast, before any I/O begins.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.processing.chunk_size == 0 {
            return Err(PipelineError::invalid("chunk_size must be > 0"));
        }
        if self.processing.batch_size == 0 {
            return Err(PipelineError::invalid("batch_size must be > 0"));
        }
        if self.processing.buffer_size == 0 {
            return Err(PipelineError::invalid("buffer_size must be > 0"));
        }
        if self.processing.parallelism == 0 {
            return Err(PipelineError::invalid("parallelism must be > 0"));
        }
        if self.allowed_roots.is_empty() {
            return Err(PipelineError::invalid(
                "at least one allowed root directory is required",
            ));
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_chunk_size() -> usize {
    65536
}
fn default_batch_size() -> usize {
    32
}
fn default_buffer_size() -> usize {
    256
}
fn default_parallelism() -> usize {
    4
}
fn default_true() -> bool {
    true
}
fn default_max_attempts() -> usize {
    3
}
fn default_initial_backoff_ms() -> u64 {
    100
}
fn default_max_backoff_ms() -> u64 {
    10000
}
fn default_allowed_roots() -> Vec<PathBuf> {
    vec![PathBuf::from(".")]
}
