//! File path allow-listing.
//!
//! Every file the byte-stream adapter touches is resolved and checked for
//! containment under a configured root set before any handle is opened.
//! Paths that escape the roots fail closed.

use crate::error::PipelineError;
use std::path::{Path, PathBuf};

/// Allow-list of base directories.
#[derive(Debug, Clone)]
pub struct PathGuard {
    roots: Vec<PathBuf>,
}

impl PathGuard {
    /// Build a guard from root directories. Roots must exist; they are
    /// canonicalized once so later containment checks compare resolved paths.
    pub fn new(roots: &[PathBuf]) -> Result<Self, PipelineError> {
        if roots.is_empty() {
            return Err(PipelineError::invalid(
                "at least one allowed root directory is required",
            ));
        }

        let mut canonical = Vec::with_capacity(roots.len());
        for root in roots {
            canonical.push(root.canonicalize().map_err(PipelineError::from_io)?);
        }
        Ok(Self { roots: canonical })
    }

    /// Validate an existing file path, returning its resolved form.
    pub fn validate(&self, path: &Path) -> Result<PathBuf, PipelineError> {
        let resolved = path.canonicalize().map_err(PipelineError::from_io)?;
        self.check(&resolved, path)
    }

    /// Validate a path that may not exist yet. The parent directory must
    /// exist and resolve under an allowed root.
    pub fn validate_for_write(&self, path: &Path) -> Result<PathBuf, PipelineError> {
        if path.exists() {
            return self.validate(path);
        }

        let file_name = path.file_name().ok_or_else(|| {
            PipelineError::invalid(format!("{} has no file name", path.display()))
        })?;
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let resolved = parent
            .canonicalize()
            .map_err(PipelineError::from_io)?
            .join(file_name);
        self.check(&resolved, path)
    }

    fn check(&self, resolved: &Path, original: &Path) -> Result<PathBuf, PipelineError> {
        if self.roots.iter().any(|root| resolved.starts_with(root)) {
            Ok(resolved.to_path_buf())
        } else {
            Err(PipelineError::PathSecurity {
                path: original.to_path_buf(),
            })
        }
    }
}
