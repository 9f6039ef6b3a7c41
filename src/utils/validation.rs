use std::path::{Component, Path, PathBuf};

use crate::{Result, TranscriberError};

/// Checks input paths before anything is spawned or uploaded
#[derive(Debug, Clone)]
pub struct InputValidator {
    max_file_size: u64,
}

impl InputValidator {
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }

    /// Validate a user supplied path and return its canonical form
    pub fn validate(&self, input: &str) -> Result<PathBuf> {
        if input.trim().is_empty() {
            return Err(TranscriberError::Validation("input path is empty".to_string()));
        }

        let path = Path::new(input);

        if path.is_absolute() || path.has_root() {
            return Err(TranscriberError::Validation(format!(
                "absolute paths are not allowed: {}",
                input
            )));
        }

        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(TranscriberError::Validation(format!(
                "directory traversal is not allowed: {}",
                input
            )));
        }

        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TranscriberError::Validation(format!("file not found: {}", input)));
            }
            Err(e) => {
                return Err(TranscriberError::Validation(format!(
                    "cannot access {}: {}",
                    input, e
                )));
            }
        };

        if !metadata.is_file() {
            return Err(TranscriberError::Validation(format!(
                "not a regular file: {}",
                input
            )));
        }

        if metadata.len() == 0 {
            return Err(TranscriberError::Validation(format!("file is empty: {}", input)));
        }

        if metadata.len() > self.max_file_size {
            return Err(TranscriberError::Validation(format!(
                "file is too large: {} (limit {})",
                super::format_file_size(metadata.len()),
                super::format_file_size(self.max_file_size)
            )));
        }

        let canonical = fs_err::canonicalize(path)?;
        tracing::debug!("Validated input {} -> {}", input, canonical.display());

        Ok(canonical)
    }
}
