use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::cli::OutputFormat;
use crate::transcribe::TranscriptionResult;
use crate::utils::sanitized_stem;

/// Where the transcript goes: the explicit path, or `<stem>/<stem>.<ext>`
pub fn resolve_output_path(input: &str, explicit: Option<&Path>, format: &OutputFormat) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    let stem = sanitized_stem(Path::new(input));
    PathBuf::from(&stem).join(format!("{}.{}", stem, format.extension()))
}

/// Render a result in the requested format
pub fn render(result: &TranscriptionResult, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(result.text.clone()),
        OutputFormat::Json => {
            serde_json::to_string_pretty(result).context("Failed to serialize result")
        }
    }
}

/// Save transcription result to file, creating parent directories
pub async fn save_to_file(
    result: &TranscriptionResult,
    path: &Path,
    format: &OutputFormat,
) -> Result<()> {
    let content = render(result, format)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs_err::create_dir_all(parent)?;
    }

    fs_err::write(path, content)?;
    Ok(())
}
