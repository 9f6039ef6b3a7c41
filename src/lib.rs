//! Ukrainian Voice Transcriber - A Rust CLI tool for turning local video files into Ukrainian text
//!
//! The pipeline extracts a 16 kHz mono PCM track with ffmpeg, uploads it to S3, runs a
//! long-running AWS Transcribe job in the `uk-UA` locale and writes the transcript to disk.
//! Local and remote artifacts are cleaned up on every exit path.

use std::time::Duration;

pub mod cli;
pub mod config;
pub mod extractors;
pub mod output;
pub mod storage;
pub mod transcribe;
pub mod utils;

pub use cli::{Cli, Commands, OutputFormat};
pub use config::Config;
pub use extractors::{AudioExtractor, ExtractedAudio};
pub use storage::{ObjectStore, ObjectUri};
pub use transcribe::{SpeechRecognizer, Stage, TranscriptionPipeline, TranscriptionResult};

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, TranscriberError>;

/// Error types specific to the transcriber
#[derive(thiserror::Error, Debug)]
pub enum TranscriberError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error(
        "{tool} not found on PATH. Install it first (brew install {tool} / apt install {tool})"
    )]
    ToolNotFound { tool: String },

    #[error("Audio extraction failed: {message}{}", format_diagnostics(.diagnostics))]
    Extraction { message: String, diagnostics: String },

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Bucket error: {0}")]
    Bucket(String),

    #[error("Recognition request failed: {0}")]
    Invocation(String),

    #[error("Recognition operation failed: {0}")]
    Operation(String),

    #[error("{stage} timed out after {}s", .after.as_secs())]
    Timeout { stage: Stage, after: Duration },

    #[error("Cancelled while {0}")]
    Cancelled(Stage),

    #[error("Authentication required:\n{0}")]
    Auth(String),

    #[error("Cleanup warning: {0}")]
    Cleanup(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File operation failed: {0}")]
    Io(#[from] std::io::Error),
}

fn format_diagnostics(diagnostics: &str) -> String {
    if diagnostics.trim().is_empty() {
        String::new()
    } else {
        format!("\n{}", diagnostics.trim_end())
    }
}
