use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "uk-transcriber",
    about = "Ukrainian Voice Transcriber - Turn local video files into Ukrainian text \
             using AWS Transcribe",
    version,
    long_about = "A CLI tool for transcribing Ukrainian speech from local video files. \
                  Extracts audio with ffmpeg, uploads it to a short-lived S3 bucket and runs \
                  AWS Transcribe (uk-UA). Temporary audio and uploaded objects are always \
                  cleaned up."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging (also mirrors ffmpeg output)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress everything except results and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// S3 bucket for temporary audio (default: <account-id>-voice-transcriber-data)
    #[arg(long, global = true, value_name = "NAME", env = "UK_TRANSCRIBER_BUCKET")]
    pub bucket: Option<String>,

    /// Recognition model ("default" or a custom language model name)
    #[arg(long, global = true, value_name = "NAME")]
    pub model: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Transcribe a local video file to Ukrainian text
    Transcribe {
        /// Relative path to the video file
        #[arg(value_name = "VIDEO")]
        input: String,

        /// Output file path (default: <name>/<name>.txt next to the working directory)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Check ffmpeg, credentials and the storage bucket
    Setup,

    /// Show authentication guidance
    Auth {
        /// Show current authentication status
        #[arg(long)]
        status: bool,
    },

    /// Show or initialize the configuration file
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,

        /// Write a default configuration file
        #[arg(long, conflicts_with = "show")]
        init: bool,
    },

    /// Show version information
    Version,
}

#[derive(ValueEnum, Clone, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Plain text transcript
    Text,
    /// JSON with counts and timing
    Json,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Text => "txt",
            OutputFormat::Json => "json",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}
