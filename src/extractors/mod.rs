use async_trait::async_trait;
use std::path::Path;
use tempfile::TempPath;

pub mod ffmpeg;

pub use ffmpeg::FfmpegExtractor;

use crate::Result;

/// Fixed audio format sent to the recognizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetFormat {
    pub codec: &'static str,
    pub sample_rate: u32,
    pub channels: u8,
}

impl TargetFormat {
    /// 16-bit linear PCM, 16 kHz, mono
    pub const PCM16_MONO_16K: TargetFormat = TargetFormat {
        codec: "pcm_s16le",
        sample_rate: 16000,
        channels: 1,
    };

    pub fn extension(&self) -> &'static str {
        "wav"
    }

    pub fn mime_type(&self) -> &'static str {
        "audio/wav"
    }
}

/// Temporary audio file produced for one job.
///
/// Dropping it deletes the file; [`ExtractedAudio::remove`] does the same but reports errors.
#[derive(Debug)]
pub struct ExtractedAudio {
    path: TempPath,
    format: TargetFormat,
}

impl ExtractedAudio {
    pub fn new(path: TempPath, format: TargetFormat) -> Self {
        Self { path, format }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> TargetFormat {
        self.format
    }

    /// Size of the extracted file in bytes
    pub fn size(&self) -> Result<u64> {
        Ok(fs_err::metadata(self.path())?.len())
    }

    /// Delete the file now
    pub fn remove(self) -> Result<()> {
        match self.path.close() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Turns a video file into an audio artifact the recognizer accepts
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudioExtractor: Send + Sync {
    /// Extract the audio track of `video` into a temporary file
    async fn extract(&self, video: &Path) -> Result<ExtractedAudio>;
}
