use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use super::{AudioExtractor, ExtractedAudio, TargetFormat};
use crate::config::Config;
use crate::utils::{find_executable, sanitized_stem};
use crate::{Result, TranscriberError};

/// Lines of ffmpeg stderr kept for error messages
const DIAGNOSTIC_TAIL_LINES: usize = 20;

/// Audio extractor backed by the ffmpeg binary
pub struct FfmpegExtractor {
    ffmpeg_path: PathBuf,
    temp_dir: PathBuf,
    timeout: Duration,
    format: TargetFormat,
    mirror_stderr: bool,
}

impl FfmpegExtractor {
    /// Find ffmpeg on PATH and build an extractor from the configuration
    pub fn locate(config: &Config) -> Result<Self> {
        let search_path = std::env::var_os("PATH");
        Self::locate_in(config, search_path.as_deref())
    }

    /// Same as [`FfmpegExtractor::locate`] with an explicit search path
    pub fn locate_in(config: &Config, search_path: Option<&std::ffi::OsStr>) -> Result<Self> {
        let ffmpeg_path =
            find_executable("ffmpeg", search_path).ok_or_else(|| TranscriberError::ToolNotFound {
                tool: "ffmpeg".to_string(),
            })?;

        tracing::debug!("Found ffmpeg at {}", ffmpeg_path.display());

        Ok(Self {
            ffmpeg_path,
            temp_dir: config.temp_dir(),
            timeout: config.timeouts.extraction(),
            format: TargetFormat {
                sample_rate: config.transcription.sample_rate,
                ..TargetFormat::PCM16_MONO_16K
            },
            mirror_stderr: config.app.verbose,
        })
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg_path
    }

    /// Create the empty output file ffmpeg will overwrite
    fn create_output(&self, video: &Path) -> Result<tempfile::TempPath> {
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let prefix = format!("{}_{}_", sanitized_stem(video), nanos);

        fs_err::create_dir_all(&self.temp_dir)?;

        let file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(&format!(".{}", self.format.extension()))
            .tempfile_in(&self.temp_dir)?;

        Ok(file.into_temp_path())
    }

    fn build_args(&self, video: &Path, output: &Path) -> Vec<std::ffi::OsString> {
        let mut args: Vec<std::ffi::OsString> = vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-i".into(),
            video.as_os_str().to_owned(),
            "-vn".into(),
            "-acodec".into(),
            self.format.codec.into(),
            "-ar".into(),
            self.format.sample_rate.to_string().into(),
            "-ac".into(),
            self.format.channels.to_string().into(),
        ];
        // Overwrite the placeholder file
        args.push("-y".into());
        args.push(output.as_os_str().to_owned());
        args
    }

    /// Run ffmpeg, capturing stderr and enforcing the timeout
    async fn run_ffmpeg(&self, video: &Path, output: &Path) -> Result<()> {
        let mut child = Command::new(&self.ffmpeg_path)
            .args(self.build_args(video, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TranscriberError::Extraction {
                message: format!("failed to start ffmpeg: {}", e),
                diagnostics: String::new(),
            })?;

        let stderr = child.stderr.take();
        let mirror = self.mirror_stderr;
        let collector = tokio::spawn(async move {
            let mut captured = Vec::new();
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if mirror {
                        eprintln!("{}", line);
                    }
                    captured.push(line);
                }
            }
            captured
        });

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status.map_err(|e| TranscriberError::Extraction {
                message: format!("failed to wait for ffmpeg: {}", e),
                diagnostics: String::new(),
            })?,
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill timed out ffmpeg: {}", e);
                }
                let captured = collector.await.unwrap_or_default();
                return Err(TranscriberError::Extraction {
                    message: format!("ffmpeg timed out after {}s", self.timeout.as_secs()),
                    diagnostics: diagnostic_tail(&captured),
                });
            }
        };

        let captured = collector.await.unwrap_or_default();

        if !status.success() {
            return Err(TranscriberError::Extraction {
                message: format!("ffmpeg exited with {}", status),
                diagnostics: diagnostic_tail(&captured),
            });
        }

        Ok(())
    }
}

/// Last few lines of captured output
fn diagnostic_tail(lines: &[String]) -> String {
    let start = lines.len().saturating_sub(DIAGNOSTIC_TAIL_LINES);
    lines[start..].join("\n")
}

#[async_trait]
impl AudioExtractor for FfmpegExtractor {
    async fn extract(&self, video: &Path) -> Result<ExtractedAudio> {
        let output = self.create_output(video)?;
        tracing::info!("Extracting audio from {} to {}", video.display(), output.display());

        // On any error below `output` is dropped and the placeholder removed
        self.run_ffmpeg(video, &output).await?;

        let size = fs_err::metadata(&*output).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(TranscriberError::Extraction {
                message: format!("ffmpeg produced no audio at {}", output.display()),
                diagnostics: String::new(),
            });
        }

        tracing::debug!(
            "Audio extracted: {} ({})",
            output.display(),
            crate::utils::format_file_size(size)
        );

        Ok(ExtractedAudio::new(output, self.format))
    }
}
