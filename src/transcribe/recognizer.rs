use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_transcribe::error::DisplayErrorContext;
use aws_sdk_transcribe::types::{
    LanguageCode, Media, MediaFormat, ModelSettings, TranscriptionJob, TranscriptionJobStatus,
};
use aws_sdk_transcribe::Client as TranscribeClient;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use url::Url;
use uuid::Uuid;

use crate::config::Config;
use crate::storage::ObjectUri;
use crate::{Result, TranscriberError};

/// Model name meaning "no custom language model"
pub const DEFAULT_MODEL: &str = "default";

/// Long-running speech recognition against an uploaded object
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Recognize the speech in `uri`; returns an empty string when nothing was said
    async fn recognize(&self, uri: &ObjectUri) -> Result<String>;
}

/// Request settings shared by every job
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionSettings {
    pub language_code: String,
    pub model: String,
    pub sample_rate: u32,
}

impl RecognitionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            language_code: config.transcription.language_code.clone(),
            model: config.transcription.model.clone(),
            sample_rate: config.transcription.sample_rate,
        }
    }

    /// Custom language model to request, if any
    pub fn custom_model(&self) -> Option<&str> {
        let model = self.model.trim();
        if model.is_empty() || model.eq_ignore_ascii_case(DEFAULT_MODEL) {
            None
        } else {
            Some(model)
        }
    }
}

/// AWS Transcribe transcript format (only the parts we read)
#[derive(Debug, Deserialize)]
struct AwsTranscript {
    results: TranscriptResults,
}

#[derive(Debug, Deserialize)]
struct TranscriptResults {
    #[serde(default)]
    transcripts: Vec<TranscriptText>,
}

#[derive(Debug, Deserialize)]
struct TranscriptText {
    transcript: String,
}

#[derive(Debug, PartialEq, Eq)]
enum JobState {
    Pending,
    Completed,
    Failed,
    Unknown,
}

fn classify(status: Option<&TranscriptionJobStatus>) -> JobState {
    match status {
        Some(TranscriptionJobStatus::Queued) | Some(TranscriptionJobStatus::InProgress) => {
            JobState::Pending
        }
        Some(TranscriptionJobStatus::Completed) => JobState::Completed,
        Some(TranscriptionJobStatus::Failed) => JobState::Failed,
        _ => JobState::Unknown,
    }
}

/// Wait before poll number `check` (exponential-ish backoff up to 30 seconds)
fn poll_delay(check: u64) -> Duration {
    Duration::from_secs(std::cmp::min(5 + check.saturating_sub(1) * 2, 30))
}

/// Join the transcript of every result segment with single spaces
pub fn flatten_transcripts<'a>(segments: impl IntoIterator<Item = &'a str>) -> String {
    segments
        .into_iter()
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_transcript(json: &str) -> Result<String> {
    let parsed: AwsTranscript = serde_json::from_str(json).map_err(|e| {
        TranscriberError::Operation(format!("failed to parse transcript JSON: {}", e))
    })?;

    Ok(flatten_transcripts(
        parsed.results.transcripts.iter().map(|t| t.transcript.as_str()),
    ))
}

/// Transcript location without its presigned query, safe to log
fn display_location(url: &Url) -> String {
    format!("{}://{}{}", url.scheme(), url.host_str().unwrap_or_default(), url.path())
}

/// A started job whose record still has to be deleted.
///
/// Dropped unsettled when the stage times out or is cancelled; the job name is then
/// logged so the record can be removed by hand.
struct PendingJob {
    name: String,
    settled: bool,
}

impl PendingJob {
    fn new(name: String) -> Self {
        Self {
            name,
            settled: false,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn settle(&mut self) {
        self.settled = true;
    }

    fn leftover_notice(&self) -> Option<String> {
        if self.settled {
            return None;
        }
        Some(format!(
            "Transcription job {} was abandoned; remove it with \
             `aws transcribe delete-transcription-job --transcription-job-name {}`",
            self.name, self.name
        ))
    }
}

impl Drop for PendingJob {
    fn drop(&mut self) {
        if let Some(notice) = self.leftover_notice() {
            tracing::warn!("{}", notice);
        }
    }
}

/// Recognizer backed by AWS Transcribe batch jobs
pub struct TranscribeRecognizer {
    client: TranscribeClient,
    http: reqwest::Client,
    settings: RecognitionSettings,
}

impl TranscribeRecognizer {
    pub fn new(sdk_config: &SdkConfig, config: &Config) -> Self {
        Self {
            client: TranscribeClient::new(sdk_config),
            http: reqwest::Client::new(),
            settings: RecognitionSettings::from_config(config),
        }
    }

    /// Submit the job and return its name
    async fn start_job(&self, uri: &ObjectUri) -> Result<String> {
        let job_name = format!("uk-transcriber-{}", Uuid::new_v4());
        tracing::info!(
            "Starting transcription job {} ({})",
            job_name,
            self.settings.language_code
        );

        let media = Media::builder().media_file_uri(uri.to_string()).build();

        let mut request = self
            .client
            .start_transcription_job()
            .transcription_job_name(&job_name)
            .language_code(LanguageCode::from(self.settings.language_code.as_str()))
            .media_format(MediaFormat::Wav)
            .media_sample_rate_hertz(self.settings.sample_rate as i32)
            .media(media);

        if let Some(model) = self.settings.custom_model() {
            tracing::info!("Using custom language model {}", model);
            request = request
                .model_settings(ModelSettings::builder().language_model_name(model).build());
        }

        request
            .send()
            .await
            .map_err(|err| TranscriberError::Invocation(DisplayErrorContext(&err).to_string()))?;

        Ok(job_name)
    }

    async fn get_job(&self, job_name: &str) -> Result<TranscriptionJob> {
        let response = self
            .client
            .get_transcription_job()
            .transcription_job_name(job_name)
            .send()
            .await
            .map_err(|err| {
                TranscriberError::Operation(format!(
                    "failed to get job status: {}",
                    DisplayErrorContext(&err)
                ))
            })?;

        response
            .transcription_job()
            .cloned()
            .ok_or_else(|| TranscriberError::Operation(format!("job {} not found", job_name)))
    }

    /// Poll until the job leaves the queue
    async fn wait_for_completion(&self, job_name: &str) -> Result<TranscriptionJob> {
        let started = Instant::now();
        let mut check_count = 0;

        loop {
            check_count += 1;
            let job = self.get_job(job_name).await?;

            match classify(job.transcription_job_status()) {
                JobState::Pending => {
                    tracing::debug!(
                        "Job {} still running ({}s elapsed, check #{})",
                        job_name,
                        started.elapsed().as_secs(),
                        check_count
                    );
                    sleep(poll_delay(check_count)).await;
                }
                JobState::Completed => {
                    tracing::info!(
                        "Job {} completed in {}s",
                        job_name,
                        started.elapsed().as_secs()
                    );
                    return Ok(job);
                }
                JobState::Failed => {
                    let reason = job.failure_reason().unwrap_or("Unknown error");
                    return Err(TranscriberError::Operation(format!(
                        "job {} failed: {}",
                        job_name, reason
                    )));
                }
                JobState::Unknown => {
                    return Err(TranscriberError::Operation(format!(
                        "job {} reported an unexpected status",
                        job_name
                    )));
                }
            }
        }
    }

    async fn download_transcript(&self, job: &TranscriptionJob) -> Result<String> {
        let transcript_uri = job
            .transcript()
            .and_then(|t| t.transcript_file_uri())
            .ok_or_else(|| {
                TranscriberError::Operation("no transcript URI in completed job".to_string())
            })?;
        let transcript_url = Url::parse(transcript_uri).map_err(|e| {
            TranscriberError::Operation(format!("invalid transcript URI: {}", e))
        })?;

        tracing::debug!("Downloading transcript from {}", display_location(&transcript_url));

        let response = self.http.get(transcript_url).send().await.map_err(|e| {
            TranscriberError::Operation(format!("failed to download transcript: {}", e))
        })?;

        if !response.status().is_success() {
            return Err(TranscriberError::Operation(format!(
                "failed to download transcript: HTTP {}",
                response.status()
            )));
        }

        let body = response.text().await.map_err(|e| {
            TranscriberError::Operation(format!("failed to read transcript: {}", e))
        })?;

        parse_transcript(&body)
    }

    /// Remove the job record; failures are only logged
    async fn forget_job(&self, job_name: &str) {
        if let Err(err) = self
            .client
            .delete_transcription_job()
            .transcription_job_name(job_name)
            .send()
            .await
        {
            tracing::warn!(
                "Failed to delete transcription job {}: {}",
                job_name,
                DisplayErrorContext(&err)
            );
        }
    }
}

#[async_trait]
impl SpeechRecognizer for TranscribeRecognizer {
    async fn recognize(&self, uri: &ObjectUri) -> Result<String> {
        let mut job = PendingJob::new(self.start_job(uri).await?);

        let outcome = match self.wait_for_completion(job.name()).await {
            Ok(completed) => self.download_transcript(&completed).await,
            Err(e) => Err(e),
        };

        self.forget_job(job.name()).await;
        job.settle();

        let transcript = outcome?;
        tracing::info!(
            "Transcription completed: {} characters",
            transcript.chars().count()
        );
        Ok(transcript)
    }
}
