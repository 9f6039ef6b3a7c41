use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::config::{Config, TimeoutConfig};
use crate::extractors::AudioExtractor;
use crate::storage::ObjectStore;
use crate::utils::{count_words, stage_spinner, InputValidator};
use crate::{Result, TranscriberError};

mod cleanup;
pub mod recognizer;

use cleanup::JobResources;
pub use recognizer::{RecognitionSettings, SpeechRecognizer, TranscribeRecognizer};

/// Slack past `timeouts.extraction` so the extractor's own deadline, which kills ffmpeg
/// and keeps its stderr, fires before the stage deadline
const EXTRACTION_GRACE: Duration = Duration::from_secs(5);

/// Pipeline stages, in the order a job passes through them
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Validating,
    Extracting,
    Uploading,
    Recognizing,
    CleaningUp,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validating => "validating",
            Stage::Extracting => "extracting",
            Stage::Uploading => "uploading",
            Stage::Recognizing => "recognizing",
            Stage::CleaningUp => "cleaning up",
        };
        f.write_str(name)
    }
}

/// Terminal outcome of one job
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionResult {
    pub success: bool,

    /// The transcribed text (empty on failure or when no speech was found)
    pub text: String,

    pub word_count: usize,

    /// Unicode scalar values, not bytes
    pub char_count: usize,

    pub processing_time: Duration,

    /// Stage that failed, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Non-fatal cleanup problems
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl TranscriptionResult {
    fn succeeded(text: String, processing_time: Duration, warnings: Vec<String>) -> Self {
        Self {
            success: true,
            word_count: count_words(&text),
            char_count: text.chars().count(),
            text,
            processing_time,
            failed_stage: None,
            error: None,
            warnings,
        }
    }

    fn failed(
        stage: Stage,
        error: &TranscriberError,
        processing_time: Duration,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            success: false,
            text: String::new(),
            word_count: 0,
            char_count: 0,
            processing_time,
            failed_stage: Some(stage),
            error: Some(error.to_string()),
            warnings,
        }
    }
}

/// Main transcription pipeline
pub struct TranscriptionPipeline {
    validator: InputValidator,
    extractor: Box<dyn AudioExtractor>,
    store: Box<dyn ObjectStore>,
    recognizer: Box<dyn SpeechRecognizer>,
    timeouts: TimeoutConfig,
    quiet: bool,
}

impl TranscriptionPipeline {
    /// Create a new transcription pipeline
    pub fn new(
        config: &Config,
        extractor: Box<dyn AudioExtractor>,
        store: Box<dyn ObjectStore>,
        recognizer: Box<dyn SpeechRecognizer>,
    ) -> Self {
        Self {
            validator: InputValidator::new(config.limits.max_file_size_bytes),
            extractor,
            store,
            recognizer,
            timeouts: config.timeouts,
            quiet: config.app.quiet,
        }
    }

    /// Make sure the bucket exists before the first job
    pub async fn prepare(&self) -> Result<()> {
        let spinner = stage_spinner("Checking storage bucket...", self.quiet);
        let limit = self.timeouts.upload();
        let outcome = tokio::time::timeout(limit, self.store.ensure_bucket()).await;
        spinner.finish_and_clear();

        outcome.unwrap_or_else(|_| {
            Err(TranscriberError::Bucket(format!(
                "bucket check timed out after {}s",
                limit.as_secs()
            )))
        })
    }

    /// Transcribe one local video file
    pub async fn run(&self, input: &str) -> TranscriptionResult {
        self.run_until(input, std::future::pending()).await
    }

    /// Transcribe one local video file, giving up early when `cancel` resolves.
    ///
    /// Owed cleanup runs on every exit path and never masks the original failure.
    pub async fn run_until<C>(&self, input: &str, cancel: C) -> TranscriptionResult
    where
        C: Future<Output = ()>,
    {
        let started = Instant::now();
        let overall = self.timeouts.overall();
        let mut job = JobResources::default();

        let outcome = tokio::select! {
            finished = tokio::time::timeout(overall, self.run_stages(input, &mut job)) => {
                Some(finished)
            }
            _ = cancel => None,
        };

        let outcome = match outcome {
            Some(Ok(outcome)) => outcome,
            Some(Err(_)) => Err(TranscriberError::Timeout {
                stage: job.stage(),
                after: overall,
            }),
            None => Err(TranscriberError::Cancelled(job.stage())),
        };
        let last_stage = job.stage();

        let warnings = job.release(self.store.as_ref(), self.timeouts.cleanup()).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(text) => {
                tracing::info!(
                    "Transcription finished in {}: {} words",
                    crate::utils::format_duration(elapsed.as_secs_f64()),
                    count_words(&text)
                );
                TranscriptionResult::succeeded(text, elapsed, warnings)
            }
            Err(error) => {
                tracing::error!("Transcription failed while {}: {}", last_stage, error);
                TranscriptionResult::failed(last_stage, &error, elapsed, warnings)
            }
        }
    }

    async fn run_stages(&self, input: &str, job: &mut JobResources) -> Result<String> {
        job.enter(Stage::Validating);
        let video = self.validator.validate(input)?;

        job.enter(Stage::Extracting);
        let spinner = stage_spinner("Extracting audio...", self.quiet);
        let extraction_limit = self.timeouts.extraction() + EXTRACTION_GRACE;
        let audio = within(
            Stage::Extracting,
            extraction_limit,
            self.extractor.extract(&video),
        )
        .await;
        spinner.finish_and_clear();
        let audio = audio?;
        if let Ok(size) = audio.size() {
            tracing::info!(
                "Extracted {} of {} audio at {} Hz",
                crate::utils::format_file_size(size),
                audio.format().codec,
                audio.format().sample_rate
            );
        }
        let audio_path = audio.path().to_path_buf();
        job.hold_audio(audio);

        job.enter(Stage::Uploading);
        let spinner = stage_spinner("Uploading audio...", self.quiet);
        let uri = within(
            Stage::Uploading,
            self.timeouts.upload(),
            self.store.upload_file(&audio_path),
        )
        .await;
        spinner.finish_and_clear();
        let uri = uri?;
        job.hold_object(uri.clone());

        job.enter(Stage::Recognizing);
        let spinner = stage_spinner("Transcribing (uk-UA)...", self.quiet);
        let text = within(
            Stage::Recognizing,
            self.timeouts.recognition(),
            self.recognizer.recognize(&uri),
        )
        .await;
        spinner.finish_and_clear();

        text
    }
}

/// Run `operation` under a stage timeout
async fn within<T>(
    stage: Stage,
    limit: Duration,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, operation).await {
        Ok(outcome) => outcome,
        Err(_) => Err(TranscriberError::Timeout { stage, after: limit }),
    }
}

#[cfg(test)]
mod tests {
    use super::recognizer::MockSpeechRecognizer;
    use super::*;
    use crate::extractors::{ExtractedAudio, MockAudioExtractor, TargetFormat};
    use crate::storage::{MockObjectStore, ObjectUri};
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    struct Fixture {
        _scratch: TempDir,
        input: String,
        audio_dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let scratch = tempfile::Builder::new()
                .prefix("pipeline-test-")
                .tempdir_in(".")
                .unwrap();
            let base = scratch.path().file_name().unwrap().to_string_lossy().to_string();
            let input = format!("{}/sample_lecture.mp4", base);
            fs_err::write(&input, b"fake video bytes").unwrap();

            Self {
                _scratch: scratch,
                input,
                audio_dir: tempfile::tempdir().unwrap(),
            }
        }

        /// Extractor that writes a real temp WAV and reports its path
        fn extractor(&self) -> (MockAudioExtractor, PathBuf) {
            let file = tempfile::Builder::new()
                .suffix(".wav")
                .tempfile_in(self.audio_dir.path())
                .unwrap();
            fs_err::write(file.path(), b"RIFF....WAVE").unwrap();
            let path = file.path().to_path_buf();
            let temp_path = file.into_temp_path();

            let mut extractor = MockAudioExtractor::new();
            extractor.expect_extract().times(1).return_once(move |_| {
                Ok(ExtractedAudio::new(temp_path, TargetFormat::PCM16_MONO_16K))
            });
            (extractor, path)
        }
    }

    fn quiet_config() -> Config {
        let mut config = Config::default();
        config.app.quiet = true;
        config
    }

    fn pipeline(
        config: &Config,
        extractor: impl AudioExtractor + 'static,
        store: impl ObjectStore + 'static,
        recognizer: impl SpeechRecognizer + 'static,
    ) -> TranscriptionPipeline {
        TranscriptionPipeline::new(
            config,
            Box::new(extractor),
            Box::new(store),
            Box::new(recognizer),
        )
    }

    fn uploaded() -> ObjectUri {
        ObjectUri::new("lectures-tmp", "audio_1700000000_sample_lecture.wav")
    }

    struct SlowRecognizer(Duration);

    #[async_trait]
    impl SpeechRecognizer for SlowRecognizer {
        async fn recognize(&self, _uri: &ObjectUri) -> Result<String> {
            tokio::time::sleep(self.0).await;
            Ok("запізно".to_string())
        }
    }

    struct SlowBucketStore(Duration);

    #[async_trait]
    impl ObjectStore for SlowBucketStore {
        async fn ensure_bucket(&self) -> Result<()> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }

        async fn upload_file(&self, _path: &Path) -> Result<ObjectUri> {
            Ok(uploaded())
        }

        async fn delete_object(&self, _uri: &ObjectUri) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_successful_job_counts_words_and_cleans_up() {
        let fixture = Fixture::new();
        let (extractor, audio_path) = fixture.extractor();

        let mut store = MockObjectStore::new();
        store.expect_upload_file().times(1).returning(|_| Ok(uploaded()));
        store
            .expect_delete_object()
            .withf(|uri| uri == &uploaded())
            .times(1)
            .returning(|_| Ok(()));

        let mut recognizer = MockSpeechRecognizer::new();
        recognizer
            .expect_recognize()
            .times(1)
            .returning(|_| Ok("Добрий день.  Сьогодні   лекція про Rust.".to_string()));

        let result = pipeline(&quiet_config(), extractor, store, recognizer)
            .run(&fixture.input)
            .await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.word_count, result.text.split_whitespace().count());
        assert_eq!(result.word_count, 6);
        assert_eq!(result.char_count, result.text.chars().count());
        assert!(result.failed_stage.is_none());
        assert!(result.warnings.is_empty());
        assert!(!audio_path.exists());
    }

    #[tokio::test]
    async fn test_no_speech_is_success_with_empty_text() {
        let fixture = Fixture::new();
        let (extractor, _) = fixture.extractor();

        let mut store = MockObjectStore::new();
        store.expect_upload_file().returning(|_| Ok(uploaded()));
        store.expect_delete_object().returning(|_| Ok(()));

        let mut recognizer = MockSpeechRecognizer::new();
        recognizer.expect_recognize().returning(|_| Ok(String::new()));

        let result = pipeline(&quiet_config(), extractor, store, recognizer)
            .run(&fixture.input)
            .await;

        assert!(result.success);
        assert_eq!(result.text, "");
        assert_eq!(result.word_count, 0);
    }

    #[tokio::test]
    async fn test_invalid_input_has_no_side_effects() {
        let mut extractor = MockAudioExtractor::new();
        extractor.expect_extract().never();
        let mut store = MockObjectStore::new();
        store.expect_upload_file().never();
        store.expect_delete_object().never();
        let mut recognizer = MockSpeechRecognizer::new();
        recognizer.expect_recognize().never();

        let pipeline = pipeline(&quiet_config(), extractor, store, recognizer);

        for input in ["../secret/video.mp4", "/etc/passwd", "videos/../../x.mp4"] {
            let result = pipeline.run(input).await;
            assert!(!result.success);
            assert_eq!(result.failed_stage, Some(Stage::Validating));
            assert!(result.error.unwrap().starts_with("Invalid input"));
        }
    }

    #[tokio::test]
    async fn test_extraction_failure_skips_network() {
        let fixture = Fixture::new();

        let mut extractor = MockAudioExtractor::new();
        extractor.expect_extract().times(1).returning(|_| {
            Err(TranscriberError::Extraction {
                message: "ffmpeg exited with exit status: 1".to_string(),
                diagnostics: "moov atom not found".to_string(),
            })
        });
        let mut store = MockObjectStore::new();
        store.expect_upload_file().never();
        store.expect_delete_object().never();
        let mut recognizer = MockSpeechRecognizer::new();
        recognizer.expect_recognize().never();

        let result = pipeline(&quiet_config(), extractor, store, recognizer)
            .run(&fixture.input)
            .await;

        assert!(!result.success);
        assert_eq!(result.failed_stage, Some(Stage::Extracting));
        assert!(result.error.unwrap().contains("moov atom not found"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_extraction_timeout_keeps_ffmpeg_diagnostics() {
        use crate::extractors::FfmpegExtractor;
        use std::os::unix::fs::PermissionsExt;

        let fixture = Fixture::new();

        let bin_dir = tempfile::tempdir().unwrap();
        let fake = bin_dir.path().join("ffmpeg");
        fs_err::write(
            &fake,
            "#!/bin/sh\necho 'DIAG: stuck decoding stream' >&2\nexec sleep 30\n",
        )
        .unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let work_dir = tempfile::tempdir().unwrap();
        let mut config = quiet_config();
        config.app.temp_dir = Some(work_dir.path().to_path_buf());
        config.timeouts.extraction_secs = 1;
        let extractor =
            FfmpegExtractor::locate_in(&config, Some(bin_dir.path().as_os_str())).unwrap();

        let mut store = MockObjectStore::new();
        store.expect_upload_file().never();
        store.expect_delete_object().never();
        let mut recognizer = MockSpeechRecognizer::new();
        recognizer.expect_recognize().never();

        let started = Instant::now();
        let result = pipeline(&config, extractor, store, recognizer)
            .run(&fixture.input)
            .await;

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(result.failed_stage, Some(Stage::Extracting));
        let error = result.error.unwrap();
        assert!(error.contains("ffmpeg timed out after 1s"), "{}", error);
        assert!(error.contains("DIAG: stuck decoding stream"), "{}", error);
        assert_eq!(std::fs::read_dir(work_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_upload_failure_removes_local_audio() {
        let fixture = Fixture::new();
        let (extractor, audio_path) = fixture.extractor();

        let mut store = MockObjectStore::new();
        store
            .expect_upload_file()
            .times(1)
            .returning(|_| Err(TranscriberError::Upload("AccessDenied".to_string())));
        store.expect_delete_object().never();
        let mut recognizer = MockSpeechRecognizer::new();
        recognizer.expect_recognize().never();

        let result = pipeline(&quiet_config(), extractor, store, recognizer)
            .run(&fixture.input)
            .await;

        assert!(!result.success);
        assert_eq!(result.failed_stage, Some(Stage::Uploading));
        assert_eq!(result.error.as_deref(), Some("Upload failed: AccessDenied"));
        assert!(!audio_path.exists());
    }

    #[tokio::test]
    async fn test_recognition_failure_removes_local_and_remote() {
        let fixture = Fixture::new();
        let (extractor, audio_path) = fixture.extractor();

        let mut store = MockObjectStore::new();
        store.expect_upload_file().times(1).returning(|_| Ok(uploaded()));
        store.expect_delete_object().times(1).returning(|_| Ok(()));
        let mut recognizer = MockSpeechRecognizer::new();
        recognizer.expect_recognize().times(1).returning(|_| {
            Err(TranscriberError::Operation("job failed: unsupported media".to_string()))
        });

        let result = pipeline(&quiet_config(), extractor, store, recognizer)
            .run(&fixture.input)
            .await;

        assert!(!result.success);
        assert_eq!(result.failed_stage, Some(Stage::Recognizing));
        assert!(!audio_path.exists());
    }

    #[tokio::test]
    async fn test_cleanup_failure_does_not_mask_error() {
        let fixture = Fixture::new();
        let (extractor, _) = fixture.extractor();

        let mut store = MockObjectStore::new();
        store.expect_upload_file().returning(|_| Ok(uploaded()));
        store
            .expect_delete_object()
            .times(1)
            .returning(|_| Err(TranscriberError::Cleanup("AccessDenied".to_string())));
        let mut recognizer = MockSpeechRecognizer::new();
        recognizer.expect_recognize().returning(|_| {
            Err(TranscriberError::Invocation("ThrottlingException".to_string()))
        });

        let result = pipeline(&quiet_config(), extractor, store, recognizer)
            .run(&fixture.input)
            .await;

        assert_eq!(
            result.error.as_deref(),
            Some("Recognition request failed: ThrottlingException")
        );
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains(&uploaded().to_string()));
    }

    #[tokio::test]
    async fn test_cleanup_failure_after_success_is_only_a_warning() {
        let fixture = Fixture::new();
        let (extractor, _) = fixture.extractor();

        let mut store = MockObjectStore::new();
        store.expect_upload_file().returning(|_| Ok(uploaded()));
        store
            .expect_delete_object()
            .returning(|_| Err(TranscriberError::Cleanup("SlowDown".to_string())));
        let mut recognizer = MockSpeechRecognizer::new();
        recognizer.expect_recognize().returning(|_| Ok("Так".to_string()));

        let result = pipeline(&quiet_config(), extractor, store, recognizer)
            .run(&fixture.input)
            .await;

        assert!(result.success);
        assert_eq!(result.text, "Так");
        assert_eq!(result.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_stage_timeout_still_cleans_up() {
        let fixture = Fixture::new();
        let (extractor, audio_path) = fixture.extractor();

        let mut store = MockObjectStore::new();
        store.expect_upload_file().returning(|_| Ok(uploaded()));
        store.expect_delete_object().times(1).returning(|_| Ok(()));

        let mut config = quiet_config();
        config.timeouts.recognition_secs = 1;

        let recognizer = SlowRecognizer(Duration::from_secs(30));
        let result = pipeline(&config, extractor, store, recognizer)
            .run(&fixture.input)
            .await;

        assert!(!result.success);
        assert_eq!(result.failed_stage, Some(Stage::Recognizing));
        assert_eq!(result.error.as_deref(), Some("recognizing timed out after 1s"));
        assert!(!audio_path.exists());
    }

    #[tokio::test]
    async fn test_overall_timeout_still_cleans_up() {
        let fixture = Fixture::new();
        let (extractor, audio_path) = fixture.extractor();

        let mut store = MockObjectStore::new();
        store.expect_upload_file().returning(|_| Ok(uploaded()));
        store.expect_delete_object().times(1).returning(|_| Ok(()));

        let mut config = quiet_config();
        config.timeouts.overall_secs = 1;

        let recognizer = SlowRecognizer(Duration::from_secs(30));
        let started = Instant::now();
        let result = pipeline(&config, extractor, store, recognizer)
            .run(&fixture.input)
            .await;

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!result.success);
        assert_eq!(result.failed_stage, Some(Stage::Recognizing));
        assert!(!audio_path.exists());
    }

    #[tokio::test]
    async fn test_cancellation_still_cleans_up() {
        let fixture = Fixture::new();
        let (extractor, audio_path) = fixture.extractor();

        let mut store = MockObjectStore::new();
        store.expect_upload_file().returning(|_| Ok(uploaded()));
        store.expect_delete_object().times(1).returning(|_| Ok(()));

        let recognizer = SlowRecognizer(Duration::from_secs(30));
        let result = pipeline(&quiet_config(), extractor, store, recognizer)
            .run_until(&fixture.input, tokio::time::sleep(Duration::from_millis(200)))
            .await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Cancelled while recognizing"));
        assert!(!audio_path.exists());
    }

    #[tokio::test]
    async fn test_prepare_is_idempotent() {
        let mut store = MockObjectStore::new();
        store.expect_ensure_bucket().times(2).returning(|| Ok(()));

        let pipeline = pipeline(
            &quiet_config(),
            MockAudioExtractor::new(),
            store,
            MockSpeechRecognizer::new(),
        );

        assert!(pipeline.prepare().await.is_ok());
        assert!(pipeline.prepare().await.is_ok());
    }

    #[tokio::test]
    async fn test_prepare_timeout_is_a_bucket_error() {
        let mut config = quiet_config();
        config.timeouts.upload_secs = 1;

        let pipeline = pipeline(
            &config,
            MockAudioExtractor::new(),
            SlowBucketStore(Duration::from_secs(30)),
            MockSpeechRecognizer::new(),
        );

        let err = pipeline.prepare().await.err().unwrap();
        assert!(matches!(err, TranscriberError::Bucket(_)));
        assert_eq!(err.to_string(), "Bucket error: bucket check timed out after 1s");
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::CleaningUp.to_string(), "cleaning up");
        assert_eq!(Stage::default(), Stage::Validating);
    }
}
