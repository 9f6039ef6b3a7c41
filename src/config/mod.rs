use anyhow::{Context, Result};
use aws_types::region::Region;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::TranscriberError;

pub mod credentials;

/// Default ceiling for input files (5 GiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 5 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// AWS configuration
    pub aws: AwsConfig,

    /// Speech recognition settings
    pub transcription: TranscriptionConfig,

    /// Input limits
    pub limits: LimitsConfig,

    /// Per-stage timeouts
    pub timeouts: TimeoutConfig,

    /// Application settings
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AwsConfig {
    /// AWS region
    pub region: String,

    /// S3 bucket for temporary audio storage (derived from the account id when empty)
    pub s3_bucket: Option<String>,

    /// Optional S3 key prefix
    pub s3_key_prefix: Option<String>,

    /// Lifecycle expiry applied to buckets created by the tool
    pub object_expiry_days: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Recognition locale
    pub language_code: String,

    /// "default" or the name of a custom language model
    pub model: String,

    /// Sample rate of the extracted audio
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest accepted input file in bytes
    pub max_file_size_bytes: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    pub overall_secs: u64,
    pub extraction_secs: u64,
    pub upload_secs: u64,
    pub recognition_secs: u64,
    pub cleanup_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Directory for extracted audio (system temp dir when unset)
    pub temp_dir: Option<PathBuf>,

    /// Enable verbose output
    #[serde(skip)]
    pub verbose: bool,

    /// Suppress progress and informational output
    #[serde(skip)]
    pub quiet: bool,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            s3_bucket: None,
            s3_key_prefix: None,
            object_expiry_days: 1,
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            language_code: "uk-UA".to_string(),
            model: "default".to_string(),
            sample_rate: 16000,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            overall_secs: 30 * 60,
            extraction_secs: 10 * 60,
            upload_secs: 5 * 60,
            recognition_secs: 20 * 60,
            cleanup_secs: 60,
        }
    }
}

impl TimeoutConfig {
    pub fn overall(&self) -> Duration {
        Duration::from_secs(self.overall_secs)
    }

    pub fn extraction(&self) -> Duration {
        Duration::from_secs(self.extraction_secs)
    }

    pub fn upload(&self) -> Duration {
        Duration::from_secs(self.upload_secs)
    }

    pub fn recognition(&self) -> Duration {
        Duration::from_secs(self.recognition_secs)
    }

    pub fn cleanup(&self) -> Duration {
        Duration::from_secs(self.cleanup_secs)
    }
}

/// Command-line values that take precedence over the config file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bucket: Option<String>,
    pub model: Option<String>,
    pub verbose: bool,
    pub quiet: bool,
}

impl Config {
    /// Load configuration from file or fall back to defaults
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::debug!("No config file at {}, using defaults", config_path.display());
            Ok(Self::default())
        }
    }

    /// Load and validate configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs_err::read_to_string(path).context("Failed to read config file")?;

        let config: Config = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<PathBuf> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        fs_err::write(&config_path, content).context("Failed to write config file")?;

        Ok(config_path)
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir().context("Could not determine config directory")?;

        Ok(config_dir.join("uk-transcriber").join("config.yaml"))
    }

    /// Validate configuration
    fn validate(&self) -> crate::Result<()> {
        let invalid = |message: &str| -> crate::Result<()> {
            Err(TranscriberError::Config(message.to_string()))
        };

        if self.aws.region.trim().is_empty() {
            return invalid("aws.region must not be empty");
        }

        if self.aws.s3_bucket.as_deref().is_some_and(|b| b.trim().is_empty()) {
            return invalid("aws.s3_bucket must not be empty when set");
        }

        if self.aws.object_expiry_days < 1 {
            return invalid("aws.object_expiry_days must be at least 1");
        }

        if self.limits.max_file_size_bytes == 0 {
            return invalid("limits.max_file_size_bytes must be greater than zero");
        }

        let t = &self.timeouts;
        if [t.overall_secs, t.extraction_secs, t.upload_secs, t.recognition_secs, t.cleanup_secs]
            .contains(&0)
        {
            return invalid("timeouts must be greater than zero");
        }

        Ok(())
    }

    /// Apply command-line overrides
    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if let Some(bucket) = overrides.bucket.filter(|b| !b.trim().is_empty()) {
            self.aws.s3_bucket = Some(bucket);
        }
        if let Some(model) = overrides.model.filter(|m| !m.trim().is_empty()) {
            self.transcription.model = model;
        }
        self.app.verbose = overrides.verbose;
        self.app.quiet = overrides.quiet;
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  AWS Region: {}", self.aws.region);
        println!(
            "  S3 Bucket: {}",
            self.aws.s3_bucket.as_deref().unwrap_or("<account-id>-voice-transcriber-data")
        );
        if let Some(prefix) = &self.aws.s3_key_prefix {
            println!("  S3 Prefix: {}", prefix);
        }
        println!("  Object Expiry: {} day(s)", self.aws.object_expiry_days);
        println!("  Language: {}", self.transcription.language_code);
        println!("  Model: {}", self.transcription.model);
        println!(
            "  Max File Size: {}",
            crate::utils::format_file_size(self.limits.max_file_size_bytes)
        );
        println!(
            "  Job Timeout: {}",
            crate::utils::format_duration(self.timeouts.overall_secs as f64)
        );
        if let Some(dir) = &self.app.temp_dir {
            println!("  Temp Dir: {}", dir.display());
        }
    }

    /// Get AWS region
    pub fn aws_region(&self) -> Region {
        Region::new(self.aws.region.clone())
    }

    /// Directory that receives extracted audio
    pub fn temp_dir(&self) -> PathBuf {
        self.app.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Default bucket name derived from the AWS account id
pub fn default_bucket_name(account_id: &str) -> String {
    format!("{}-voice-transcriber-data", account_id.trim())
}
