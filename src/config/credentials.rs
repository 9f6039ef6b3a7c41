//! Credential discovery.
//!
//! Sources are tried in order until one produces usable credentials: the ambient AWS
//! provider chain first, then a JSON key file in the working directory. When every source
//! fails the reasons are folded into a single [`TranscriberError::Auth`].

use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::Credentials;
use aws_types::region::Region;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::{Result, TranscriberError};

/// Key file names looked up in the working directory, in order
pub const KEY_FILE_CANDIDATES: &[&str] = &[
    "service-account.json",
    "service_account.json",
    "aws-credentials.json",
    "key.json",
];

const REMEDIATION: &str = "Choose one option:\n\n\
1. Use the AWS CLI (Recommended):\n   aws configure\n   \
(or aws sso login --profile <name> and export AWS_PROFILE=<name>)\n\n\
2. Environment variables:\n   export AWS_ACCESS_KEY_ID=... AWS_SECRET_ACCESS_KEY=...\n\n\
3. Key file:\n   Place service-account.json in the current directory with\n   \
{\"access_key_id\": \"...\", \"secret_access_key\": \"...\", \"region\": \"eu-central-1\"}";

/// Credentials resolved by one of the sources
pub struct ResolvedCredentials {
    pub sdk_config: SdkConfig,
    pub source: String,
}

/// One way of obtaining AWS credentials
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Human readable name shown in status output
    fn name(&self) -> String;

    /// Try to build an SDK config backed by working credentials
    async fn load(&self, region: &Region) -> std::result::Result<SdkConfig, String>;
}

/// The AWS default provider chain (environment, profiles, SSO, container and instance roles)
pub struct AmbientCredentials;

#[async_trait]
impl CredentialSource for AmbientCredentials {
    fn name(&self) -> String {
        "default credential chain".to_string()
    }

    async fn load(&self, region: &Region) -> std::result::Result<SdkConfig, String> {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region.clone())
            .load()
            .await;

        let provider = sdk_config
            .credentials_provider()
            .ok_or_else(|| "no credentials provider configured".to_string())?;

        provider
            .provide_credentials()
            .await
            .map_err(|e| e.to_string())?;

        Ok(sdk_config)
    }
}

/// Static credentials read from a JSON key file
pub struct KeyFileCredentials {
    dir: PathBuf,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct KeyFile {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

impl KeyFileCredentials {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Look for the first existing key file candidate
    pub fn find(&self) -> Option<PathBuf> {
        KEY_FILE_CANDIDATES
            .iter()
            .map(|name| self.dir.join(name))
            .find(|path| path.is_file())
    }

    pub fn parse(path: &Path) -> std::result::Result<KeyFile, String> {
        let content = fs_err::read_to_string(path).map_err(|e| e.to_string())?;
        let key: KeyFile = serde_json::from_str(&content)
            .map_err(|e| format!("{} is not a valid key file: {}", path.display(), e))?;

        if key.access_key_id.trim().is_empty() || key.secret_access_key.trim().is_empty() {
            return Err(format!("{} has an empty access key", path.display()));
        }

        Ok(key)
    }
}

#[async_trait]
impl CredentialSource for KeyFileCredentials {
    fn name(&self) -> String {
        format!("key file ({})", KEY_FILE_CANDIDATES.join(", "))
    }

    async fn load(&self, region: &Region) -> std::result::Result<SdkConfig, String> {
        let path = self
            .find()
            .ok_or_else(|| format!("none found in {}", self.dir.display()))?;
        let key = Self::parse(&path)?;

        let region = key
            .region
            .clone()
            .map(Region::new)
            .unwrap_or_else(|| region.clone());

        let credentials = Credentials::new(
            key.access_key_id,
            key.secret_access_key,
            key.session_token,
            None,
            "uk-transcriber-key-file",
        );

        tracing::debug!("Using key file credentials from {}", path.display());

        Ok(aws_config::defaults(BehaviorVersion::latest())
            .region(region)
            .credentials_provider(credentials)
            .load()
            .await)
    }
}

/// Default source order
pub fn default_sources() -> Vec<Box<dyn CredentialSource>> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    vec![
        Box::new(AmbientCredentials),
        Box::new(KeyFileCredentials::new(cwd)),
    ]
}

/// Try each source in order and return the first that works
pub async fn resolve(
    region: &Region,
    sources: &[Box<dyn CredentialSource>],
) -> Result<ResolvedCredentials> {
    let mut failures = Vec::with_capacity(sources.len());

    for source in sources {
        match source.load(region).await {
            Ok(sdk_config) => {
                tracing::info!("Using {} credentials", source.name());
                return Ok(ResolvedCredentials {
                    sdk_config,
                    source: source.name(),
                });
            }
            Err(reason) => {
                tracing::debug!("Credential source {} unavailable: {}", source.name(), reason);
                failures.push(format!("  - {}: {}", source.name(), reason));
            }
        }
    }

    Err(TranscriberError::Auth(format!(
        "{}\n\n{}",
        failures.join("\n"),
        REMEDIATION
    )))
}

/// Outcome of every source, for `auth --status`
pub async fn status(
    region: &Region,
    sources: &[Box<dyn CredentialSource>],
) -> Vec<(String, std::result::Result<(), String>)> {
    let mut report = Vec::with_capacity(sources.len());
    for source in sources {
        let outcome = source.load(region).await.map(|_| ());
        report.push((source.name(), outcome));
    }
    report
}

/// Setup guidance printed by `auth`
pub fn remediation() -> &'static str {
    REMEDIATION
}
