use async_trait::async_trait;
use std::fmt;
use std::path::Path;

pub mod s3;

pub use s3::S3ObjectStore;

use crate::Result;

/// URI of an uploaded object, `s3://bucket/key`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectUri {
    bucket: String,
    key: String,
}

impl ObjectUri {
    pub const SCHEME: &'static str = "s3";

    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for ObjectUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", Self::SCHEME, self.bucket, self.key)
    }
}

/// Object name for an upload: `[prefix]audio_<unixtime>_<basename>`
pub fn object_key(prefix: Option<&str>, unix_time: i64, local_path: &Path) -> String {
    let basename = local_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "audio.wav".to_string());

    format!("{}audio_{}_{}", prefix.unwrap_or(""), unix_time, basename)
}

/// Remote object storage used for the duration of one job
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Make sure the target bucket exists; safe to call repeatedly
    async fn ensure_bucket(&self) -> Result<()>;

    /// Upload a local file under a fresh name and return its URI
    async fn upload_file(&self, path: &Path) -> Result<ObjectUri>;

    /// Delete a previously uploaded object
    async fn delete_object(&self, uri: &ObjectUri) -> Result<()>;
}
