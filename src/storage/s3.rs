use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLifecycleConfiguration, BucketLocationConstraint, CreateBucketConfiguration,
    ExpirationStatus, LifecycleExpiration, LifecycleRule, LifecycleRuleFilter,
};
use aws_sdk_s3::Client as S3Client;
use std::path::Path;

use super::{object_key, ObjectStore, ObjectUri};
use crate::config::{default_bucket_name, Config};
use crate::{Result, TranscriberError};

const LIFECYCLE_RULE_ID: &str = "uk-transcriber-expire-audio";

/// S3 backed object store for temporary audio
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
    region: String,
    key_prefix: Option<String>,
    expiry_days: i32,
    content_type: &'static str,
}

impl S3ObjectStore {
    pub fn new(sdk_config: &SdkConfig, bucket: impl Into<String>, config: &Config) -> Self {
        let region = sdk_config
            .region()
            .map(|r| r.to_string())
            .unwrap_or_else(|| config.aws.region.clone());

        Self {
            client: S3Client::new(sdk_config),
            bucket: bucket.into(),
            region,
            key_prefix: config.aws.s3_key_prefix.clone(),
            expiry_days: config.aws.object_expiry_days,
            content_type: crate::extractors::TargetFormat::PCM16_MONO_16K.mime_type(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn bucket_exists(&self) -> Result<bool> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                if err.as_service_error().map(|e| e.is_not_found()).unwrap_or(false) {
                    Ok(false)
                } else {
                    Err(TranscriberError::Bucket(format!(
                        "cannot access bucket {}: {}",
                        self.bucket,
                        DisplayErrorContext(&err)
                    )))
                }
            }
        }
    }

    async fn create_bucket(&self) -> Result<()> {
        let mut request = self.client.create_bucket().bucket(&self.bucket);

        // us-east-1 rejects an explicit location constraint
        if self.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => {
                tracing::info!("Created bucket {} in {}", self.bucket, self.region);
                Ok(())
            }
            Err(err)
                if err
                    .as_service_error()
                    .map(|e| e.is_bucket_already_owned_by_you())
                    .unwrap_or(false) =>
            {
                tracing::debug!("Bucket {} already owned by this account", self.bucket);
                Ok(())
            }
            Err(err) => Err(TranscriberError::Bucket(format!(
                "failed to create bucket {}: {}",
                self.bucket,
                DisplayErrorContext(&err)
            ))),
        }
    }

    async fn lifecycle_rules(&self) -> Result<Vec<LifecycleRule>> {
        match self
            .client
            .get_bucket_lifecycle_configuration()
            .bucket(&self.bucket)
            .send()
            .await
        {
            Ok(output) => Ok(output.rules().to_vec()),
            Err(err)
                if err.as_service_error().and_then(|e| e.code())
                    == Some("NoSuchLifecycleConfiguration") =>
            {
                Ok(Vec::new())
            }
            Err(err) => Err(TranscriberError::Bucket(format!(
                "cannot read lifecycle of {}: {}",
                self.bucket,
                DisplayErrorContext(&err)
            ))),
        }
    }

    /// Install the expiry rule unless it is already there. Runs for existing buckets too, so
    /// a bootstrap that died between create and lifecycle is repaired on the next run.
    async fn ensure_lifecycle(&self) -> Result<()> {
        let existing = self.lifecycle_rules().await?;
        let Some(lifecycle) = lifecycle_with_expiry(existing, self.expiry_days)? else {
            tracing::debug!("Bucket {} already has the expiry rule", self.bucket);
            return Ok(());
        };

        self.client
            .put_bucket_lifecycle_configuration()
            .bucket(&self.bucket)
            .lifecycle_configuration(lifecycle)
            .send()
            .await
            .map_err(|err| {
                TranscriberError::Bucket(format!(
                    "failed to set lifecycle on {}: {}",
                    self.bucket,
                    DisplayErrorContext(&err)
                ))
            })?;

        tracing::info!("Objects in {} expire after {} day(s)", self.bucket, self.expiry_days);
        Ok(())
    }
}

/// Rule deleting every object after `days`
pub fn expiry_rule(days: i32) -> Result<LifecycleRule> {
    LifecycleRule::builder()
        .id(LIFECYCLE_RULE_ID)
        .status(ExpirationStatus::Enabled)
        .filter(LifecycleRuleFilter::builder().prefix("").build())
        .expiration(LifecycleExpiration::builder().days(days).build())
        .build()
        .map_err(|e| TranscriberError::Bucket(format!("invalid lifecycle rule: {}", e)))
}

/// Lifecycle to put on the bucket, or `None` when our rule is already installed.
/// A put replaces the whole configuration, so rules owned by others are carried over.
pub fn lifecycle_with_expiry(
    mut rules: Vec<LifecycleRule>,
    days: i32,
) -> Result<Option<BucketLifecycleConfiguration>> {
    if rules.iter().any(|rule| rule.id() == Some(LIFECYCLE_RULE_ID)) {
        return Ok(None);
    }

    rules.push(expiry_rule(days)?);
    BucketLifecycleConfiguration::builder()
        .set_rules(Some(rules))
        .build()
        .map(Some)
        .map_err(|e| TranscriberError::Bucket(format!("invalid lifecycle configuration: {}", e)))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn ensure_bucket(&self) -> Result<()> {
        if self.bucket_exists().await? {
            tracing::debug!("Bucket {} exists", self.bucket);
        } else {
            tracing::info!("Bucket {} not found, creating it", self.bucket);
            self.create_bucket().await?;
        }

        self.ensure_lifecycle().await
    }

    async fn upload_file(&self, path: &Path) -> Result<ObjectUri> {
        let key = object_key(self.key_prefix.as_deref(), chrono::Utc::now().timestamp(), path);
        let uri = ObjectUri::new(&self.bucket, &key);

        tracing::info!("Uploading audio to {}", uri);

        let body = ByteStream::from_path(path).await.map_err(|e| {
            TranscriberError::Upload(format!("cannot read {}: {}", path.display(), e))
        })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(self.content_type)
            .body(body)
            .send()
            .await
            .map_err(|err| {
                TranscriberError::Upload(format!("{}: {}", uri, DisplayErrorContext(&err)))
            })?;

        Ok(uri)
    }

    async fn delete_object(&self, uri: &ObjectUri) -> Result<()> {
        tracing::debug!("Deleting {}", uri);

        self.client
            .delete_object()
            .bucket(uri.bucket())
            .key(uri.key())
            .send()
            .await
            .map_err(|err| TranscriberError::Cleanup(DisplayErrorContext(&err).to_string()))?;

        Ok(())
    }
}

/// Bucket named on the command line or in the config, else derived from the account id
pub async fn resolve_bucket(config: &Config, sdk_config: &SdkConfig) -> Result<String> {
    if let Some(bucket) = &config.aws.s3_bucket {
        return Ok(bucket.clone());
    }

    let sts = aws_sdk_sts::Client::new(sdk_config);
    let identity = sts.get_caller_identity().send().await.map_err(|err| {
        TranscriberError::Bucket(format!(
            "no bucket configured and the account id could not be determined ({}). \
             Pass --bucket NAME",
            aws_sdk_sts::error::DisplayErrorContext(&err)
        ))
    })?;

    let account = identity.account().filter(|a| !a.is_empty()).ok_or_else(|| {
        TranscriberError::Bucket(
            "no bucket configured and no account id returned. Pass --bucket NAME".to_string(),
        )
    })?;

    Ok(default_bucket_name(account))
}
