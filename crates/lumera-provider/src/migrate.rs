//! Durable artifact migration.
//!
//! Provider output URLs are short-lived. The migrator downloads the
//! payload and re-uploads it to the platform's object store under a
//! caller-chosen key, returning the permanent URL. Callers derive the key
//! from the job id, so re-running a migration overwrites the same object
//! instead of duplicating it.

use std::time::Duration;

use reqwest::Client;

/// Errors from artifact migration. Both variants are retryable up to the
/// reconciler's cap.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// Downloading the ephemeral URL failed (expired, network fault, or
    /// non-success status).
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    /// Uploading to the platform object store failed.
    #[error("upload failed: {0}")]
    UploadFailed(String),
}

/// Copies a provider-hosted output into durable platform storage.
#[async_trait::async_trait]
pub trait ArtifactMigrator: Send + Sync {
    /// Migrate `ephemeral_url` to the object named `object_key`; returns
    /// the durable URL.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::FetchFailed`] or
    /// [`MigrateError::UploadFailed`]; both are retryable.
    async fn migrate(&self, ephemeral_url: &str, object_key: &str)
        -> Result<String, MigrateError>;
}

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// HTTP migrator against an S3-style blob endpoint (`PUT {base}/{key}`).
#[derive(Debug, Clone)]
pub struct HttpMigrator {
    client: Client,
    storage_base: String,
    public_base: String,
    api_key: String,
}

impl HttpMigrator {
    /// Create a migrator.
    ///
    /// `storage_base` receives authenticated PUTs; `public_base` is the
    /// prefix of the URLs handed back to clients (often a CDN in front of
    /// the same bucket).
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be built (should not happen with
    /// default settings).
    pub fn new(
        storage_base: impl Into<String>,
        public_base: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            storage_base: storage_base.into().trim_end_matches('/').to_string(),
            public_base: public_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait::async_trait]
impl ArtifactMigrator for HttpMigrator {
    async fn migrate(
        &self,
        ephemeral_url: &str,
        object_key: &str,
    ) -> Result<String, MigrateError> {
        // Whole-payload buffering: generated artifacts are bounded in size
        // and the upload needs a known content length anyway.
        let response = self
            .client
            .get(ephemeral_url)
            .send()
            .await
            .map_err(|e| MigrateError::FetchFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MigrateError::FetchFailed(format!(
                "{} from {ephemeral_url}",
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        let payload = response
            .bytes()
            .await
            .map_err(|e| MigrateError::FetchFailed(e.to_string()))?;

        let upload_url = format!("{}/{object_key}", self.storage_base);
        let upload = self
            .client
            .put(&upload_url)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(payload.clone())
            .send()
            .await
            .map_err(|e| MigrateError::UploadFailed(e.to_string()))?;

        if !upload.status().is_success() {
            return Err(MigrateError::UploadFailed(format!(
                "{} from {upload_url}",
                upload.status()
            )));
        }

        tracing::debug!(
            object_key = %object_key,
            bytes = payload.len(),
            "artifact migrated to durable storage"
        );
        Ok(format!("{}/{object_key}", self.public_base))
    }
}
