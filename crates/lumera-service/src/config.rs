//! Service configuration.

use std::time::Duration;

use lumera_reconciler::ReconcilerConfig;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to the `RocksDB` data directory (default: "/data/lumera").
    pub data_dir: String,

    /// Service API key for service-to-service auth.
    pub service_api_key: Option<String>,

    /// Image provider endpoint.
    pub image_provider_url: Option<String>,

    /// Image provider API key.
    pub image_provider_key: Option<String>,

    /// Video provider endpoint.
    pub video_provider_url: Option<String>,

    /// Video provider API key.
    pub video_provider_key: Option<String>,

    /// Training provider endpoint.
    pub training_provider_url: Option<String>,

    /// Training provider API key.
    pub training_provider_key: Option<String>,

    /// Object-store upload endpoint.
    pub storage_url: String,

    /// Public URL prefix for migrated artifacts (CDN).
    pub storage_public_url: String,

    /// Object-store API key.
    pub storage_api_key: String,

    /// Shared secret for provider webhook signatures (optional; unsigned
    /// webhooks are accepted with a warning when unset).
    pub webhook_secret: Option<String>,

    /// Seconds between reconciler sweeps.
    pub sweep_interval_seconds: u64,

    /// Migration attempts before a job is failed and refunded.
    pub migrate_retry_cap: u32,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "/data/lumera".into()),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            image_provider_url: std::env::var("IMAGE_PROVIDER_URL").ok(),
            image_provider_key: std::env::var("IMAGE_PROVIDER_KEY").ok(),
            video_provider_url: std::env::var("VIDEO_PROVIDER_URL").ok(),
            video_provider_key: std::env::var("VIDEO_PROVIDER_KEY").ok(),
            training_provider_url: std::env::var("TRAINING_PROVIDER_URL").ok(),
            training_provider_key: std::env::var("TRAINING_PROVIDER_KEY").ok(),
            storage_url: std::env::var("STORAGE_URL")
                .unwrap_or_else(|_| "http://localhost:9000/lumera-artifacts".into()),
            storage_public_url: std::env::var("STORAGE_PUBLIC_URL")
                .unwrap_or_else(|_| "https://cdn.lumera.app".into()),
            storage_api_key: std::env::var("STORAGE_API_KEY").unwrap_or_default(),
            webhook_secret: std::env::var("WEBHOOK_SECRET").ok(),
            sweep_interval_seconds: std::env::var("SWEEP_INTERVAL_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(15),
            migrate_retry_cap: std::env::var("MIGRATE_RETRY_CAP")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: std::env::var("MAX_BODY_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1024 * 1024), // 1MB
            request_timeout_seconds: std::env::var("REQUEST_TIMEOUT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
        }
    }

    /// The reconciler tuning derived from this configuration.
    #[must_use]
    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            sweep_interval: Duration::from_secs(self.sweep_interval_seconds),
            migrate_retry_cap: self.migrate_retry_cap,
            ..ReconcilerConfig::default()
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/lumera".into(),
            service_api_key: None,
            image_provider_url: None,
            image_provider_key: None,
            video_provider_url: None,
            video_provider_key: None,
            training_provider_url: None,
            training_provider_key: None,
            storage_url: "http://localhost:9000/lumera-artifacts".into(),
            storage_public_url: "https://cdn.lumera.app".into(),
            storage_api_key: String::new(),
            webhook_secret: None,
            sweep_interval_seconds: 15,
            migrate_retry_cap: 5,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
        }
    }
}
