//! Common test utilities for lumera-service integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::TestServer;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lumera_core::AccountId;
use lumera_service::crypto::hmac_sha256_hex;
use lumera_service::{create_router, AppState, ServiceConfig};
use lumera_store::RocksStore;

/// The service API key used by every test harness.
pub const SERVICE_API_KEY: &str = "test-service-key";

/// The webhook secret used by every test harness.
pub const WEBHOOK_SECRET: &str = "test-webhook-secret";

/// Test harness containing everything needed for integration tests.
///
/// Only the image provider is configured; tests that need an unconfigured
/// kind use "video".
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Mock image generation provider.
    pub provider: MockServer,
    /// Mock object store (receives migration uploads and serves ephemeral
    /// downloads).
    pub storage: MockServer,
    /// Temporary directory for the database (kept alive for test duration).
    pub _temp_dir: TempDir,
    /// A test account ID.
    pub account_id: AccountId,
}

impl TestHarness {
    /// Create a new test harness with a fresh database and mock upstreams.
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = RocksStore::open(temp_dir.path()).expect("Failed to open store");

        let provider = MockServer::start().await;
        let storage = MockServer::start().await;

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            data_dir: temp_dir.path().to_string_lossy().to_string(),
            service_api_key: Some(SERVICE_API_KEY.into()),
            image_provider_url: Some(provider.uri()),
            image_provider_key: Some("test-provider-key".into()),
            video_provider_url: None,
            video_provider_key: None,
            training_provider_url: None,
            training_provider_key: None,
            storage_url: format!("{}/artifacts", storage.uri()),
            storage_public_url: "https://cdn.test".into(),
            storage_api_key: "test-storage-key".into(),
            webhook_secret: Some(WEBHOOK_SECRET.into()),
            cors_origins: vec!["*".into()],
            ..ServiceConfig::default()
        };

        let state = AppState::new(Arc::new(store), config);
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");
        let account_id = AccountId::generate();

        Self {
            server,
            provider,
            storage,
            _temp_dir: temp_dir,
            account_id,
        }
    }

    /// Grant credits to the harness account via the API.
    pub async fn grant(&self, amount: i64, idempotency_key: &str) {
        self.server
            .post("/v1/credits/grant")
            .add_header("x-api-key", SERVICE_API_KEY)
            .json(&json!({
                "account_id": self.account_id.to_string(),
                "amount": amount,
                "kind": "purchase",
                "reason": "Test funding",
                "idempotency_key": idempotency_key,
            }))
            .await
            .assert_status_ok();
    }

    /// Current balance of the harness account.
    pub async fn balance(&self) -> i64 {
        let response = self
            .server
            .get(&format!("/v1/credits/{}/balance", self.account_id))
            .add_header("x-api-key", SERVICE_API_KEY)
            .await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        body["balance"].as_i64().expect("balance field")
    }

    /// Mount a provider mock that accepts submissions with the given
    /// reference.
    pub async fn mock_submit_success(&self, provider_ref: &str) {
        Mock::given(method("POST"))
            .and(path("/v1/generations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": provider_ref })))
            .mount(&self.provider)
            .await;
    }

    /// Submit an image job through the API; returns the response body.
    pub async fn submit_job(
        &self,
        cost: i64,
        idempotency_key: &str,
    ) -> axum_test::TestResponse {
        self.server
            .post("/v1/jobs")
            .add_header("x-api-key", SERVICE_API_KEY)
            .add_header("x-service-name", "studio-api")
            .json(&json!({
                "account_id": self.account_id.to_string(),
                "kind": "image",
                "cost": cost,
                "payload": { "prompt": "portrait, studio lighting" },
                "idempotency_key": idempotency_key,
            }))
            .await
    }

    /// Send a signed provider webhook.
    pub async fn send_webhook(&self, payload: &serde_json::Value) -> axum_test::TestResponse {
        let body = payload.to_string();
        let signature = hmac_sha256_hex(WEBHOOK_SECRET, &body);
        self.server
            .post("/webhooks/provider")
            .add_header("x-lumera-signature", signature)
            .text(&body)
            .await
    }
}
