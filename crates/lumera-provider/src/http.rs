//! HTTP provider adapter.
//!
//! Speaks a JSON generation API: `POST {base}/v1/generations` to submit,
//! `GET {base}/v1/generations/{id}` to query. One instance is configured
//! per provider kind; the endpoints differ, the shape does not.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use lumera_core::ProviderKind;

use crate::error::ProviderError;
use crate::{JobSpec, ProviderAdapter, ProviderStatus};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// A provider adapter over an HTTP JSON API.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: Client,
    base_url: String,
    api_key: String,
    kind: ProviderKind,
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    kind: &'a str,
    input: &'a serde_json::Value,
    external_id: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    output_url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl HttpProvider {
    /// Create an adapter for one provider kind.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be built (should not happen with
    /// default settings).
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        kind: ProviderKind,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            kind,
        }
    }

    /// Map a non-success response to the normalized error taxonomy.
    async fn error_from_response(response: reqwest::Response) -> ProviderError {
        let status = response.status();
        let detail = match response.json::<ErrorResponse>().await {
            Ok(body) => body
                .error
                .or(body.message)
                .unwrap_or_else(|| status.to_string()),
            Err(_) => status.to_string(),
        };

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            ProviderError::Retryable(format!("{status}: {detail}"))
        } else {
            ProviderError::Rejected(detail)
        }
    }

    fn transport_error(err: &reqwest::Error) -> ProviderError {
        if err.is_connect() {
            ProviderError::Unavailable(err.to_string())
        } else {
            // Timeouts and mid-flight failures are worth another sweep.
            ProviderError::Retryable(err.to_string())
        }
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for HttpProvider {
    async fn submit(&self, spec: &JobSpec) -> Result<String, ProviderError> {
        let url = format!("{}/v1/generations", self.base_url);
        let request = SubmitRequest {
            kind: self.kind.as_str(),
            input: &spec.payload,
            external_id: spec.account_id.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::transport_error(&e))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body: SubmitResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        tracing::debug!(
            provider_kind = %self.kind.as_str(),
            provider_ref = %body.id,
            "provider accepted job"
        );
        Ok(body.id)
    }

    async fn query_status(&self, provider_ref: &str) -> Result<ProviderStatus, ProviderError> {
        let url = format!("{}/v1/generations/{provider_ref}", self.base_url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| Self::transport_error(&e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ProviderError::Rejected(format!(
                "unknown provider reference: {provider_ref}"
            )));
        }
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body: StatusResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        match body.status.as_str() {
            "queued" | "processing" | "pending" => Ok(ProviderStatus::Pending),
            "succeeded" | "completed" => {
                let output_url = body.output_url.ok_or_else(|| {
                    ProviderError::InvalidResponse("succeeded without output_url".into())
                })?;
                Ok(ProviderStatus::Succeeded { output_url })
            }
            "failed" | "canceled" => Ok(ProviderStatus::Failed {
                detail: body.error.unwrap_or_else(|| "provider reported failure".into()),
            }),
            other => Err(ProviderError::InvalidResponse(format!(
                "unknown provider status: {other}"
            ))),
        }
    }
}
