//! Provider webhook handler.
//!
//! Providers push terminal notifications here; the same observation also
//! arrives via the reconciler's polling sweep, so this path is an
//! accelerator, never the only delivery channel. Duplicate and stale
//! notifications are absorbed by the reconciler's terminal-first-wins
//! rule.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use lumera_provider::ProviderStatus;

use crate::crypto::{constant_time_eq, hmac_sha256_hex};
use crate::error::ApiError;
use crate::state::AppState;

/// Provider notification payload.
#[derive(Debug, Deserialize)]
pub struct ProviderNotification {
    /// Provider-assigned job reference.
    pub reference: String,
    /// Reported status.
    pub status: String,
    /// Output URL, present when succeeded.
    #[serde(default)]
    pub output_url: Option<String>,
    /// Failure detail, present when failed.
    #[serde(default)]
    pub error: Option<String>,
}

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was accepted.
    pub received: bool,
    /// Whether the reference resolved to a known job.
    pub known: bool,
}

/// Handle provider status notifications.
///
/// Unknown references are acknowledged so the provider stops
/// redelivering; the sweep remains the backstop for anything missed here.
pub async fn provider_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    if let Some(webhook_secret) = &state.config.webhook_secret {
        let signature = headers
            .get("x-lumera-signature")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::BadRequest("Missing webhook signature".into()))?;

        verify_signature(&body, signature, webhook_secret).map_err(|e| {
            tracing::warn!(error = %e, "Invalid provider webhook signature");
            ApiError::BadRequest("Invalid webhook signature".into())
        })?;
    } else {
        tracing::warn!("webhook_secret not configured - skipping signature verification");
    }

    let notification: ProviderNotification =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(
        provider_ref = %notification.reference,
        status = %notification.status,
        "Received provider webhook"
    );

    let status = parse_status(&notification)?;

    let known = state
        .reconciler
        .handle_notification(&notification.reference, status)
        .await?;

    Ok(Json(WebhookResponse {
        received: true,
        known,
    }))
}

/// Map the notification's status string to a provider status, using the
/// same vocabulary as the polling API.
fn parse_status(notification: &ProviderNotification) -> Result<ProviderStatus, ApiError> {
    match notification.status.as_str() {
        "queued" | "processing" | "pending" => Ok(ProviderStatus::Pending),
        "succeeded" | "completed" => {
            let output_url = notification
                .output_url
                .clone()
                .ok_or_else(|| ApiError::BadRequest("succeeded without output_url".into()))?;
            Ok(ProviderStatus::Succeeded { output_url })
        }
        "failed" | "canceled" => Ok(ProviderStatus::Failed {
            detail: notification
                .error
                .clone()
                .unwrap_or_else(|| "provider reported failure".into()),
        }),
        other => Err(ApiError::BadRequest(format!(
            "Unknown provider status: {other}"
        ))),
    }
}

/// Verify the webhook signature using HMAC-SHA256.
fn verify_signature(body: &str, signature: &str, secret: &str) -> Result<(), String> {
    let expected = hmac_sha256_hex(secret, body);

    // Constant-time comparison to prevent timing attacks.
    if constant_time_eq(&expected, signature) {
        Ok(())
    } else {
        Err("Signature mismatch".into())
    }
}
