//! Signed "package ready" callbacks.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde::Serialize;
use sha2::Sha256;

use crate::error::NotifyError;
use crate::job::CallbackTarget;
use crate::sanitize::redact_url;

pub const SIGNATURE_HEADER: &str = "x-signature";

/// Body of the ready callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadyPayload {
    pub job_id: String,
    pub order_no: String,
    pub status: &'static str,
    pub download_url: String,
    pub finished_at: DateTime<Utc>,
}

impl ReadyPayload {
    pub fn new(
        job_id: impl Into<String>,
        order_no: impl Into<String>,
        download_url: impl Into<String>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            order_no: order_no.into(),
            status: "ready",
            download_url: download_url.into(),
            finished_at,
        }
    }
}

/// Delivers ready notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, target: &CallbackTarget, payload: &ReadyPayload) -> Result<(), NotifyError>;
}

/// Hex HMAC-SHA256 of `body` keyed with `token`.
pub fn sign(body: &[u8], token: &str) -> Result<String, NotifyError> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(token.as_bytes()).map_err(|_| NotifyError::InvalidKey)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// POSTs the payload as JSON, signed when the target carries a token.
///
/// Requests run on a private single-worker runtime, so callers stay
/// synchronous.
pub struct WebhookNotifier {
    runtime: tokio::runtime::Runtime,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(timeout: Duration) -> Result<Self, NotifyError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("webhook")
            .enable_all()
            .build()
            .map_err(NotifyError::Runtime)?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(NotifyError::Client)?;
        Ok(Self { runtime, client })
    }

    fn headers(body: &[u8], token: Option<&str>) -> Result<HeaderMap, NotifyError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            let signature = sign(body, token)?;
            if let Ok(value) = HeaderValue::from_str(&signature) {
                headers.insert(SIGNATURE_HEADER, value);
            }
        }
        Ok(headers)
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, target: &CallbackTarget, payload: &ReadyPayload) -> Result<(), NotifyError> {
        // The signature covers these exact bytes.
        let body = serde_json::to_vec(payload)?;
        let headers = Self::headers(&body, target.token.as_deref())?;
        let url = target.url.clone();

        self.runtime.block_on(async {
            let response = self
                .client
                .post(&url)
                .headers(headers)
                .body(body)
                .send()
                .await
                .map_err(|e| NotifyError::Request {
                    url: redact_url(&url),
                    source: e,
                })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(NotifyError::Status {
                    url: redact_url(&url),
                    status: status.as_u16(),
                    body,
                });
            }
            Ok(())
        })?;

        tracing::debug!(url = %redact_url(&target.url), job_id = %payload.job_id, "Webhook delivered");
        Ok(())
    }
}
