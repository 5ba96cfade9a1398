use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use uuid::Uuid;

use crate::config::{MIN_TIMEOUT_MS, SyncConfig, normalize_base_url};
use crate::error::{ConfigError, TransportError};
use crate::transport::Requester;

/// [`Requester`] over HTTP POST with JSON bodies.
///
/// Only connection failures are retried. Once a request may have reached the store it is
/// never sent again, so `create` and the other non-idempotent routes apply at most once.
#[derive(Debug, Clone)]
pub struct HttpRequester {
    base_url: String,
    timeout: Duration,
    request_attempts: usize,
    http: reqwest::Client,
}

impl HttpRequester {
    pub fn new(config: &SyncConfig) -> Result<Self, TransportError> {
        let base_url = normalize_base_url(&config.base_url).map_err(|error| match error {
            ConfigError::InvalidBaseUrl { raw } => TransportError::InvalidBaseUrl { raw },
            _ => TransportError::BaseUrlMissing,
        })?;
        Ok(Self {
            base_url,
            timeout: Duration::from_millis(config.timeout_ms.max(MIN_TIMEOUT_MS)),
            request_attempts: config.request_attempts.max(1),
            http: reqwest::Client::new(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with('/') {
            Some(format!("{}{}", self.base_url, trimmed))
        } else {
            Some(format!("{}/{}", self.base_url, trimmed))
        }
    }
}

#[async_trait]
impl Requester for HttpRequester {
    async fn post(&self, path: &str, body: Value) -> Result<Value, TransportError> {
        let url = self.endpoint(path).ok_or(TransportError::InvalidPath)?;
        let mut last_error: Option<String> = None;

        for attempt in 0..self.request_attempts {
            let request = self
                .http
                .post(url.as_str())
                .header("x-request-id", format!("req_{}", Uuid::new_v4().simple()))
                .timeout(self.timeout)
                .json(&body);

            match request.send().await {
                Ok(response) => return decode_json_response(response).await,
                Err(error) => {
                    let retryable = error.is_connect();
                    tracing::debug!(
                        path,
                        attempt,
                        retryable,
                        error = %error,
                        "struct request attempt failed"
                    );
                    last_error = Some(error.to_string());
                    if !retryable || attempt + 1 >= self.request_attempts {
                        break;
                    }
                }
            }
        }

        Err(TransportError::Request {
            message: last_error.unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

pub fn format_http_error(status: StatusCode, body: &[u8]) -> TransportError {
    let body = non_empty_string(String::from_utf8_lossy(body).to_string())
        .unwrap_or_else(|| "<empty>".to_string());
    TransportError::Http { status, body }
}

/// Successful responses with an empty body decode to `null`; `create`, `update` and the
/// lifecycle routes answer that way.
async fn decode_json_response(response: reqwest::Response) -> Result<Value, TransportError> {
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|error| TransportError::Read {
            message: error.to_string(),
        })?;

    if !status.is_success() {
        return Err(format_http_error(status, &bytes));
    }
    decode_body(&bytes)
}

fn decode_body(bytes: &[u8]) -> Result<Value, TransportError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes).map_err(|error| TransportError::Decode {
        message: error.to_string(),
    })
}

fn non_empty_string(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
