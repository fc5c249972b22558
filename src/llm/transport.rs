// ABOUTME: Shared HTTP transport for upstream model APIs with timeout and status mapping
// ABOUTME: Translates reqwest failures and non-2xx responses into external-service errors
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::config::LlmSettings;
use crate::constants::llm::MAX_ERROR_BODY_CHARS;
use crate::errors::{AppError, AppResult};

/// Timeouts applied to upstream calls
#[derive(Debug, Clone, Copy)]
pub struct UpstreamTimeouts {
    /// TCP connect timeout
    pub connect: Duration,
    /// Longest silence tolerated between stream chunks
    pub stream_idle: Duration,
    /// Whole-request timeout for single-shot calls
    pub request: Duration,
}

impl From<&LlmSettings> for UpstreamTimeouts {
    fn from(settings: &LlmSettings) -> Self {
        Self {
            connect: settings.connect_timeout(),
            stream_idle: settings.stream_idle_timeout(),
            request: settings.request_timeout(),
        }
    }
}

/// How the response body will be consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    /// Body read in one piece under the request timeout
    SingleShot,
    /// Body consumed incrementally under the idle timeout
    Streaming,
}

/// Pooled HTTP client shared by all adapters
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    timeouts: UpstreamTimeouts,
}

impl HttpTransport {
    /// Build the underlying client
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised
    pub fn new(timeouts: UpstreamTimeouts) -> AppResult<Self> {
        let client = Client::builder()
            .connect_timeout(timeouts.connect)
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, timeouts })
    }

    /// Configured timeouts
    #[must_use]
    pub const fn timeouts(&self) -> UpstreamTimeouts {
        self.timeouts
    }

    /// POST a JSON body and return the response once the status is known to be 2xx
    ///
    /// Streaming calls must receive response headers within the idle timeout;
    /// single-shot calls run under the whole-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an external-service error on connect failure, timeout, or non-2xx status
    pub async fn post_json<B: Serialize + Sync>(
        &self,
        service: &'static str,
        url: &str,
        headers: &[(&'static str, String)],
        body: &B,
        mode: CallMode,
    ) -> AppResult<Response> {
        let mut request = self.client.post(url).json(body);
        for (name, value) in headers {
            request = request.header(*name, value);
        }

        debug!(service, url, ?mode, "Sending upstream request");

        let sent = match mode {
            CallMode::SingleShot => request.timeout(self.timeouts.request).send().await,
            CallMode::Streaming => self.within_idle(service, request.send()).await?,
        };
        let response = sent.map_err(|e| {
            error!(service, "Failed to send upstream request: {e}");
            send_error(service, &e)
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = match mode {
            CallMode::SingleShot => response.text().await.unwrap_or_default(),
            CallMode::Streaming => self
                .within_idle(service, response.text())
                .await
                .ok()
                .and_then(Result::ok)
                .unwrap_or_default(),
        };
        Err(status_error(service, status, &body))
    }

    /// Await `future` for at most the stream idle timeout
    async fn within_idle<T>(
        &self,
        service: &'static str,
        future: impl std::future::Future<Output = T> + Send,
    ) -> AppResult<T> {
        let idle = self.timeouts.stream_idle;
        timeout(idle, future).await.map_err(|_| {
            warn!(service, ?idle, "Upstream did not respond within the idle timeout");
            AppError::external_timeout(
                service,
                format!("no response received within {}s", idle.as_secs()),
            )
        })
    }

    /// Read and decode a single-shot JSON response body
    ///
    /// # Errors
    ///
    /// Returns an external-service error if the body cannot be read or decoded
    pub async fn read_json<T: DeserializeOwned>(
        service: &'static str,
        response: Response,
    ) -> AppResult<T> {
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                AppError::external_timeout(service, format!("Timed out reading response: {e}"))
            } else {
                AppError::external_service(service, format!("Failed to read response: {e}"))
            }
        })?;

        serde_json::from_str(&body).map_err(|e| {
            error!(
                service,
                "Failed to parse upstream response: {e} - body: {}",
                truncate(&body)
            );
            AppError::external_service(service, format!("Failed to parse response: {e}"))
        })
    }
}

fn send_error(service: &'static str, error: &reqwest::Error) -> AppError {
    if error.is_timeout() {
        AppError::external_timeout(service, format!("Request timed out: {error}"))
    } else if error.is_connect() {
        AppError::external_unavailable(service, format!("Cannot connect: {error}"))
    } else {
        AppError::external_service(service, format!("Request failed: {error}"))
    }
}

/// Map a non-2xx upstream status and body to an error
#[must_use]
pub fn status_error(service: &'static str, status: StatusCode, body: &str) -> AppError {
    let detail = error_detail(body);
    warn!(service, status = status.as_u16(), "Upstream returned error: {detail}");

    let message = format!("HTTP {}: {detail}", status.as_u16());
    match status.as_u16() {
        429 => AppError::external_rate_limited(service, message),
        401 | 403 => AppError::external_auth_failed(service, message),
        408 | 504 => AppError::external_timeout(service, message),
        503 | 529 => AppError::external_unavailable(service, message),
        _ => AppError::external_service(service, message),
    }
}

/// `error.message` from a JSON error body, or the truncated raw body
fn error_detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .unwrap_or_else(|| truncate(body))
}

fn truncate(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}
