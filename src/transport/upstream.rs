//! HTTP bridge to the store.
//!
//! `UpstreamClient` implements [`MethodInvoker`] by POSTing every
//! [`Operation`] as JSON to a bridge endpoint that speaks the store's binary
//! protocol. The bridge answers with `{"result": ...}` on success or
//! `{"error": {"code": ..., "message": ...}}` on failure.
//!
//! # Error Classification
//!
//! - Request timeout → `UpstreamTimeout`
//! - Connection failure, non-2xx status, oversized body → `UpstreamError`
//! - Bridge error with the method-not-found code → `MethodNotFound`
//! - Any other bridge error → `UpstreamError` with the message passed through
//! - Body that is not a bridge envelope → `MalformedUpstreamResponse`
//!
//! No automatic retry: a replayed insert or update is not idempotent.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::duration_format;
use crate::error::GatewayError;
use crate::error::codes;
use crate::error::jsonrpc::JsonRpcError;
use crate::transport::invoker::{MethodInvoker, Operation};
use crate::transport::jsonrpc::fast_correlation_id;

/// Configuration for the upstream bridge client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Bridge endpoint, e.g. `http://127.0.0.1:8081/invoke`.
    pub url: String,
    /// Per-invocation timeout (connection + response).
    #[serde(with = "duration_format")]
    pub timeout: Duration,
    #[serde(with = "duration_format")]
    pub connect_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    #[serde(with = "duration_format")]
    pub pool_idle_timeout: Duration,
    /// Largest bridge response body accepted, in bytes.
    pub max_response_size: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            pool_max_idle_per_host: 32,
            pool_idle_timeout: Duration::from_secs(90),
            max_response_size: 10 * 1024 * 1024,
        }
    }
}

impl UpstreamConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Upstream bridge client. Cheap to clone; reqwest pools connections.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
    config: UpstreamConfig,
}

impl UpstreamClient {
    /// # Errors
    ///
    /// Returns `GatewayError::Internal` if the HTTP client cannot be built.
    pub fn new(config: UpstreamConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| GatewayError::Internal {
                details: format!("upstream client build error: {e}"),
            })?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    async fn send(&self, operation: &Operation) -> Result<Value, GatewayError> {
        let correlation_id = fast_correlation_id().to_string();

        debug!(
            correlation_id = %correlation_id,
            operation = %operation.name(),
            url = %self.config.url,
            "Invoking upstream"
        );

        let response = self
            .client
            .post(&self.config.url)
            .header("Content-Type", "application/json")
            .json(operation)
            .send()
            .await
            .map_err(|e| self.classify_error(e, &correlation_id))?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                correlation_id = %correlation_id,
                status = %status,
                "Upstream returned error status"
            );
            return Err(GatewayError::UpstreamError {
                message: format!("Upstream returned HTTP {status}"),
            });
        }

        let body = self.read_body_limited(response, &correlation_id).await?;
        let mut envelope: serde_json::Map<String, Value> = serde_json::from_slice(&body)
            .map_err(|e| {
                error!(
                    correlation_id = %correlation_id,
                    error = %e,
                    "Failed to parse upstream response"
                );
                GatewayError::MalformedUpstreamResponse {
                    details: e.to_string(),
                }
            })?;

        if let Some(raw_error) = envelope.remove("error") {
            let err: JsonRpcError = serde_json::from_value(raw_error).map_err(|e| {
                GatewayError::MalformedUpstreamResponse {
                    details: format!("bad error object: {e}"),
                }
            })?;
            debug!(
                correlation_id = %correlation_id,
                code = err.code,
                "Upstream reported failure"
            );
            return Err(if err.code == codes::METHOD_NOT_FOUND {
                GatewayError::MethodNotFound {
                    method: operation.name().to_string(),
                }
            } else {
                GatewayError::UpstreamError {
                    message: err.message,
                }
            });
        }

        envelope
            .remove("result")
            .ok_or_else(|| GatewayError::MalformedUpstreamResponse {
                details: "response has neither 'result' nor 'error'".to_string(),
            })
    }

    /// Read the response body, enforcing `max_response_size`.
    ///
    /// Rejects early on Content-Length, then streams chunk by chunk so a
    /// chunked response cannot grow past the ceiling either.
    async fn read_body_limited(
        &self,
        response: reqwest::Response,
        correlation_id: &str,
    ) -> Result<bytes::Bytes, GatewayError> {
        let max_size = self.config.max_response_size;

        if let Some(content_length) = response.content_length() {
            if content_length as usize > max_size {
                warn!(
                    correlation_id = %correlation_id,
                    content_length = content_length,
                    max_response_size = max_size,
                    "Upstream response exceeds size limit (Content-Length)"
                );
                return Err(GatewayError::UpstreamError {
                    message: format!(
                        "Upstream response too large: {content_length} bytes exceeds {max_size} byte limit"
                    ),
                });
            }
        }

        let mut buf = Vec::with_capacity(
            response
                .content_length()
                .map(|cl| cl as usize)
                .unwrap_or(8192)
                .min(max_size),
        );

        let mut response = response;
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            error!(
                correlation_id = %correlation_id,
                error = %e,
                "Failed to read upstream response body chunk"
            );
            GatewayError::UpstreamError {
                message: format!("Failed to read upstream response: {e}"),
            }
        })? {
            if buf.len() + chunk.len() > max_size {
                warn!(
                    correlation_id = %correlation_id,
                    accumulated = buf.len(),
                    chunk_size = chunk.len(),
                    max_response_size = max_size,
                    "Upstream response exceeds size limit during streaming"
                );
                return Err(GatewayError::UpstreamError {
                    message: format!(
                        "Upstream response too large: >={} bytes exceeds {max_size} byte limit",
                        buf.len() + chunk.len()
                    ),
                });
            }
            buf.extend_from_slice(&chunk);
        }

        Ok(bytes::Bytes::from(buf))
    }

    fn classify_error(&self, error: reqwest::Error, correlation_id: &str) -> GatewayError {
        if error.is_timeout() {
            warn!(
                correlation_id = %correlation_id,
                timeout_ms = self.config.timeout.as_millis() as u64,
                "Upstream request timed out"
            );
            GatewayError::UpstreamTimeout {
                timeout_ms: self.config.timeout.as_millis() as u64,
            }
        } else if error.is_connect() {
            warn!(
                correlation_id = %correlation_id,
                url = %self.config.url,
                "Failed to connect to upstream"
            );
            GatewayError::UpstreamError {
                message: format!("Failed to connect to upstream: {error}"),
            }
        } else {
            error!(
                correlation_id = %correlation_id,
                error = %error,
                "Upstream request failed"
            );
            GatewayError::UpstreamError {
                message: error.to_string(),
            }
        }
    }
}

#[async_trait::async_trait]
impl MethodInvoker for UpstreamClient {
    async fn invoke(&self, operation: &Operation) -> Result<Value, GatewayError> {
        self.send(operation).await
    }
}
