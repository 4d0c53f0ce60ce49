//! HTTP front end.
//!
//! # Request Flow
//!
//! 1. Read the body under `limits.max_body_size` (Content-Length first, then
//!    a streaming ceiling)
//! 2. Route: classify the request and translate it into calls
//! 3. Dispatch under `limits.request_timeout`
//! 4. Shape results and classify errors into one response
//!
//! Every path yields exactly one JSON response. Nothing is written until
//! the whole request, batch included, has completed.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, error, warn};

use crate::codec::FormatCodec;
use crate::config::{ConfigError, GatewayConfig};
use crate::error::jsonrpc::JsonRpcError;
use crate::error::{ErrorScope, GatewayError};
use crate::logging_layer::logging_layer;
use crate::transport::dispatcher::{BatchDispatcher, CallOutcome};
use crate::transport::invoker::{MethodInvoker, Operation};
use crate::transport::jsonrpc::{BatchItem, RpcId, RpcResponse};
use crate::transport::router::{CompiledRoute, InboundRequest, RequestRouter, Routed};

/// Shared, immutable per-process state.
pub struct GatewayState {
    pub router: RequestRouter,
    pub dispatcher: BatchDispatcher,
}

impl GatewayState {
    /// Compile the route table and bind it to `invoker`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a route's method sets do not parse.
    pub fn new(config: &GatewayConfig, invoker: Arc<dyn MethodInvoker>) -> Result<Self, ConfigError> {
        Ok(Self {
            router: RequestRouter::new(config)?,
            dispatcher: BatchDispatcher::new(invoker, config.limits.batch_concurrency),
        })
    }
}

/// Build the axum router.
///
/// Every path lands in one fallback handler; the route table is matched by
/// [`RequestRouter`], not by axum. axum's own body limit is disabled so an
/// oversized body gets the gateway's error envelope instead of a bare 413.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .fallback(handle_request)
        .layer(DefaultBodyLimit::disable())
        .layer(logging_layer())
        .with_state(state)
}

async fn handle_request(State(state): State<Arc<GatewayState>>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();
    let limits = state.router.limits();

    let body = match read_body(body, &parts.headers, limits.max_body_size).await {
        Ok(body) => body,
        Err(e) => return error_response(None, &e, ErrorScope::Rest),
    };

    let inbound = InboundRequest {
        method: parts.method,
        uri: parts.uri,
        version: parts.version,
        headers: parts.headers,
        body,
    };

    let routed = match state.router.route(&inbound) {
        Ok(routed) => routed,
        Err(failure) => {
            debug!(
                error_type = failure.error.error_type_name(),
                error = %failure.error,
                "Request rejected"
            );
            return error_response(None, &failure.error, failure.scope);
        }
    };

    let set_headers = routed
        .route()
        .map(|route| route.config.set_headers.clone())
        .unwrap_or_default();
    let scope = routed.scope();
    let timeout = limits.request_timeout;

    let mut response = match tokio::time::timeout(timeout, execute(&state, routed)).await {
        Ok(response) => response,
        Err(_) => {
            let error = GatewayError::UpstreamTimeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            };
            warn!(timeout_ms = timeout.as_millis(), "Request deadline elapsed");
            error_response(None, &error, scope)
        }
    };

    apply_headers(response.headers_mut(), &set_headers);
    response
}

/// Buffer the request body, refusing anything above `limit`.
async fn read_body(body: Body, headers: &HeaderMap, limit: usize) -> Result<Bytes, GatewayError> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if let Some(size) = declared.filter(|&size| size > limit) {
        return Err(GatewayError::RequestTooLarge { size, limit });
    }

    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(GatewayError::RequestTooLarge {
                size: limit.saturating_add(1),
                limit,
            })
        }
        Err(e) => Err(GatewayError::invalid_request(format!(
            "failed to read request body: {e}"
        ))),
    }
}

async fn execute(state: &GatewayState, routed: Routed<'_>) -> Response {
    let dispatcher = &state.dispatcher;
    match routed {
        Routed::Health => json_response(StatusCode::OK, &json!({ "status": "ok" })),

        Routed::Status { status, .. } => {
            json_response(status, &json!({ "status": status.as_u16() }))
        }

        Routed::Rest { route, request } => {
            let outcome = dispatcher.dispatch_one(request).await;
            single_response(route, outcome, ErrorScope::Rest)
        }

        Routed::Rpc {
            route,
            mut items,
            batch: false,
        } => {
            let outcome = match items.pop() {
                Some(BatchItem::Valid(request)) => dispatcher.dispatch_one(request).await,
                Some(BatchItem::Invalid { id, error }) => CallOutcome {
                    id,
                    result: Err(error),
                },
                None => CallOutcome {
                    id: None,
                    result: Err(GatewayError::invalid_request("empty request")),
                },
            };
            single_response(route, outcome, ErrorScope::Rpc)
        }

        Routed::Rpc { route, items, .. } => {
            let skip = route.config.multireturn_skip_count;
            let responses: Vec<RpcResponse> = dispatcher
                .dispatch_batch(items)
                .await
                .into_iter()
                .map(|outcome| {
                    CallOutcome {
                        id: outcome.id,
                        result: outcome.result.map(|v| unwrap_multireturn(v, skip)),
                    }
                    .into_response()
                })
                .collect();
            json_response(StatusCode::OK, &responses)
        }

        Routed::Dml { route, operation } => {
            let codec = route.config.format.as_ref().map(|template| {
                FormatCodec::new(
                    template,
                    state.router.allowed_spaces(),
                    state.router.limits().codec_limits(),
                )
            });
            let result = dispatcher.execute(&operation).await.map(|value| match codec {
                Some(codec) => encode_tuples(&codec, &operation, value),
                None => value,
            });
            single_response(route, CallOutcome { id: None, result }, ErrorScope::Rest)
        }
    }
}

/// Response for one call: `{id?, result}`, the bare result with
/// `pure_result`, or `{id?, error}` classified in `scope`.
fn single_response(route: &CompiledRoute, outcome: CallOutcome, scope: ErrorScope) -> Response {
    match outcome.result {
        Ok(value) => {
            let value = unwrap_multireturn(value, route.config.multireturn_skip_count);
            if route.config.pure_result {
                json_response(StatusCode::OK, &value)
            } else {
                json_response(StatusCode::OK, &RpcResponse::success(outcome.id, value))
            }
        }
        Err(e) => {
            debug!(
                route = %route.path(),
                error_type = e.error_type_name(),
                error = %e,
                "Call failed"
            );
            error_response(outcome.id, &e, scope)
        }
    }
}

/// Strip `skip` levels of single-element arrays.
fn unwrap_multireturn(mut value: Value, skip: usize) -> Value {
    for _ in 0..skip {
        match value {
            Value::Array(mut items) if items.len() == 1 => value = items.remove(0),
            other => return other,
        }
    }
    value
}

/// Normalize tuples returned by a DML operation to the route's template.
///
/// A list of arrays is a list of tuples; a flat array is one tuple; anything
/// else passes through.
fn encode_tuples(codec: &FormatCodec<'_>, operation: &Operation, value: Value) -> Value {
    match value {
        Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_array) => {
            Value::Array(
                items
                    .iter()
                    .filter_map(Value::as_array)
                    .map(|tuple| codec.encode(tuple))
                    .collect(),
            )
        }
        Value::Array(tuple) if !matches!(operation, Operation::Select { .. }) => codec.encode(&tuple),
        other => other,
    }
}

/// Error envelope, status chosen by `scope`.
fn error_response(id: Option<RpcId>, error: &GatewayError, scope: ErrorScope) -> Response {
    let info = error.classify(scope);
    if info.status.is_server_error() {
        error!(
            error_type = error.error_type_name(),
            status = info.status.as_u16(),
            error = %error,
            "Request failed"
        );
    }
    let body = RpcResponse::error(
        id,
        JsonRpcError {
            code: info.protocol_code,
            message: info.message,
        },
    );
    json_response(info.status, &body)
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_vec(body) {
        Ok(bytes) => (
            status,
            [(header::CONTENT_TYPE, "application/json")],
            Bytes::from(bytes),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to serialize response");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "application/json")],
                Bytes::from_static(
                    br#"{"error":{"code":-32603,"message":"Internal error: failed to serialize response"}}"#,
                ),
            )
                .into_response()
        }
    }
}

/// Add the route's `set_headers`. Names and values were validated at load.
fn apply_headers(headers: &mut HeaderMap, set_headers: &BTreeMap<String, String>) {
    for (name, value) in set_headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
}
