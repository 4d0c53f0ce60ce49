//! Request tracing for the HTTP front end.
//!
//! `tower_http::trace::TraceLayer` with callbacks that open one span per
//! request (carrying a request id) and dump headers at DEBUG with
//! credentials redacted.

use std::fmt;
use std::time::Duration;

use http::{HeaderMap, Request, Response};
use tower_http::classify::{ServerErrorsAsFailures, ServerErrorsFailureClass, SharedClassifier};
use tower_http::trace::{
    DefaultOnBodyChunk, DefaultOnEos, MakeSpan, OnFailure, OnRequest, OnResponse, TraceLayer,
};
use tracing::{Span, debug, info, warn};

use crate::transport::jsonrpc::fast_correlation_id;

/// Header names never written to logs.
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "proxy-authorization",
    "set-cookie",
    "x-api-key",
    "x-auth-token",
];

const MAX_HEADERS_TO_LOG: usize = 50;
const MAX_VALUE_LEN: usize = 256;

pub type GatewayTraceLayer = TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    RequestIdSpan,
    LogRequest,
    LogResponse,
    DefaultOnBodyChunk,
    DefaultOnEos,
    LogFailure,
>;

pub fn logging_layer() -> GatewayTraceLayer {
    TraceLayer::new_for_http()
        .make_span_with(RequestIdSpan)
        .on_request(LogRequest)
        .on_response(LogResponse)
        .on_failure(LogFailure)
}

/// Opens the `request` span. Uses `x-request-id` when the client sent one.
#[derive(Clone, Debug)]
pub struct RequestIdSpan;

impl<B> MakeSpan<B> for RequestIdSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let request_id = request
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .unwrap_or_else(|| fast_correlation_id().to_string());

        tracing::info_span!(
            "request",
            method = %request.method(),
            path = %request.uri().path(),
            request_id = %request_id,
        )
    }
}

#[derive(Clone, Debug)]
pub struct LogRequest;

impl<B> OnRequest<B> for LogRequest {
    fn on_request(&mut self, request: &Request<B>, _span: &Span) {
        debug!(
            query_len = request.uri().query().map_or(0, str::len),
            version = ?request.version(),
            headers = ?Redacted(request.headers()),
            "Request received"
        );
    }
}

#[derive(Clone, Debug)]
pub struct LogResponse;

impl<B> OnResponse<B> for LogResponse {
    fn on_response(self, response: &Response<B>, latency: Duration, _span: &Span) {
        info!(
            status = response.status().as_u16(),
            latency_ms = latency.as_millis(),
            "Response sent"
        );
    }
}

#[derive(Clone, Debug)]
pub struct LogFailure;

impl OnFailure<ServerErrorsFailureClass> for LogFailure {
    fn on_failure(&mut self, failure: ServerErrorsFailureClass, latency: Duration, _span: &Span) {
        warn!(
            classification = %failure,
            latency_ms = latency.as_millis(),
            "Request failed"
        );
    }
}

/// Debug view of a header map with credentials masked and long values cut.
pub struct Redacted<'a>(pub &'a HeaderMap);

impl fmt::Debug for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (idx, (name, value)) in self.0.iter().enumerate() {
            if idx >= MAX_HEADERS_TO_LOG {
                map.entry(&"...", &format!("({} more)", self.0.len() - idx));
                break;
            }
            let name = name.as_str();
            if SENSITIVE_HEADERS
                .iter()
                .any(|sensitive| name.eq_ignore_ascii_case(sensitive))
            {
                map.entry(&name, &"[REDACTED]");
                continue;
            }
            match value.to_str() {
                Ok(text) if text.len() <= MAX_VALUE_LEN => map.entry(&name, &text),
                Ok(text) => {
                    let mut cut = MAX_VALUE_LEN;
                    while !text.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    map.entry(&name, &format!("{}... ({} bytes)", &text[..cut], text.len()))
                }
                Err(_) => map.entry(&name, &format!("<binary: {} bytes>", value.len())),
            };
        }
        map.finish()
    }
}
