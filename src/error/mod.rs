//! Error handling for the gateway.
//!
//! Every failure on the request path is a [`GatewayError`]. Each variant maps
//! to exactly one [`FailureReason`], and the reason is looked up in a static
//! table ([`ERROR_TABLE`]) that yields the HTTP status and protocol code.
//! The final status also depends on where the failure is reported
//! ([`ErrorScope`]): a bare REST call, a single JSON-RPC request, or one
//! item of a batch.
//!
//! ## Module Organization
//!
//! - `jsonrpc` - error body structures
//! - `GatewayError` - request-path error type
//! - `ErrorInfo` / `classify` - the error classifier

pub mod jsonrpc;

use http::StatusCode;
use jsonrpc::{ErrorBody, JsonRpcError};
use thiserror::Error;

/// Standard and gateway-specific protocol error codes.
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const REQUEST_TOO_LARGE: i32 = -32001;
    pub const UNKNOWN_PARSE_ERROR: i32 = -32002;
    pub const UPSTREAM_ERROR: i32 = -32800;
}

/// All errors that can occur while handling one HTTP request.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GatewayError {
    /// The body is not well-formed JSON (truncated, unterminated string,
    /// trailing garbage, empty).
    #[error("Parse error: {details}")]
    ParseError { details: String },

    /// The body exceeds the configured ceiling. Detected before scanning.
    #[error("Request too large, consider increasing the 'limits.max_body_size' setting")]
    RequestTooLarge { size: usize, limit: usize },

    /// The request context handed to the backend would exceed its ceiling.
    #[error(
        "Request too large, consider increasing the 'limits.max_request_context_size' setting"
    )]
    RequestContextTooLarge { size: usize, limit: usize },

    /// Query string longer than the transport-layer limit.
    #[error("Request-URI too long: {length} bytes exceeds {limit}")]
    QueryTooLong { length: usize, limit: usize },

    /// Too many query/form arguments for the codec layer.
    #[error("Too many arguments: {count} exceeds {limit}")]
    TooManyArgs { count: usize, limit: usize },

    /// The envelope is JSON but not a valid request (empty batch, scalar,
    /// missing method, params of the wrong type, batch above the ceiling).
    #[error("Invalid request: {details}")]
    InvalidRequest { details: String },

    /// The method name is unknown or not allowed on the route.
    #[error("Method not found: '{method}'")]
    MethodNotFound { method: String },

    /// No route matches the request path.
    #[error("No route for path '{path}'")]
    RouteNotFound { path: String },

    /// The HTTP method is not accepted by the matched route.
    #[error("HTTP method {method} is not allowed on this route")]
    MethodNotAllowed { method: String },

    /// Field, type, index or update-instruction validation failed.
    #[error("Invalid params: {details}")]
    InvalidParams { details: String },

    /// The backend reported a failure. The message is passed through.
    #[error("{message}")]
    UpstreamError { message: String },

    /// The request deadline elapsed before the backend answered.
    #[error("Upstream did not respond within {timeout_ms} ms")]
    UpstreamTimeout { timeout_ms: u64 },

    /// The backend answered with something the gateway cannot decode.
    #[error("Unknown parse error: {details}")]
    MalformedUpstreamResponse { details: String },

    /// Anything else.
    #[error("Internal error: {details}")]
    Internal { details: String },
}

/// Failure reasons, one per row of [`ERROR_TABLE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    MalformedJson = 0,
    BodyTooLarge,
    ContextTooLarge,
    QueryTooLong,
    TooManyArgs,
    InvalidRequest,
    UnknownMethod,
    UnknownRoute,
    MethodNotAllowed,
    InvalidParams,
    UpstreamFailure,
    UpstreamTimeout,
    MalformedUpstreamResponse,
    Internal,
}

/// Where an error is being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// REST-style call or extended-format DML route.
    Rest,
    /// A single JSON-RPC request.
    Rpc,
    /// One item inside a JSON-RPC batch. Always HTTP 200 overall.
    BatchItem,
}

/// One row of the classifier table.
#[derive(Debug, Clone, Copy)]
pub struct ErrorEntry {
    pub reason: FailureReason,
    /// Status for a bare REST response.
    pub status: StatusCode,
    /// Protocol code; `None` means the body carries the HTTP status number.
    pub code: Option<i32>,
    /// Whether a single JSON-RPC response reports this with HTTP 200.
    pub embedded_in_rpc: bool,
}

const fn entry(
    reason: FailureReason,
    status: StatusCode,
    code: Option<i32>,
    embedded_in_rpc: bool,
) -> ErrorEntry {
    ErrorEntry {
        reason,
        status,
        code,
        embedded_in_rpc,
    }
}

/// Static classifier table, indexed by `FailureReason as usize`.
pub const ERROR_TABLE: [ErrorEntry; 14] = [
    entry(FailureReason::MalformedJson, StatusCode::BAD_REQUEST, Some(codes::PARSE_ERROR), false),
    entry(FailureReason::BodyTooLarge, StatusCode::BAD_REQUEST, Some(codes::REQUEST_TOO_LARGE), false),
    entry(
        FailureReason::ContextTooLarge,
        StatusCode::INTERNAL_SERVER_ERROR,
        Some(codes::REQUEST_TOO_LARGE),
        false,
    ),
    entry(FailureReason::QueryTooLong, StatusCode::URI_TOO_LONG, None, false),
    entry(FailureReason::TooManyArgs, StatusCode::INTERNAL_SERVER_ERROR, None, false),
    entry(FailureReason::InvalidRequest, StatusCode::BAD_REQUEST, Some(codes::INVALID_REQUEST), false),
    entry(FailureReason::UnknownMethod, StatusCode::NOT_FOUND, Some(codes::METHOD_NOT_FOUND), true),
    entry(FailureReason::UnknownRoute, StatusCode::NOT_FOUND, Some(codes::METHOD_NOT_FOUND), false),
    entry(FailureReason::MethodNotAllowed, StatusCode::METHOD_NOT_ALLOWED, None, false),
    entry(FailureReason::InvalidParams, StatusCode::BAD_REQUEST, Some(codes::INVALID_PARAMS), false),
    entry(FailureReason::UpstreamFailure, StatusCode::OK, Some(codes::UPSTREAM_ERROR), true),
    entry(FailureReason::UpstreamTimeout, StatusCode::GATEWAY_TIMEOUT, Some(codes::UPSTREAM_ERROR), false),
    entry(
        FailureReason::MalformedUpstreamResponse,
        StatusCode::BAD_GATEWAY,
        Some(codes::UNKNOWN_PARSE_ERROR),
        false,
    ),
    entry(FailureReason::Internal, StatusCode::INTERNAL_SERVER_ERROR, Some(codes::INTERNAL_ERROR), false),
];

impl FailureReason {
    #[inline]
    pub fn entry(self) -> &'static ErrorEntry {
        &ERROR_TABLE[self as usize]
    }
}

/// Classified error: what the client sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub status: StatusCode,
    pub protocol_code: i32,
    pub message: String,
}

impl ErrorInfo {
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        JsonRpcError {
            code: self.protocol_code,
            message: self.message.clone(),
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody::new(self.protocol_code, self.message.clone())
    }
}

impl GatewayError {
    /// The failure reason this error belongs to.
    pub fn reason(&self) -> FailureReason {
        match self {
            GatewayError::ParseError { .. } => FailureReason::MalformedJson,
            GatewayError::RequestTooLarge { .. } => FailureReason::BodyTooLarge,
            GatewayError::RequestContextTooLarge { .. } => FailureReason::ContextTooLarge,
            GatewayError::QueryTooLong { .. } => FailureReason::QueryTooLong,
            GatewayError::TooManyArgs { .. } => FailureReason::TooManyArgs,
            GatewayError::InvalidRequest { .. } => FailureReason::InvalidRequest,
            GatewayError::MethodNotFound { .. } => FailureReason::UnknownMethod,
            GatewayError::RouteNotFound { .. } => FailureReason::UnknownRoute,
            GatewayError::MethodNotAllowed { .. } => FailureReason::MethodNotAllowed,
            GatewayError::InvalidParams { .. } => FailureReason::InvalidParams,
            GatewayError::UpstreamError { .. } => FailureReason::UpstreamFailure,
            GatewayError::UpstreamTimeout { .. } => FailureReason::UpstreamTimeout,
            GatewayError::MalformedUpstreamResponse { .. } => {
                FailureReason::MalformedUpstreamResponse
            }
            GatewayError::Internal { .. } => FailureReason::Internal,
        }
    }

    /// Classify this error for the given reporting scope.
    pub fn classify(&self, scope: ErrorScope) -> ErrorInfo {
        let entry = self.reason().entry();
        let status = match scope {
            ErrorScope::BatchItem => StatusCode::OK,
            ErrorScope::Rpc if entry.embedded_in_rpc => StatusCode::OK,
            ErrorScope::Rpc | ErrorScope::Rest => entry.status,
        };
        ErrorInfo {
            status,
            protocol_code: entry.code.unwrap_or(i32::from(entry.status.as_u16())),
            message: self.to_string(),
        }
    }

    /// Error object for embedding in a JSON-RPC response.
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        self.classify(ErrorScope::BatchItem).to_jsonrpc_error()
    }

    /// Short machine-readable name, used as a log field.
    pub fn error_type_name(&self) -> &'static str {
        match self.reason() {
            FailureReason::MalformedJson => "parse_error",
            FailureReason::BodyTooLarge => "request_too_large",
            FailureReason::ContextTooLarge => "request_context_too_large",
            FailureReason::QueryTooLong => "query_too_long",
            FailureReason::TooManyArgs => "too_many_args",
            FailureReason::InvalidRequest => "invalid_request",
            FailureReason::UnknownMethod => "method_not_found",
            FailureReason::UnknownRoute => "route_not_found",
            FailureReason::MethodNotAllowed => "method_not_allowed",
            FailureReason::InvalidParams => "invalid_params",
            FailureReason::UpstreamFailure => "upstream_error",
            FailureReason::UpstreamTimeout => "upstream_timeout",
            FailureReason::MalformedUpstreamResponse => "malformed_upstream_response",
            FailureReason::Internal => "internal_error",
        }
    }

    /// Shorthand for `InvalidParams`.
    pub fn invalid_params(details: impl Into<String>) -> Self {
        GatewayError::InvalidParams {
            details: details.into(),
        }
    }

    /// Shorthand for `InvalidRequest`.
    pub fn invalid_request(details: impl Into<String>) -> Self {
        GatewayError::InvalidRequest {
            details: details.into(),
        }
    }
}
