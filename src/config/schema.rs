//! Configuration schema types.
//!
//! ```yaml
//! schema: 1
//! listen: 0.0.0.0:8080
//!
//! limits:
//!   max_body_size: 1048576
//!   request_timeout: 30s
//!
//! allowed_spaces:
//!   - space_id: 512
//!     index_ids: [0, 1]
//!
//! upstream:
//!   url: http://127.0.0.1:8081/invoke
//!
//! routes:
//!   - path: /api
//!   - path: /insert
//!     kind: dml
//!     operation: insert
//!     format: "space_id=%space_id&id=%ku&name=%s"
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use http::Method;
use serde::{Deserialize, Serialize};

use super::defaults::GatewayDefaults;
use super::duration_format;
use super::error::ConfigError;
use crate::codec::format::FormatTemplate;
use crate::codec::{CodecLimits, SpaceAllowList};
use crate::transport::invoker::DmlKind;
use crate::transport::scanner::ScanLimits;
use crate::transport::upstream::UpstreamConfig;

/// Root configuration. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Schema version. Only `1` is supported.
    pub schema: u32,

    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    #[serde(default)]
    pub limits: Limits,

    /// Permitted `(space, index)` pairs for extended-format routes.
    #[serde(default)]
    pub allowed_spaces: SpaceAllowList,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Size, count and time ceilings.
///
/// Missing fields take [`GatewayDefaults::from_env`] values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Limits {
    pub max_body_size: usize,
    pub max_query_args: usize,
    pub max_template_fields: usize,
    pub max_query_length: usize,
    pub max_request_context_size: usize,
    pub max_batch_size: usize,
    pub batch_concurrency: usize,
    pub max_select_limit: u64,
    #[serde(with = "duration_format")]
    pub request_timeout: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        GatewayDefaults::from_env().into()
    }
}

impl From<GatewayDefaults> for Limits {
    fn from(d: GatewayDefaults) -> Self {
        Self {
            max_body_size: d.max_body_size,
            max_query_args: d.max_query_args,
            max_template_fields: d.max_template_fields,
            max_query_length: d.max_query_length,
            max_request_context_size: d.max_request_context_size,
            max_batch_size: d.max_batch_size,
            batch_concurrency: d.batch_concurrency,
            max_select_limit: d.max_select_limit,
            request_timeout: d.request_timeout,
        }
    }
}

impl From<&Limits> for GatewayDefaults {
    fn from(l: &Limits) -> Self {
        Self {
            max_body_size: l.max_body_size,
            max_query_args: l.max_query_args,
            max_template_fields: l.max_template_fields,
            max_query_length: l.max_query_length,
            max_request_context_size: l.max_request_context_size,
            max_batch_size: l.max_batch_size,
            batch_concurrency: l.batch_concurrency,
            max_select_limit: l.max_select_limit,
            request_timeout: l.request_timeout,
        }
    }
}

impl Limits {
    pub fn scan_limits(&self) -> ScanLimits {
        ScanLimits {
            max_body_size: self.max_body_size,
            max_batch_size: self.max_batch_size,
        }
    }

    pub fn codec_limits(&self) -> CodecLimits {
        CodecLimits {
            max_args: self.max_query_args,
            max_select_limit: self.max_select_limit,
        }
    }
}

/// What a route does with a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteKind {
    /// Stored-function calls, REST or JSON-RPC.
    #[default]
    Call,
    /// Extended-format DML against a space.
    Dml,
    /// Diagnostic route answering with a client-chosen status.
    Status,
}

/// Request context handed to the backend as the first argument.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PassRequest {
    /// Include the decoded query map as `args`.
    pub parse_args: bool,
    /// Include the raw body as `body`.
    pub pass_body: bool,
    /// Include a form body as a list of single-key objects.
    pub parse_urlencoded: bool,
    /// Include the route's `set_headers` in `headers`.
    pub pass_headers_out: bool,
}

/// One entry of the route table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    /// Path prefix. Matched on `/` boundaries; the longest match wins.
    pub path: String,

    #[serde(default)]
    pub kind: RouteKind,

    /// Fixed method name; whatever the client names is ignored.
    #[serde(default)]
    pub preset_method: Option<String>,

    /// Method names clients may call. Empty allows all.
    #[serde(default)]
    pub allowed_methods: Vec<String>,

    /// HTTP methods taking the method name from the path and args from the
    /// query string.
    #[serde(default)]
    pub rest_methods: Option<Vec<String>>,

    /// HTTP methods taking the call from a JSON-RPC body.
    #[serde(default)]
    pub rpc_methods: Option<Vec<String>>,

    /// DML operation (`kind: dml` only).
    #[serde(default)]
    pub operation: Option<DmlKind>,

    /// Extended-format template (`kind: dml` only).
    #[serde(default)]
    pub format: Option<FormatTemplate>,

    #[serde(default)]
    pub pass_request: Option<PassRequest>,

    /// Request headers copied into the request context. Empty copies all.
    #[serde(default)]
    pub headers: Vec<String>,

    /// Headers added to every successful response of this route.
    #[serde(default)]
    pub set_headers: BTreeMap<String, String>,

    /// Answer single calls with the bare result.
    #[serde(default)]
    pub pure_result: bool,

    /// Levels of single-element arrays stripped from backend results.
    #[serde(default)]
    pub multireturn_skip_count: usize,

    /// Query argument read by `kind: status` routes.
    #[serde(default = "default_status_arg")]
    pub status_arg: String,
}

fn default_status_arg() -> String {
    "code".to_string()
}

impl RouteConfig {
    /// A `kind: call` route at `path` with everything else defaulted.
    pub fn call(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: RouteKind::Call,
            preset_method: None,
            allowed_methods: Vec::new(),
            rest_methods: None,
            rpc_methods: None,
            operation: None,
            format: None,
            pass_request: None,
            headers: Vec::new(),
            set_headers: BTreeMap::new(),
            pure_result: false,
            multireturn_skip_count: 0,
            status_arg: default_status_arg(),
        }
    }

    /// Effective REST method set.
    pub fn rest_methods(&self) -> Result<Vec<Method>, ConfigError> {
        match &self.rest_methods {
            Some(names) => parse_methods(&self.path, names),
            None => Ok(match self.kind {
                RouteKind::Call => vec![Method::GET, Method::PUT],
                RouteKind::Dml | RouteKind::Status => vec![Method::GET],
            }),
        }
    }

    /// Effective JSON-RPC method set.
    pub fn rpc_methods(&self) -> Result<Vec<Method>, ConfigError> {
        match &self.rpc_methods {
            Some(names) => parse_methods(&self.path, names),
            None => Ok(match self.kind {
                RouteKind::Call => vec![Method::POST, Method::DELETE],
                RouteKind::Dml | RouteKind::Status => Vec::new(),
            }),
        }
    }
}

fn parse_methods(path: &str, names: &[String]) -> Result<Vec<Method>, ConfigError> {
    names
        .iter()
        .map(|name| {
            Method::from_bytes(name.to_ascii_uppercase().as_bytes()).map_err(|_| {
                ConfigError::InvalidHttpMethod {
                    path: path.to_string(),
                    method: name.clone(),
                }
            })
        })
        .collect()
}
