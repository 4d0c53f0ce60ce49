//! Request routing.
//!
//! Classifies an inbound HTTP request against the route table and assembles
//! what has to be invoked:
//!
//! | Route kind | HTTP method | Result |
//! |------------|-------------|--------|
//! | `call` | in `rpc_methods`, JSON body | [`Routed::Rpc`] (single or batch) |
//! | `call` | in `rest_methods`, or a form POST | [`Routed::Rest`] |
//! | `dml` | in `rest_methods` | [`Routed::Dml`] via the format codec |
//! | `status` | in `rest_methods` | [`Routed::Status`] |
//! | any | anything else | 405 |
//!
//! The path is percent-decoded exactly once before matching; the decoded
//! form is what the request context echoes back. Routes match by prefix on
//! `/` boundaries and the longest prefix wins.

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri, Version, header};
use serde_json::{Map, Value};
use tracing::debug;

use crate::codec::query::{self, QueryPairs};
use crate::codec::{DecodedRequest, FormatCodec, IteratorKind, SpaceAllowList};
use crate::config::{
    ConfigError, GatewayConfig, Limits, PassRequest, RouteConfig, RouteKind, normalize_route_path,
};
use crate::error::{ErrorScope, GatewayError};
use crate::transport::invoker::{DmlKind, Operation};
use crate::transport::jsonrpc::{BatchItem, ParsedRequests, RpcRequest, parse_jsonrpc};

/// Statuses a `kind: status` route may answer with.
pub const PASSTHROUGH_STATUSES: [u16; 24] = [
    200, 201, 202, 206, 400, 401, 403, 404, 405, 408, 409, 411, 412, 413, 414, 415, 416, 421, 500,
    501, 502, 503, 504, 507,
];

/// A buffered inbound request.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InboundRequest {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers,
            body,
        }
    }

    fn is_form(&self) -> bool {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| {
                ct.split(';')
                    .next()
                    .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/x-www-form-urlencoded"))
            })
    }

    fn body_text(&self) -> Result<&str, GatewayError> {
        std::str::from_utf8(&self.body)
            .map_err(|_| GatewayError::invalid_params("request body is not valid UTF-8"))
    }
}

/// A route with its method sets resolved.
#[derive(Debug, Clone)]
pub struct CompiledRoute {
    pub config: RouteConfig,
    prefix: String,
    rest_methods: Vec<Method>,
    rpc_methods: Vec<Method>,
}

impl CompiledRoute {
    fn compile(config: &RouteConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            prefix: normalize_route_path(&config.path).to_string(),
            rest_methods: config.rest_methods()?,
            rpc_methods: config.rpc_methods()?,
            config: config.clone(),
        })
    }

    fn matches(&self, path: &str) -> bool {
        self.prefix == "/"
            || path == self.prefix
            || path
                .strip_prefix(self.prefix.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Path below the route prefix, without the leading `/`.
    fn tail<'p>(&self, path: &'p str) -> &'p str {
        let rest = if self.prefix == "/" {
            path
        } else {
            path.get(self.prefix.len()..).unwrap_or("")
        };
        rest.trim_start_matches('/')
    }

    fn method_allowed(&self, method: &str) -> bool {
        self.config.allowed_methods.is_empty()
            || self.config.allowed_methods.iter().any(|m| m == method)
    }

    pub fn path(&self) -> &str {
        &self.config.path
    }
}

/// Routing outcome.
#[derive(Debug)]
pub enum Routed<'r> {
    /// JSON-RPC call(s). `batch` is false for a single object body.
    Rpc {
        route: &'r CompiledRoute,
        items: Vec<BatchItem>,
        batch: bool,
    },
    /// REST call: method from the path (or preset), args from the query.
    Rest {
        route: &'r CompiledRoute,
        request: RpcRequest,
    },
    /// Extended-format DML.
    Dml {
        route: &'r CompiledRoute,
        operation: Operation,
    },
    Status {
        route: &'r CompiledRoute,
        status: StatusCode,
    },
    /// Built-in `GET /healthz`.
    Health,
}

impl Routed<'_> {
    /// Scope errors from later stages are reported in.
    pub fn scope(&self) -> ErrorScope {
        match self {
            Routed::Rpc { batch: true, .. } => ErrorScope::BatchItem,
            Routed::Rpc { batch: false, .. } => ErrorScope::Rpc,
            _ => ErrorScope::Rest,
        }
    }

    pub fn route(&self) -> Option<&CompiledRoute> {
        match self {
            Routed::Rpc { route, .. }
            | Routed::Rest { route, .. }
            | Routed::Dml { route, .. }
            | Routed::Status { route, .. } => Some(route),
            Routed::Health => None,
        }
    }
}

/// Routing failure and the scope to report it in.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteFailure {
    pub error: GatewayError,
    pub scope: ErrorScope,
}

impl RouteFailure {
    fn rest(error: GatewayError) -> Self {
        Self {
            error,
            scope: ErrorScope::Rest,
        }
    }

    fn rpc(error: GatewayError) -> Self {
        Self {
            error,
            scope: ErrorScope::Rpc,
        }
    }
}

/// Immutable route table plus the limits and allow-list it enforces.
#[derive(Debug, Clone)]
pub struct RequestRouter {
    routes: Vec<CompiledRoute>,
    limits: Limits,
    allowed_spaces: SpaceAllowList,
}

impl RequestRouter {
    pub fn new(config: &GatewayConfig) -> Result<Self, ConfigError> {
        let mut routes = config
            .routes
            .iter()
            .map(CompiledRoute::compile)
            .collect::<Result<Vec<_>, _>>()?;
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));

        Ok(Self {
            routes,
            limits: config.limits.clone(),
            allowed_spaces: config.allowed_spaces.clone(),
        })
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn allowed_spaces(&self) -> &SpaceAllowList {
        &self.allowed_spaces
    }

    fn find(&self, path: &str) -> Option<&CompiledRoute> {
        self.routes.iter().find(|route| route.matches(path))
    }

    /// Classify `req` and build what to invoke.
    ///
    /// # Errors
    ///
    /// Every failure carries the scope it must be reported in: envelope
    /// failures of a JSON-RPC body are `Rpc`, everything else is `Rest`.
    /// Per-item failures inside a batch are not errors here; they come back
    /// as [`BatchItem::Invalid`].
    pub fn route<'r>(&'r self, req: &InboundRequest) -> Result<Routed<'r>, RouteFailure> {
        let path = query::decode_path(req.uri.path()).map_err(RouteFailure::rest)?;

        let Some(route) = self.find(&path) else {
            if path == "/healthz" && req.method == Method::GET {
                return Ok(Routed::Health);
            }
            return Err(RouteFailure::rest(GatewayError::RouteNotFound { path }));
        };

        let raw_query = req.uri.query().unwrap_or("");
        if raw_query.len() > self.limits.max_query_length {
            return Err(RouteFailure::rest(GatewayError::QueryTooLong {
                length: raw_query.len(),
                limit: self.limits.max_query_length,
            }));
        }

        debug!(
            route = %route.path(),
            method = %req.method,
            kind = ?route.config.kind,
            "Matched route"
        );

        match route.config.kind {
            RouteKind::Call => self.route_call(route, req, &path, raw_query),
            RouteKind::Dml => self
                .route_dml(route, req, raw_query)
                .map_err(RouteFailure::rest),
            RouteKind::Status => self
                .route_status(route, req, raw_query)
                .map_err(RouteFailure::rest),
        }
    }

    fn route_call<'r>(
        &self,
        route: &'r CompiledRoute,
        req: &InboundRequest,
        path: &str,
        raw_query: &str,
    ) -> Result<Routed<'r>, RouteFailure> {
        let is_rpc = route.rpc_methods.contains(&req.method);
        if is_rpc && !req.is_form() {
            return self.route_rpc(route, req, raw_query);
        }
        if is_rpc || route.rest_methods.contains(&req.method) {
            return self
                .route_rest(route, req, path, raw_query)
                .map_err(RouteFailure::rest);
        }
        Err(RouteFailure::rest(GatewayError::MethodNotAllowed {
            method: req.method.to_string(),
        }))
    }

    fn route_rest<'r>(
        &self,
        route: &'r CompiledRoute,
        req: &InboundRequest,
        path: &str,
        raw_query: &str,
    ) -> Result<Routed<'r>, GatewayError> {
        let method = match &route.config.preset_method {
            Some(preset) => preset.clone(),
            None => route
                .tail(path)
                .split('/')
                .next()
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .ok_or_else(|| GatewayError::invalid_request("missing method name in path"))?,
        };
        if !route.method_allowed(&method) {
            return Err(GatewayError::MethodNotFound { method });
        }

        let pairs = self.query_pairs(raw_query)?;
        let params = match route.config.pass_request {
            Some(pass) => {
                let mut params = vec![self.request_context(route, pass, req, Some(&pairs))?];
                // The context only carries the body when asked to.
                if !(pass.pass_body || pass.parse_urlencoded) {
                    let form = self.form_pairs(req)?;
                    params.extend(form.into_iter().map(|(_, value)| Value::String(value)));
                }
                params
            }
            None => pairs
                .into_iter()
                .chain(self.form_pairs(req)?)
                .map(|(_, value)| Value::String(value))
                .collect(),
        };

        Ok(Routed::Rest {
            route,
            request: RpcRequest::new(None, method, params),
        })
    }

    fn route_rpc<'r>(
        &self,
        route: &'r CompiledRoute,
        req: &InboundRequest,
        raw_query: &str,
    ) -> Result<Routed<'r>, RouteFailure> {
        let parsed = parse_jsonrpc(
            &req.body,
            &self.limits.scan_limits(),
            route.config.preset_method.as_deref(),
        )
        .map_err(RouteFailure::rpc)?;

        let context = match route.config.pass_request {
            Some(pass) => {
                let pairs = if pass.parse_args {
                    Some(self.query_pairs(raw_query).map_err(RouteFailure::rpc)?)
                } else {
                    None
                };
                Some(
                    self.request_context(route, pass, req, pairs.as_ref())
                        .map_err(RouteFailure::rpc)?,
                )
            }
            None => None,
        };

        let prepare = |mut request: RpcRequest| {
            if !route.method_allowed(&request.method) {
                return BatchItem::Invalid {
                    id: request.id,
                    error: GatewayError::MethodNotFound {
                        method: request.method,
                    },
                };
            }
            if let Some(ctx) = &context {
                request.params.insert(0, ctx.clone());
            }
            BatchItem::Valid(request)
        };

        let (items, batch) = match parsed {
            ParsedRequests::Single(request) => (vec![prepare(request)], false),
            ParsedRequests::Batch(items) => (
                items
                    .into_iter()
                    .map(|item| match item {
                        BatchItem::Valid(request) => prepare(request),
                        invalid => invalid,
                    })
                    .collect(),
                true,
            ),
        };

        Ok(Routed::Rpc {
            route,
            items,
            batch,
        })
    }

    fn route_dml<'r>(
        &self,
        route: &'r CompiledRoute,
        req: &InboundRequest,
        raw_query: &str,
    ) -> Result<Routed<'r>, GatewayError> {
        self.ensure_rest_method(route, &req.method)?;

        let (Some(kind), Some(template)) = (route.config.operation, route.config.format.as_ref())
        else {
            return Err(GatewayError::Internal {
                details: format!("route '{}' has no DML operation", route.path()),
            });
        };

        let mut pairs = self.query_pairs(raw_query)?;
        pairs.extend(self.form_pairs(req)?);

        let codec = FormatCodec::new(
            template,
            &self.allowed_spaces,
            self.limits.codec_limits(),
        );
        let decoded = codec.decode(&pairs)?;

        Ok(Routed::Dml {
            route,
            operation: self.dml_operation(kind, decoded)?,
        })
    }

    fn dml_operation(&self, kind: DmlKind, decoded: DecodedRequest) -> Result<Operation, GatewayError> {
        let space_id = decoded
            .space_id
            .ok_or_else(|| GatewayError::invalid_params("missing space id"))?;
        let index_id = decoded.index_id.unwrap_or(0);

        Ok(match kind {
            DmlKind::Insert => Operation::Insert {
                space_id,
                tuple: decoded.tuple,
            },
            DmlKind::Replace => Operation::Replace {
                space_id,
                tuple: decoded.tuple,
            },
            DmlKind::Select => Operation::Select {
                space_id,
                index_id,
                key: decoded.key,
                iterator: decoded.iterator.unwrap_or(IteratorKind::Eq),
                limit: decoded.limit.unwrap_or(self.limits.max_select_limit),
                offset: decoded.offset.unwrap_or(0),
            },
            DmlKind::Update => {
                if decoded.ops.is_empty() {
                    return Err(GatewayError::invalid_params(
                        "update needs at least one update field",
                    ));
                }
                Operation::Update {
                    space_id,
                    index_id,
                    key: decoded.key,
                    ops: decoded.ops,
                }
            }
            DmlKind::Delete => Operation::Delete {
                space_id,
                index_id,
                key: decoded.key,
            },
            DmlKind::Upsert => Operation::Upsert {
                space_id,
                tuple: decoded.tuple,
                ops: decoded.ops,
            },
        })
    }

    fn route_status<'r>(
        &self,
        route: &'r CompiledRoute,
        req: &InboundRequest,
        raw_query: &str,
    ) -> Result<Routed<'r>, GatewayError> {
        self.ensure_rest_method(route, &req.method)?;

        let arg = &route.config.status_arg;
        let pairs = self.query_pairs(raw_query)?;
        let raw = pairs
            .iter()
            .find(|(key, _)| key == arg)
            .map(|(_, value)| value.as_str())
            .ok_or_else(|| GatewayError::invalid_params(format!("missing '{arg}'")))?;

        let code: u16 = raw
            .parse()
            .map_err(|_| GatewayError::invalid_params(format!("'{raw}' is not a status code")))?;
        if !PASSTHROUGH_STATUSES.contains(&code) {
            return Err(GatewayError::invalid_params(format!(
                "status {code} cannot be passed through"
            )));
        }
        let status = StatusCode::from_u16(code)
            .map_err(|_| GatewayError::invalid_params(format!("'{raw}' is not a status code")))?;

        Ok(Routed::Status { route, status })
    }

    fn ensure_rest_method(&self, route: &CompiledRoute, method: &Method) -> Result<(), GatewayError> {
        if route.rest_methods.contains(method) {
            Ok(())
        } else {
            Err(GatewayError::MethodNotAllowed {
                method: method.to_string(),
            })
        }
    }

    /// Decode the query string, counting arguments before decoding them.
    fn query_pairs(&self, raw_query: &str) -> Result<QueryPairs, GatewayError> {
        let count = query::count_pairs(raw_query);
        if count > self.limits.max_query_args {
            return Err(GatewayError::TooManyArgs {
                count,
                limit: self.limits.max_query_args,
            });
        }
        query::parse_pairs(raw_query)
    }

    /// Decode a form-urlencoded body. Other bodies yield no pairs.
    fn form_pairs(&self, req: &InboundRequest) -> Result<QueryPairs, GatewayError> {
        if !req.is_form() || req.body.is_empty() {
            return Ok(Vec::new());
        }
        self.query_pairs(req.body_text()?)
    }

    /// Build the request context object passed as the first argument.
    fn request_context(
        &self,
        route: &CompiledRoute,
        pass: PassRequest,
        req: &InboundRequest,
        args: Option<&QueryPairs>,
    ) -> Result<Value, GatewayError> {
        let mut ctx = Map::new();
        ctx.insert("proto".into(), Value::from(format!("{:?}", req.version)));
        ctx.insert("method".into(), Value::from(req.method.as_str()));

        let target = req
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| req.uri.path());
        ctx.insert("uri".into(), Value::String(query::decode_path(target)?));

        if let Some(pairs) = args {
            ctx.insert("args".into(), query::pairs_to_object(pairs));
        }

        let allow = &route.config.headers;
        let mut headers = Map::new();
        for (name, value) in &req.headers {
            if allow.is_empty() || allow.iter().any(|h| h.eq_ignore_ascii_case(name.as_str())) {
                headers.insert(
                    name.as_str().to_string(),
                    Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
                );
            }
        }
        if pass.pass_headers_out {
            for (name, value) in &route.config.set_headers {
                headers.insert(name.to_ascii_lowercase(), Value::String(value.clone()));
            }
        }
        ctx.insert("headers".into(), Value::Object(headers));

        if (pass.pass_body || pass.parse_urlencoded) && !req.body.is_empty() {
            if req.body.len() > self.limits.max_request_context_size {
                return Err(GatewayError::RequestContextTooLarge {
                    size: req.body.len(),
                    limit: self.limits.max_request_context_size,
                });
            }
            let text = req.body_text()?;
            let body = if pass.parse_urlencoded && req.is_form() {
                query::pairs_to_list(&query::parse_pairs(text)?)
            } else {
                Value::String(text.to_string())
            };
            ctx.insert("body".into(), body);
        }

        Ok(Value::Object(ctx))
    }
}
