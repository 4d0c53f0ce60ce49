//! Shared integration test helpers.

#![allow(dead_code)]

pub mod memory_store;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tntgate::config::{GatewayConfig, substitute_env_vars, validate};
use tntgate::transport::{GatewayState, build_router};
use tower::ServiceExt;

pub use memory_store::MemoryStore;

/// Route table used by most gateway tests.
pub const GATEWAY_YAML: &str = r#"
schema: 1
upstream:
  url: http://127.0.0.1:1/unused
limits:
  max_body_size: 4096
  max_query_length: 256
  max_query_args: 8
  max_batch_size: 32
  max_request_context_size: 2048
  request_timeout: 200ms
allowed_spaces:
  - space_id: 512
    index_ids: [0]
routes:
  - path: /api
    allowed_methods: [echo, fail, nested, sleep]
  - path: /echo
    preset_method: echo
  - path: /pure
    preset_method: nested
    pure_result: true
    multireturn_skip_count: 1
  - path: /raw
    preset_method: echo
    pass_request:
      parse_args: true
  - path: /ctx
    preset_method: headers
    pass_request:
      pass_headers_out: true
    headers: [x-trace]
    set_headers:
      X-Gateway: tntgate
  - path: /insert
    kind: dml
    operation: insert
    format: "space_id=%space_id&id=%ku&name=%s&active=%b"
  - path: /select
    kind: dml
    operation: select
    format: "space_id=%space_id&index_id=%index_id&iter=%iter&limit=%limit&offset=%offset&id=%ku"
  - path: /update
    kind: dml
    operation: update
    format: "space_id=%space_id&id=%ku&name=%os&active=%ob"
  - path: /delete
    kind: dml
    operation: delete
    format: "space_id=%space_id&id=%ku"
  - path: /status
    kind: status
"#;

pub fn config(yaml: &str) -> GatewayConfig {
    let contents = substitute_env_vars(yaml).expect("env substitution");
    let config: GatewayConfig = serde_saphyr::from_str(&contents).expect("valid yaml");
    validate(&config).expect("valid config");
    config
}

/// Gateway over `store` with the default route table.
pub fn gateway(store: Arc<MemoryStore>) -> Router {
    gateway_with(GATEWAY_YAML, store)
}

pub fn gateway_with(yaml: &str, store: Arc<MemoryStore>) -> Router {
    let state = GatewayState::new(&config(yaml), store).expect("state");
    build_router(Arc::new(state))
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.expect("response")
}

pub async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::get(uri).body(Body::empty()).expect("request");
    into_json(send(app, request).await).await
}

pub async fn post_json(app: &Router, uri: &str, body: &str) -> (StatusCode, Value) {
    let request = Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request");
    into_json(send(app, request).await).await
}

pub async fn post_form(app: &Router, uri: &str, body: &str) -> (StatusCode, Value) {
    let request = Request::post(uri)
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .expect("request");
    into_json(send(app, request).await).await
}

pub async fn into_json(response: Response<Body>) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let value = serde_json::from_slice(&bytes).expect("json body");
    (status, value)
}
