//! tntgate - HTTP gateway in front of a binary-protocol data store.
//!
//! Accepts REST-style and JSON-RPC requests, translates them into typed store
//! operations (call, insert, replace, select, update, delete, upsert) and
//! answers with JSON.
//!
//! - `transport` - scanner, envelope parsing, routing, dispatch, axum wiring
//! - `codec` - query/form decoding, field-format templates, update operations
//! - `error` - the request-path error type and its classifier table
//! - `config` - YAML configuration, defaults and validation
//! - `logging_layer` - request tracing

pub mod codec;
pub mod config;
pub mod error;
pub mod logging_layer;
pub mod transport;
