//! HTTP transport and request translation.
//!
//! # Traffic Flow
//!
//! ```text
//! ┌────────────┐  REST / JSON-RPC  ┌──────────────────────────────┐  Operation  ┌─────────┐
//! │   Client   │──────────────────▶│           tntgate            │────────────▶│  Store  │
//! │            │◀──────────────────│ scanner → router → dispatch  │◀────────────│ (bridge)│
//! └────────────┘       JSON        └──────────────────────────────┘    JSON     └─────────┘
//! ```
//!
//! - `scanner` - single-pass selective JSON scanner
//! - `jsonrpc` - envelope types and parsing
//! - `router` - route table, REST/RPC/DML classification
//! - `dispatcher` - ordered, isolated batch execution
//! - `invoker` - the store seam (`MethodInvoker`, `Operation`)
//! - `upstream` - HTTP bridge implementation of `MethodInvoker`
//! - `server` - axum wiring

pub mod dispatcher;
pub mod invoker;
pub mod jsonrpc;
pub mod router;
pub mod scanner;
pub mod server;
pub mod upstream;

pub use dispatcher::{BatchDispatcher, CallOutcome};
pub use invoker::{DmlKind, MethodInvoker, Operation};
pub use jsonrpc::{BatchItem, ParsedRequests, RpcId, RpcRequest, RpcResponse, parse_jsonrpc};
pub use router::{InboundRequest, RequestRouter, Routed};
pub use server::{GatewayState, build_router};
pub use upstream::{UpstreamClient, UpstreamConfig};
