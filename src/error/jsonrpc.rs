//! Wire structures for error bodies.
//!
//! Every user-visible failure is rendered as
//! `{"error": {"code": <int>, "message": <string>}}`; JSON-RPC responses embed
//! the same `JsonRpcError` object next to the echoed `id`.

use serde::{Deserialize, Serialize};

/// Error object carried in responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Protocol error code (JSON-RPC range or gateway-specific).
    pub code: i32,

    /// Human-readable error message.
    pub message: String,
}

/// Top-level error envelope used outside of JSON-RPC item context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: JsonRpcError,
}

impl ErrorBody {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            error: JsonRpcError {
                code,
                message: message.into(),
            },
        }
    }
}
