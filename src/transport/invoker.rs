//! Backend invocation seam.
//!
//! The gateway never talks to the store directly. Every translated request is
//! an [`Operation`] handed to a [`MethodInvoker`]; the production
//! implementation is the HTTP bridge in `upstream`, tests plug in an
//! in-memory store.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::IteratorKind;
use crate::codec::update::UpdateOp;
use crate::error::GatewayError;

/// A typed operation against the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Call a stored function with positional arguments.
    Call { method: String, args: Vec<Value> },
    Insert {
        space_id: u32,
        tuple: Vec<Value>,
    },
    Replace {
        space_id: u32,
        tuple: Vec<Value>,
    },
    Select {
        space_id: u32,
        index_id: u32,
        key: Vec<Value>,
        iterator: IteratorKind,
        limit: u64,
        offset: u64,
    },
    Update {
        space_id: u32,
        index_id: u32,
        key: Vec<Value>,
        #[serde(serialize_with = "serialize_ops")]
        ops: Vec<UpdateOp>,
    },
    Delete {
        space_id: u32,
        index_id: u32,
        key: Vec<Value>,
    },
    Upsert {
        space_id: u32,
        tuple: Vec<Value>,
        #[serde(serialize_with = "serialize_ops")]
        ops: Vec<UpdateOp>,
    },
}

fn serialize_ops<S: serde::Serializer>(ops: &[UpdateOp], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(ops.iter().map(UpdateOp::to_wire))
}

impl Operation {
    /// Name used in logs and error messages.
    pub fn name(&self) -> &str {
        match self {
            Operation::Call { method, .. } => method,
            Operation::Insert { .. } => "insert",
            Operation::Replace { .. } => "replace",
            Operation::Select { .. } => "select",
            Operation::Update { .. } => "update",
            Operation::Delete { .. } => "delete",
            Operation::Upsert { .. } => "upsert",
        }
    }
}

/// Which DML operation a route performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DmlKind {
    Insert,
    Replace,
    Select,
    Update,
    Delete,
    Upsert,
}

/// Invokes operations against the store.
///
/// Implementations return the raw store result. Failures reported by the
/// store itself are `GatewayError::UpstreamError` (message passed through)
/// or `GatewayError::MethodNotFound` for unknown functions.
#[async_trait::async_trait]
pub trait MethodInvoker: Send + Sync {
    async fn invoke(&self, operation: &Operation) -> Result<Value, GatewayError>;
}
