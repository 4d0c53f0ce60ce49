//! Batch dispatch.
//!
//! Executes translated calls against a [`MethodInvoker`] and collects one
//! outcome per input position.
//!
//! # Design Note: Batch Ordering
//!
//! Items run concurrently, at most `concurrency` in flight, via
//! `buffered`. Unlike `buffer_unordered`, `buffered` yields results in
//! input order, so outcome `i` always answers item `i` whatever the ids
//! look like. The whole batch is collected before the caller serializes
//! anything; nothing is flushed mid-batch.

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::transport::invoker::{MethodInvoker, Operation};
use crate::transport::jsonrpc::{BatchItem, RpcId, RpcRequest, RpcResponse};

/// Result of one call, still carrying the typed error.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    pub id: Option<RpcId>,
    pub result: Result<Value, GatewayError>,
}

impl CallOutcome {
    /// Render as a batch element.
    pub fn into_response(self) -> RpcResponse {
        match self.result {
            Ok(value) => RpcResponse::success(self.id, value),
            Err(error) => RpcResponse::error(self.id, error.to_jsonrpc_error()),
        }
    }
}

/// Runs calls against the store.
#[derive(Clone)]
pub struct BatchDispatcher {
    invoker: Arc<dyn MethodInvoker>,
    concurrency: usize,
}

impl BatchDispatcher {
    pub fn new(invoker: Arc<dyn MethodInvoker>, concurrency: usize) -> Self {
        Self {
            invoker,
            concurrency: concurrency.max(1),
        }
    }

    /// Run one store operation.
    pub async fn execute(&self, operation: &Operation) -> Result<Value, GatewayError> {
        self.invoker.invoke(operation).await
    }

    /// Call one stored function.
    pub async fn dispatch_one(&self, request: RpcRequest) -> CallOutcome {
        let correlation_id = request.correlation_id;
        let id = request.id;
        let operation = Operation::Call {
            method: request.method,
            args: request.params,
        };

        let result = self.invoker.invoke(&operation).await;
        if let Err(e) = &result {
            debug!(
                correlation_id = %correlation_id,
                method = %operation.name(),
                error_type = e.error_type_name(),
                error = %e,
                "Call failed"
            );
        }
        CallOutcome { id, result }
    }

    /// Run every item and return outcomes in input order.
    ///
    /// Invalid items are answered without touching the store. A failing
    /// item never affects its siblings.
    pub async fn dispatch_batch(&self, items: Vec<BatchItem>) -> Vec<CallOutcome> {
        let batch_size = items.len();

        let outcomes: Vec<CallOutcome> = stream::iter(items)
            .map(|item| async move {
                match item {
                    BatchItem::Invalid { id, error } => CallOutcome {
                        id,
                        result: Err(error),
                    },
                    BatchItem::Valid(request) => self.dispatch_one(request).await,
                }
            })
            .buffered(self.concurrency.min(batch_size.max(1)))
            .collect()
            .await;

        let error_count = outcomes.iter().filter(|o| o.result.is_err()).count();
        if error_count > 0 {
            warn!(batch_size, error_count, "Batch completed with failed items");
        } else {
            debug!(batch_size, "Batch completed");
        }

        outcomes
    }
}
