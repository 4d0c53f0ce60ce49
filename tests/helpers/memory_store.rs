//! In-memory store for integration testing.
//!
//! Implements `MethodInvoker` over a map of spaces. The first tuple field is
//! the primary key. Stored functions:
//!
//! - `echo` returns its arguments
//! - `sleep` waits `args[0]` milliseconds, then returns `true`
//! - `fail` returns an upstream error carrying `args[0]`
//! - `nested` returns `[[args]]`
//! - `headers` returns the `headers` of the request context in `args[0]`

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tntgate::codec::IteratorKind;
use tntgate::codec::update::apply_ops;
use tntgate::error::GatewayError;
use tntgate::transport::{MethodInvoker, Operation};

#[derive(Debug, Default)]
pub struct MemoryStore {
    spaces: Mutex<HashMap<u32, Vec<Vec<Value>>>>,
    calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of operations invoked so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn tuples(&self, space_id: u32) -> Vec<Vec<Value>> {
        self.spaces
            .lock()
            .unwrap()
            .get(&space_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn call(&self, method: &str, args: &[Value]) -> Result<Value, GatewayError> {
        match method {
            "echo" => Ok(Value::Array(args.to_vec())),
            "sleep" => {
                let ms = args.first().and_then(Value::as_u64).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!(true))
            }
            "fail" => Err(GatewayError::UpstreamError {
                message: args
                    .first()
                    .and_then(Value::as_str)
                    .unwrap_or("failed")
                    .to_string(),
            }),
            "nested" => Ok(json!([args])),
            "headers" => Ok(args
                .first()
                .and_then(|ctx| ctx.get("headers"))
                .cloned()
                .unwrap_or(Value::Null)),
            other => Err(GatewayError::MethodNotFound {
                method: other.to_string(),
            }),
        }
    }
}

fn primary_key(tuple: &[Value]) -> Option<&Value> {
    tuple.first()
}

#[async_trait::async_trait]
impl MethodInvoker for MemoryStore {
    async fn invoke(&self, operation: &Operation) -> Result<Value, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Operation::Call { method, args } = operation {
            return self.call(method, args).await;
        }

        let mut spaces = self.spaces.lock().unwrap();
        match operation {
            Operation::Insert { space_id, tuple } => {
                let space = spaces.entry(*space_id).or_default();
                if space.iter().any(|t| primary_key(t) == primary_key(tuple)) {
                    return Err(GatewayError::UpstreamError {
                        message: format!(
                            "Duplicate key exists in unique index 'primary' in space '{space_id}'"
                        ),
                    });
                }
                space.push(tuple.clone());
                Ok(json!([tuple]))
            }
            Operation::Replace { space_id, tuple } => {
                let space = spaces.entry(*space_id).or_default();
                space.retain(|t| primary_key(t) != primary_key(tuple));
                space.push(tuple.clone());
                Ok(json!([tuple]))
            }
            Operation::Select {
                space_id,
                key,
                iterator,
                limit,
                offset,
                ..
            } => {
                let space = spaces.get(space_id).cloned().unwrap_or_default();
                let found: Vec<Value> = space
                    .into_iter()
                    .filter(|t| *iterator == IteratorKind::All || key.is_empty() || primary_key(t) == key.first())
                    .skip(*offset as usize)
                    .take(*limit as usize)
                    .map(Value::Array)
                    .collect();
                Ok(Value::Array(found))
            }
            Operation::Update {
                space_id, key, ops, ..
            } => {
                let space = spaces.entry(*space_id).or_default();
                match space.iter_mut().find(|t| primary_key(t) == key.first()) {
                    Some(tuple) => {
                        apply_ops(tuple, ops)?;
                        Ok(json!([tuple.clone()]))
                    }
                    None => Ok(json!([])),
                }
            }
            Operation::Delete { space_id, key, .. } => {
                let space = spaces.entry(*space_id).or_default();
                match space.iter().position(|t| primary_key(t) == key.first()) {
                    Some(idx) => Ok(json!([space.remove(idx)])),
                    None => Ok(json!([])),
                }
            }
            Operation::Upsert {
                space_id,
                tuple,
                ops,
            } => {
                let space = spaces.entry(*space_id).or_default();
                match space.iter_mut().find(|t| primary_key(t) == primary_key(tuple)) {
                    Some(existing) => apply_ops(existing, ops)?,
                    None => space.push(tuple.clone()),
                }
                Ok(json!([]))
            }
            Operation::Call { .. } => unreachable!("handled above"),
        }
    }
}
