//! Typed tuple codec for extended-format DML routes.
//!
//! `FormatCodec` turns untyped key/value pairs (query string or form body)
//! into a typed request against a route's [`FormatTemplate`]. Fields are
//! matched by name, so the order in which the client sends them never matters.
//!
//! Decoding runs in three stages and stops at the first failure:
//!
//! 1. argument count against the codec-layer limit;
//! 2. identifying fields (`%space_id`, `%index_id`) against the allow-list;
//! 3. select controls, then the schema fields, each coerced to its type.

pub mod format;
pub mod query;
pub mod update;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::error::GatewayError;
use format::{FieldRole, FieldSpec, FieldType, FormatTemplate};
use update::UpdateOp;

/// Codec-layer limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecLimits {
    /// Maximum number of input pairs.
    pub max_args: usize,
    /// Maximum `%limit` a select may ask for.
    pub max_select_limit: u64,
}

/// One permitted space and the indexes usable on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AllowedSpace {
    pub space_id: u32,
    /// Permitted index ids. Empty allows every index.
    #[serde(default)]
    pub index_ids: Vec<u32>,
}

/// Table of permitted `(space, index)` pairs. An empty table permits all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpaceAllowList(pub Vec<AllowedSpace>);

impl SpaceAllowList {
    pub fn permits(&self, space_id: u32, index_id: u32) -> bool {
        self.0.is_empty()
            || self.0.iter().any(|entry| {
                entry.space_id == space_id
                    && (entry.index_ids.is_empty() || entry.index_ids.contains(&index_id))
            })
    }
}

/// Select iterator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IteratorKind {
    Eq,
    Req,
    All,
    Lt,
    Le,
    Ge,
    Gt,
    BitsAllSet,
    BitsAnySet,
    BitsAllNotSet,
    Overlaps,
    Neighbor,
}

impl FromStr for IteratorKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "eq" => IteratorKind::Eq,
            "req" => IteratorKind::Req,
            "all" => IteratorKind::All,
            "lt" => IteratorKind::Lt,
            "le" => IteratorKind::Le,
            "ge" => IteratorKind::Ge,
            "gt" => IteratorKind::Gt,
            "bits_all_set" => IteratorKind::BitsAllSet,
            "bits_any_set" => IteratorKind::BitsAnySet,
            "bits_all_not_set" => IteratorKind::BitsAllNotSet,
            "overlaps" => IteratorKind::Overlaps,
            "neighbor" => IteratorKind::Neighbor,
            _ => {
                return Err(GatewayError::invalid_params(format!("unknown iterator '{s}'")));
            }
        })
    }
}

/// Result of decoding one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedRequest {
    pub space_id: Option<u32>,
    pub index_id: Option<u32>,
    pub iterator: Option<IteratorKind>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Key fields, in schema order.
    pub key: Vec<Value>,
    /// Value and key fields, in schema order.
    pub tuple: Vec<Value>,
    /// Update instructions from update fields, in schema order.
    pub ops: Vec<UpdateOp>,
}

/// Decoder/encoder bound to one route's template.
#[derive(Debug, Clone, Copy)]
pub struct FormatCodec<'a> {
    template: &'a FormatTemplate,
    allowed: &'a SpaceAllowList,
    limits: CodecLimits,
}

impl<'a> FormatCodec<'a> {
    pub fn new(
        template: &'a FormatTemplate,
        allowed: &'a SpaceAllowList,
        limits: CodecLimits,
    ) -> Self {
        Self {
            template,
            allowed,
            limits,
        }
    }

    pub fn decode(&self, pairs: &[(String, String)]) -> Result<DecodedRequest, GatewayError> {
        if pairs.len() > self.limits.max_args {
            return Err(GatewayError::TooManyArgs {
                count: pairs.len(),
                limit: self.limits.max_args,
            });
        }

        let mut decoded = DecodedRequest::default();

        decoded.space_id = self.identifier(FieldRole::SpaceId, pairs)?;
        decoded.index_id = self.identifier(FieldRole::IndexId, pairs)?;
        if let Some(space_id) = decoded.space_id {
            let index_id = decoded.index_id.unwrap_or(0);
            if !self.allowed.permits(space_id, index_id) {
                return Err(GatewayError::invalid_params(format!(
                    "space {space_id} index {index_id} is not allowed"
                )));
            }
        }

        if let Some(field) = self.template.field_with_role(FieldRole::Iterator) {
            decoded.iterator = Some(required(field, pairs)?.parse()?);
        }
        if let Some(field) = self.template.field_with_role(FieldRole::Limit) {
            let limit = unsigned(field, required(field, pairs)?)?;
            if limit > self.limits.max_select_limit {
                return Err(GatewayError::invalid_params(format!(
                    "limit {limit} exceeds the maximum of {}",
                    self.limits.max_select_limit
                )));
            }
            decoded.limit = Some(limit);
        }
        if let Some(field) = self.template.field_with_role(FieldRole::Offset) {
            decoded.offset = Some(unsigned(field, required(field, pairs)?)?);
        }

        for field in self.template.schema() {
            match field.role {
                FieldRole::Update => {
                    if let Some(token) = lookup(pairs, &field.name) {
                        decoded.ops.push(UpdateOp::parse(token, self.template)?);
                    }
                }
                FieldRole::Key => {
                    let value = coerce(field, required(field, pairs)?)?;
                    decoded.key.push(value.clone());
                    decoded.tuple.push(value);
                }
                _ => decoded.tuple.push(coerce(field, required(field, pairs)?)?),
            }
        }

        Ok(decoded)
    }

    fn identifier(
        &self,
        role: FieldRole,
        pairs: &[(String, String)],
    ) -> Result<Option<u32>, GatewayError> {
        let Some(field) = self.template.field_with_role(role) else {
            return Ok(None);
        };
        let raw = required(field, pairs)?;
        let value = unsigned(field, raw)?;
        u32::try_from(value).map(Some).map_err(|_| {
            GatewayError::invalid_params(format!("'{}' is out of range: {value}", field.name))
        })
    }

    /// Shape a tuple returned by the store for output.
    ///
    /// Schema positions are normalized to their declared type where the store
    /// representation differs (booleans stored as 0/1, integral floats in
    /// integer fields); positions beyond the schema pass through.
    pub fn encode(&self, tuple: &[Value]) -> Value {
        Value::Array(
            tuple
                .iter()
                .enumerate()
                .map(|(position, value)| match self.template.schema_type(position) {
                    Some(field_type) => normalize(field_type, value),
                    None => value.clone(),
                })
                .collect(),
        )
    }
}

/// First value for `name`. Later duplicates are ignored.
fn lookup<'p>(pairs: &'p [(String, String)], name: &str) -> Option<&'p str> {
    pairs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

fn required<'p>(field: &FieldSpec, pairs: &'p [(String, String)]) -> Result<&'p str, GatewayError> {
    lookup(pairs, &field.name)
        .ok_or_else(|| GatewayError::invalid_params(format!("missing field '{}'", field.name)))
}

fn coerce(field: &FieldSpec, raw: &str) -> Result<Value, GatewayError> {
    field
        .field_type
        .coerce(raw)
        .map_err(|e| GatewayError::invalid_params(format!("field '{}': {e}", field.name)))
}

fn unsigned(field: &FieldSpec, raw: &str) -> Result<u64, GatewayError> {
    raw.parse::<u64>().map_err(|_| {
        GatewayError::invalid_params(format!(
            "field '{}': '{raw}' is not an unsigned integer",
            field.name
        ))
    })
}

fn normalize(field_type: FieldType, value: &Value) -> Value {
    match (field_type, value) {
        (FieldType::Bool, Value::Number(n)) => match n.as_u64() {
            Some(0) => Value::Bool(false),
            Some(1) => Value::Bool(true),
            _ => value.clone(),
        },
        (FieldType::Unsigned | FieldType::Int, Value::Number(n)) if n.is_f64() => {
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Value::from(f as i64),
                _ => value.clone(),
            }
        }
        _ => value.clone(),
    }
}
