//! JSON-RPC envelope types and parsing.
//!
//! # Wire format
//!
//! - Request: `{"id": <int|string|null|absent>, "method": <string>, "params": <array|object>}`
//! - Response: `{"id": <echoed|absent>, "result": <any>}` or
//!   `{"id": <echoed|absent>, "error": {"code": <int>, "message": <string>}}`
//! - Batch: non-empty array of requests, answered by an array of responses in
//!   the same positions.
//!
//! Parsing runs on top of the selective scanner: only `id`, `method` and
//! `params` are ever deserialized.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Number, Value};
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::error::jsonrpc::JsonRpcError;
use crate::transport::scanner::{self, ScanLimits, Scanned, ScannedItem, ScannedObject};

// ============================================================================
// Fast Correlation ID Generator
// ============================================================================

/// Startup prefix derived from a single Uuid::new_v4() call.
static CORRELATION_PREFIX: LazyLock<u64> = LazyLock::new(|| {
    let seed = Uuid::new_v4().as_u128();
    (seed >> 64) as u64
});

/// Monotonically increasing counter for the lower 64 bits.
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a correlation ID from a process prefix and a counter.
///
/// Cheaper than `Uuid::new_v4()` per request while still unique per process.
/// Version 4 and RFC 4122 variant bits are set.
pub fn fast_correlation_id() -> Uuid {
    let prefix = *CORRELATION_PREFIX;
    let counter = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut combined = ((prefix as u128) << 64) | (counter as u128);
    combined = (combined & !(0xF_u128 << 76)) | (0x4_u128 << 76);
    combined = (combined & !(0x3_u128 << 62)) | (0x2_u128 << 62);
    Uuid::from_u128(combined)
}

// ============================================================================
// Identifiers
// ============================================================================

/// Request identifier, echoed back verbatim.
///
/// Never coerce between types: `"id": 1` is answered with `"id": 1`, not
/// `"id": "1"`. Explicit `null` is echoed as `null`; an absent id is absent
/// in the response too.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RpcId {
    /// Any JSON integer, kept as written (including values above `i64::MAX`).
    Number(Number),
    String(String),
    Null,
}

impl Serialize for RpcId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RpcId::Number(n) => n.serialize(serializer),
            RpcId::String(s) => serializer.serialize_str(s),
            RpcId::Null => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for RpcId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        RpcId::from_value(value).map_err(serde::de::Error::custom)
    }
}

impl From<i64> for RpcId {
    fn from(n: i64) -> Self {
        RpcId::Number(n.into())
    }
}

impl RpcId {
    fn from_value(value: Value) -> Result<Self, &'static str> {
        match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(RpcId::Number(n)),
            Value::Number(_) => Err("id must be an integer"),
            Value::String(s) => Ok(RpcId::String(s)),
            Value::Null => Ok(RpcId::Null),
            _ => Err("id must be a string, an integer or null"),
        }
    }
}

// ============================================================================
// Requests and responses
// ============================================================================

/// One validated call.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub id: Option<RpcId>,
    pub method: String,
    /// Positional arguments. Object params become a single argument.
    pub params: Vec<Value>,
    pub correlation_id: Uuid,
}

impl RpcRequest {
    pub fn new(id: Option<RpcId>, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
            correlation_id: fast_correlation_id(),
        }
    }
}

/// Response to one call. Exactly one of `result` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RpcId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl RpcResponse {
    pub fn success(id: Option<RpcId>, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<RpcId>, error: JsonRpcError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// One batch element after validation.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchItem {
    Valid(RpcRequest),
    /// Failed validation. Keeps the id when it could be read.
    Invalid {
        id: Option<RpcId>,
        error: GatewayError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedRequests {
    Single(RpcRequest),
    Batch(Vec<BatchItem>),
}

/// Parse a JSON-RPC body.
///
/// `preset_method`, when set, replaces whatever method the body names; the
/// body may then omit `method` entirely.
///
/// # Errors
///
/// Envelope failures (size, structure, empty batch, scalar) fail the whole
/// request. For a single object, validation failures also fail the request;
/// inside a batch they only mark that item invalid.
pub fn parse_jsonrpc(
    body: &[u8],
    limits: &ScanLimits,
    preset_method: Option<&str>,
) -> Result<ParsedRequests, GatewayError> {
    match scanner::scan(body, limits)? {
        Scanned::Single(obj) => decode_object(&obj, preset_method)
            .map(ParsedRequests::Single)
            .map_err(|(_, error)| error),
        Scanned::Batch(items) => Ok(ParsedRequests::Batch(
            items
                .iter()
                .map(|item| match item {
                    ScannedItem::Object(obj) => match decode_object(obj, preset_method) {
                        Ok(request) => BatchItem::Valid(request),
                        Err((id, error)) => BatchItem::Invalid { id, error },
                    },
                    ScannedItem::NotAnObject => BatchItem::Invalid {
                        id: None,
                        error: GatewayError::invalid_request("batch element must be an object"),
                    },
                })
                .collect(),
        )),
    }
}

fn decode_object(
    obj: &ScannedObject<'_>,
    preset_method: Option<&str>,
) -> Result<RpcRequest, (Option<RpcId>, GatewayError)> {
    let id = match obj.id {
        None => None,
        Some(span) => {
            let value: Value = serde_json::from_slice(span).map_err(|e| {
                (None, GatewayError::ParseError {
                    details: e.to_string(),
                })
            })?;
            Some(RpcId::from_value(value).map_err(|msg| (None, GatewayError::invalid_request(msg)))?)
        }
    };

    let method = match (preset_method, obj.method) {
        (Some(preset), _) => preset.to_string(),
        (None, None) => {
            return Err((id, GatewayError::invalid_request("missing 'method'")));
        }
        (None, Some(span)) => match serde_json::from_slice::<Value>(span) {
            Ok(Value::String(method)) => method,
            _ => {
                return Err((id, GatewayError::invalid_request("'method' must be a string")));
            }
        },
    };

    let params = match obj.params {
        None => Vec::new(),
        Some(span) => match serde_json::from_slice::<Value>(span) {
            Ok(Value::Array(params)) => params,
            Ok(object @ Value::Object(_)) => vec![object],
            Ok(_) => {
                return Err((
                    id,
                    GatewayError::invalid_request("'params' must be an array or an object"),
                ));
            }
            Err(e) => {
                return Err((
                    id,
                    GatewayError::ParseError {
                        details: e.to_string(),
                    },
                ));
            }
        },
    };

    Ok(RpcRequest {
        id,
        method,
        params,
        correlation_id: fast_correlation_id(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const LIMITS: ScanLimits = ScanLimits {
        max_body_size: 64 * 1024,
        max_batch_size: 100,
    };

    fn parse(body: &str) -> Result<ParsedRequests, GatewayError> {
        parse_jsonrpc(body.as_bytes(), &LIMITS, None)
    }

    #[test]
    fn test_single_request() {
        let parsed = parse(r#"{"id":7,"method":"echo","params":["a",1]}"#).unwrap();
        let ParsedRequests::Single(req) = parsed else {
            panic!("expected single");
        };
        assert_eq!(req.id, Some(RpcId::Number(7.into())));
        assert_eq!(req.method, "echo");
        assert_eq!(req.params, vec![json!("a"), json!(1)]);
    }

    #[test]
    fn test_id_types_preserved() {
        for (raw, expected) in [
            ("1", Some(RpcId::Number(1.into()))),
            ("-3", Some(RpcId::Number((-3).into()))),
            ("18446744073709551615", Some(RpcId::Number(u64::MAX.into()))),
            (r#""abc""#, Some(RpcId::String("abc".into()))),
            ("null", Some(RpcId::Null)),
        ] {
            let body = format!(r#"{{"id":{raw},"method":"m"}}"#);
            let ParsedRequests::Single(req) = parse(&body).unwrap() else {
                panic!("expected single");
            };
            assert_eq!(req.id, expected);
            let response = RpcResponse::success(req.id, json!(true));
            let echoed = serde_json::to_value(&response).unwrap();
            assert_eq!(echoed["id"].to_string(), raw);
        }
    }

    #[test]
    fn test_absent_id_is_absent_in_response() {
        let ParsedRequests::Single(req) = parse(r#"{"method":"m"}"#).unwrap() else {
            panic!("expected single");
        };
        let response = serde_json::to_value(RpcResponse::success(req.id, json!(1))).unwrap();
        assert!(response.get("id").is_none());
    }

    #[test]
    fn test_float_id_rejected() {
        let result = parse(r#"{"id":1.5,"method":"m"}"#);
        assert!(matches!(result, Err(GatewayError::InvalidRequest { .. })));
    }

    #[test]
    fn test_object_params_become_one_argument() {
        let ParsedRequests::Single(req) = parse(r#"{"method":"m","params":{"a":1}}"#).unwrap()
        else {
            panic!("expected single");
        };
        assert_eq!(req.params, vec![json!({"a": 1})]);
    }

    #[test]
    fn test_missing_or_bad_method() {
        for body in [
            r#"{"params":[]}"#,
            r#"{"method":5}"#,
            r#"{"method":null}"#,
            "{}",
        ] {
            assert!(
                matches!(parse(body), Err(GatewayError::InvalidRequest { .. })),
                "{body}"
            );
        }
    }

    #[test]
    fn test_scalar_params_rejected() {
        let result = parse(r#"{"method":"m","params":"x"}"#);
        assert!(matches!(result, Err(GatewayError::InvalidRequest { .. })));
    }

    #[test]
    fn test_preset_method_overrides_body() {
        let parsed = parse_jsonrpc(br#"{"id":1,"params":[1]}"#, &LIMITS, Some("echo")).unwrap();
        let ParsedRequests::Single(req) = parsed else {
            panic!("expected single");
        };
        assert_eq!(req.method, "echo");

        let parsed =
            parse_jsonrpc(br#"{"method":"other","params":[]}"#, &LIMITS, Some("echo")).unwrap();
        let ParsedRequests::Single(req) = parsed else {
            panic!("expected single");
        };
        assert_eq!(req.method, "echo");
    }

    #[test]
    fn test_batch_isolates_invalid_items() {
        let parsed = parse(r#"[{"id":1,"method":"a"},{"id":2},3,{"id":4,"method":"b"}]"#).unwrap();
        let ParsedRequests::Batch(items) = parsed else {
            panic!("expected batch");
        };
        assert_eq!(items.len(), 4);
        assert!(matches!(&items[0], BatchItem::Valid(r) if r.method == "a"));
        assert!(matches!(
            &items[1],
            BatchItem::Invalid { id: Some(RpcId::Number(n)), error: GatewayError::InvalidRequest { .. } }
                if n.as_i64() == Some(2)
        ));
        assert!(matches!(&items[2], BatchItem::Invalid { id: None, .. }));
        assert!(matches!(&items[3], BatchItem::Valid(r) if r.method == "b"));
    }

    #[test]
    fn test_response_has_exactly_one_of_result_or_error() {
        let ok = serde_json::to_value(RpcResponse::success(None, json!(null))).unwrap();
        assert!(ok.get("result").is_some());
        assert!(ok.get("error").is_none());

        let err = RpcResponse::error(
            Some(RpcId::Number(1.into())),
            JsonRpcError {
                code: -32601,
                message: "Method not found".into(),
            },
        );
        let err = serde_json::to_value(err).unwrap();
        assert!(err.get("result").is_none());
        assert_eq!(err["error"]["code"], -32601);
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        let a = fast_correlation_id();
        let b = fast_correlation_id();
        assert_ne!(a, b);
        assert_eq!(a.get_version_num(), 4);
    }
}
