//! Percent decoding for query strings, form bodies and paths.
//!
//! Query strings and `application/x-www-form-urlencoded` bodies decode `+` to
//! a space and then `%XX` escapes. Paths only decode `%XX`, and exactly once:
//! `%257C` becomes the literal text `%7C`, never `|`.

use serde_json::{Map, Value};

use crate::error::GatewayError;

/// Ordered key/value pairs. Duplicate keys are kept in arrival order.
pub type QueryPairs = Vec<(String, String)>;

/// Percent-decode `input` once.
///
/// A `%` that is not followed by two hex digits is kept as is. The decoded
/// bytes must be valid UTF-8.
pub fn percent_decode(input: &str, plus_as_space: bool) -> Result<String, GatewayError> {
    let bytes = input.as_bytes();
    if !bytes.contains(&b'%') && !(plus_as_space && bytes.contains(&b'+')) {
        return Ok(input.to_string());
    }

    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => match (
                bytes.get(i + 1).and_then(|b| hex_value(*b)),
                bytes.get(i + 2).and_then(|b| hex_value(*b)),
            ) {
                (Some(hi), Some(lo)) => {
                    out.push((hi << 4) | lo);
                    i += 3;
                }
                _ => {
                    out.push(b'%');
                    i += 1;
                }
            },
            b'+' if plus_as_space => {
                out.push(b' ');
                i += 1;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }

    String::from_utf8(out).map_err(|_| {
        GatewayError::invalid_params(format!("'{input}' does not decode to valid UTF-8"))
    })
}

#[inline]
fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Decode a path once.
pub fn decode_path(path: &str) -> Result<String, GatewayError> {
    percent_decode(path, false)
}

/// Split and decode `key=value&key=value`.
///
/// Empty segments are skipped. Pairs with an empty value are kept, so
/// `name=` reaches the codec as an empty string and `flag` (no `=`) as an
/// empty value; callers that need "absent" must leave the key out.
pub fn parse_pairs(input: &str) -> Result<QueryPairs, GatewayError> {
    input
        .split('&')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let (key, value) = segment.split_once('=').unwrap_or((segment, ""));
            Ok((percent_decode(key, true)?, percent_decode(value, true)?))
        })
        .collect()
}

/// Count the arguments in a raw query string without decoding it.
pub fn count_pairs(input: &str) -> usize {
    input.split('&').filter(|segment| !segment.is_empty()).count()
}

/// Render pairs as one JSON object. Later duplicates win.
pub fn pairs_to_object(pairs: &[(String, String)]) -> Value {
    let map: Map<String, Value> = pairs
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    Value::Object(map)
}

/// Render pairs as an array of single-key objects, keeping duplicates.
pub fn pairs_to_list(pairs: &[(String, String)]) -> Value {
    Value::Array(
        pairs
            .iter()
            .map(|(k, v)| {
                let mut map = Map::with_capacity(1);
                map.insert(k.clone(), Value::String(v.clone()));
                Value::Object(map)
            })
            .collect(),
    )
}
