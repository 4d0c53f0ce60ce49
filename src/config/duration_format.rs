//! Duration fields in configuration files.
//!
//! Durations are written in humantime form: `250ms`, `30s`, `1m 30s`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

pub fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime::parse_duration(s)
        .map_err(|e| format!("invalid duration '{s}': expected a humantime value such as 30s ({e})"))
}

/// Deserialize a duration from a string.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

/// Serialize a duration to a humantime string.
pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let s = humantime::format_duration(*duration).to_string();
    s.serialize(serializer)
}
