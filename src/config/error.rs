//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    // ─────────────────────────────────────────────────────────────────────────
    // Route validation errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Two routes share the same path.
    #[error("duplicate route path: '{path}'")]
    DuplicateRoute { path: String },

    /// Route paths must be absolute.
    #[error("route path '{path}' must start with '/'")]
    InvalidRoutePath { path: String },

    /// `rest_methods` / `rpc_methods` names something that is not an HTTP method.
    #[error("route '{path}': invalid HTTP method '{method}'")]
    InvalidHttpMethod { path: String, method: String },

    /// The same HTTP method is listed as both REST and JSON-RPC.
    #[error("route '{path}': HTTP method {method} is in both rest_methods and rpc_methods")]
    AmbiguousHttpMethod { path: String, method: String },

    /// A DML route has no `operation`.
    #[error("route '{path}': kind dml requires 'operation'")]
    MissingOperation { path: String },

    /// A DML route has no `format` template.
    #[error("route '{path}': kind dml requires 'format'")]
    MissingTemplate { path: String },

    /// The template cannot address a space.
    #[error("route '{path}': format must declare a %space_id field")]
    MissingSpaceId { path: String },

    /// A select template lacks `%iter`, `%limit` or `%offset`.
    #[error("route '{path}': select format is missing the '{control}' control field")]
    SelectControlsMissing { path: String, control: &'static str },

    /// The template has more fields than `limits.max_template_fields`.
    #[error("route '{path}': format declares {count} fields, limit is {limit}")]
    TemplateTooLarge {
        path: String,
        count: usize,
        limit: usize,
    },

    /// `operation` / `format` on a route that is not `kind: dml`.
    #[error("route '{path}': '{field}' is only valid on kind dml")]
    UnexpectedDmlField { path: String, field: &'static str },

    /// A status route with an empty `status_arg`.
    #[error("route '{path}': kind status requires a non-empty 'status_arg'")]
    MissingStatusArg { path: String },

    /// A header name or value in `set_headers` / `headers` is not valid HTTP.
    #[error("route '{path}': invalid header '{header}'")]
    InvalidHeader { path: String, header: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Value validation errors
    // ─────────────────────────────────────────────────────────────────────────
    /// A limit breaks an invariant (zero, or inconsistent with another).
    #[error("invalid limits: {message}")]
    InvalidLimits { message: String },

    /// Upstream URL is missing or not http(s).
    #[error("invalid upstream URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// Required environment variable not set.
    #[error("environment variable '{var}' not set (required for field '{field}')")]
    MissingEnvVar { var: String, field: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Schema validation errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Schema version not supported.
    #[error("unsupported schema version {version}, expected 1")]
    UnsupportedSchemaVersion { version: u32 },

    // ─────────────────────────────────────────────────────────────────────────
    // I/O and parsing errors
    // ─────────────────────────────────────────────────────────────────────────
    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    ParseError(#[from] serde_saphyr::Error),

    /// I/O error reading config file.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Config file not found at any search location.
    #[error("configuration file not found (searched: {searched:?})")]
    ConfigFileNotFound { searched: Vec<PathBuf> },

    /// Empty configuration file.
    #[error("configuration file is empty")]
    EmptyConfigFile,
}

/// Validation warnings (non-fatal).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// DML routes exist but `allowed_spaces` is empty, so every space is open.
    OpenSpaceAccess,

    /// `preset_method` is not in the route's own `allowed_methods`.
    PresetNotAllowed { path: String, method: String },

    /// A route claims `/healthz`, hiding the built-in health check.
    HealthCheckShadowed { path: String },
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenSpaceAccess => {
                write!(f, "allowed_spaces is empty: DML routes may address any space")
            }
            Self::PresetNotAllowed { path, method } => {
                write!(
                    f,
                    "route '{path}': preset_method '{method}' is not in allowed_methods"
                )
            }
            Self::HealthCheckShadowed { path } => {
                write!(f, "route '{path}' shadows the built-in /healthz check")
            }
        }
    }
}

/// Result of configuration validation.
#[derive(Debug)]
pub struct ValidationResult {
    /// Non-fatal warnings encountered during validation.
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(warnings: Vec<ValidationWarning>) -> Self {
        Self { warnings }
    }

    /// Check if validation passed with no warnings.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::DuplicateRoute {
            path: "/api".to_string(),
        };
        assert_eq!(err.to_string(), "duplicate route path: '/api'");

        let err = ConfigError::SelectControlsMissing {
            path: "/select".to_string(),
            control: "%limit",
        };
        assert_eq!(
            err.to_string(),
            "route '/select': select format is missing the '%limit' control field"
        );
    }

    #[test]
    fn test_validation_warning_display() {
        let warn = ValidationWarning::PresetNotAllowed {
            path: "/echo".to_string(),
            method: "echo".to_string(),
        };
        assert_eq!(
            warn.to_string(),
            "route '/echo': preset_method 'echo' is not in allowed_methods"
        );
    }

    #[test]
    fn test_validation_result() {
        assert!(ValidationResult::ok().is_clean());
        assert!(!ValidationResult::with_warnings(vec![ValidationWarning::OpenSpaceAccess]).is_clean());
    }
}
