//! Centralized default values for gateway limits.

use std::time::Duration;
use tracing::warn;

/// Built-in limit defaults.
///
/// Every limit the gateway enforces starts here. `from_env` lets an operator
/// move a default without touching the YAML file; values in the file still
/// win over both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayDefaults {
    /// Largest request body accepted (bytes). Larger bodies fail with 400
    /// before any parsing.
    pub max_body_size: usize,

    /// Most query/form arguments one request may carry (codec layer, 500).
    pub max_query_args: usize,

    /// Most fields one extended-format template may declare.
    pub max_template_fields: usize,

    /// Longest query string accepted (transport layer, 414).
    pub max_query_length: usize,

    /// Largest raw body copied into a request context (bytes).
    pub max_request_context_size: usize,

    /// Most calls in one JSON-RPC batch.
    pub max_batch_size: usize,

    /// Batch items in flight at once.
    pub batch_concurrency: usize,

    /// Largest `%limit` a select may ask for.
    pub max_select_limit: u64,

    /// Deadline for the whole dispatch of one HTTP request.
    pub request_timeout: Duration,
}

impl Default for GatewayDefaults {
    fn default() -> Self {
        Self {
            max_body_size: 1024 * 1024,
            max_query_args: 512,
            max_template_fields: 64,
            max_query_length: 64 * 1024,
            max_request_context_size: 64 * 1024,
            max_batch_size: 16384,
            batch_concurrency: 16,
            max_select_limit: 100,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl GatewayDefaults {
    /// Create defaults from environment variables.
    ///
    /// # Environment Variables
    /// - `TNTGATE_MAX_BODY_SIZE`
    /// - `TNTGATE_MAX_QUERY_ARGS`
    /// - `TNTGATE_MAX_QUERY_LENGTH`
    /// - `TNTGATE_MAX_BATCH_SIZE`
    /// - `TNTGATE_BATCH_CONCURRENCY`
    /// - `TNTGATE_REQUEST_TIMEOUT_SECS`
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            max_body_size: parse_env_warn("TNTGATE_MAX_BODY_SIZE", default.max_body_size),
            max_query_args: parse_env_warn("TNTGATE_MAX_QUERY_ARGS", default.max_query_args),
            max_query_length: parse_env_warn(
                "TNTGATE_MAX_QUERY_LENGTH",
                default.max_query_length,
            ),
            max_batch_size: parse_env_warn("TNTGATE_MAX_BATCH_SIZE", default.max_batch_size),
            batch_concurrency: parse_env_warn(
                "TNTGATE_BATCH_CONCURRENCY",
                default.batch_concurrency,
            ),
            request_timeout: Duration::from_secs(parse_env_warn(
                "TNTGATE_REQUEST_TIMEOUT_SECS",
                default.request_timeout.as_secs(),
            )),

            // Template and select limits are route design decisions; they
            // live in the file only.
            max_template_fields: default.max_template_fields,
            max_request_context_size: default.max_request_context_size,
            max_select_limit: default.max_select_limit,
        }
    }

    /// Validate the defaults satisfy invariants.
    ///
    /// # Invariants
    /// 1. no limit is zero
    /// 2. `max_request_context_size` <= `max_body_size`
    /// 3. `batch_concurrency` <= `max_batch_size`
    pub fn validate(&self) -> Result<(), String> {
        let sizes = [
            ("max_body_size", self.max_body_size),
            ("max_query_args", self.max_query_args),
            ("max_template_fields", self.max_template_fields),
            ("max_query_length", self.max_query_length),
            ("max_request_context_size", self.max_request_context_size),
            ("max_batch_size", self.max_batch_size),
            ("batch_concurrency", self.batch_concurrency),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, value)| *value == 0) {
            return Err(format!("{name} must be greater than zero"));
        }
        if self.max_select_limit == 0 || self.request_timeout.is_zero() {
            return Err("max_select_limit and request_timeout must be non-zero".to_string());
        }

        if self.max_request_context_size > self.max_body_size {
            return Err(format!(
                "max_request_context_size ({}) must be <= max_body_size ({})",
                self.max_request_context_size, self.max_body_size
            ));
        }

        if self.batch_concurrency > self.max_batch_size {
            return Err(format!(
                "batch_concurrency ({}) must be <= max_batch_size ({})",
                self.batch_concurrency, self.max_batch_size
            ));
        }

        Ok(())
    }
}

/// Parse an environment variable with a warning on invalid values.
fn parse_env_warn<T: std::str::FromStr + std::fmt::Display>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(val) => match val.parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(
                    env_var = name,
                    value = %val,
                    default = %default,
                    "Invalid value for environment variable, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    struct EnvVarGuard(&'static str);

    impl EnvVarGuard {
        fn set(name: &'static str, value: &str) -> Self {
            // SAFETY: Tests run serially via #[serial], env var mutation is isolated
            unsafe {
                std::env::set_var(name, value);
            }
            Self(name)
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            // SAFETY: Tests run serially via #[serial], env var mutation is isolated
            unsafe {
                std::env::remove_var(self.0);
            }
        }
    }

    #[test]
    fn test_defaults() {
        let defaults = GatewayDefaults::default();

        assert_eq!(defaults.max_body_size, 1024 * 1024);
        assert_eq!(defaults.max_query_args, 512);
        assert_eq!(defaults.max_template_fields, 64);
        assert_eq!(defaults.max_query_length, 64 * 1024);
        assert_eq!(defaults.max_request_context_size, 64 * 1024);
        assert_eq!(defaults.max_batch_size, 16384);
        assert_eq!(defaults.batch_concurrency, 16);
        assert_eq!(defaults.max_select_limit, 100);
        assert_eq!(defaults.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_defaults_validate_ok() {
        assert!(GatewayDefaults::default().validate().is_ok());
    }

    #[test]
    fn test_defaults_validate_zero_limit() {
        let defaults = GatewayDefaults {
            max_query_args: 0,
            ..Default::default()
        };
        let err = defaults.validate().unwrap_err();
        assert!(err.contains("max_query_args"), "{err}");
    }

    #[test]
    fn test_defaults_validate_context_above_body() {
        let defaults = GatewayDefaults {
            max_request_context_size: 2 * 1024 * 1024,
            ..Default::default()
        };
        assert!(defaults.validate().is_err());
    }

    #[test]
    fn test_defaults_validate_concurrency_above_batch() {
        let defaults = GatewayDefaults {
            max_batch_size: 4,
            batch_concurrency: 8,
            ..Default::default()
        };
        assert!(defaults.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        let _body = EnvVarGuard::set("TNTGATE_MAX_BODY_SIZE", "2048");
        let _timeout = EnvVarGuard::set("TNTGATE_REQUEST_TIMEOUT_SECS", "5");

        let defaults = GatewayDefaults::from_env();
        assert_eq!(defaults.max_body_size, 2048);
        assert_eq!(defaults.request_timeout, Duration::from_secs(5));
        assert_eq!(defaults.max_query_args, 512);
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_value_falls_back() {
        let _guard = EnvVarGuard::set("TNTGATE_MAX_BATCH_SIZE", "lots");
        assert_eq!(GatewayDefaults::from_env().max_batch_size, 16384);
    }
}
