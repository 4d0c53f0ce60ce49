//! Gateway configuration.
//!
//! This module provides:
//! - YAML configuration parsing
//! - Environment variable substitution
//! - Route table and limit validation
//! - Centralized default values
//!
//! # Example
//!
//! ```ignore
//! use tntgate::config::{find_config_file, load_and_validate};
//!
//! let path = find_config_file(None)?;
//! let (config, result) = load_and_validate(&path)?;
//! for warning in &result.warnings {
//!     tracing::warn!(%warning, "Configuration warning");
//! }
//! ```

mod defaults;
pub mod duration_format;
mod error;
mod loader;
mod schema;

pub use defaults::GatewayDefaults;
pub use error::{ConfigError, ValidationResult, ValidationWarning};
pub(crate) use loader::normalize_route_path;
pub use loader::{
    default_config_paths, find_config_file, load_and_validate, load_config, substitute_env_vars,
    validate,
};
pub use schema::{GatewayConfig, Limits, PassRequest, RouteConfig, RouteKind};
