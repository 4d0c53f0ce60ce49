//! Configuration loading and validation.
//!
//! Loading is: locate the file, read it, substitute `${VAR}` references,
//! parse YAML, validate. Validation runs once at startup; the router and
//! dispatcher only ever see a validated [`GatewayConfig`].

use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use http::{HeaderName, HeaderValue};

use super::defaults::GatewayDefaults;
use super::error::{ConfigError, ValidationResult, ValidationWarning};
use super::schema::{GatewayConfig, RouteConfig, RouteKind};
use crate::codec::format::FieldRole;
use crate::transport::invoker::DmlKind;

/// Configuration file search paths (in priority order).
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(path) = std::env::var("TNTGATE_CONFIG") {
        paths.push(PathBuf::from(path));
    }

    paths.push(PathBuf::from("/etc/tntgate/config.yaml"));
    paths.push(PathBuf::from("./config.yaml"));

    paths
}

/// Find the first existing config file.
///
/// An explicit path (CLI flag) is used as is and never falls back to the
/// search list.
pub fn find_config_file(explicit_path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit_path {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(ConfigError::ConfigFileNotFound {
            searched: vec![path.to_path_buf()],
        });
    }

    let paths = default_config_paths();
    for path in &paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    Err(ConfigError::ConfigFileNotFound { searched: paths })
}

/// Load configuration from a file path, without validating it.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;

    if contents.trim().is_empty() {
        return Err(ConfigError::EmptyConfigFile);
    }

    let contents = substitute_env_vars(&contents)?;
    let config: GatewayConfig = serde_saphyr::from_str(&contents)?;

    Ok(config)
}

/// Load and validate configuration.
pub fn load_and_validate(path: &Path) -> Result<(GatewayConfig, ValidationResult), ConfigError> {
    let config = load_config(path)?;
    let result = validate(&config)?;
    Ok((config, result))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Environment Variable Substitution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

// ${VAR} and ${VAR:-default}
static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("valid regex")
});

/// Substitute environment variables in a string.
///
/// # Syntax
/// - `${VAR}` - Required, fail if not set
/// - `${VAR:-default}` - Optional with default
pub fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let mut missing = None;

    let result = ENV_VAR_PATTERN.replace_all(content, |cap: &regex::Captures<'_>| {
        let var_name = &cap[1];
        match (std::env::var(var_name), cap.get(2)) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.as_str().to_string(),
            (Err(_), None) => {
                missing.get_or_insert_with(|| var_name.to_string());
                String::new()
            }
        }
    });

    if let Some(var) = missing {
        return Err(ConfigError::MissingEnvVar {
            var,
            field: "configuration".to_string(),
        });
    }

    Ok(result.into_owned())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
/// Validate a configuration.
pub fn validate(config: &GatewayConfig) -> Result<ValidationResult, ConfigError> {
    let mut warnings = Vec::new();

    if config.schema != 1 {
        return Err(ConfigError::UnsupportedSchemaVersion {
            version: config.schema,
        });
    }

    GatewayDefaults::from(&config.limits)
        .validate()
        .map_err(|message| ConfigError::InvalidLimits { message })?;

    match reqwest::Url::parse(&config.upstream.url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => {
            return Err(ConfigError::InvalidUrl {
                url: config.upstream.url.clone(),
                message: format!("unsupported scheme '{}'", url.scheme()),
            });
        }
        Err(e) => {
            return Err(ConfigError::InvalidUrl {
                url: config.upstream.url.clone(),
                message: e.to_string(),
            });
        }
    }

    let mut seen_paths = HashSet::new();
    for route in &config.routes {
        if !route.path.starts_with('/') {
            return Err(ConfigError::InvalidRoutePath {
                path: route.path.clone(),
            });
        }
        if !seen_paths.insert(normalize_route_path(&route.path)) {
            return Err(ConfigError::DuplicateRoute {
                path: route.path.clone(),
            });
        }
        if normalize_route_path(&route.path) == "/healthz" {
            warnings.push(ValidationWarning::HealthCheckShadowed {
                path: route.path.clone(),
            });
        }

        validate_methods(route)?;
        validate_headers(route)?;

        match route.kind {
            RouteKind::Dml => validate_dml(route, config.limits.max_template_fields)?,
            RouteKind::Call | RouteKind::Status => {
                if route.operation.is_some() {
                    return Err(ConfigError::UnexpectedDmlField {
                        path: route.path.clone(),
                        field: "operation",
                    });
                }
                if route.format.is_some() {
                    return Err(ConfigError::UnexpectedDmlField {
                        path: route.path.clone(),
                        field: "format",
                    });
                }
            }
        }

        if route.kind == RouteKind::Status && route.status_arg.trim().is_empty() {
            return Err(ConfigError::MissingStatusArg {
                path: route.path.clone(),
            });
        }

        if let Some(preset) = &route.preset_method {
            if !route.allowed_methods.is_empty() && !route.allowed_methods.contains(preset) {
                warnings.push(ValidationWarning::PresetNotAllowed {
                    path: route.path.clone(),
                    method: preset.clone(),
                });
            }
        }
    }

    let has_dml = config.routes.iter().any(|r| r.kind == RouteKind::Dml);
    if has_dml && config.allowed_spaces.0.is_empty() {
        warnings.push(ValidationWarning::OpenSpaceAccess);
    }

    Ok(ValidationResult::with_warnings(warnings))
}

/// Route paths compare without a trailing slash (`/api/` == `/api`).
pub(crate) fn normalize_route_path(path: &str) -> &str {
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

fn validate_methods(route: &RouteConfig) -> Result<(), ConfigError> {
    let rest = route.rest_methods()?;
    let rpc = route.rpc_methods()?;
    if let Some(method) = rest.iter().find(|m| rpc.contains(m)) {
        return Err(ConfigError::AmbiguousHttpMethod {
            path: route.path.clone(),
            method: method.to_string(),
        });
    }
    Ok(())
}

fn validate_headers(route: &RouteConfig) -> Result<(), ConfigError> {
    let invalid = |header: &str| ConfigError::InvalidHeader {
        path: route.path.clone(),
        header: header.to_string(),
    };
    for name in &route.headers {
        HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid(name))?;
    }
    for (name, value) in &route.set_headers {
        HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid(name))?;
        HeaderValue::from_str(value).map_err(|_| invalid(name))?;
    }
    Ok(())
}

fn validate_dml(route: &RouteConfig, max_template_fields: usize) -> Result<(), ConfigError> {
    let operation = route.operation.ok_or_else(|| ConfigError::MissingOperation {
        path: route.path.clone(),
    })?;
    let template = route
        .format
        .as_ref()
        .ok_or_else(|| ConfigError::MissingTemplate {
            path: route.path.clone(),
        })?;

    if template.len() > max_template_fields {
        return Err(ConfigError::TemplateTooLarge {
            path: route.path.clone(),
            count: template.len(),
            limit: max_template_fields,
        });
    }

    if !template.has_role(FieldRole::SpaceId) {
        return Err(ConfigError::MissingSpaceId {
            path: route.path.clone(),
        });
    }

    if operation == DmlKind::Select {
        for (role, control) in [
            (FieldRole::Iterator, "%iter"),
            (FieldRole::Limit, "%limit"),
            (FieldRole::Offset, "%offset"),
        ] {
            if !template.has_role(role) {
                return Err(ConfigError::SelectControlsMissing {
                    path: route.path.clone(),
                    control,
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const MINIMAL_CONFIG: &str = r#"
schema: 1
upstream:
  url: http://127.0.0.1:8081/invoke
routes:
  - path: /api
"#;

    fn parse(yaml: &str) -> GatewayConfig {
        serde_saphyr::from_str(yaml).unwrap()
    }

    fn with_routes(routes: &str) -> GatewayConfig {
        parse(&format!(
            "schema: 1\nupstream:\n  url: http://127.0.0.1:8081/invoke\nroutes:\n{routes}"
        ))
    }

    #[test]
    fn test_validate_minimal_config() {
        let result = validate(&parse(MINIMAL_CONFIG)).unwrap();
        assert!(result.is_clean());
    }

    #[test]
    fn test_unsupported_schema_version() {
        let config = parse("schema: 2\nupstream:\n  url: http://localhost/\n");
        assert!(matches!(
            validate(&config),
            Err(ConfigError::UnsupportedSchemaVersion { version: 2 })
        ));
    }

    #[test]
    fn test_validate_upstream_url() {
        let config = parse("schema: 1\n");
        assert!(matches!(validate(&config), Err(ConfigError::InvalidUrl { .. })));

        let config = parse("schema: 1\nupstream:\n  url: ftp://bridge/\n");
        assert!(matches!(validate(&config), Err(ConfigError::InvalidUrl { .. })));
    }

    #[test]
    fn test_validate_duplicate_route() {
        let config = with_routes("  - path: /api\n  - path: /api/\n");
        assert!(matches!(
            validate(&config),
            Err(ConfigError::DuplicateRoute { .. })
        ));
    }

    #[test]
    fn test_validate_relative_path() {
        let config = with_routes("  - path: api\n");
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidRoutePath { .. })
        ));
    }

    #[test]
    fn test_validate_dml_requirements() {
        let config = with_routes("  - path: /insert\n    kind: dml\n    operation: insert\n");
        assert!(matches!(
            validate(&config),
            Err(ConfigError::MissingTemplate { .. })
        ));

        let config = with_routes("  - path: /insert\n    kind: dml\n    format: \"id=%u\"\n");
        assert!(matches!(
            validate(&config),
            Err(ConfigError::MissingOperation { .. })
        ));

        let config = with_routes(
            "  - path: /insert\n    kind: dml\n    operation: insert\n    format: \"id=%u\"\n",
        );
        assert!(matches!(
            validate(&config),
            Err(ConfigError::MissingSpaceId { .. })
        ));
    }

    #[test]
    fn test_validate_select_controls() {
        let config = with_routes(
            "  - path: /select\n    kind: dml\n    operation: select\n    format: \"s=%space_id&iter=%iter&limit=%limit&id=%ku\"\n",
        );
        match validate(&config) {
            Err(ConfigError::SelectControlsMissing { control, .. }) => {
                assert_eq!(control, "%offset")
            }
            other => panic!("Expected SelectControlsMissing, got: {other:?}"),
        }
    }

    #[test]
    fn test_validate_template_field_limit() {
        let fields: Vec<String> = (0..5).map(|i| format!("f{i}=%u")).collect();
        let yaml = format!(
            "schema: 1\nupstream:\n  url: http://localhost/\nlimits:\n  max_template_fields: 4\nroutes:\n  - path: /insert\n    kind: dml\n    operation: insert\n    format: \"s=%space_id&{}\"\n",
            fields.join("&")
        );
        assert!(matches!(
            validate(&parse(&yaml)),
            Err(ConfigError::TemplateTooLarge { count: 6, limit: 4, .. })
        ));
    }

    #[test]
    fn test_validate_format_on_call_route() {
        let config = with_routes("  - path: /api\n    format: \"id=%u\"\n");
        assert!(matches!(
            validate(&config),
            Err(ConfigError::UnexpectedDmlField { field: "format", .. })
        ));
    }

    #[test]
    fn test_validate_ambiguous_methods() {
        let config = with_routes("  - path: /api\n    rest_methods: [GET, POST]\n");
        assert!(matches!(
            validate(&config),
            Err(ConfigError::AmbiguousHttpMethod { .. })
        ));
    }

    #[test]
    fn test_validate_bad_header() {
        let config = with_routes("  - path: /api\n    set_headers:\n      \"bad header\": x\n");
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn test_validate_zero_limit() {
        let config = parse(
            "schema: 1\nupstream:\n  url: http://localhost/\nlimits:\n  batch_concurrency: 0\n",
        );
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidLimits { .. })
        ));
    }

    #[test]
    fn test_validate_warnings() {
        let config = with_routes(
            "  - path: /healthz\n  - path: /echo\n    preset_method: echo\n    allowed_methods: [ping]\n  - path: /insert\n    kind: dml\n    operation: insert\n    format: \"s=%space_id&id=%u\"\n",
        );
        let result = validate(&config).unwrap();
        assert_eq!(
            result.warnings,
            vec![
                ValidationWarning::HealthCheckShadowed {
                    path: "/healthz".to_string()
                },
                ValidationWarning::PresetNotAllowed {
                    path: "/echo".to_string(),
                    method: "echo".to_string()
                },
                ValidationWarning::OpenSpaceAccess,
            ]
        );
    }

    #[test]
    #[serial]
    fn test_env_var_substitution_required() {
        // SAFETY: Test runs serially via #[serial], env var mutation is isolated
        unsafe {
            std::env::set_var("TNTGATE_TEST_VAR", "test_value");
        }
        let result = substitute_env_vars("url: ${TNTGATE_TEST_VAR}").unwrap();
        assert_eq!(result, "url: test_value");
        unsafe {
            std::env::remove_var("TNTGATE_TEST_VAR");
        }
    }

    #[test]
    #[serial]
    fn test_env_var_substitution_with_default() {
        unsafe {
            std::env::remove_var("TNTGATE_MISSING_VAR");
        }
        let result = substitute_env_vars("url: ${TNTGATE_MISSING_VAR:-default_value}").unwrap();
        assert_eq!(result, "url: default_value");
    }

    #[test]
    #[serial]
    fn test_env_var_substitution_missing_required() {
        unsafe {
            std::env::remove_var("TNTGATE_REQUIRED_VAR");
        }
        let result = substitute_env_vars("url: ${TNTGATE_REQUIRED_VAR}");
        assert!(matches!(
            result,
            Err(ConfigError::MissingEnvVar { var, .. }) if var == "TNTGATE_REQUIRED_VAR"
        ));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL_CONFIG.as_bytes()).unwrap();

        let (config, result) = load_and_validate(file.path()).unwrap();
        assert_eq!(config.routes.len(), 1);
        assert!(result.is_clean());
    }

    #[test]
    fn test_load_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::EmptyConfigFile)
        ));
    }

    #[test]
    fn test_find_explicit_missing_file() {
        let result = find_config_file(Some(Path::new("/nonexistent/tntgate.yaml")));
        assert!(matches!(
            result,
            Err(ConfigError::ConfigFileNotFound { searched }) if searched.len() == 1
        ));
    }

    #[test]
    fn test_normalize_route_path() {
        assert_eq!(normalize_route_path("/api/"), "/api");
        assert_eq!(normalize_route_path("/"), "/");
        assert_eq!(normalize_route_path("/a/b"), "/a/b");
    }
}
