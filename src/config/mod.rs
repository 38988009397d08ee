//! Configuration module for Gatehouse
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation.
//!
//! # Example
//!
//! ```yaml
//! server:
//!   address: "0.0.0.0:8080"
//! identity:
//!   verify_timeout_ms: 3000
//!   provider:
//!     type: firebase
//!     project_id: "${FIREBASE_PROJECT_ID}"
//! routes:
//!   - id: core-api
//!     paths: ["/api/**"]
//!     strip_prefix: 1
//!     uri: "${CORE_SERVICE_URL:-http://localhost:8081}"
//!     add_request_headers:
//!       X-Gateway: chokak-gateway
//! policy:
//!   default: public
//!   rules:
//!     - paths: ["/api/review/submit"]
//!       access: authenticated
//!     - paths: ["/uploads/**"]
//!       method: GET
//!       access: public
//! ```

use crate::authz::Access;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

mod loader;

pub use loader::ConfigLoader;

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub identity: IdentityConfig,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server
            .address
            .parse::<SocketAddr>()
            .map_err(|e| {
                ConfigError::ValidationError(format!(
                    "Invalid server address '{}': {}",
                    self.server.address, e
                ))
            })?;

        self.identity.validate()?;

        let mut ids = HashSet::new();
        for route in &self.routes {
            if route.id.trim().is_empty() {
                return Err(ConfigError::ValidationError("Route id cannot be empty".into()));
            }
            if !ids.insert(route.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate route id '{}'",
                    route.id
                )));
            }
            if route.paths.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Route '{}' has no paths",
                    route.id
                )));
            }
            validate_patterns(&route.paths, &format!("route '{}'", route.id))?;
            if !is_valid_http_url(&route.uri) {
                return Err(ConfigError::ValidationError(format!(
                    "Route '{}' has invalid uri '{}': must start with http:// or https://",
                    route.id, route.uri
                )));
            }
        }

        for (index, rule) in self.policy.rules.iter().enumerate() {
            if rule.paths.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Policy rule {} has no paths",
                    index
                )));
            }
            validate_patterns(&rule.paths, &format!("policy rule {}", index))?;
            if let Some(method) = &rule.method {
                hyper::Method::from_bytes(method.to_uppercase().as_bytes()).map_err(|_| {
                    ConfigError::ValidationError(format!(
                        "Policy rule {} has invalid method '{}'",
                        index, method
                    ))
                })?;
            }
        }

        Ok(())
    }
}

fn validate_patterns(paths: &[String], owner: &str) -> Result<(), ConfigError> {
    for path in paths {
        if !path.starts_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "Path pattern '{}' of {} must start with '/'",
                path, owner
            )));
        }
    }
    Ok(())
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
}

/// Identity verification and propagation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Header carrying the canonical identity downstream
    #[serde(default = "default_identity_header")]
    pub header: String,

    /// UUID namespace for canonical identities. Keep it stable across
    /// provider migrations or every user gets a new identity.
    #[serde(default)]
    pub namespace: Option<String>,

    /// Upper bound on a single verification, in milliseconds
    #[serde(default = "default_verify_timeout_ms")]
    pub verify_timeout_ms: u64,

    pub provider: ProviderConfig,
}

impl IdentityConfig {
    /// Configured namespace, or the built-in one
    pub fn namespace_uuid(&self) -> Result<Uuid, ConfigError> {
        match &self.namespace {
            Some(ns) => Uuid::parse_str(ns).map_err(|e| {
                ConfigError::ValidationError(format!("Invalid identity namespace '{}': {}", ns, e))
            }),
            None => Ok(crate::identity::DEFAULT_NAMESPACE),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        hyper::header::HeaderName::from_bytes(self.header.as_bytes()).map_err(|_| {
            ConfigError::ValidationError(format!("Invalid identity header '{}'", self.header))
        })?;
        self.namespace_uuid()?;

        if self.verify_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "verify_timeout_ms must be greater than 0".into(),
            ));
        }

        match &self.provider {
            ProviderConfig::Jwt(jwt) => match jwt.algorithm.to_uppercase().as_str() {
                "HS256" if jwt.secret.as_deref().map_or(true, str::is_empty) => Err(
                    ConfigError::ValidationError("HS256 requires a non-empty secret".into()),
                ),
                "RS256" | "ES256" if jwt.public_key.is_none() => Err(
                    ConfigError::ValidationError(format!("{} requires public_key", jwt.algorithm)),
                ),
                "HS256" | "RS256" | "ES256" => Ok(()),
                other => Err(ConfigError::ValidationError(format!(
                    "Unsupported JWT algorithm '{}': must be HS256, RS256 or ES256",
                    other
                ))),
            },
            ProviderConfig::Jwks(jwks) if !is_valid_http_url(&jwks.url) => {
                Err(ConfigError::ValidationError(
                    "Invalid JWKS url: must start with http:// or https://".into(),
                ))
            }
            ProviderConfig::Firebase(firebase) if firebase.project_id.trim().is_empty() => Err(
                ConfigError::ValidationError("Firebase project_id cannot be empty".into()),
            ),
            _ => Ok(()),
        }
    }
}

fn default_identity_header() -> String {
    crate::middleware::DEFAULT_IDENTITY_HEADER.to_string()
}

fn default_verify_timeout_ms() -> u64 {
    5000
}

/// Identity provider used to verify bearer tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    /// Tokens signed with one static key
    Jwt(JwtProviderConfig),
    /// Tokens signed with keys published at a JWKS endpoint
    Jwks(JwksProviderConfig),
    /// Firebase Authentication ID tokens
    Firebase(FirebaseProviderConfig),
}

/// Static-key JWT provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtProviderConfig {
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,
    /// Shared secret for HS256
    #[serde(default)]
    pub secret: Option<String>,
    /// PEM public key for RS256 / ES256
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
}

fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}

/// JWKS provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwksProviderConfig {
    pub url: String,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
}

/// Firebase provider; derives JWKS url, issuer and audience from the project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirebaseProviderConfig {
    pub project_id: String,
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
}

fn default_cache_ttl_seconds() -> u64 {
    3600
}

/// Upstream route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub id: String,
    /// Path patterns; `*` matches within a segment, `**` across segments
    pub paths: Vec<String>,
    /// Number of leading path segments removed before forwarding
    #[serde(default)]
    pub strip_prefix: usize,
    /// Upstream base URI
    pub uri: String,
    #[serde(default)]
    pub add_request_headers: BTreeMap<String, String>,
}

/// Route authorization policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Requirement for requests no rule matches
    #[serde(default)]
    pub default: Access,
    /// Evaluated in order; the first match decides
    #[serde(default)]
    pub rules: Vec<PolicyRuleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRuleConfig {
    pub paths: Vec<String>,
    /// Restrict the rule to one HTTP method
    #[serde(default)]
    pub method: Option<String>,
    pub access: Access,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}
