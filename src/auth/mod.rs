//! Identity verification
//!
//! Defines the contract the gateway uses to verify bearer credentials against
//! an identity provider, plus the JWT and JWKS backed implementations.

use crate::config::ProviderConfig;
use async_trait::async_trait;
use hyper::header::{HeaderMap, AUTHORIZATION};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod jwks;
pub mod jwt;

/// Scheme prefix of a bearer credential. Matched case-sensitively.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Verification errors
///
/// Every variant maps to the same 401 response; the detail only reaches logs.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Empty bearer token")]
    EmptyToken,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("JWKS fetch error: {0}")]
    JwksFetchError(String),

    #[error("Verification timed out after {0:?}")]
    Timeout(Duration),

    #[error("Identity provider configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Short, stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::EmptyToken => "empty_token",
            AuthError::InvalidToken(_) => "invalid_token",
            AuthError::TokenExpired => "token_expired",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::JwksFetchError(_) => "provider_unavailable",
            AuthError::Timeout(_) => "timeout",
            AuthError::ConfigError(_) => "config",
            AuthError::Internal(_) => "internal",
        }
    }
}

/// Identity returned by a provider after a successful verification
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedIdentity {
    /// Provider-issued subject identifier (`sub` claim)
    pub subject: String,
    /// Provider metadata worth keeping (issuer, audience, ...)
    pub claims: HashMap<String, serde_json::Value>,
}

impl VerifiedIdentity {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            claims: HashMap::new(),
        }
    }
}

/// Verifies a bearer credential with an identity provider.
///
/// Implementations are shared by all in-flight requests and must tolerate
/// concurrent calls.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify `token` and return the subject it was issued for
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError>;
}

/// Extract the bearer token from the `Authorization` header.
///
/// Returns `None` when the header is absent, not valid UTF-8, or uses another
/// scheme. An empty string is returned for `Bearer ` with nothing after it;
/// HTTP parsers trim trailing whitespace, so a bare `Bearer` counts as well.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    if value.trim_end() == BEARER_PREFIX.trim_end() {
        return Some("");
    }
    value.strip_prefix(BEARER_PREFIX)
}

/// Build the verifier described by the provider configuration
pub fn verifier_from_config(
    provider: &ProviderConfig,
) -> Result<Arc<dyn IdentityVerifier>, AuthError> {
    match provider {
        ProviderConfig::Jwt(jwt) => {
            let key = match jwt.algorithm.to_uppercase().as_str() {
                "HS256" => jwt.secret.as_deref(),
                _ => jwt.public_key.as_deref(),
            }
            .ok_or_else(|| {
                AuthError::ConfigError(format!("No key configured for {}", jwt.algorithm))
            })?;

            let mut verifier = match jwt.algorithm.to_uppercase().as_str() {
                "HS256" => jwt::JwtVerifier::new_hs256(key),
                "RS256" => jwt::JwtVerifier::new_rs256(key)?,
                "ES256" => jwt::JwtVerifier::new_es256(key)?,
                other => {
                    return Err(AuthError::ConfigError(format!(
                        "Unsupported JWT algorithm: {}",
                        other
                    )))
                }
            };
            if let Some(issuer) = &jwt.issuer {
                verifier = verifier.with_issuer(issuer);
            }
            if let Some(audience) = &jwt.audience {
                verifier = verifier.with_audience(audience);
            }
            Ok(Arc::new(verifier))
        }
        ProviderConfig::Jwks(jwks) => {
            let mut verifier = jwks::JwksVerifier::lazy(&jwks.url)?
                .with_cache_ttl(Duration::from_secs(jwks.cache_ttl_seconds));
            if let Some(issuer) = &jwks.issuer {
                verifier = verifier.with_issuer(issuer);
            }
            if let Some(audience) = &jwks.audience {
                verifier = verifier.with_audience(audience);
            }
            Ok(Arc::new(verifier))
        }
        ProviderConfig::Firebase(firebase) => Ok(Arc::new(
            jwks::JwksVerifier::firebase(&firebase.project_id)?
                .with_cache_ttl(Duration::from_secs(firebase.cache_ttl_seconds)),
        )),
    }
}
