//! JWT verification with a statically configured key
//!
//! Supports HS256, RS256 and ES256. Use [`super::jwks`] when the provider
//! rotates its signing keys.

use super::{AuthError, IdentityVerifier, VerifiedIdentity};
use async_trait::async_trait;
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Registered claims read from an identity token
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub iat: Option<usize>,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub aud: Option<Audience>,
}

/// `aud` claim: a single audience or a list of them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl From<&str> for Audience {
    fn from(aud: &str) -> Self {
        Audience::One(aud.to_string())
    }
}

impl From<Audience> for serde_json::Value {
    fn from(aud: Audience) -> Self {
        match aud {
            Audience::One(aud) => serde_json::Value::String(aud),
            Audience::Many(auds) => serde_json::Value::from(auds),
        }
    }
}

impl Claims {
    /// Convert into the provider-neutral identity, keeping issuer and audience
    pub(crate) fn into_identity(self) -> Result<VerifiedIdentity, AuthError> {
        if self.sub.is_empty() {
            return Err(AuthError::InvalidToken("Empty subject".into()));
        }

        let mut claims = HashMap::new();
        if let Some(iss) = self.iss {
            claims.insert("iss".into(), serde_json::Value::String(iss));
        }
        if let Some(aud) = self.aud {
            claims.insert("aud".into(), aud.into());
        }
        if let Some(iat) = self.iat {
            claims.insert("iat".into(), serde_json::Value::from(iat));
        }

        Ok(VerifiedIdentity {
            subject: self.sub,
            claims,
        })
    }
}

/// Map a `jsonwebtoken` failure onto [`AuthError`]
pub(crate) fn map_decode_error(e: jsonwebtoken::errors::Error) -> AuthError {
    match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        _ => AuthError::InvalidToken(e.to_string()),
    }
}

/// JWT verifier backed by a single key
///
/// # Example
///
/// ```
/// use gatehouse::auth::jwt::JwtVerifier;
///
/// let verifier = JwtVerifier::new_hs256("my-secret")
///     .with_issuer("https://auth.example.com")
///     .with_audience("my-api");
/// ```
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    fn with_key(decoding_key: DecodingKey, algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;
        validation.validate_aud = false; // only when an audience is configured

        Self {
            decoding_key,
            validation,
        }
    }

    /// HMAC shared secret (HS256)
    pub fn new_hs256(secret: &str) -> Self {
        Self::with_key(DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256)
    }

    /// RSA public key in PEM form (RS256)
    pub fn new_rs256(public_key_pem: &str) -> Result<Self, AuthError> {
        let key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| AuthError::ConfigError(format!("Invalid RSA key: {}", e)))?;
        Ok(Self::with_key(key, Algorithm::RS256))
    }

    /// P-256 public key in PEM form (ES256)
    pub fn new_es256(public_key_pem: &str) -> Result<Self, AuthError> {
        let key = DecodingKey::from_ec_pem(public_key_pem.as_bytes())
            .map_err(|e| AuthError::ConfigError(format!("Invalid EC key: {}", e)))?;
        Ok(Self::with_key(key, Algorithm::ES256))
    }

    /// Require the `iss` claim to equal `issuer`
    #[must_use]
    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }

    /// Require the `aud` claim to contain `audience`
    #[must_use]
    pub fn with_audience(mut self, audience: &str) -> Self {
        self.validation.set_audience(&[audience]);
        self.validation.validate_aud = true;
        self
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::EmptyToken);
        }

        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(map_decode_error)?;

        tracing::debug!(issuer = ?token_data.claims.iss, "JWT signature and claims verified");

        token_data.claims.into_identity()
    }
}
