//! JWKS (JSON Web Key Set) verification
//!
//! Fetches and caches the provider's public keys and verifies tokens against
//! the key named by the token's `kid`. Firebase ID tokens are handled by
//! [`JwksVerifier::firebase`].
//!
//! # Example
//!
//! ```no_run
//! use gatehouse::auth::jwks::JwksVerifier;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Fetch keys eagerly
//! let verifier = JwksVerifier::new("https://auth.example.com/.well-known/jwks.json")
//!     .await?
//!     .with_cache_ttl(Duration::from_secs(3600))
//!     .with_issuer("https://auth.example.com")
//!     .with_audience("my-api");
//!
//! // Or fetch on first use
//! let verifier = JwksVerifier::firebase("my-project")?;
//! # Ok(())
//! # }
//! ```

use super::jwt::{map_decode_error, Claims};
use super::{AuthError, IdentityVerifier, VerifiedIdentity};
use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Public keys used to sign Firebase ID tokens
pub const FIREBASE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

/// Issuer prefix of Firebase ID tokens; the project id follows
pub const FIREBASE_ISSUER_PREFIX: &str = "https://securetoken.google.com/";

/// Default key cache lifetime (1 hour)
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Timeout for a single key set fetch
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Minimum spacing of refetches triggered by an unknown `kid`
const MIN_FORCED_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// A single JSON Web Key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA" or "EC")
    pub kty: String,

    #[serde(default)]
    pub kid: Option<String>,

    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    #[serde(default)]
    pub alg: Option<String>,

    // RSA
    #[serde(default)]
    pub n: Option<String>,
    #[serde(default)]
    pub e: Option<String>,

    // EC
    #[serde(default)]
    pub crv: Option<String>,
    #[serde(default)]
    pub x: Option<String>,
    #[serde(default)]
    pub y: Option<String>,
}

impl Jwk {
    /// Convert the key into a `jsonwebtoken` decoding key
    pub fn to_decoding_key(&self) -> Result<DecodingKey, AuthError> {
        match self.kty.as_str() {
            "RSA" => {
                let (n, e) = self
                    .n
                    .as_ref()
                    .zip(self.e.as_ref())
                    .ok_or_else(|| AuthError::InvalidToken("RSA key missing n or e".into()))?;
                DecodingKey::from_rsa_components(n, e)
                    .map_err(|e| AuthError::InvalidToken(format!("Invalid RSA key: {}", e)))
            }
            "EC" => {
                let (x, y) = self
                    .x
                    .as_ref()
                    .zip(self.y.as_ref())
                    .ok_or_else(|| AuthError::InvalidToken("EC key missing x or y".into()))?;
                DecodingKey::from_ec_components(x, y)
                    .map_err(|e| AuthError::InvalidToken(format!("Invalid EC key: {}", e)))
            }
            other => Err(AuthError::InvalidToken(format!(
                "Unsupported key type: {}",
                other
            ))),
        }
    }

    /// Algorithm declared by the key, if any
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.alg.as_deref().and_then(asymmetric_algorithm)
    }
}

/// Asymmetric algorithms accepted from a key set. HMAC is never accepted
/// here, a public key must not double as a shared secret.
fn asymmetric_algorithm(name: &str) -> Option<Algorithm> {
    match name {
        "RS256" => Some(Algorithm::RS256),
        "RS384" => Some(Algorithm::RS384),
        "RS512" => Some(Algorithm::RS512),
        "ES256" => Some(Algorithm::ES256),
        "ES384" => Some(Algorithm::ES384),
        _ => None,
    }
}

/// JSON Web Key Set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    fn find(&self, kid: Option<&str>) -> Option<&Jwk> {
        match kid {
            Some(kid) => self.keys.iter().find(|k| k.kid.as_deref() == Some(kid)),
            None => self.keys.first(),
        }
    }
}

struct CachedJwks {
    jwks: Jwks,
    /// `None` until the first successful fetch
    fetched_at: Option<Instant>,
    /// Last refetch caused by an unknown `kid`, successful or not
    last_forced_refresh: Option<Instant>,
}

impl CachedJwks {
    fn needs_refresh(&self, ttl: Duration, force: bool) -> bool {
        let stale = self.fetched_at.map_or(true, |at| at.elapsed() > ttl);
        stale
            || (force
                && self
                    .last_forced_refresh
                    .map_or(true, |at| at.elapsed() >= MIN_FORCED_REFRESH_INTERVAL))
    }
}

/// JWKS-based token verifier
pub struct JwksVerifier {
    /// Key set endpoint; `None` for a static key set
    endpoint: Option<String>,
    cache: Arc<RwLock<CachedJwks>>,
    cache_ttl: Duration,
    client: reqwest::Client,
    required_issuer: Option<String>,
    required_audience: Option<String>,
}

impl JwksVerifier {
    fn build(
        endpoint: Option<String>,
        jwks: Jwks,
        fetched_at: Option<Instant>,
    ) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| AuthError::ConfigError(format!("Failed to build JWKS client: {}", e)))?;

        Ok(Self {
            endpoint,
            cache: Arc::new(RwLock::new(CachedJwks {
                jwks,
                fetched_at,
                last_forced_refresh: None,
            })),
            cache_ttl: DEFAULT_CACHE_TTL,
            client,
            required_issuer: None,
            required_audience: None,
        })
    }

    /// Fetch the key set from `endpoint` now
    pub async fn new(endpoint: &str) -> Result<Self, AuthError> {
        let verifier = Self::lazy(endpoint)?;
        let jwks = Self::fetch_jwks(&verifier.client, endpoint).await?;
        {
            let mut cache = verifier.cache.write().await;
            cache.jwks = jwks;
            cache.fetched_at = Some(Instant::now());
        }
        Ok(verifier)
    }

    /// Defer fetching the key set until the first verification
    pub fn lazy(endpoint: &str) -> Result<Self, AuthError> {
        Self::build(Some(endpoint.to_string()), Jwks::default(), None)
    }

    /// Static key set parsed from JSON; never refreshed
    pub fn from_json(json: &str) -> Result<Self, AuthError> {
        let jwks: Jwks =
            serde_json::from_str(json).map_err(|e| AuthError::ConfigError(e.to_string()))?;
        Self::build(None, jwks, Some(Instant::now()))
    }

    /// Verifier for Firebase ID tokens of `project_id`
    pub fn firebase(project_id: &str) -> Result<Self, AuthError> {
        Ok(Self::lazy(FIREBASE_JWKS_URL)?
            .with_issuer(&format!("{}{}", FIREBASE_ISSUER_PREFIX, project_id))
            .with_audience(project_id))
    }

    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    /// Require the `iss` claim to equal `issuer`
    #[must_use]
    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.required_issuer = Some(issuer.to_string());
        self
    }

    /// Require the `aud` claim to contain `audience`
    #[must_use]
    pub fn with_audience(mut self, audience: &str) -> Self {
        self.required_audience = Some(audience.to_string());
        self
    }

    pub async fn has_keys(&self) -> bool {
        !self.cache.read().await.jwks.keys.is_empty()
    }

    async fn fetch_jwks(client: &reqwest::Client, endpoint: &str) -> Result<Jwks, AuthError> {
        let response = client
            .get(endpoint)
            .send()
            .await
            .map_err(|e| AuthError::JwksFetchError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::JwksFetchError(format!(
                "HTTP {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::JwksFetchError(e.to_string()))
    }

    /// Refetch the key set when it is stale. `force` also refetches a fresh
    /// set, at most once per [`MIN_FORCED_REFRESH_INTERVAL`].
    ///
    /// The fetch runs under the write lock, so concurrent callers wait for
    /// it instead of fetching again.
    async fn refresh(&self, force: bool) -> Result<(), AuthError> {
        let Some(endpoint) = &self.endpoint else {
            return Ok(());
        };

        if !self.cache.read().await.needs_refresh(self.cache_ttl, force) {
            return Ok(());
        }

        let mut cache = self.cache.write().await;
        // Another task may have refreshed while we waited for the lock
        if !cache.needs_refresh(self.cache_ttl, force) {
            return Ok(());
        }
        if force {
            cache.last_forced_refresh = Some(Instant::now());
        }

        let jwks = Self::fetch_jwks(&self.client, endpoint).await?;
        tracing::debug!(endpoint = %endpoint, keys = jwks.keys.len(), forced = force, "JWKS refreshed");

        cache.jwks = jwks;
        cache.fetched_at = Some(Instant::now());
        Ok(())
    }

    /// Look up the signing key, refetching once if the `kid` is unknown
    async fn signing_key(&self, kid: Option<&str>) -> Result<Jwk, AuthError> {
        self.refresh(false).await?;

        if let Some(jwk) = self.cache.read().await.jwks.find(kid).cloned() {
            return Ok(jwk);
        }

        // Provider may have rotated keys since the last fetch
        self.refresh(true).await?;
        self.cache
            .read()
            .await
            .jwks
            .find(kid)
            .cloned()
            .ok_or_else(|| {
                AuthError::InvalidToken(format!("Key not found: {}", kid.unwrap_or("<none>")))
            })
    }

    fn validation(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;
        if let Some(issuer) = &self.required_issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.required_audience {
            Some(audience) => {
                validation.set_audience(&[audience]);
                validation.validate_aud = true;
            }
            None => validation.validate_aud = false,
        }
        validation
    }
}

#[async_trait]
impl IdentityVerifier for JwksVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::EmptyToken);
        }

        let header = decode_header(token)
            .map_err(|e| AuthError::InvalidToken(format!("Invalid token header: {}", e)))?;

        let jwk = self.signing_key(header.kid.as_deref()).await?;
        let decoding_key = jwk.to_decoding_key()?;

        let algorithm = jwk
            .algorithm()
            .or(match header.alg {
                Algorithm::RS256
                | Algorithm::RS384
                | Algorithm::RS512
                | Algorithm::ES256
                | Algorithm::ES384 => Some(header.alg),
                _ => None,
            })
            .ok_or_else(|| AuthError::InvalidToken("Unsupported algorithm".into()))?;

        let token_data = decode::<Claims>(token, &decoding_key, &self.validation(algorithm))
            .map_err(map_decode_error)?;

        token_data.claims.into_identity()
    }
}
