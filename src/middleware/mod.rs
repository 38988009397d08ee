//! Authentication middleware
//!
//! Runs in front of routing for every request:
//!
//! ```text
//! Start → Sanitized ─┬─ no bearer credential ──────────────→ AnonymousPass
//!                    └─ Verifying ─┬─ verified ───────────→ AuthenticatedPass
//!                                  └─ error / timeout ────→ Rejected (401)
//! ```
//!
//! Both pass states hand the request to `next`; `Rejected` completes the
//! exchange with an empty 401 and `next` is never called.

use crate::auth::{bearer_token, AuthError, IdentityVerifier};
use crate::config::{ConfigError, IdentityConfig};
use crate::identity::{IdentityNormalizer, SecurityContext};
use crate::metrics;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{Request, Response, StatusCode};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

mod sanitizer;

pub use sanitizer::{RequestSanitizer, DEFAULT_IDENTITY_HEADER};

/// Default upper bound on a provider round trip (5 seconds)
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Terminal state of one request in the middleware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    AnonymousPass,
    AuthenticatedPass,
    Rejected,
}

impl AuthOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthOutcome::AnonymousPass => "anonymous",
            AuthOutcome::AuthenticatedPass => "authenticated",
            AuthOutcome::Rejected => "rejected",
        }
    }
}

/// Verifies bearer credentials and propagates the canonical identity
pub struct AuthenticationMiddleware {
    verifier: Arc<dyn IdentityVerifier>,
    normalizer: IdentityNormalizer,
    sanitizer: RequestSanitizer,
    timeout: Duration,
}

impl AuthenticationMiddleware {
    /// Middleware with default header name, namespace and timeout
    pub fn new(verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self {
            verifier,
            normalizer: IdentityNormalizer::default(),
            sanitizer: RequestSanitizer::default(),
            timeout: DEFAULT_VERIFY_TIMEOUT,
        }
    }

    /// Middleware configured from the `identity` section
    pub fn from_config(
        config: &IdentityConfig,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> Result<Self, ConfigError> {
        let header = HeaderName::from_bytes(config.header.as_bytes()).map_err(|e| {
            ConfigError::ValidationError(format!("Invalid identity header '{}': {}", config.header, e))
        })?;

        Ok(Self::new(verifier)
            .with_identity_header(header)
            .with_normalizer(IdentityNormalizer::new(config.namespace_uuid()?))
            .with_timeout(Duration::from_millis(config.verify_timeout_ms)))
    }

    #[must_use]
    pub fn with_normalizer(mut self, normalizer: IdentityNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    #[must_use]
    pub fn with_identity_header(mut self, header: HeaderName) -> Self {
        self.sanitizer = RequestSanitizer::new(header);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn identity_header(&self) -> &HeaderName {
        self.sanitizer.identity_header()
    }

    /// Authenticate `request` and hand it to `next`, or reject it.
    ///
    /// On success `next` runs inside [`SecurityContext::scope`] and the
    /// context is also stored in the request extensions.
    pub async fn process<B, R, F, Fut>(&self, request: Request<B>, next: F) -> Response<R>
    where
        F: FnOnce(Request<B>) -> Fut,
        Fut: Future<Output = Response<R>>,
        R: Default,
    {
        let mut request = self.sanitizer.sanitize(request);

        let Some(token) = bearer_token(request.headers()).map(str::to_owned) else {
            debug!(path = %request.uri().path(), "No bearer credential, passing anonymously");
            metrics::record_auth_outcome(AuthOutcome::AnonymousPass.as_str());
            return next(request).await;
        };

        let started = Instant::now();
        let result = self.authenticate(&token).await;
        metrics::record_verify_duration(result.is_ok(), started.elapsed().as_secs_f64());

        match result {
            Ok((context, header_value)) => {
                info!(
                    principal = %context.principal(),
                    path = %request.uri().path(),
                    "Request authenticated"
                );
                metrics::record_auth_outcome(AuthOutcome::AuthenticatedPass.as_str());

                request
                    .headers_mut()
                    .insert(self.identity_header().clone(), header_value);
                request.extensions_mut().insert(context.clone());
                context.scope(next(request)).await
            }
            Err(e) => {
                warn!(
                    error = %e,
                    kind = e.kind(),
                    token_len = token.len(),
                    path = %request.uri().path(),
                    "Bearer credential rejected"
                );
                metrics::record_auth_failure(e.kind());
                metrics::record_auth_outcome(AuthOutcome::Rejected.as_str());
                unauthorized()
            }
        }
    }

    /// Verify, normalize and build everything the success path needs, so
    /// that no request mutation happens before verification is final.
    async fn authenticate(&self, token: &str) -> Result<(SecurityContext, HeaderValue), AuthError> {
        if token.is_empty() {
            return Err(AuthError::EmptyToken);
        }

        let identity = tokio::time::timeout(self.timeout, self.verifier.verify(token))
            .await
            .map_err(|_| AuthError::Timeout(self.timeout))??;

        if identity.subject.is_empty() {
            return Err(AuthError::InvalidToken("Provider returned an empty subject".into()));
        }

        let principal = self.normalizer.normalize(&identity.subject);
        let header_value = HeaderValue::from_str(&principal.to_string())
            .map_err(|e| AuthError::Internal(e.to_string()))?;

        Ok((SecurityContext::authenticated(principal), header_value))
    }
}

/// Empty-bodied 401
fn unauthorized<R: Default>() -> Response<R> {
    let mut response = Response::new(R::default());
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
}
