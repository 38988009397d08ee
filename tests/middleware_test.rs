//! Authentication Middleware Integration Tests
//!
//! Drives `AuthenticationMiddleware::process` with a mocked identity verifier
//! and a recording `next` handler.

use async_trait::async_trait;
use gatehouse::auth::{AuthError, IdentityVerifier, VerifiedIdentity};
use gatehouse::identity::{IdentityNormalizer, SecurityContext};
use gatehouse::middleware::AuthenticationMiddleware;
use hyper::{Request, Response, StatusCode};
use mockall::mock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

mock! {
    pub Verifier {}

    #[async_trait]
    impl IdentityVerifier for Verifier {
        async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError>;
    }
}

/// What the downstream handler observed
#[derive(Debug, Default, Clone, PartialEq)]
struct Seen {
    identity_headers: Vec<String>,
    principal: Option<String>,
    extension_principal: Option<String>,
}

/// Run the middleware; returns the response and what `next` saw, if it ran
async fn run(
    middleware: &AuthenticationMiddleware,
    request: Request<()>,
) -> (Response<String>, Option<Seen>) {
    let seen = Arc::new(std::sync::Mutex::new(None));
    let sink = Arc::clone(&seen);

    let response = middleware
        .process(request, |req: Request<()>| async move {
            let observed = Seen {
                identity_headers: req
                    .headers()
                    .get_all("x-user-uid")
                    .iter()
                    .map(|v| v.to_str().unwrap().to_string())
                    .collect(),
                principal: SecurityContext::current().map(|c| c.principal().to_string()),
                extension_principal: SecurityContext::from_request(&req)
                    .map(|c| c.principal().to_string()),
            };
            *sink.lock().unwrap() = Some(observed);
            Response::new("downstream".to_string())
        })
        .await;

    let seen = seen.lock().unwrap().clone();
    (response, seen)
}

fn request(headers: &[(&str, &str)]) -> Request<()> {
    let mut builder = Request::get("/api/review/submit");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(()).unwrap()
}

fn canonical(subject: &str) -> String {
    IdentityNormalizer::default().normalize(subject).to_string()
}

fn unused_verifier() -> MockVerifier {
    let mut verifier = MockVerifier::new();
    verifier.expect_verify().never();
    verifier
}

fn middleware(verifier: MockVerifier) -> AuthenticationMiddleware {
    AuthenticationMiddleware::new(Arc::new(verifier))
}

mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_authorization_header_passes_anonymously() {
        let mw = middleware(unused_verifier());

        let (response, seen) = run(&mw, request(&[])).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body(), "downstream");
        let seen = seen.expect("next should run");
        assert!(seen.identity_headers.is_empty());
        assert_eq!(seen.principal, None);
        assert_eq!(seen.extension_principal, None);
    }

    #[tokio::test]
    async fn test_basic_auth_with_spoofed_identity_is_stripped() {
        let mw = middleware(unused_verifier());

        let (response, seen) = run(
            &mw,
            request(&[("authorization", "Basic abc123"), ("x-user-uid", "attacker")]),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let seen = seen.expect("next should run");
        assert!(seen.identity_headers.is_empty());
        assert_eq!(seen.principal, None);
    }

    #[tokio::test]
    async fn test_valid_token_injects_canonical_identity() {
        let mut verifier = MockVerifier::new();
        verifier
            .expect_verify()
            .withf(|token| token == "validToken123")
            .times(1)
            .returning(|_| Ok(VerifiedIdentity::new("abc")));
        let mw = middleware(verifier);

        let (response, seen) = run(
            &mw,
            request(&[("authorization", "Bearer validToken123")]),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let seen = seen.expect("next should run");
        assert_eq!(seen.identity_headers, vec![canonical("abc")]);
        assert_eq!(seen.principal, Some(canonical("abc")));
        assert_eq!(seen.extension_principal, Some(canonical("abc")));
    }

    #[tokio::test]
    async fn test_spoofed_identity_replaced_by_verified_one() {
        let mut verifier = MockVerifier::new();
        verifier
            .expect_verify()
            .times(1)
            .returning(|_| Ok(VerifiedIdentity::new("abc")));
        let mw = middleware(verifier);

        let mut req = request(&[("authorization", "Bearer validToken123")]);
        req.headers_mut()
            .append("x-user-uid", "attacker-1".parse().unwrap());
        req.headers_mut()
            .append("X-User-Uid", "attacker-2".parse().unwrap());

        let (_, seen) = run(&mw, req).await;

        assert_eq!(seen.unwrap().identity_headers, vec![canonical("abc")]);
    }

    #[tokio::test]
    async fn test_invalid_token_rejected_without_calling_next() {
        let mut verifier = MockVerifier::new();
        verifier
            .expect_verify()
            .withf(|token| token == "invalidToken")
            .times(1)
            .returning(|_| Err(AuthError::InvalidSignature));
        let mw = middleware(verifier);

        let (response, seen) = run(
            &mw,
            request(&[("authorization", "Bearer invalidToken"), ("x-user-uid", "attacker")]),
        )
        .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.body().is_empty());
        assert!(seen.is_none(), "next must not run on rejection");
    }

    #[tokio::test]
    async fn test_every_failure_kind_is_401() {
        let failures = vec![
            AuthError::TokenExpired,
            AuthError::InvalidToken("revoked".into()),
            AuthError::JwksFetchError("connection refused".into()),
            AuthError::Internal("provider exploded".into()),
        ];

        for failure in failures {
            let kind = failure.kind();
            let failure = std::sync::Mutex::new(Some(failure));
            let mut verifier = MockVerifier::new();
            verifier
                .expect_verify()
                .times(1)
                .returning(move |_| Err(failure.lock().unwrap().take().unwrap()));
            let mw = middleware(verifier);

            let (response, seen) = run(&mw, request(&[("authorization", "Bearer t")])).await;

            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "kind {}", kind);
            assert!(seen.is_none());
        }
    }

    #[tokio::test]
    async fn test_empty_bearer_token_rejected() {
        let mw = middleware(unused_verifier());

        let (response, seen) = run(&mw, request(&[("authorization", "Bearer ")])).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(seen.is_none());
    }

    #[tokio::test]
    async fn test_empty_subject_fails_closed() {
        let mut verifier = MockVerifier::new();
        verifier
            .expect_verify()
            .times(1)
            .returning(|_| Ok(VerifiedIdentity::new("")));
        let mw = middleware(verifier);

        let (response, seen) = run(&mw, request(&[("authorization", "Bearer t")])).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(seen.is_none());
    }

    #[tokio::test]
    async fn test_same_subject_same_identity() {
        let mut verifier = MockVerifier::new();
        verifier
            .expect_verify()
            .times(3)
            .returning(|token| match token {
                "token-a1" | "token-a2" => Ok(VerifiedIdentity::new("alice")),
                _ => Ok(VerifiedIdentity::new("bob")),
            });
        let mw = middleware(verifier);

        let (_, a1) = run(&mw, request(&[("authorization", "Bearer token-a1")])).await;
        let (_, a2) = run(&mw, request(&[("authorization", "Bearer token-a2")])).await;
        let (_, b) = run(&mw, request(&[("authorization", "Bearer token-b")])).await;

        let (a1, a2, b) = (a1.unwrap(), a2.unwrap(), b.unwrap());
        assert_eq!(a1.identity_headers, a2.identity_headers);
        assert_ne!(a1.identity_headers, b.identity_headers);
    }
}

/// Verifier that never answers within the test's timeout
struct SlowVerifier {
    calls: AtomicUsize,
}

#[async_trait]
impl IdentityVerifier for SlowVerifier {
    async fn verify(&self, _token: &str) -> Result<VerifiedIdentity, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(VerifiedIdentity::new("too-late"))
    }
}

/// Verifier that answers after a short delay with the token as subject
struct EchoVerifier;

#[async_trait]
impl IdentityVerifier for EchoVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(VerifiedIdentity::new(token))
    }
}

/// Verifier that never answers; flags `dropped` when its future is dropped
struct PendingVerifier {
    dropped: Arc<AtomicBool>,
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl IdentityVerifier for PendingVerifier {
    async fn verify(&self, _token: &str) -> Result<VerifiedIdentity, AuthError> {
        let _guard = DropFlag(Arc::clone(&self.dropped));
        std::future::pending().await
    }
}

mod concurrency {
    use super::*;

    #[tokio::test]
    async fn test_verification_timeout_rejects() {
        let verifier = Arc::new(SlowVerifier {
            calls: AtomicUsize::new(0),
        });
        let mw = AuthenticationMiddleware::new(verifier.clone())
            .with_timeout(Duration::from_millis(50));

        let started = std::time::Instant::now();
        let (response, seen) = run(&mw, request(&[("authorization", "Bearer slow")])).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(seen.is_none());
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_keep_their_own_identity() {
        let mw = Arc::new(AuthenticationMiddleware::new(Arc::new(EchoVerifier)));

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let mw = Arc::clone(&mw);
                tokio::spawn(async move {
                    let subject = format!("user-{}", i);
                    let auth = format!("Bearer {}", subject);
                    let (_, seen) = run(&mw, request(&[("authorization", auth.as_str())])).await;
                    (subject, seen.unwrap())
                })
            })
            .collect();

        for handle in handles {
            let (subject, seen) = handle.await.unwrap();
            assert_eq!(seen.identity_headers, vec![canonical(&subject)]);
            assert_eq!(seen.principal, Some(canonical(&subject)));
        }
    }

    #[tokio::test]
    async fn test_slow_verification_does_not_block_anonymous_traffic() {
        let mw = Arc::new(
            AuthenticationMiddleware::new(Arc::new(SlowVerifier {
                calls: AtomicUsize::new(0),
            }))
            .with_timeout(Duration::from_secs(10)),
        );

        let slow = {
            let mw = Arc::clone(&mw);
            tokio::spawn(async move { run(&mw, request(&[("authorization", "Bearer slow")])).await })
        };

        let (response, seen) = tokio::time::timeout(Duration::from_secs(1), run(&mw, request(&[])))
            .await
            .expect("anonymous request should not wait on verification");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(seen.is_some());

        slow.abort();
    }

    #[tokio::test]
    async fn test_context_does_not_outlive_request() {
        let mut verifier = MockVerifier::new();
        verifier
            .expect_verify()
            .returning(|_| Ok(VerifiedIdentity::new("abc")));
        let mw = middleware(verifier);

        let _ = run(&mw, request(&[("authorization", "Bearer t")])).await;
        assert!(SecurityContext::current().is_none());

        let (_, seen) = run(&mw, request(&[])).await;
        assert_eq!(seen.unwrap().principal, None);
    }

    #[tokio::test]
    async fn test_cancelled_request_never_reaches_next() {
        let dropped = Arc::new(AtomicBool::new(false));
        let mw = AuthenticationMiddleware::new(Arc::new(PendingVerifier {
            dropped: Arc::clone(&dropped),
        }))
        .with_timeout(Duration::from_secs(60));

        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let result = tokio::time::timeout(
            Duration::from_millis(10),
            mw.process(
                request(&[("authorization", "Bearer pending")]),
                move |_req: Request<()>| async move {
                    flag.store(true, Ordering::SeqCst);
                    Response::new(String::new())
                },
            ),
        )
        .await;

        assert!(result.is_err(), "request should have been cancelled");
        assert!(!called.load(Ordering::SeqCst));
        assert!(dropped.load(Ordering::SeqCst), "verification must stop with the request");
        assert!(SecurityContext::current().is_none());
    }
}
