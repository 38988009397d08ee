//! Request-scoped security context
//!
//! The context is handed downstream two ways: attached to the request's
//! extensions, and installed as a tokio task-local for the duration of the
//! downstream future. The task-local is removed when that future completes
//! or is dropped, so it never outlives the request.

use super::CanonicalIdentity;
use hyper::Request;
use std::future::Future;

tokio::task_local! {
    static CURRENT: SecurityContext;
}

/// Verified principal of the request currently being processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityContext {
    principal: CanonicalIdentity,
    authorities: Vec<String>,
}

impl SecurityContext {
    /// Context for `principal` with no authorities
    pub fn authenticated(principal: CanonicalIdentity) -> Self {
        Self {
            principal,
            authorities: Vec::new(),
        }
    }

    pub fn principal(&self) -> &CanonicalIdentity {
        &self.principal
    }

    pub fn authorities(&self) -> &[String] {
        &self.authorities
    }

    /// Context of the enclosing [`SecurityContext::scope`], if any
    pub fn current() -> Option<SecurityContext> {
        CURRENT.try_with(Clone::clone).ok()
    }

    /// Context attached to `request` by the authentication middleware
    pub fn from_request<B>(request: &Request<B>) -> Option<&SecurityContext> {
        request.extensions().get::<SecurityContext>()
    }

    /// Run `future` with this context as [`SecurityContext::current`]
    pub async fn scope<F>(self, future: F) -> F::Output
    where
        F: Future,
    {
        CURRENT.scope(self, future).await
    }
}
