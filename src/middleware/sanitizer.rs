//! Forged identity header removal

use hyper::header::HeaderName;
use hyper::Request;

/// Name of the header carrying the canonical identity downstream
pub const DEFAULT_IDENTITY_HEADER: &str = "x-user-uid";

/// Strips the trusted identity header from inbound requests.
///
/// Only the authentication middleware may set that header, so whatever the
/// client sent is discarded before anything reads it.
#[derive(Debug, Clone)]
pub struct RequestSanitizer {
    identity_header: HeaderName,
}

impl Default for RequestSanitizer {
    fn default() -> Self {
        Self::new(HeaderName::from_static(DEFAULT_IDENTITY_HEADER))
    }
}

impl RequestSanitizer {
    pub fn new(identity_header: HeaderName) -> Self {
        Self { identity_header }
    }

    pub fn identity_header(&self) -> &HeaderName {
        &self.identity_header
    }

    /// Remove every value of the identity header, present or not
    pub fn sanitize<B>(&self, mut request: Request<B>) -> Request<B> {
        if request
            .headers_mut()
            .remove(&self.identity_header)
            .is_some()
        {
            tracing::debug!(header = %self.identity_header, "Dropped client-supplied identity header");
        }
        request
    }
}
