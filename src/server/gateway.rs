//! Request pipeline: health check, authentication, proxy

use super::ServerError;
use crate::auth::{verifier_from_config, IdentityVerifier};
use crate::config::Config;
use crate::middleware::AuthenticationMiddleware;
use crate::proxy::Proxy;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Body;
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request, Response, StatusCode};
use std::fmt::Display;
use std::sync::Arc;
use tracing::info;

/// Everything a connection needs to serve requests
#[derive(Clone)]
pub struct Gateway {
    middleware: Arc<AuthenticationMiddleware>,
    proxy: Arc<Proxy>,
}

impl Gateway {
    pub fn new(middleware: AuthenticationMiddleware, proxy: Proxy) -> Self {
        Self {
            middleware: Arc::new(middleware),
            proxy: Arc::new(proxy),
        }
    }

    /// Build the pipeline with the verifier the config names
    pub fn from_config(config: &Config) -> Result<Self, ServerError> {
        let verifier = verifier_from_config(&config.identity.provider)?;
        Self::with_verifier(config, verifier)
    }

    /// Build the pipeline around an existing verifier
    pub fn with_verifier(
        config: &Config,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> Result<Self, ServerError> {
        let middleware = AuthenticationMiddleware::from_config(&config.identity, verifier)?;
        let proxy = Proxy::from_config(config)?;

        info!(
            routes = proxy.routes().len(),
            identity_header = %middleware.identity_header(),
            "Gateway pipeline ready"
        );

        Ok(Self::new(middleware, proxy))
    }

    pub async fn handle<B>(&self, request: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Display,
    {
        if request.method() == Method::GET && request.uri().path() == "/health" {
            let mut response = Response::new(Full::new(Bytes::from_static(b"ok")));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, hyper::header::HeaderValue::from_static("text/plain"));
            *response.status_mut() = StatusCode::OK;
            return response;
        }

        let proxy = Arc::clone(&self.proxy);
        self.middleware
            .process(request, |request| async move { proxy.handle(request).await })
            .await
    }
}
