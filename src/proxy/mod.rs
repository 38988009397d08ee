//! Upstream forwarding
//!
//! Applies the route authorization policy, resolves the route, rewrites the
//! path and forwards the request with `reqwest`. The upstream response is
//! relayed back with hop-by-hop headers removed.

use crate::authz::RouteAuthorizationPolicy;
use crate::config::Config;
use crate::identity::SecurityContext;
use crate::metrics;
use crate::router::{canonical_path, Route, RouteTable, RouterError};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::header::{HeaderMap, HeaderName, HOST};
use hyper::{Request, Response, StatusCode};
use std::fmt::Display;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Headers meaningful only for a single connection
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Proxy errors
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Invalid route configuration: {0}")]
    Route(#[from] RouterError),

    #[error("Invalid policy configuration: {0}")]
    Policy(#[from] crate::authz::AuthzError),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Failed to read request body: {0}")]
    Body(String),

    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

/// Authorizing reverse proxy
pub struct Proxy {
    routes: RouteTable,
    policy: RouteAuthorizationPolicy,
    client: reqwest::Client,
}

impl Proxy {
    pub fn new(
        routes: RouteTable,
        policy: RouteAuthorizationPolicy,
    ) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_UPSTREAM_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProxyError::Client(e.to_string()))?;

        Ok(Self {
            routes,
            policy,
            client,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ProxyError> {
        Self::new(
            RouteTable::from_config(&config.routes)?,
            RouteAuthorizationPolicy::from_config(&config.policy)?,
        )
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Authorize, route and forward one request.
    ///
    /// Policy, routing and the upstream URL all use the percent-decoded path;
    /// paths with dot segments or encoded separators get 400.
    ///
    /// Must run inside the scope the authentication middleware sets up; a
    /// request without a current [`SecurityContext`] counts as anonymous.
    pub async fn handle<B>(&self, request: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Display,
    {
        let method = request.method().clone();
        let path = match canonical_path(request.uri().path()) {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "Rejected request path");
                return empty(StatusCode::BAD_REQUEST);
            }
        };
        let context = SecurityContext::current();

        if let Err(e) = self.policy.authorize(&method, &path, context.as_ref()) {
            warn!(error = %e, "Request denied by policy");
            metrics::record_policy_denial(method.as_str());
            return empty(StatusCode::UNAUTHORIZED);
        }

        let Some(route) = self.routes.resolve(&path) else {
            debug!(path = %path, "No route for path");
            return empty(StatusCode::NOT_FOUND);
        };

        let started = Instant::now();
        let response = match self.forward(route, &path, request).await {
            Ok(response) => response,
            Err(ProxyError::Body(e)) => {
                warn!(route = route.id(), error = %e, "Failed to read request body");
                empty(StatusCode::BAD_REQUEST)
            }
            Err(e) => {
                error!(route = route.id(), error = %e, "Upstream request failed");
                empty(StatusCode::BAD_GATEWAY)
            }
        };

        metrics::record_proxy_request(
            route.id(),
            response.status().as_u16(),
            started.elapsed().as_secs_f64(),
        );
        response
    }

    async fn forward<B>(
        &self,
        route: &Route,
        path: &str,
        request: Request<B>,
    ) -> Result<Response<Full<Bytes>>, ProxyError>
    where
        B: Body,
        B::Error: Display,
    {
        let (parts, body) = request.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| ProxyError::Body(e.to_string()))?
            .to_bytes();

        let url = route.target_url(path, parts.uri.query());
        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(HOST);
        for (name, value) in route.add_request_headers() {
            headers.insert(name.clone(), value.clone());
        }

        debug!(route = route.id(), method = %parts.method, url = %url, "Forwarding request");

        let upstream = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = upstream.status();
        let mut upstream_headers = upstream.headers().clone();
        strip_hop_by_hop(&mut upstream_headers);
        let body = upstream.bytes().await?;

        let mut response = Response::new(Full::new(body));
        *response.status_mut() = status;
        *response.headers_mut() = upstream_headers;
        Ok(response)
    }
}

/// Remove hop-by-hop headers, including any named in `Connection`
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(hyper::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

pub(crate) fn empty(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::default());
    *response.status_mut() = status;
    response
}
