//! Prometheus scrape endpoint
//!
//! Serves `/metrics` and `/health` on a listener separate from the gateway
//! so scrapes never pass through authentication or routing.
//!
//! # Example
//!
//! ```no_run
//! use gatehouse::metrics::server::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = MetricsServer::bind("127.0.0.1:9090").await?;
//! println!("Metrics on {}", server.local_addr());
//! let handle = server.spawn();
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, TextEncoder};
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Metrics server error
#[derive(Debug, thiserror::Error)]
pub enum MetricsServerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Bound, not yet serving, metrics listener
pub struct MetricsServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

/// Running metrics server
pub struct MetricsHandle {
    local_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl MetricsServer {
    /// Bind to `address`; port 0 picks a free port
    pub async fn bind(address: &str) -> Result<Self, MetricsServerError> {
        let listener = TcpListener::bind(address).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve in a background task until the handle is shut down
    pub fn spawn(self) -> MetricsHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let local_addr = self.local_addr;
        info!(address = %local_addr, "Metrics server listening");

        let task = tokio::spawn(serve(self.listener, shutdown_rx));

        MetricsHandle {
            local_addr,
            shutdown_tx,
            task,
        }
    }
}

impl MetricsHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for the accept loop to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
    }
}

async fn serve(listener: TcpListener, mut shutdown_rx: oneshot::Receiver<()>) {
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            accepted = listener.accept() => {
                let Ok((stream, _)) = accepted else { continue };
                tokio::spawn(async move {
                    if let Err(e) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service_fn(route))
                        .await
                    {
                        debug!(error = %e, "Metrics connection closed with error");
                    }
                });
            }
        }
    }
}

async fn route(req: Request<hyper::body::Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let (status, content_type, body) = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => match encode_metrics() {
            Some((content_type, buffer)) => (StatusCode::OK, content_type, buffer),
            None => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain".to_string(),
                b"Failed to encode metrics".to_vec(),
            ),
        },
        (&Method::GET, "/health") => (
            StatusCode::OK,
            "application/json".to_string(),
            br#"{"status":"ok"}"#.to_vec(),
        ),
        _ => (
            StatusCode::NOT_FOUND,
            "text/plain".to_string(),
            b"Not Found".to_vec(),
        ),
    };

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    if let Ok(value) = content_type.parse() {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, value);
    }
    Ok(response)
}

fn encode_metrics() -> Option<(String, Vec<u8>)> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer).ok()?;
    Some((encoder.format_type().to_string(), buffer))
}
