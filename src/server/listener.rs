//! HTTP/1 listener
//!
//! One tokio task per connection, served by hyper's `http1` connection
//! builder. Binding happens in [`GatewayServer::new`] so that callers can
//! bind port 0 and read back the assigned address before running.

use super::{Gateway, ServerError};
use crate::config::Config;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Gateway HTTP server
pub struct GatewayServer {
    gateway: Gateway,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl GatewayServer {
    /// Bind the configured address and build the pipeline from `config`
    pub async fn new(config: Config) -> Result<Self, ServerError> {
        let gateway = Gateway::from_config(&config)?;
        Self::bind(&config.server.address, gateway).await
    }

    /// Bind `address` and serve requests with `gateway`
    pub async fn bind(address: &str, gateway: Gateway) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::BindError(format!("Invalid address: {}", e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {}", e)))?;

        info!("Server bound to {}", local_addr);

        Ok(Self {
            gateway,
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until the process is interrupted
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serve until `shutdown` completes. In-flight connections finish on
    /// their own tasks.
    pub async fn run_until<S>(self, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()>,
    {
        info!("Starting gateway on {}", self.local_addr);
        tokio::pin!(shutdown);

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down gateway");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let gateway = self.gateway.clone();

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let gateway = gateway.clone();
                    async move { Ok::<_, Infallible>(gateway.handle(req).await) }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Error serving connection from {}: {}", peer_addr, e);
                }
            });
        }
    }
}
