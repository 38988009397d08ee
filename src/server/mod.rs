//! HTTP server module
//!
//! Accepts connections, answers the health check and sends everything else
//! through authentication and the authorizing proxy.

use thiserror::Error;

pub mod gateway;
pub mod listener;

pub use gateway::Gateway;
pub use listener::GatewayServer;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    RuntimeError(String),
}

impl From<crate::config::ConfigError> for ServerError {
    fn from(e: crate::config::ConfigError) -> Self {
        ServerError::ConfigError(e.to_string())
    }
}

impl From<crate::auth::AuthError> for ServerError {
    fn from(e: crate::auth::AuthError) -> Self {
        ServerError::ConfigError(e.to_string())
    }
}

impl From<crate::proxy::ProxyError> for ServerError {
    fn from(e: crate::proxy::ProxyError) -> Self {
        ServerError::ConfigError(e.to_string())
    }
}
