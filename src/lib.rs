//! Gatehouse Library
//!
//! Identity-propagating API gateway. Bearer tokens are verified once at the
//! edge, turned into a stable canonical identity and forwarded to upstream
//! services in a trusted header that clients cannot forge.
//!
//! # Features
//!
//! - **Fail Closed**: a presented credential that does not verify is a 401
//! - **Header Sanitization**: client-supplied identity headers are always dropped
//! - **Stable Identities**: UUIDv5 of the provider subject under a fixed namespace
//! - **Pluggable Providers**: static-key JWT, JWKS, Firebase
//! - **Route Policy**: public / authenticated rules per path and method
//!
//! # Example
//!
//! ```no_run
//! use gatehouse::{config::Config, server::GatewayServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let server = GatewayServer::new(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod authz;
pub mod config;
pub mod identity;
pub mod metrics;
pub mod middleware;
pub mod proxy;
pub mod router;
pub mod server;

// Re-export commonly used types
pub use config::Config;
pub use identity::{CanonicalIdentity, IdentityNormalizer, SecurityContext};
pub use middleware::AuthenticationMiddleware;
pub use server::GatewayServer;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
