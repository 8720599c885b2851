//! Signing Proxy - tenant-isolated request signing for hosted agent runtimes.
//!
//! Sits between an already-authenticated caller and a backend agent
//! runtime. Per request it checks session isolation, synthesizes a
//! tenant-scoped session policy, exchanges the proxy's base identity for
//! narrowed short-lived credentials, signs the backend call with SigV4 and
//! relays the response as an NDJSON stream.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod isolation;
pub mod observability;
pub mod proxy;
pub mod relay;
pub mod scope;
pub mod server;
pub mod shutdown;
pub mod signing;

pub use config::{ConfigError, ProxyConfig};
pub use context::{AuthorizerContext, InboundRequest, TenantScope};
pub use error::{ErrorBody, InputError, ProxyError};
pub use proxy::{ProxyStream, SigningProxy, SigningProxyBuilder};
pub use relay::StreamFrame;
pub use server::{router, AppState};
