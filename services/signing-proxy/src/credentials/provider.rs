//! Base identity providers.

use std::sync::Arc;

use crate::error::ProxyError;

use super::model::Credentials;

/// Source of the proxy's own base credentials.
pub trait CredentialsProvider: Send + Sync {
    /// Returns the base credentials or a configuration error.
    fn base_credentials(&self) -> Result<Arc<Credentials>, ProxyError>;
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Reads `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and
/// `AWS_SESSION_TOKEN` on every call, so rotated runtime credentials are
/// picked up without a restart.
pub struct EnvCredentialsProvider {
    lookup: Lookup,
}

impl EnvCredentialsProvider {
    /// Reads the process environment.
    #[must_use]
    pub fn new() -> Self {
        Self::with_lookup(|name| std::env::var(name).ok())
    }

    /// Reads from a custom variable source.
    #[must_use]
    pub fn with_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            lookup: Box::new(lookup),
        }
    }

    fn var(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }
}

impl Default for EnvCredentialsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialsProvider for EnvCredentialsProvider {
    fn base_credentials(&self) -> Result<Arc<Credentials>, ProxyError> {
        let access_key_id = self
            .var("AWS_ACCESS_KEY_ID")
            .ok_or_else(|| ProxyError::configuration("AWS_ACCESS_KEY_ID is not set"))?;
        let secret = self
            .var("AWS_SECRET_ACCESS_KEY")
            .ok_or_else(|| ProxyError::configuration("AWS_SECRET_ACCESS_KEY is not set"))?;
        Ok(Arc::new(Credentials::new(
            access_key_id,
            secret,
            self.var("AWS_SESSION_TOKEN"),
        )))
    }
}

/// Fixed credentials.
pub struct StaticCredentialsProvider {
    credentials: Arc<Credentials>,
}

impl StaticCredentialsProvider {
    /// Wraps a fixed credential set.
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials: Arc::new(credentials),
        }
    }
}

impl CredentialsProvider for StaticCredentialsProvider {
    fn base_credentials(&self) -> Result<Arc<Credentials>, ProxyError> {
        Ok(Arc::clone(&self.credentials))
    }
}
