//! Credential broker.
//!
//! Resolves the identity used to sign one backend call: the proxy's base
//! identity when no tenant context is present, otherwise credentials from
//! an `AssumeRole` exchange narrowed by the tenant's session policy. A
//! failed exchange never falls back to the base identity.

mod broker;
mod cache;
mod model;
mod provider;

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::context::TenantScope;
use crate::error::ProxyError;
use crate::scope::ScopePolicy;

pub use broker::{session_name, CredentialBroker, StsCredentialBroker, CREDENTIAL_DURATION_SECS};
pub use cache::{CacheKey, CredentialCache, REFRESH_MARGIN_SECS};
pub use model::{Credentials, ResolvedCredentials};
pub use provider::{CredentialsProvider, EnvCredentialsProvider, StaticCredentialsProvider};

/// Combines the base identity, the broker and the optional cache.
pub struct CredentialResolver {
    provider: Arc<dyn CredentialsProvider>,
    broker: Arc<dyn CredentialBroker>,
    cache: Option<CredentialCache>,
}

impl CredentialResolver {
    /// Creates a resolver without caching.
    #[must_use]
    pub fn new(provider: Arc<dyn CredentialsProvider>, broker: Arc<dyn CredentialBroker>) -> Self {
        Self {
            provider,
            broker,
            cache: None,
        }
    }

    /// Enables the tenant-keyed cache.
    #[must_use]
    pub fn with_cache(mut self, cache: CredentialCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// The proxy's base credentials.
    pub fn base_credentials(&self) -> Result<Arc<Credentials>, ProxyError> {
        self.provider.base_credentials()
    }

    /// Resolves signing credentials for one request.
    pub async fn resolve(
        &self,
        scope: Option<&TenantScope>,
        policy: Option<&ScopePolicy>,
    ) -> Result<ResolvedCredentials, ProxyError> {
        let base = self.provider.base_credentials()?;

        let (Some(scope), Some(policy)) = (scope, policy) else {
            return Ok(ResolvedCredentials::Default(base));
        };

        let key = self.cache.as_ref().map(|_| CacheKey::new(scope, policy));
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Some(hit) = cache.get(key, Utc::now()) {
                debug!(app_id = %scope.app_id, tenant_id = %scope.tenant_id, "Scoped credentials served from cache");
                return Ok(ResolvedCredentials::Scoped(hit));
            }
        }

        let scoped = Arc::new(self.broker.assume_scoped(&base, scope, policy).await?);

        if let (Some(cache), Some(key)) = (&self.cache, key) {
            cache.insert(key, Arc::clone(&scoped));
        }
        Ok(ResolvedCredentials::Scoped(scoped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::scope::{PolicyDocument, Statement, POLICY_VERSION};

    struct CountingBroker {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl CredentialBroker for CountingBroker {
        async fn assume_scoped(
            &self,
            _base: &Credentials,
            _scope: &TenantScope,
            _policy: &ScopePolicy,
        ) -> Result<Credentials, ProxyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProxyError::credential_exchange("AccessDenied"));
            }
            let mut creds = Credentials::new("ASIASCOPED", "scoped-secret", Some("tok".to_string()));
            creds.expires_at = Some(Utc::now() + Duration::seconds(900));
            Ok(creds)
        }
    }

    fn resolver(broker: Arc<CountingBroker>) -> CredentialResolver {
        CredentialResolver::new(
            Arc::new(StaticCredentialsProvider::new(Credentials::new("AKIABASE", "base", None))),
            broker,
        )
    }

    fn scope() -> TenantScope {
        TenantScope {
            app_id: "billing".to_string(),
            tenant_id: "acme".to_string(),
        }
    }

    fn policy() -> ScopePolicy {
        ScopePolicy::new(PolicyDocument {
            version: POLICY_VERSION.to_string(),
            statement: vec![Statement::allow("InvokeBackend", &["x:Y"], vec!["arn:a".to_string()])],
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_no_scope_uses_default_identity() {
        let broker = Arc::new(CountingBroker { calls: AtomicUsize::new(0), fail: false });
        let resolved = resolver(broker.clone()).resolve(None, None).await.unwrap();
        assert_eq!(resolved.identity(), "default");
        assert_eq!(resolved.credentials().access_key_id, "AKIABASE");
        assert_eq!(broker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_scope_uses_broker() {
        let broker = Arc::new(CountingBroker { calls: AtomicUsize::new(0), fail: false });
        let resolved = resolver(broker.clone())
            .resolve(Some(&scope()), Some(&policy()))
            .await
            .unwrap();
        assert!(resolved.is_scoped());
        assert_eq!(resolved.credentials().access_key_id, "ASIASCOPED");
    }

    #[tokio::test]
    async fn test_failure_does_not_fall_back() {
        let broker = Arc::new(CountingBroker { calls: AtomicUsize::new(0), fail: true });
        let err = resolver(broker)
            .resolve(Some(&scope()), Some(&policy()))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::CredentialExchange { .. }));
    }

    #[tokio::test]
    async fn test_without_cache_every_request_exchanges() {
        let broker = Arc::new(CountingBroker { calls: AtomicUsize::new(0), fail: false });
        let resolver = resolver(broker.clone());
        for _ in 0..3 {
            resolver.resolve(Some(&scope()), Some(&policy())).await.unwrap();
        }
        assert_eq!(broker.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cache_reuses_credentials() {
        let broker = Arc::new(CountingBroker { calls: AtomicUsize::new(0), fail: false });
        let resolver = resolver(broker.clone()).with_cache(CredentialCache::new(8));
        for _ in 0..3 {
            resolver.resolve(Some(&scope()), Some(&policy())).await.unwrap();
        }
        assert_eq!(broker.calls.load(Ordering::SeqCst), 1);
    }
}
