//! Optional tenant-keyed credential cache.

use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use parking_lot::Mutex;

use crate::context::TenantScope;
use crate::scope::ScopePolicy;

use super::model::Credentials;

/// Entries are served only while they outlive this margin.
pub const REFRESH_MARGIN_SECS: i64 = 300;

/// Cache key: a policy change yields a different key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    app_id: String,
    tenant_id: String,
    policy_fingerprint: String,
}

impl CacheKey {
    /// Builds the key for a tenant and its current policy.
    #[must_use]
    pub fn new(scope: &TenantScope, policy: &ScopePolicy) -> Self {
        Self {
            app_id: scope.app_id.clone(),
            tenant_id: scope.tenant_id.clone(),
            policy_fingerprint: policy.fingerprint().to_string(),
        }
    }
}

/// LRU of scoped credentials.
pub struct CredentialCache {
    entries: Mutex<LruCache<CacheKey, Arc<Credentials>>>,
    refresh_margin: Duration,
}

impl CredentialCache {
    /// Creates a cache holding up to `capacity` tenant identities.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            refresh_margin: Duration::seconds(REFRESH_MARGIN_SECS),
        }
    }

    /// Returns fresh credentials for `key`, evicting stale ones.
    pub fn get(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<Arc<Credentials>> {
        let mut entries = self.entries.lock();
        let fresh = entries
            .get(key)
            .map(|c| c.expires_at.is_some() && c.is_fresh_at(now, self.refresh_margin))?;
        if fresh {
            entries.get(key).cloned()
        } else {
            entries.pop(key);
            None
        }
    }

    /// Stores credentials; entries without an expiry are never cached.
    pub fn insert(&self, key: CacheKey, credentials: Arc<Credentials>) {
        if credentials.expires_at.is_none() {
            return;
        }
        self.entries.lock().put(key, credentials);
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{PolicyDocument, Statement, POLICY_VERSION};

    fn policy(arn: &str) -> ScopePolicy {
        ScopePolicy::new(PolicyDocument {
            version: POLICY_VERSION.to_string(),
            statement: vec![Statement::allow("InvokeBackend", &["x:Y"], vec![arn.to_string()])],
        })
        .unwrap()
    }

    fn scope() -> TenantScope {
        TenantScope {
            app_id: "billing".to_string(),
            tenant_id: "acme".to_string(),
        }
    }

    fn creds(expires_at: Option<DateTime<Utc>>) -> Arc<Credentials> {
        let mut c = Credentials::new("ASIA", "secret", Some("tok".to_string()));
        c.expires_at = expires_at;
        Arc::new(c)
    }

    #[test]
    fn test_hit_while_fresh() {
        let cache = CredentialCache::new(4);
        let now = Utc::now();
        let key = CacheKey::new(&scope(), &policy("arn:a"));
        cache.insert(key.clone(), creds(Some(now + Duration::seconds(900))));
        assert!(cache.get(&key, now).is_some());
    }

    #[test]
    fn test_miss_inside_refresh_margin() {
        let cache = CredentialCache::new(4);
        let now = Utc::now();
        let key = CacheKey::new(&scope(), &policy("arn:a"));
        cache.insert(key.clone(), creds(Some(now + Duration::seconds(200))));
        assert!(cache.get(&key, now).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_policy_change_misses() {
        let cache = CredentialCache::new(4);
        let now = Utc::now();
        cache.insert(
            CacheKey::new(&scope(), &policy("arn:a")),
            creds(Some(now + Duration::seconds(900))),
        );
        assert!(cache.get(&CacheKey::new(&scope(), &policy("arn:b")), now).is_none());
    }

    #[test]
    fn test_no_expiry_not_cached() {
        let cache = CredentialCache::new(4);
        cache.insert(CacheKey::new(&scope(), &policy("arn:a")), creds(None));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_bound() {
        let cache = CredentialCache::new(1);
        let now = Utc::now();
        let a = CacheKey::new(&scope(), &policy("arn:a"));
        let b = CacheKey::new(&scope(), &policy("arn:b"));
        cache.insert(a.clone(), creds(Some(now + Duration::seconds(900))));
        cache.insert(b.clone(), creds(Some(now + Duration::seconds(900))));
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&a, now).is_none());
        assert!(cache.get(&b, now).is_some());
    }
}
