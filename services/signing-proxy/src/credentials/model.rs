//! Credential models.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;

/// AWS credentials. Secrets never appear in `Debug` output.
#[derive(Debug)]
pub struct Credentials {
    /// Access key id
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: SecretString,
    /// Session token for temporary credentials
    pub session_token: Option<SecretString>,
    /// Expiry; `None` for long-lived keys
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    /// Long-lived or externally managed credentials without a known expiry.
    #[must_use]
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: SecretString::from(secret_access_key.into()),
            session_token: session_token.map(SecretString::from),
            expires_at: None,
        }
    }

    /// Whether the credentials stay valid for at least `margin` after `now`.
    #[must_use]
    pub fn is_fresh_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.expires_at.map_or(true, |exp| exp - margin > now)
    }
}

/// Which identity signs the outbound request.
#[derive(Debug, Clone)]
pub enum ResolvedCredentials {
    /// The proxy's own base identity (no tenant context)
    Default(Arc<Credentials>),
    /// Tenant-scoped credentials from the exchange
    Scoped(Arc<Credentials>),
}

impl ResolvedCredentials {
    /// The credentials to sign with.
    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        match self {
            Self::Default(c) | Self::Scoped(c) => c,
        }
    }

    /// Label for logs and metrics.
    #[must_use]
    pub const fn identity(&self) -> &'static str {
        match self {
            Self::Default(_) => "default",
            Self::Scoped(_) => "scoped",
        }
    }

    /// Whether tenant-scoped credentials were issued.
    #[must_use]
    pub const fn is_scoped(&self) -> bool {
        matches!(self, Self::Scoped(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_secrets() {
        let creds = Credentials::new("AKIDEXAMPLE", "very-secret-key", Some("session-tok".to_string()));
        let debug = format!("{creds:?}");
        assert!(debug.contains("AKIDEXAMPLE"));
        assert!(!debug.contains("very-secret-key"));
        assert!(!debug.contains("session-tok"));
    }

    #[test]
    fn test_freshness() {
        let now = Utc::now();
        let mut creds = Credentials::new("A", "S", None);
        assert!(creds.is_fresh_at(now, Duration::seconds(300)));

        creds.expires_at = Some(now + Duration::seconds(600));
        assert!(creds.is_fresh_at(now, Duration::seconds(300)));
        assert!(!creds.is_fresh_at(now + Duration::seconds(301), Duration::seconds(300)));
    }

    #[test]
    fn test_identity_labels() {
        let creds = Arc::new(Credentials::new("A", "S", None));
        assert_eq!(ResolvedCredentials::Default(creds.clone()).identity(), "default");
        assert!(ResolvedCredentials::Scoped(creds).is_scoped());
    }
}
