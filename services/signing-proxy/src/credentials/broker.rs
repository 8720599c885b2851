//! Credential exchange against STS `AssumeRole`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Method;
use serde::Deserialize;
use tracing::{instrument, warn};
use url::Url;

use crate::context::TenantScope;
use crate::error::ProxyError;
use crate::scope::{ScopePolicy, MAX_POLICY_BYTES};
use crate::signing::{sign, SigningParams, UnsignedRequest};

use super::model::Credentials;

/// Validity window requested for scoped credentials, in seconds.
pub const CREDENTIAL_DURATION_SECS: i64 = 900;

/// Tolerated clock difference with the authority.
const CLOCK_SKEW_SECS: i64 = 60;

const STS_API_VERSION: &str = "2011-06-15";
const MAX_SESSION_NAME_LEN: usize = 64;

/// Exchanges the base identity plus a session policy for narrowed credentials.
#[async_trait]
pub trait CredentialBroker: Send + Sync {
    /// Obtains credentials scoped to `policy` for one tenant.
    async fn assume_scoped(
        &self,
        base: &Credentials,
        scope: &TenantScope,
        policy: &ScopePolicy,
    ) -> Result<Credentials, ProxyError>;
}

/// Role session name `<app>-<tenant>`, restricted to `[\w+=,.@-]`.
#[must_use]
pub fn session_name(scope: &TenantScope) -> String {
    format!("{}-{}", scope.app_id, scope.tenant_id)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '=' | ',' | '.' | '@' | '-') {
                c
            } else {
                '-'
            }
        })
        .take(MAX_SESSION_NAME_LEN)
        .collect()
}

/// STS-backed broker.
pub struct StsCredentialBroker {
    client: reqwest::Client,
    endpoint: Url,
    region: String,
    role_arn: Option<String>,
    timeout: Duration,
}

impl StsCredentialBroker {
    /// Creates a broker for the given authority endpoint and role.
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        endpoint: Url,
        region: impl Into<String>,
        role_arn: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            endpoint,
            region: region.into(),
            role_arn,
            timeout,
        }
    }

    fn form_body(role_arn: &str, scope: &TenantScope, policy: &ScopePolicy) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair("Action", "AssumeRole")
            .append_pair("Version", STS_API_VERSION)
            .append_pair("RoleArn", role_arn)
            .append_pair("RoleSessionName", &session_name(scope))
            .append_pair("DurationSeconds", &CREDENTIAL_DURATION_SECS.to_string())
            .append_pair("Policy", policy.to_json())
            .finish()
    }
}

#[async_trait]
impl CredentialBroker for StsCredentialBroker {
    #[instrument(skip_all, fields(app_id = %scope.app_id, tenant_id = %scope.tenant_id))]
    async fn assume_scoped(
        &self,
        base: &Credentials,
        scope: &TenantScope,
        policy: &ScopePolicy,
    ) -> Result<Credentials, ProxyError> {
        let role_arn = self
            .role_arn
            .as_deref()
            .ok_or_else(|| ProxyError::credential_exchange("tenant role not configured"))?;

        if policy.packed_len() > MAX_POLICY_BYTES {
            return Err(ProxyError::credential_exchange("session policy too large"));
        }

        let request = UnsignedRequest::new(
            Method::POST,
            self.endpoint.clone(),
            Self::form_body(role_arn, scope, policy),
        )
        .header("content-type", "application/x-www-form-urlencoded; charset=utf-8")
        .header("accept", "application/json");

        let signed = sign(
            request,
            base,
            &SigningParams::service(&self.region, "sts"),
            Utc::now(),
        );

        let response = signed
            .into_reqwest(&self.client)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e.without_url(), "Credential authority unreachable");
                ProxyError::credential_exchange("credential authority unreachable")
            })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| {
            warn!(error = %e.without_url(), "Credential authority response interrupted");
            ProxyError::credential_exchange("credential authority response interrupted")
        })?;

        if !status.is_success() {
            let reason = serde_json::from_slice::<StsErrorResponse>(&body)
                .ok()
                .map(|e| e.error.code)
                .unwrap_or_else(|| format!("credential authority returned {}", status.as_u16()));
            warn!(status = status.as_u16(), reason = %reason, "Credential exchange rejected");
            return Err(ProxyError::credential_exchange(reason));
        }

        let parsed: AssumeRoleEnvelope = serde_json::from_slice(&body)
            .map_err(|_| ProxyError::credential_exchange("malformed credential response"))?;
        let creds = parsed.response.result.credentials;

        let expires_at = creds
            .expiration
            .to_datetime()
            .ok_or_else(|| ProxyError::credential_exchange("malformed credential expiry"))?;
        let now = Utc::now();
        if expires_at <= now
            || expires_at > now + chrono::Duration::seconds(CREDENTIAL_DURATION_SECS + CLOCK_SKEW_SECS)
        {
            return Err(ProxyError::credential_exchange("credential expiry out of bounds"));
        }

        let mut credentials = Credentials::new(
            creds.access_key_id,
            creds.secret_access_key,
            Some(creds.session_token),
        );
        credentials.expires_at = Some(expires_at);
        Ok(credentials)
    }
}

#[derive(Deserialize)]
struct AssumeRoleEnvelope {
    #[serde(rename = "AssumeRoleResponse")]
    response: AssumeRoleResponse,
}

#[derive(Deserialize)]
struct AssumeRoleResponse {
    #[serde(rename = "AssumeRoleResult")]
    result: AssumeRoleResult,
}

#[derive(Deserialize)]
struct AssumeRoleResult {
    #[serde(rename = "Credentials")]
    credentials: StsCredentials,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    expiration: Expiration,
}

/// The JSON protocol reports expiry as epoch seconds; some endpoints use ISO 8601.
#[derive(Deserialize)]
#[serde(untagged)]
enum Expiration {
    Epoch(f64),
    Text(String),
}

impl Expiration {
    #[allow(clippy::cast_possible_truncation)]
    fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Epoch(secs) if secs.is_finite() => Utc.timestamp_opt(secs.trunc() as i64, 0).single(),
            Self::Epoch(_) => None,
            Self::Text(text) => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

#[derive(Deserialize)]
struct StsErrorResponse {
    #[serde(rename = "Error")]
    error: StsError,
}

#[derive(Deserialize)]
struct StsError {
    #[serde(rename = "Code")]
    code: String,
}
