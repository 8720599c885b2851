//! Audit record persistence.
//!
//! One JSON record per relayed stream, written to object storage by a
//! tracked background task. Writes are best effort and never touch the
//! caller's response.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::config::AuditSettings;
use crate::credentials::CredentialsProvider;
use crate::shutdown::BackgroundTasks;
use crate::signing::{sign, uri_encode, SigningParams, UnsignedRequest};

/// Audit write failures.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Record could not be serialized
    #[error("audit record encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// Storage could not be reached
    #[error("audit storage unreachable: {0}")]
    Transport(String),

    /// Storage refused the write
    #[error("audit storage rejected the write with status {0}")]
    Rejected(u16),

    /// Base credentials unavailable
    #[error("audit credentials unavailable")]
    Credentials,

    /// Object URL could not be built
    #[error("invalid audit object URL: {0}")]
    Url(#[from] url::ParseError),
}

/// One audited exchange. Never contains the caller's access token.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    /// Per-request correlation id
    pub request_id: String,
    /// Record creation time
    pub timestamp: DateTime<Utc>,
    /// Application claim
    pub app_id: Option<String>,
    /// Tenant claim
    pub tenant_id: Option<String>,
    /// Resolved session id
    pub session_id: String,
    /// Identity that signed the call (`default` or `scoped`)
    pub identity: String,
    /// Upstream status
    pub status: u16,
    /// Stream outcome
    pub outcome: String,
    /// Delta frames relayed
    pub delta_count: u64,
    /// Upstream bytes read
    pub byte_count: u64,
    /// Stream duration in milliseconds
    pub duration_ms: u64,
    /// Leading relayed text
    pub response_preview: String,
    /// Whether the preview was cut
    pub response_preview_truncated: bool,
}

impl AuditRecord {
    /// Object key: `{prefix}/dt=YYYY-MM-DD/app=../tenant=../{request_id}.json`.
    #[must_use]
    pub fn object_key(&self, prefix: &str) -> String {
        let prefix = prefix.trim_matches('/');
        let key = format!(
            "dt={}/app={}/tenant={}/{}.json",
            self.timestamp.format("%Y-%m-%d"),
            self.app_id.as_deref().unwrap_or("none"),
            self.tenant_id.as_deref().unwrap_or("none"),
            self.request_id
        );
        if prefix.is_empty() {
            key
        } else {
            format!("{prefix}/{key}")
        }
    }
}

/// Destination for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persists one record.
    async fn write(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

/// Deadline for one record write unless configured otherwise.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Writes records to S3 with a signed `PutObject`.
pub struct S3AuditSink {
    client: reqwest::Client,
    endpoint: Url,
    bucket: String,
    prefix: String,
    region: String,
    credentials: Arc<dyn CredentialsProvider>,
    timeout: Duration,
}

impl S3AuditSink {
    /// Creates a sink writing path-style to `{endpoint}/{bucket}/{key}`.
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        endpoint: Url,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        region: impl Into<String>,
        credentials: Arc<dyn CredentialsProvider>,
    ) -> Self {
        Self {
            client,
            endpoint,
            bucket: bucket.into(),
            prefix: prefix.into(),
            region: region.into(),
            credentials,
            timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// Overrides the per-write deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn object_url(&self, key: &str) -> Result<Url, AuditError> {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        Ok(Url::parse(&format!(
            "{}/{}/{encoded_key}",
            self.endpoint.as_str().trim_end_matches('/'),
            uri_encode(&self.bucket)
        ))?)
    }
}

#[async_trait]
impl AuditSink for S3AuditSink {
    async fn write(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let body = serde_json::to_vec(record)?;
        let url = self.object_url(&record.object_key(&self.prefix))?;
        let credentials = self
            .credentials
            .base_credentials()
            .map_err(|_| AuditError::Credentials)?;

        let request = UnsignedRequest::new(Method::PUT, url, body)
            .header("content-type", "application/json")
            .header("x-amz-server-side-encryption", "AES256");
        let signed = sign(request, &credentials, &SigningParams::s3(&self.region), Utc::now());

        let response = signed
            .into_reqwest(&self.client)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| AuditError::Transport(e.without_url().to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(AuditError::Rejected(response.status().as_u16()))
        }
    }
}

/// Hands records to a sink on tracked background tasks.
#[derive(Clone)]
pub struct AuditLogger {
    sink: Option<Arc<dyn AuditSink>>,
    tasks: BackgroundTasks,
}

impl AuditLogger {
    /// A logger writing to `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn AuditSink>, tasks: BackgroundTasks) -> Self {
        Self {
            sink: Some(sink),
            tasks,
        }
    }

    /// A logger that drops every record.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            sink: None,
            tasks: BackgroundTasks::new(),
        }
    }

    /// Builds the logger described by the audit settings.
    #[must_use]
    pub fn from_settings(
        settings: &AuditSettings,
        region: &str,
        client: reqwest::Client,
        credentials: Arc<dyn CredentialsProvider>,
        tasks: BackgroundTasks,
    ) -> Self {
        match (&settings.bucket, settings.enabled) {
            (Some(bucket), true) => Self::new(
                Arc::new(
                    S3AuditSink::new(
                        client,
                        settings.endpoint.clone(),
                        bucket.clone(),
                        settings.prefix.clone(),
                        region,
                        credentials,
                    )
                    .with_timeout(settings.write_timeout),
                ),
                tasks,
            ),
            _ => Self::disabled(),
        }
    }

    /// Whether records are written.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Schedules a record write.
    pub fn record(&self, record: AuditRecord) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        self.tasks.spawn("audit", async move {
            match sink.write(&record).await {
                Ok(()) => debug!(request_id = %record.request_id, "Audit record written"),
                Err(e) => warn!(request_id = %record.request_id, error = %e, "Audit record write failed"),
            }
        });
    }
}
