//! Request pipeline: guard, scope, credentials, signing, relay.
//!
//! Each step either advances the request or fails it with a [`ProxyError`];
//! nothing is retried here and no step runs before the one it depends on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use tracing::{debug, info, warn, Instrument};

use crate::audit::{AuditLogger, AuditRecord};
use crate::config::ProxyConfig;
use crate::context::{AuthorizerContext, InboundRequest};
use crate::credentials::{
    CredentialBroker, CredentialCache, CredentialResolver, CredentialsProvider,
    EnvCredentialsProvider, StsCredentialBroker,
};
use crate::error::ProxyError;
use crate::isolation::check_session_isolation;
use crate::observability::{ProxyMetrics, RequestPhase};
use crate::relay::{relay_stream, RelayError, StreamOutcome, StreamSummary, UpstreamInvoker};
use crate::scope::TenantScopeResolver;
use crate::shutdown::BackgroundTasks;

/// A response ready to stream back to the caller.
pub struct ProxyStream {
    /// Session id reported to the caller
    pub session_id: String,
    /// NDJSON frames
    pub frames: std::pin::Pin<Box<dyn Stream<Item = Result<Bytes, RelayError>> + Send>>,
}

impl std::fmt::Debug for ProxyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyStream")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

/// The signing proxy.
pub struct SigningProxy {
    scope_resolver: TenantScopeResolver,
    credentials: CredentialResolver,
    invoker: UpstreamInvoker,
    audit: AuditLogger,
    metrics: Arc<ProxyMetrics>,
    stream_idle_timeout: Duration,
}

impl SigningProxy {
    /// Wires the pipeline from configuration with the process environment
    /// as the base identity.
    pub fn from_config(
        config: &ProxyConfig,
        client: reqwest::Client,
        metrics: Arc<ProxyMetrics>,
        tasks: BackgroundTasks,
    ) -> Self {
        SigningProxyBuilder::new(config, client, metrics)
            .background_tasks(tasks)
            .build()
    }

    /// Handles one chat request up to the point where streaming starts.
    pub async fn handle(
        &self,
        body: &[u8],
        context: AuthorizerContext,
        request_id: &str,
    ) -> Result<ProxyStream, ProxyError> {
        let span = tracing::info_span!(
            "proxy_request",
            request_id = %request_id,
            tenant_id = context.tenant_id.as_deref().unwrap_or("-"),
            app_id = context.app_id.as_deref().unwrap_or("-"),
            phase = tracing::field::Empty,
        );
        let result = self.run(body, context, request_id).instrument(span.clone()).await;
        if let Err(err) = &result {
            self.metrics.record_outcome(err.kind());
            span.record("phase", RequestPhase::Failed.as_str());
        }
        result
    }

    async fn run(
        &self,
        body: &[u8],
        context: AuthorizerContext,
        request_id: &str,
    ) -> Result<ProxyStream, ProxyError> {
        phase(RequestPhase::Received);
        self.credentials.base_credentials()?;

        let request = InboundRequest::parse(body, context)?;
        check_session_isolation(&request)?;
        if !request.context.has_access_token() {
            warn!("Request arrived without an access token");
        }
        phase(RequestPhase::Validated);

        let scope = request.context.tenant_scope();
        let policy = self.scope_resolver.resolve(scope.as_ref())?;
        if policy.is_some() {
            phase(RequestPhase::ScopeResolved);
        }

        let started = Instant::now();
        let resolved = self.credentials.resolve(scope.as_ref(), policy.as_ref()).await?;
        self.metrics
            .record_credential_exchange(resolved.identity(), started.elapsed().as_secs_f64());
        phase(RequestPhase::CredentialsObtained);
        debug!(identity = resolved.identity(), "Signing identity resolved");

        let session_id = request.resolve_session_id();
        let signed = self
            .invoker
            .prepare(&request.prompt, &session_id, resolved.credentials())?;
        drop(policy);
        phase(RequestPhase::Signed);

        let upstream = match self.invoker.dispatch(signed, &session_id).await {
            Ok(upstream) => upstream,
            Err(err) => {
                if let ProxyError::Upstream { status, .. } = &err {
                    self.metrics.record_upstream_status(status.as_u16());
                }
                return Err(err);
            }
        };
        self.metrics.record_upstream_status(upstream.status);
        phase(RequestPhase::Dispatched);

        let session_id = upstream.session_id.clone();
        let status = upstream.status;
        let identity = resolved.identity().to_string();
        let audit = self.audit.clone();
        let metrics = Arc::clone(&self.metrics);
        let request_id = request_id.to_string();
        let (app_id, tenant_id) = (request.context.app_id.clone(), request.context.tenant_id.clone());

        metrics.active_streams.inc();
        metrics.record_frames("meta", 1);
        let on_finish = Box::new(move |summary: StreamSummary| {
            metrics.active_streams.dec();
            metrics.record_frames("delta", summary.deltas);
            match summary.outcome {
                StreamOutcome::Completed => metrics.record_frames("done", 1),
                StreamOutcome::Failed => metrics.record_frames("error", 1),
                StreamOutcome::Aborted | StreamOutcome::Cancelled => {}
            }
            metrics.record_outcome(summary.outcome.as_str());

            let duration_ms = u64::try_from(summary.duration.as_millis()).unwrap_or(u64::MAX);
            let terminal = match summary.outcome {
                StreamOutcome::Completed => RequestPhase::Completed,
                _ => RequestPhase::Failed,
            };
            info!(
                request_id = %request_id,
                phase = terminal.as_str(),
                outcome = summary.outcome.as_str(),
                deltas = summary.deltas,
                bytes = summary.bytes,
                duration_ms,
                "Stream finished"
            );

            audit.record(AuditRecord {
                request_id,
                timestamp: Utc::now(),
                app_id,
                tenant_id,
                session_id: summary.session_id,
                identity,
                status,
                outcome: summary.outcome.as_str().to_string(),
                delta_count: summary.deltas,
                byte_count: summary.bytes,
                duration_ms,
                response_preview: summary.preview,
                response_preview_truncated: summary.preview_truncated,
            });
        });

        phase(RequestPhase::Streaming);
        Ok(ProxyStream {
            session_id,
            frames: Box::pin(relay_stream(upstream, self.stream_idle_timeout, on_finish)),
        })
    }
}

fn phase(phase: RequestPhase) {
    tracing::Span::current().record("phase", phase.as_str());
    debug!(phase = phase.as_str(), "Request phase");
}

/// Assembles a [`SigningProxy`] with replaceable collaborators.
pub struct SigningProxyBuilder<'a> {
    config: &'a ProxyConfig,
    client: reqwest::Client,
    provider: Option<Arc<dyn CredentialsProvider>>,
    broker: Option<Arc<dyn CredentialBroker>>,
    audit: Option<AuditLogger>,
    metrics: Arc<ProxyMetrics>,
    tasks: BackgroundTasks,
}

impl<'a> SigningProxyBuilder<'a> {
    /// Starts from configuration, a shared HTTP client and the metrics registry.
    #[must_use]
    pub fn new(config: &'a ProxyConfig, client: reqwest::Client, metrics: Arc<ProxyMetrics>) -> Self {
        Self {
            config,
            client,
            provider: None,
            broker: None,
            audit: None,
            metrics,
            tasks: BackgroundTasks::new(),
        }
    }

    /// Base identity source.
    #[must_use]
    pub fn credentials_provider(mut self, provider: Arc<dyn CredentialsProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Credential broker; defaults to STS.
    #[must_use]
    pub fn broker(mut self, broker: Arc<dyn CredentialBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Audit logger; defaults to the configured audit settings.
    #[must_use]
    pub fn audit(mut self, audit: AuditLogger) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Task set used for audit writes.
    #[must_use]
    pub fn background_tasks(mut self, tasks: BackgroundTasks) -> Self {
        self.tasks = tasks;
        self
    }

    /// Builds the proxy.
    #[must_use]
    pub fn build(self) -> SigningProxy {
        let config = self.config;
        let provider = self
            .provider
            .unwrap_or_else(|| Arc::new(EnvCredentialsProvider::new()));
        let broker = self.broker.unwrap_or_else(|| {
            Arc::new(StsCredentialBroker::new(
                self.client.clone(),
                config.sts_endpoint.clone(),
                config.region.clone(),
                config.tenant_role_arn.clone(),
                config.timeouts.credential_exchange,
            ))
        });

        let mut credentials = CredentialResolver::new(Arc::clone(&provider), broker);
        if config.credential_cache.enabled {
            credentials = credentials.with_cache(CredentialCache::new(config.credential_cache.capacity));
        }

        let audit = self.audit.unwrap_or_else(|| {
            AuditLogger::from_settings(
                &config.audit,
                &config.region,
                self.client.clone(),
                provider,
                self.tasks.clone(),
            )
        });

        SigningProxy {
            scope_resolver: TenantScopeResolver::from_config(config),
            credentials,
            invoker: UpstreamInvoker::from_config(self.client, config),
            audit,
            metrics: self.metrics,
            stream_idle_timeout: config.timeouts.stream_idle,
        }
    }
}
