//! Signing Proxy Service - Main Entry Point

use std::sync::Arc;

use anyhow::{Context, Result};
use rust_common::{build_http_client, init_tracing, HttpConfig, TracingConfig};
use tokio::net::TcpListener;
use tracing::info;

use signing_proxy::observability::ProxyMetrics;
use signing_proxy::shutdown::{wait_for_signal, BackgroundTasks};
use signing_proxy::{router, AppState, ProxyConfig, SigningProxy};

const SERVICE_NAME: &str = "signing-proxy";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(&TracingConfig::from_env(SERVICE_NAME));

    let config = ProxyConfig::from_env().context("Configuration validation failed")?;
    info!(
        runtime_arn = %config.agent_runtime_arn,
        region = %config.region,
        tenant_role = config.tenant_role_arn.is_some(),
        credential_cache = config.credential_cache.enabled,
        audit = config.audit.enabled,
        "Starting Signing Proxy"
    );

    let client = build_http_client(
        &HttpConfig::default()
            .with_connect_timeout(config.timeouts.connect)
            .with_user_agent(format!("{SERVICE_NAME}/{}", env!("CARGO_PKG_VERSION"))),
    )
    .context("Failed to build HTTP client")?;

    let metrics = Arc::new(ProxyMetrics::new().context("Failed to register metrics")?);
    let tasks = BackgroundTasks::new();
    let proxy = Arc::new(SigningProxy::from_config(
        &config,
        client,
        Arc::clone(&metrics),
        tasks.clone(),
    ));

    let app = router(AppState { proxy, metrics });

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    info!("Signing Proxy listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_signal())
        .await
        .context("HTTP server failed")?;

    tasks.drain(config.shutdown_timeout).await;
    info!("Signing Proxy stopped");

    Ok(())
}
