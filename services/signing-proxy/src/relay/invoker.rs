//! Signed backend invocation.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::{ProxyConfig, RuntimeArn};
use crate::credentials::Credentials;
use crate::error::ProxyError;
use crate::signing::{sign, uri_encode, SignedRequest, SigningParams, UnsignedRequest};

/// Session header understood by the backend.
pub const RUNTIME_SESSION_HEADER: &str = "x-amzn-bedrock-agentcore-runtime-session-id";

/// Signing service name of the backend.
pub const RUNTIME_SIGNING_SERVICE: &str = "bedrock-agentcore";

/// A successful backend response whose body has not been read yet.
pub struct UpstreamResponse {
    /// Upstream status code
    pub status: u16,
    /// Session id echoed by the backend, or the one we sent
    pub session_id: String,
    /// Raw body chunks in arrival order
    pub body: BoxStream<'static, Result<Bytes, reqwest::Error>>,
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

/// Builds, signs and dispatches the backend call.
pub struct UpstreamInvoker {
    client: reqwest::Client,
    endpoint: Url,
    runtime_arn: RuntimeArn,
    region: String,
    qualifier: String,
    first_byte_timeout: Duration,
    max_error_body_bytes: usize,
}

impl UpstreamInvoker {
    /// Creates an invoker from the proxy configuration.
    #[must_use]
    pub fn from_config(client: reqwest::Client, config: &ProxyConfig) -> Self {
        Self {
            client,
            endpoint: config.runtime_endpoint.clone(),
            runtime_arn: config.agent_runtime_arn.clone(),
            region: config.region.clone(),
            qualifier: config.qualifier.clone(),
            first_byte_timeout: config.timeouts.first_byte,
            max_error_body_bytes: config.max_error_body_bytes,
        }
    }

    /// `{endpoint}/runtimes/{arn}/invocations?qualifier=...`
    pub fn invocation_url(&self) -> Result<Url, ProxyError> {
        let base = self.endpoint.as_str().trim_end_matches('/');
        let mut url = Url::parse(&format!(
            "{base}/runtimes/{}/invocations",
            uri_encode(self.runtime_arn.as_str())
        ))
        .map_err(|e| ProxyError::configuration(format!("invalid invocation URL: {e}")))?;
        url.query_pairs_mut().append_pair("qualifier", &self.qualifier);
        Ok(url)
    }

    /// Builds and signs the backend request.
    pub fn prepare(
        &self,
        prompt: &str,
        session_id: &str,
        credentials: &Credentials,
    ) -> Result<SignedRequest, ProxyError> {
        let body = serde_json::to_vec(&serde_json::json!({ "prompt": prompt }))
            .map_err(|e| ProxyError::transport(format!("request encoding failed: {e}")))?;

        let request = UnsignedRequest::new(Method::POST, self.invocation_url()?, body)
            .header("content-type", "application/json")
            .header(RUNTIME_SESSION_HEADER, session_id);

        Ok(sign(
            request,
            credentials,
            &SigningParams::service(&self.region, RUNTIME_SIGNING_SERVICE),
            Utc::now(),
        ))
    }

    /// Sends a signed request; returns once status and headers arrive.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub async fn dispatch(
        &self,
        signed: SignedRequest,
        session_id: &str,
    ) -> Result<UpstreamResponse, ProxyError> {
        let response = tokio::time::timeout(
            self.first_byte_timeout,
            signed.into_reqwest(&self.client).send(),
        )
        .await
        .map_err(|_| ProxyError::transport("timed out waiting for upstream response"))??;

        let status = response.status();
        debug!(status = status.as_u16(), "Upstream responded");

        if !status.is_success() {
            let body = tokio::time::timeout(
                self.first_byte_timeout,
                read_bounded(response, self.max_error_body_bytes),
            )
            .await
            .unwrap_or_else(|_| {
                warn!(status = status.as_u16(), "Upstream error body stalled");
                Bytes::new()
            });
            let message = upstream_error_message(status.as_u16(), &body);
            warn!(status = status.as_u16(), "Upstream returned an error status");
            return Err(ProxyError::upstream(status.as_u16(), message));
        }

        let session_id = response
            .headers()
            .get(RUNTIME_SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map_or_else(|| session_id.to_string(), str::to_string);

        Ok(UpstreamResponse {
            status: status.as_u16(),
            session_id,
            body: response.bytes_stream().boxed(),
        })
    }
}

/// Reads at most `limit` bytes of a response body; read errors end the read.
async fn read_bounded(response: reqwest::Response, limit: usize) -> Bytes {
    let mut buf = BytesMut::new();
    let mut stream = response.bytes_stream();
    while buf.len() < limit {
        match stream.next().await {
            Some(Ok(chunk)) => {
                let take = chunk.len().min(limit - buf.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            Some(Err(_)) | None => break,
        }
    }
    buf.freeze()
}

/// Extracts `message`/`Message` from a JSON error body.
#[must_use]
pub fn upstream_error_message(status: u16, body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| {
            ["message", "Message"]
                .iter()
                .find_map(|k| v.get(*k).and_then(Value::as_str).map(str::to_string))
        })
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| format!("Upstream request failed with status {status}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn config(endpoint: &str) -> ProxyConfig {
        let endpoint = endpoint.to_string();
        ProxyConfig::from_lookup(move |name| match name {
            "AGENT_RUNTIME_ARN" => {
                Some("arn:aws:bedrock-agentcore:us-east-1:123456789012:runtime/agent-abc".to_string())
            }
            "AGENTCORE_REGION" => Some("us-east-1".to_string()),
            "AGENTCORE_ENDPOINT" => Some(endpoint.clone()),
            "FIRST_BYTE_TIMEOUT" => Some("1".to_string()),
            _ => None,
        })
        .unwrap()
    }

    /// Answers 429 with a truncated body, then goes silent.
    async fn stalled_error_server() -> (String, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 8192];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(
                    b"HTTP/1.1 429 Too Many Requests\r\ncontent-type: application/json\r\ncontent-length: 100\r\n\r\n{\"mess",
                )
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        (format!("http://{addr}"), handle)
    }

    #[tokio::test]
    async fn test_stalled_error_body_does_not_block_dispatch() {
        let (endpoint, server) = stalled_error_server().await;
        let invoker = UpstreamInvoker::from_config(reqwest::Client::new(), &config(&endpoint));
        let credentials = Credentials::new("AKIDEXAMPLE", "secret", None);
        let signed = invoker.prepare("hello", "s1", &credentials).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(8), invoker.dispatch(signed, "s1"))
            .await
            .expect("dispatch blocked on the error body");
        let err = result.unwrap_err();

        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.public_message(), "Upstream request failed with status 429");
        server.abort();
    }

    #[test]
    fn test_invocation_url() {
        let invoker = UpstreamInvoker::from_config(reqwest::Client::new(), &config("http://127.0.0.1:9000/"));
        assert_eq!(
            invoker.invocation_url().unwrap().as_str(),
            "http://127.0.0.1:9000/runtimes/arn%3Aaws%3Abedrock-agentcore%3Aus-east-1%3A123456789012%3Aruntime%2Fagent-abc/invocations?qualifier=DEFAULT"
        );
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(upstream_error_message(429, br#"{"message":"Rate exceeded"}"#), "Rate exceeded");
        assert_eq!(upstream_error_message(400, br#"{"Message":"Bad input"}"#), "Bad input");
        assert_eq!(
            upstream_error_message(503, b"<html>oops</html>"),
            "Upstream request failed with status 503"
        );
        assert_eq!(
            upstream_error_message(500, br#"{"message":""}"#),
            "Upstream request failed with status 500"
        );
    }
}
