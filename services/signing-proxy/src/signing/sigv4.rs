//! AWS Signature Version 4.
//!
//! `sign` is pure: the same request, credentials, parameters and timestamp
//! always produce the same headers.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::Method;
use ring::hmac;
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use url::Url;

use crate::credentials::Credentials;

/// Signing algorithm identifier.
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// RFC 3986 unreserved characters pass through; everything else is escaped.
pub const URI_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encodes a value with the unreserved set.
#[must_use]
pub fn uri_encode(value: &str) -> String {
    utf8_percent_encode(value, URI_ENCODE_SET).to_string()
}

/// Request before signing.
#[derive(Debug, Clone)]
pub struct UnsignedRequest {
    /// HTTP method
    pub method: Method,
    /// Target URL; path segments already percent-encoded
    pub url: Url,
    /// Headers to sign and send
    pub headers: Vec<(String, String)>,
    /// Request body
    pub body: Bytes,
}

impl UnsignedRequest {
    /// Creates a request without headers.
    #[must_use]
    pub fn new(method: Method, url: Url, body: impl Into<Bytes>) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }
}

/// Request after signing; consumed once when sent.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    /// HTTP method
    pub method: Method,
    /// Target URL
    pub url: Url,
    /// Lower-cased headers including `authorization`
    pub headers: BTreeMap<String, String>,
    /// Request body
    pub body: Bytes,
}

impl SignedRequest {
    /// Converts into a `reqwest` request builder.
    #[must_use]
    pub fn into_reqwest(self, client: &reqwest::Client) -> reqwest::RequestBuilder {
        let mut builder = client.request(self.method, self.url);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder.body(self.body)
    }

    /// Looks up a signed header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Service-specific signing parameters.
#[derive(Debug, Clone)]
pub struct SigningParams {
    /// Signing region
    pub region: String,
    /// Signing service name
    pub service: String,
    /// URI-encode each path segment a second time (all services but S3)
    pub double_encode_path: bool,
    /// Send `x-amz-content-sha256` (S3)
    pub content_sha256_header: bool,
}

impl SigningParams {
    /// Parameters for a non-S3 service.
    #[must_use]
    pub fn service(region: &str, service: &str) -> Self {
        Self {
            region: region.to_string(),
            service: service.to_string(),
            double_encode_path: true,
            content_sha256_header: false,
        }
    }

    /// Parameters for S3.
    #[must_use]
    pub fn s3(region: &str) -> Self {
        Self {
            region: region.to_string(),
            service: "s3".to_string(),
            double_encode_path: false,
            content_sha256_header: true,
        }
    }
}

/// Signs a request.
#[must_use]
pub fn sign(
    request: UnsignedRequest,
    credentials: &Credentials,
    params: &SigningParams,
    timestamp: DateTime<Utc>,
) -> SignedRequest {
    let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();
    let date = timestamp.format("%Y%m%d").to_string();
    let payload_hash = hex::encode(Sha256::digest(&request.body));

    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in &request.headers {
        let name = name.to_ascii_lowercase();
        let value = normalize_header_value(value);
        headers
            .entry(name)
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    headers.insert("host".to_string(), host_header(&request.url));
    headers.insert("x-amz-date".to_string(), amz_date.clone());
    if params.content_sha256_header {
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
    }
    if let Some(token) = &credentials.session_token {
        headers.insert(
            "x-amz-security-token".to_string(),
            token.expose_secret().to_string(),
        );
    }

    let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");
    let canonical = canonical_request(
        &request.method,
        &request.url,
        &headers,
        &signed_headers,
        &payload_hash,
        params.double_encode_path,
    );

    let scope = format!("{date}/{}/{}/aws4_request", params.region, params.service);
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical.as_bytes()))
    );

    let key = derive_signing_key(
        credentials.secret_access_key.expose_secret(),
        &date,
        &params.region,
        &params.service,
    );
    let signature = hex::encode(hmac::sign(&key, string_to_sign.as_bytes()).as_ref());

    headers.insert(
        "authorization".to_string(),
        format!(
            "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            credentials.access_key_id
        ),
    );

    SignedRequest {
        method: request.method,
        url: request.url,
        headers,
        body: request.body,
    }
}

/// Builds the canonical request string.
#[must_use]
pub fn canonical_request(
    method: &Method,
    url: &Url,
    headers: &BTreeMap<String, String>,
    signed_headers: &str,
    payload_hash: &str,
    double_encode_path: bool,
) -> String {
    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();

    format!(
        "{}\n{}\n{}\n{canonical_headers}\n{signed_headers}\n{payload_hash}",
        method.as_str(),
        canonical_uri(url, double_encode_path),
        canonical_query(url),
    )
}

/// Derives the per-day, per-region, per-service signing key.
#[must_use]
pub fn derive_signing_key(secret: &str, date: &str, region: &str, service: &str) -> hmac::Key {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(k_date.as_ref(), region.as_bytes());
    let k_service = hmac_sha256(k_region.as_ref(), service.as_bytes());
    let k_signing = hmac_sha256(k_service.as_ref(), b"aws4_request");
    hmac::Key::new(hmac::HMAC_SHA256, k_signing.as_ref())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> hmac::Tag {
    hmac::sign(&hmac::Key::new(hmac::HMAC_SHA256, key), data)
}

fn canonical_uri(url: &Url, double_encode: bool) -> String {
    let path = url.path();
    if path.is_empty() {
        return "/".to_string();
    }
    if !double_encode {
        return path.to_string();
    }
    path.split('/').map(uri_encode).collect::<Vec<_>>().join("/")
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (uri_encode(&k), uri_encode(&v)))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

fn normalize_header_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
