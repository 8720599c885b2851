//! Type-Safe Configuration with Validation
//!
//! The proxy's configuration is read once at process start, validated
//! eagerly, and then shared read-only behind an `Arc`. Nothing tenant-specific
//! ever lives here.

use std::env;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Placeholder for the application id in storage prefix templates.
pub const APP_ID_PLACEHOLDER: &str = "{app_id}";
/// Placeholder for the tenant id in storage prefix templates.
pub const TENANT_ID_PLACEHOLDER: &str = "{tenant_id}";

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid URL format
    #[error("Invalid URL for {field}: {reason}")]
    InvalidUrl { field: String, reason: String },

    /// Invalid port number
    #[error("Invalid port: must be between 1 and 65535")]
    InvalidPort,

    /// Invalid ARN
    #[error("Invalid ARN for {field}: {reason}")]
    InvalidArn { field: String, reason: String },

    /// Invalid timeout value
    #[error("Invalid timeout for {0}: must be greater than 0")]
    InvalidTimeout(String),

    /// Invalid storage prefix template
    #[error("Invalid storage prefix template: {0}")]
    InvalidTemplate(String),

    /// Missing required field
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    /// Environment variable parse error
    #[error("Failed to parse environment variable {name}: {reason}")]
    ParseError { name: String, reason: String },
}

/// Parsed backend runtime identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeArn {
    arn: String,
    partition: String,
    region: String,
}

impl RuntimeArn {
    /// Parses `arn:<partition>:bedrock-agentcore:<region>:<account>:runtime/<id>`.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidArn {
            field: "AGENT_RUNTIME_ARN".to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = value.splitn(6, ':').collect();
        if parts.len() != 6 || parts[0] != "arn" {
            return Err(invalid("expected arn:<partition>:<service>:<region>:<account>:<resource>"));
        }
        if parts[2] != "bedrock-agentcore" {
            return Err(invalid("service must be bedrock-agentcore"));
        }
        if parts[1].is_empty() || parts[3].is_empty() || parts[4].is_empty() {
            return Err(invalid("partition, region and account must be present"));
        }
        let runtime_id = parts[5]
            .strip_prefix("runtime/")
            .ok_or_else(|| invalid("resource must be runtime/<id>"))?;
        if runtime_id.is_empty() || runtime_id.contains(['*', '?', '/']) {
            return Err(invalid("runtime id must be a literal identifier"));
        }

        Ok(Self {
            arn: value.to_string(),
            partition: parts[1].to_string(),
            region: parts[3].to_string(),
        })
    }

    /// The full ARN string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.arn
    }

    /// The ARN partition (`aws`, `aws-cn`, ...).
    #[must_use]
    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// The region embedded in the ARN.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }
}

impl std::fmt::Display for RuntimeArn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.arn)
    }
}

/// Where tenant data lives in object storage.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Bucket holding tenant data; storage statements are omitted when unset
    pub bucket: Option<String>,
    /// Per-tenant prefix template, e.g. `{app_id}/{tenant_id}`
    pub tenant_prefix_template: String,
    /// Read-only prefix shared by all tenants for deployment artifacts
    pub shared_artifact_prefix: String,
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self {
            bucket: None,
            tenant_prefix_template: format!("{APP_ID_PLACEHOLDER}/{TENANT_ID_PLACEHOLDER}"),
            shared_artifact_prefix: "deployments".to_string(),
        }
    }
}

/// Optional tenant-keyed credential cache.
#[derive(Debug, Clone, Copy)]
pub struct CredentialCacheSettings {
    /// Whether scoped credentials may be reused across requests
    pub enabled: bool,
    /// Maximum number of cached tenant identities
    pub capacity: usize,
}

impl Default for CredentialCacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: 256,
        }
    }
}

/// Audit record persistence.
#[derive(Debug, Clone)]
pub struct AuditSettings {
    /// Whether audit records are written
    pub enabled: bool,
    /// Destination bucket
    pub bucket: Option<String>,
    /// Key prefix inside the bucket
    pub prefix: String,
    /// Object storage endpoint
    pub endpoint: Url,
    /// Deadline for one record write
    pub write_timeout: Duration,
}

/// Timeouts bounding each suspension point of a request.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// TCP/TLS connect timeout for outbound calls
    pub connect: Duration,
    /// Credential exchange round trip
    pub credential_exchange: Duration,
    /// Wait for the backend's status line and headers
    pub first_byte: Duration,
    /// Maximum silence between two reads of the backend stream
    pub stream_idle: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            credential_exchange: Duration::from_secs(5),
            first_byte: Duration::from_secs(60),
            stream_idle: Duration::from_secs(120),
        }
    }
}

/// Service configuration with validation.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Server host address
    pub host: String,
    /// Server port (1-65535)
    pub port: u16,
    /// Backend execution resource
    pub agent_runtime_arn: RuntimeArn,
    /// Signing region
    pub region: String,
    /// Backend endpoint qualifier
    pub qualifier: String,
    /// Role assumed for tenant-scoped credentials
    pub tenant_role_arn: Option<String>,
    /// Tenant storage layout
    pub storage: StorageLayout,
    /// Backend endpoint
    pub runtime_endpoint: Url,
    /// Credential authority endpoint
    pub sts_endpoint: Url,
    /// Per-step timeouts
    pub timeouts: Timeouts,
    /// Maximum backend error body read, in bytes
    pub max_error_body_bytes: usize,
    /// Credential cache settings
    pub credential_cache: CredentialCacheSettings,
    /// Audit persistence settings
    pub audit: AuditSettings,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
}

impl ProxyConfig {
    /// Loads configuration from environment variables with validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Loads configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let arn_raw = var("AGENT_RUNTIME_ARN")
            .ok_or_else(|| ConfigError::MissingRequired("AGENT_RUNTIME_ARN".to_string()))?;
        let agent_runtime_arn = RuntimeArn::parse(&arn_raw)?;

        let region = var("AGENTCORE_REGION")
            .or_else(|| var("AWS_REGION"))
            .ok_or_else(|| ConfigError::MissingRequired("AGENTCORE_REGION".to_string()))?;

        let runtime_endpoint = parse_url(
            "AGENTCORE_ENDPOINT",
            var("AGENTCORE_ENDPOINT"),
            &format!("https://bedrock-agentcore.{region}.amazonaws.com"),
        )?;
        let sts_endpoint = parse_url(
            "STS_ENDPOINT",
            var("STS_ENDPOINT"),
            &format!("https://sts.{region}.amazonaws.com"),
        )?;
        let audit_endpoint = parse_url(
            "AUDIT_LOGS_ENDPOINT",
            var("AUDIT_LOGS_ENDPOINT"),
            &format!("https://s3.{region}.amazonaws.com"),
        )?;

        let defaults = StorageLayout::default();
        let timeouts = Timeouts {
            connect: Duration::from_secs(parse_var(&var, "CONNECT_TIMEOUT", 5)?),
            credential_exchange: Duration::from_secs(parse_var(&var, "CREDENTIAL_TIMEOUT", 5)?),
            first_byte: Duration::from_secs(parse_var(&var, "FIRST_BYTE_TIMEOUT", 60)?),
            stream_idle: Duration::from_secs(parse_var(&var, "STREAM_IDLE_TIMEOUT", 120)?),
        };

        let config = Self {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_var(&var, "PORT", 8080)?,
            agent_runtime_arn,
            region,
            qualifier: var("AGENTCORE_QUALIFIER").unwrap_or_else(|| "DEFAULT".to_string()),
            tenant_role_arn: var("TENANT_ROLE_ARN"),
            storage: StorageLayout {
                bucket: var("TENANT_DATA_BUCKET"),
                tenant_prefix_template: var("TENANT_PREFIX_TEMPLATE")
                    .unwrap_or(defaults.tenant_prefix_template),
                shared_artifact_prefix: var("SHARED_ARTIFACT_PREFIX")
                    .unwrap_or(defaults.shared_artifact_prefix),
            },
            runtime_endpoint,
            sts_endpoint,
            timeouts,
            max_error_body_bytes: parse_var(&var, "MAX_ERROR_BODY_BYTES", 8192)?,
            credential_cache: CredentialCacheSettings {
                enabled: parse_var(&var, "CREDENTIAL_CACHE_ENABLED", false)?,
                capacity: parse_var(&var, "CREDENTIAL_CACHE_CAPACITY", 256)?,
            },
            audit: AuditSettings {
                enabled: parse_var(&var, "AUDIT_LOGS_ENABLED", false)?,
                bucket: var("AUDIT_LOGS_BUCKET"),
                prefix: var("AUDIT_LOGS_PREFIX").unwrap_or_else(|| "bff-audit".to_string()),
                endpoint: audit_endpoint,
                write_timeout: Duration::from_secs(parse_var(&var, "AUDIT_WRITE_TIMEOUT", 10)?),
            },
            shutdown_timeout: Duration::from_secs(parse_var(&var, "SHUTDOWN_TIMEOUT", 30)?),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.region.is_empty()
            || !self
                .region
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ConfigError::ParseError {
                name: "AGENTCORE_REGION".to_string(),
                reason: "region must be a lowercase region name".to_string(),
            });
        }
        if self.agent_runtime_arn.region() != self.region {
            return Err(ConfigError::ParseError {
                name: "AGENTCORE_REGION".to_string(),
                reason: format!(
                    "region {} does not match runtime ARN region {}",
                    self.region,
                    self.agent_runtime_arn.region()
                ),
            });
        }
        if self.qualifier.is_empty() {
            return Err(ConfigError::MissingRequired("AGENTCORE_QUALIFIER".to_string()));
        }
        if let Some(role) = &self.tenant_role_arn {
            if !role.starts_with("arn:") || !role.contains(":role/") {
                return Err(ConfigError::InvalidArn {
                    field: "TENANT_ROLE_ARN".to_string(),
                    reason: "expected an IAM role ARN".to_string(),
                });
            }
        }

        let template = &self.storage.tenant_prefix_template;
        if !template.contains(APP_ID_PLACEHOLDER) || !template.contains(TENANT_ID_PLACEHOLDER) {
            return Err(ConfigError::InvalidTemplate(format!(
                "must contain both {APP_ID_PLACEHOLDER} and {TENANT_ID_PLACEHOLDER}"
            )));
        }
        if template.contains('*') || self.storage.shared_artifact_prefix.contains('*') {
            return Err(ConfigError::InvalidTemplate(
                "wildcards are not allowed in storage prefixes".to_string(),
            ));
        }

        for (name, value) in [
            ("CONNECT_TIMEOUT", self.timeouts.connect),
            ("CREDENTIAL_TIMEOUT", self.timeouts.credential_exchange),
            ("FIRST_BYTE_TIMEOUT", self.timeouts.first_byte),
            ("STREAM_IDLE_TIMEOUT", self.timeouts.stream_idle),
            ("AUDIT_WRITE_TIMEOUT", self.audit.write_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidTimeout(name.to_string()));
            }
        }

        if self.max_error_body_bytes == 0 {
            return Err(ConfigError::ParseError {
                name: "MAX_ERROR_BODY_BYTES".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.credential_cache.enabled && self.credential_cache.capacity == 0 {
            return Err(ConfigError::ParseError {
                name: "CREDENTIAL_CACHE_CAPACITY".to_string(),
                reason: "must be greater than 0 when the cache is enabled".to_string(),
            });
        }
        if self.audit.enabled && self.audit.bucket.is_none() {
            return Err(ConfigError::MissingRequired("AUDIT_LOGS_BUCKET".to_string()));
        }
        Ok(())
    }

    /// Socket address string for the listener.
    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parse a variable with a default value.
fn parse_var<T, F>(var: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(val) => val.parse().map_err(|e: T::Err| ConfigError::ParseError {
            name: name.to_string(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Parse a URL variable with a default value.
fn parse_url(name: &str, value: Option<String>, default: &str) -> Result<Url, ConfigError> {
    let raw = value.unwrap_or_else(|| default.to_string());
    let url = Url::parse(&raw).map_err(|e| ConfigError::InvalidUrl {
        field: name.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl {
            field: name.to_string(),
            reason: "expected an http(s) URL with a host".to_string(),
        });
    }
    Ok(url)
}
