//! Tenant scope resolver.

use crate::config::{ProxyConfig, RuntimeArn, StorageLayout, APP_ID_PLACEHOLDER, TENANT_ID_PLACEHOLDER};
use crate::context::TenantScope;
use crate::error::ProxyError;

use super::policy::{PolicyDocument, ScopePolicy, Statement, INVOKE_STATEMENT_SID, MAX_POLICY_BYTES, POLICY_VERSION};

/// Builds least-privilege session policies for one {app, tenant} pair.
#[derive(Debug, Clone)]
pub struct TenantScopeResolver {
    runtime_arn: RuntimeArn,
    storage: StorageLayout,
}

impl TenantScopeResolver {
    /// Creates a resolver for the configured backend and storage layout.
    #[must_use]
    pub fn new(runtime_arn: RuntimeArn, storage: StorageLayout) -> Self {
        Self {
            runtime_arn,
            storage,
        }
    }

    /// Creates a resolver from the proxy configuration.
    #[must_use]
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(config.agent_runtime_arn.clone(), config.storage.clone())
    }

    /// Resolves the session policy for a tenant.
    ///
    /// Returns `Ok(None)` without a tenant scope; the caller then uses the
    /// proxy's own identity.
    pub fn resolve(&self, scope: Option<&TenantScope>) -> Result<Option<ScopePolicy>, ProxyError> {
        let Some(scope) = scope else {
            return Ok(None);
        };

        validate_identifier("app id", &scope.app_id)?;
        validate_identifier("tenant id", &scope.tenant_id)?;

        let partition = self.runtime_arn.partition();
        let mut statements = Vec::with_capacity(4);

        if let Some(bucket) = &self.storage.bucket {
            let prefix = self.tenant_prefix(scope);
            let bucket_arn = format!("arn:{partition}:s3:::{bucket}");

            statements.push(Statement::allow(
                "TenantObjectAccess",
                &["s3:GetObject", "s3:PutObject", "s3:DeleteObject"],
                vec![format!("{bucket_arn}/{prefix}/*")],
            ));
            statements.push(
                Statement::allow("TenantPrefixListing", &["s3:ListBucket"], vec![bucket_arn.clone()])
                    .with_condition(
                        "StringLike",
                        "s3:prefix",
                        vec![prefix.clone(), format!("{prefix}/*")],
                    ),
            );
            let shared = self.storage.shared_artifact_prefix.trim_matches('/');
            if !shared.is_empty() {
                statements.push(Statement::allow(
                    "SharedArtifactRead",
                    &["s3:GetObject"],
                    vec![format!("{bucket_arn}/{shared}/*")],
                ));
            }
        }

        statements.push(Statement::allow(
            INVOKE_STATEMENT_SID,
            &["bedrock-agentcore:InvokeAgentRuntime"],
            vec![self.runtime_arn.as_str().to_string()],
        ));

        let policy = ScopePolicy::new(PolicyDocument {
            version: POLICY_VERSION.to_string(),
            statement: statements,
        })
        .map_err(|e| ProxyError::credential_exchange(format!("policy serialization failed: {e}")))?;

        if policy.packed_len() > MAX_POLICY_BYTES {
            return Err(ProxyError::credential_exchange(format!(
                "session policy exceeds {MAX_POLICY_BYTES} bytes"
            )));
        }

        tracing::debug!(
            app_id = %scope.app_id,
            tenant_id = %scope.tenant_id,
            policy_fingerprint = policy.fingerprint(),
            policy_bytes = policy.packed_len(),
            "Resolved tenant scope"
        );
        Ok(Some(policy))
    }

    fn tenant_prefix(&self, scope: &TenantScope) -> String {
        self.storage
            .tenant_prefix_template
            .replace(APP_ID_PLACEHOLDER, &scope.app_id)
            .replace(TENANT_ID_PLACEHOLDER, &scope.tenant_id)
            .trim_matches('/')
            .to_string()
    }
}

/// Rejects identifiers that could widen a storage path.
fn validate_identifier(label: &str, value: &str) -> Result<(), ProxyError> {
    let widening = value.is_empty()
        || value == "."
        || value.contains("..")
        || value
            .chars()
            .any(|c| matches!(c, '*' | '?' | '/' | '\\') || c.is_whitespace() || c.is_control());
    if widening {
        return Err(ProxyError::credential_exchange(format!("invalid {label}")));
    }
    Ok(())
}
