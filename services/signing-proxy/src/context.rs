//! Inbound request and authorizer context.
//!
//! The authorizer context is an explicit value threaded through every
//! pipeline stage. In the HTTP binding it comes from headers set by the
//! fronting authorizer, which this service trusts as already validated.

use axum::http::HeaderMap;
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::InputError;

/// Longest accepted session id.
pub const MAX_SESSION_ID_LEN: usize = 256;

/// Header carrying the caller's access token.
pub const ACCESS_TOKEN_HEADER: &str = "x-authorizer-access-token";
/// Header carrying the tenant id claim.
pub const TENANT_ID_HEADER: &str = "x-authorizer-tenant-id";
/// Header carrying the application id claim.
pub const APP_ID_HEADER: &str = "x-authorizer-app-id";
/// Header carrying the authorized session id.
pub const SESSION_ID_HEADER: &str = "x-authorizer-session-id";

/// Claims supplied out-of-band by the authorizer.
#[derive(Debug, Clone, Default)]
pub struct AuthorizerContext {
    /// Caller's access token; never logged or forwarded
    pub access_token: Option<SecretString>,
    /// Tenant claim
    pub tenant_id: Option<String>,
    /// Application claim
    pub app_id: Option<String>,
    /// Session the caller is authorized for
    pub session_id: Option<String>,
}

impl AuthorizerContext {
    /// Reads the context from trusted authorizer headers.
    ///
    /// Empty or non-UTF-8 values count as absent.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        Self {
            access_token: read(ACCESS_TOKEN_HEADER).map(SecretString::from),
            tenant_id: read(TENANT_ID_HEADER),
            app_id: read(APP_ID_HEADER),
            session_id: read(SESSION_ID_HEADER),
        }
    }

    /// The {app, tenant} pair, present only when both claims are.
    #[must_use]
    pub fn tenant_scope(&self) -> Option<TenantScope> {
        match (&self.app_id, &self.tenant_id) {
            (Some(app_id), Some(tenant_id)) => Some(TenantScope {
                app_id: app_id.clone(),
                tenant_id: tenant_id.clone(),
            }),
            _ => None,
        }
    }

    /// Whether an access token accompanied the request.
    #[must_use]
    pub fn has_access_token(&self) -> bool {
        self.access_token.is_some()
    }
}

/// Tenant namespace for one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantScope {
    /// Application id
    pub app_id: String,
    /// Tenant id
    pub tenant_id: String,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    prompt: Option<Value>,
    #[serde(rename = "sessionId")]
    session_id: Option<Value>,
}

/// A validated chat request.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    /// Prompt text forwarded to the backend
    pub prompt: String,
    /// Session id declared in the body, if any
    pub session_id: Option<String>,
    /// Authorizer claims
    pub context: AuthorizerContext,
}

impl InboundRequest {
    /// Parses and validates the request body.
    pub fn parse(body: &[u8], context: AuthorizerContext) -> Result<Self, InputError> {
        let value: Value = serde_json::from_slice(body).map_err(|_| InputError::MalformedJson)?;
        if !value.is_object() {
            return Err(InputError::MalformedJson);
        }
        let request: ChatRequest =
            serde_json::from_value(value).map_err(|_| InputError::MalformedJson)?;

        let prompt = match request.prompt {
            Some(Value::String(prompt)) if !prompt.trim().is_empty() => prompt,
            _ => return Err(InputError::MissingPrompt),
        };
        let session_id = match request.session_id {
            Some(Value::String(id)) if !id.trim().is_empty() => {
                if !is_valid_session_id(&id) {
                    return Err(InputError::InvalidSessionId);
                }
                Some(id)
            }
            _ => None,
        };

        Ok(Self {
            prompt,
            session_id,
            context,
        })
    }

    /// Session id used for the backend call.
    ///
    /// Body session id, else the authorized session, else a fresh UUID.
    #[must_use]
    pub fn resolve_session_id(&self) -> String {
        self.session_id
            .clone()
            .or_else(|| self.context.session_id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }
}

/// Session ids travel as header values: visible ASCII only.
fn is_valid_session_id(id: &str) -> bool {
    id.len() <= MAX_SESSION_ID_LEN && id.bytes().all(|b| b.is_ascii_graphic())
}
