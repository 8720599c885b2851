//! Session isolation guard.

use subtle::ConstantTimeEq;

use crate::context::InboundRequest;
use crate::error::ProxyError;

/// Rejects a request whose declared session differs from the authorized one.
///
/// Only applies when both sides carry a session id. Runs before any
/// credential exchange or upstream call.
pub fn check_session_isolation(request: &InboundRequest) -> Result<(), ProxyError> {
    let (Some(authorized), Some(declared)) = (&request.context.session_id, &request.session_id)
    else {
        return Ok(());
    };

    if bool::from(authorized.as_bytes().ct_eq(declared.as_bytes())) {
        Ok(())
    } else {
        tracing::warn!(
            tenant_id = request.context.tenant_id.as_deref().unwrap_or("-"),
            app_id = request.context.app_id.as_deref().unwrap_or("-"),
            "Session isolation violation"
        );
        Err(ProxyError::IsolationViolation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AuthorizerContext;

    fn request(body_session: Option<&str>, authorized: Option<&str>) -> InboundRequest {
        InboundRequest {
            prompt: "hello".to_string(),
            session_id: body_session.map(str::to_string),
            context: AuthorizerContext {
                session_id: authorized.map(str::to_string),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_matching_sessions_pass() {
        assert!(check_session_isolation(&request(Some("s1"), Some("s1"))).is_ok());
    }

    #[test]
    fn test_mismatch_rejected() {
        let err = check_session_isolation(&request(Some("s1"), Some("s2"))).unwrap_err();
        assert!(matches!(err, ProxyError::IsolationViolation));
    }

    #[test]
    fn test_prefix_is_not_a_match() {
        assert!(check_session_isolation(&request(Some("s1"), Some("s10"))).is_err());
    }

    #[test]
    fn test_absent_sides_pass() {
        assert!(check_session_isolation(&request(None, Some("s2"))).is_ok());
        assert!(check_session_isolation(&request(Some("s1"), None)).is_ok());
        assert!(check_session_isolation(&request(None, None)).is_ok());
    }
}
