//! Property-based tests for the guard, signer and stream relay.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use reqwest::Method;
use url::Url;

use signing_proxy::config::{RuntimeArn, StorageLayout};
use signing_proxy::context::{AuthorizerContext, InboundRequest, TenantScope};
use signing_proxy::credentials::Credentials;
use signing_proxy::isolation::check_session_isolation;
use signing_proxy::relay::{FrameSequencer, StreamFrame, Utf8Carry};
use signing_proxy::scope::{TenantScopeResolver, MAX_POLICY_BYTES};
use signing_proxy::signing::{sign, SigningParams, UnsignedRequest};
use signing_proxy::ProxyError;
use test_utils::{
    hostile_identifier_strategy, identifier_strategy, prompt_strategy, session_id_strategy,
    split_points_strategy, stream_text_strategy, SAMPLE_ACCESS_KEY_ID, SAMPLE_RUNTIME_ARN,
    SAMPLE_SECRET_ACCESS_KEY,
};

fn inbound(prompt: String, declared: Option<String>, authorized: Option<String>) -> InboundRequest {
    InboundRequest {
        prompt,
        session_id: declared,
        context: AuthorizerContext {
            session_id: authorized,
            ..AuthorizerContext::default()
        },
    }
}

fn resolver() -> TenantScopeResolver {
    TenantScopeResolver::new(
        RuntimeArn::parse(SAMPLE_RUNTIME_ARN).unwrap(),
        StorageLayout {
            bucket: Some("tenant-data".to_string()),
            ..StorageLayout::default()
        },
    )
}

fn split_at_points(bytes: &[u8], points: &[usize]) -> Vec<Vec<u8>> {
    let mut chunks = Vec::new();
    let mut start = 0;
    for &point in points {
        chunks.push(bytes[start..point].to_vec());
        start = point;
    }
    chunks.push(bytes[start..].to_vec());
    chunks
}

proptest! {
    #[test]
    fn isolation_rejects_any_mismatch(
        prompt in prompt_strategy(),
        declared in session_id_strategy(),
        authorized in session_id_strategy(),
    ) {
        let result = check_session_isolation(&inbound(prompt, Some(declared.clone()), Some(authorized.clone())));
        if declared == authorized {
            prop_assert!(result.is_ok());
        } else {
            prop_assert!(matches!(result, Err(ProxyError::IsolationViolation)));
        }
    }

    #[test]
    fn isolation_ignores_one_sided_sessions(
        prompt in prompt_strategy(),
        session in session_id_strategy(),
        body_side in any::<bool>(),
    ) {
        let request = if body_side {
            inbound(prompt, Some(session), None)
        } else {
            inbound(prompt, None, Some(session))
        };
        prop_assert!(check_session_isolation(&request).is_ok());
    }

    #[test]
    fn scope_policy_is_bounded_and_wildcard_free_in_identity(
        app_id in identifier_strategy(),
        tenant_id in identifier_strategy(),
    ) {
        let scope = TenantScope { app_id: app_id.clone(), tenant_id: tenant_id.clone() };
        let policy = resolver().resolve(Some(&scope)).unwrap().unwrap();
        prop_assert!(policy.packed_len() <= MAX_POLICY_BYTES);

        let invoke = policy.invoke_statement().unwrap();
        prop_assert_eq!(&invoke.resource, &vec![SAMPLE_RUNTIME_ARN.to_string()]);

        let prefix = format!("{app_id}/{tenant_id}");
        prop_assert!(policy.to_json().contains(&prefix));
    }

    #[test]
    fn hostile_claims_never_produce_a_policy(
        hostile in hostile_identifier_strategy(),
        plain in identifier_strategy(),
        hostile_tenant in any::<bool>(),
    ) {
        let scope = if hostile_tenant {
            TenantScope { app_id: plain, tenant_id: hostile }
        } else {
            TenantScope { app_id: hostile, tenant_id: plain }
        };
        let result = resolver().resolve(Some(&scope));
        prop_assert!(
            matches!(result, Err(ProxyError::CredentialExchange { .. })),
            "expected a rejected scope"
        );
    }

    #[test]
    fn signing_is_deterministic(
        prompt in prompt_strategy(),
        session in session_id_strategy(),
        secs in 1_600_000_000i64..1_900_000_000,
    ) {
        let credentials = Credentials::new(SAMPLE_ACCESS_KEY_ID, SAMPLE_SECRET_ACCESS_KEY, None);
        let url = Url::parse("https://bedrock-agentcore.us-east-1.amazonaws.com/runtimes/x/invocations?qualifier=DEFAULT").unwrap();
        let at = Utc.timestamp_opt(secs, 0).unwrap();
        let params = SigningParams::service("us-east-1", "bedrock-agentcore");
        let request = || {
            UnsignedRequest::new(Method::POST, url.clone(), prompt.clone().into_bytes())
                .header("x-amzn-bedrock-agentcore-runtime-session-id", session.clone())
        };

        let first = sign(request(), &credentials, &params, at);
        let second = sign(request(), &credentials, &params, at);
        prop_assert_eq!(first.header("authorization"), second.header("authorization"));

        let other_body = sign(
            UnsignedRequest::new(Method::POST, url.clone(), format!("{prompt}!").into_bytes())
                .header("x-amzn-bedrock-agentcore-runtime-session-id", session.clone()),
            &credentials,
            &params,
            at,
        );
        prop_assert_ne!(first.header("authorization"), other_body.header("authorization"));
    }

    #[test]
    fn utf8_carry_reassembles_split_text(
        (text, points) in stream_text_strategy()
            .prop_flat_map(|text| {
                let len = text.len();
                (Just(text), split_points_strategy(len))
            }),
    ) {
        let mut carry = Utf8Carry::default();
        let mut out = String::new();
        for chunk in split_at_points(text.as_bytes(), &points) {
            let piece = carry.push(&chunk);
            prop_assert!(!piece.contains(char::REPLACEMENT_CHARACTER));
            out.push_str(&piece);
        }
        prop_assert!(carry.finish().is_none());
        prop_assert_eq!(out, text);
    }

    #[test]
    fn sequencer_accepts_only_well_ordered_streams(kinds in prop::collection::vec(0u8..4, 0..12)) {
        let frames: Vec<StreamFrame> = kinds
            .iter()
            .map(|k| match k {
                0 => StreamFrame::Meta { session_id: "s".to_string() },
                1 => StreamFrame::Delta { delta: "d".to_string() },
                2 => StreamFrame::Done { session_id: "s".to_string(), deltas: 0 },
                _ => StreamFrame::Error { message: "e".to_string() },
            })
            .collect();

        let mut sequencer = FrameSequencer::new();
        let mut seen_delta = false;
        let mut terminated = false;
        for (index, frame) in frames.iter().enumerate() {
            let allowed = !terminated
                && match frame {
                    StreamFrame::Meta { .. } => index == 0,
                    StreamFrame::Delta { .. } | StreamFrame::Done { .. } => true,
                    StreamFrame::Error { .. } => !seen_delta,
                };
            let admitted = sequencer.admit(frame).is_ok();
            prop_assert_eq!(admitted, allowed, "frame {} ({})", index, frame.kind());
            if !admitted {
                break;
            }
            seen_delta |= matches!(frame, StreamFrame::Delta { .. });
            terminated = frame.is_terminal();
        }
        prop_assert!(sequencer.deltas() <= kinds.len() as u64);
    }
}
