//! Property-based tests for rust-common crate.
//!
//! These tests verify universal properties across all inputs using proptest.

use proptest::prelude::*;
use rust_common::{sanitize_message, REDACTED};

// *For any* message embedding an assigned secret, the sanitized message is
// fully redacted and does not echo the secret value.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_assigned_secrets_never_leak(
        name in prop::sample::select(vec!["password", "secret", "token", "api_key", "credential"]),
        value in "[A-Za-z0-9]{8,40}",
        prefix in "[a-z ]{0,20}",
    ) {
        let msg = format!("{prefix} {name}={value}");
        let sanitized = sanitize_message(&msg);
        prop_assert_eq!(&sanitized, REDACTED);
        prop_assert!(!sanitized.contains(&value));
    }

    #[test]
    fn prop_arns_are_masked(
        account in "[0-9]{12}",
        role in "[a-z][a-z0-9-]{2,20}",
        lead in "[A-Z][a-z]{2,10}",
    ) {
        let msg = format!("{lead} arn:aws:iam::{account}:role/{role} denied");
        let sanitized = sanitize_message(&msg);
        prop_assert!(!sanitized.contains(&account));
        prop_assert!(sanitized.starts_with(&lead));
    }

    #[test]
    fn prop_plain_words_survive(words in prop::collection::vec("[a-z]{1,8}", 1..5)) {
        let msg = words.join(" ");
        let sanitized = sanitize_message(&msg);
        // No sensitive patterns and no assignments: nothing to redact
        if !rust_common::contains_sensitive_info(&msg) {
            prop_assert_eq!(sanitized, msg);
        }
    }

    #[test]
    fn prop_sanitized_length_is_bounded(msg in ".{0,2000}") {
        let sanitized = sanitize_message(&msg);
        prop_assert!(sanitized.chars().count() <= 259);
    }
}
