//! Shared proptest generators.

use proptest::prelude::*;

/// Identifiers that are valid as tenant or application claims.
pub fn identifier_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,23}"
}

/// Claims that must be rejected before they reach a policy.
pub fn hostile_identifier_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        Just(".".to_string()),
        Just("..".to_string()),
        "[a-z]{1,8}".prop_map(|s| format!("{s}*")),
        "[a-z]{1,8}".prop_map(|s| format!("{s}?")),
        ("[a-z]{1,8}", "[a-z]{1,8}").prop_map(|(a, b)| format!("{a}/{b}")),
        ("[a-z]{1,8}", "[a-z]{1,8}").prop_map(|(a, b)| format!("{a} {b}")),
        "[a-z]{1,8}".prop_map(|s| format!("{s}\\x")),
        "[a-z]{1,8}".prop_map(|s| format!("{s}\n")),
    ]
}

/// Session identifiers as clients send them.
pub fn session_id_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}",
        "[A-Za-z0-9_-]{1,48}",
    ]
}

/// Non-blank prompts, including multibyte text.
pub fn prompt_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-zA-Z0-9 ,.?!]{1,200}",
        "\\PC{1,80}",
    ]
    .prop_filter("prompt must not be blank", |s| !s.trim().is_empty())
}

/// Arbitrary text used to exercise chunked streaming.
///
/// Never contains U+FFFD, so a replacement character in decoded output
/// always means a decoding fault.
pub fn stream_text_strategy() -> impl Strategy<Value = String> {
    "[^\u{FFFD}\\p{C}]{0,200}"
}

/// Split points for a buffer of `len` bytes, sorted and deduplicated.
pub fn split_points_strategy(len: usize) -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0..=len, 0..8).prop_map(|mut points| {
        points.sort_unstable();
        points.dedup();
        points
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn identifiers_are_plain(id in identifier_strategy()) {
            prop_assert!(!id.is_empty());
            prop_assert!(id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
        }

        #[test]
        fn prompts_are_not_blank(prompt in prompt_strategy()) {
            prop_assert!(!prompt.trim().is_empty());
        }

        #[test]
        fn stream_text_has_no_replacement_character(text in stream_text_strategy()) {
            prop_assert!(!text.contains(char::REPLACEMENT_CHARACTER));
        }

        #[test]
        fn split_points_stay_in_bounds(points in split_points_strategy(16)) {
            prop_assert!(points.iter().all(|p| *p <= 16));
            prop_assert!(points.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
