//! Property-based tests for path normalization.
//!
//! These tests use proptest to generate random inputs and verify that
//! invariants hold for all possible inputs.

#[cfg(test)]
mod proptest_tests {
    use crate::path::NormalizedPath;
    use proptest::prelude::*;

    proptest! {
        /// Property: normalizing twice gives the same result as normalizing once
        #[test]
        fn normalize_is_idempotent(input in "[a-z./\\\\]{0,40}") {
            let once = NormalizedPath::new(&input);
            let twice = NormalizedPath::new(once.as_str());
            prop_assert_eq!(once, twice);
        }

        /// Property: normalized paths never contain backslashes or dot segments
        #[test]
        fn normalize_removes_dot_segments(input in "[a-z./\\\\]{0,40}") {
            let path = NormalizedPath::new(&input);
            prop_assert!(!path.as_str().contains('\\'));
            for segment in path.as_str().split('/') {
                prop_assert!(segment != "." && segment != "..", "segment {:?} in {:?}", segment, path);
            }
        }

        /// Property: normalized paths are relative and have no empty segments
        #[test]
        fn normalize_is_relative(input in "[a-z./\\\\]{0,40}") {
            let path = NormalizedPath::new(&input);
            prop_assert!(!path.as_str().starts_with('/'));
            prop_assert!(!path.as_str().ends_with('/'));
            prop_assert!(!path.as_str().contains("//"));
        }

        /// Property: plain segment paths are unchanged
        #[test]
        fn plain_paths_are_preserved(input in "[a-z]{1,8}(/[a-z]{1,8}){0,4}") {
            let normalized = NormalizedPath::new(&input);
            prop_assert_eq!(normalized.as_str(), input.as_str());
        }
    }
}
