//! Pattern validation before a candidate reaches the registry.
//!
//! A candidate must compile under the matcher flags and must stay quiet on
//! a fixed set of generic texts. Anything that matches ordinary prose
//! or a plain digit run would flag most traffic.

use regex::{Regex, RegexBuilder};
use thiserror::Error;

/// Compiled program size cap for a single pattern.
pub const PATTERN_SIZE_LIMIT: usize = 10 * (1 << 20);

/// Generic texts a specific pattern must not match.
pub const GENERIC_TEXTS: &[&str] = &[
    "项脊轩，旧南阁子也。室仅方丈，可容一人居。百年老屋，尘泥渗漉，雨泽下注。",
    "It was the best of times, it was the worst of times, it was the age of wisdom.",
    "Lorem ipsum dolor sit amet, consectetur adipiscing elit.",
    "0123456789",
];

/// Why a candidate was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("pattern does not compile: {0}")]
    CompileError(String),

    /// Matched one of [`GENERIC_TEXTS`].
    #[error("pattern matches generic text")]
    NonSpecific,
}

/// Build a regex with the flags every matcher uses: case-insensitive,
/// multi-line and dot-matches-newline.
pub fn matcher_builder(pattern: &str) -> RegexBuilder {
    let mut builder = RegexBuilder::new(pattern);
    builder
        .case_insensitive(true)
        .multi_line(true)
        .dot_matches_new_line(true);
    builder
}

/// Compile a single pattern under the matcher flags.
pub fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    matcher_builder(pattern)
        .size_limit(PATTERN_SIZE_LIMIT)
        .build()
}

/// Stateless validator for candidate patterns.
#[derive(Debug, Clone, Default)]
pub struct PatternValidator;

impl PatternValidator {
    pub fn new() -> Self {
        Self
    }

    /// Check that `candidate` compiles and is specific.
    pub fn validate(&self, candidate: &str) -> Result<(), Rejection> {
        let regex =
            compile_pattern(candidate).map_err(|e| Rejection::CompileError(e.to_string()))?;

        if let Some(text) = GENERIC_TEXTS.iter().find(|text| regex.is_match(text)) {
            tracing::debug!(pattern = candidate, text = text, "Pattern matched generic text");
            return Err(Rejection::NonSpecific);
        }

        Ok(())
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Long lowercase literals with a hyphen never appear in generic text.
        #[test]
        fn prop_hyphenated_literals_accepted(left in "[q-z]{4,10}", right in "[q-z]{4,10}") {
            let candidate = format!("{}-{}", left, right);
            prop_assert_eq!(PatternValidator::new().validate(&candidate), Ok(()));
        }

        /// Anything that matches generic text is rejected regardless of prefix.
        #[test]
        fn prop_digit_runs_rejected(start in 0usize..9, len in 1usize..3) {
            let digits = &"0123456789"[start..(start + len).min(10)];
            prop_assert_eq!(
                PatternValidator::new().validate(digits),
                Err(Rejection::NonSpecific)
            );
        }
    }
}
