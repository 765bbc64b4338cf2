//! Random string generation from a pattern's language.
//!
//! Walks the parsed HIR and emits one random member of the language per call.
//! Unbounded repetitions are capped at `min + repeat_limit` and the whole
//! sample is capped at `max_bytes`, so generation always terminates.

use rand::Rng;
use regex_syntax::hir::{Class, ClassUnicodeRange, Hir, HirKind};
use regex_syntax::ParserBuilder;
use thiserror::Error;

/// Extra repetitions allowed past a repetition's minimum.
pub const DEFAULT_REPEAT_LIMIT: u32 = 32;

/// Hard cap on the size of one sample.
pub const DEFAULT_MAX_SAMPLE_BYTES: usize = 4096;

/// Printable ASCII, preferred whenever a class overlaps it.
const PRINTABLE_ASCII: (u32, u32) = (0x20, 0x7e);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SampleError {
    #[error("pattern does not parse: {0}")]
    Parse(String),

    #[error("sample exceeded {limit} bytes")]
    TooLong { limit: usize },

    #[error("character class is empty")]
    EmptyClass,

    #[error("sample is not valid UTF-8")]
    NonUtf8,
}

/// Bounded generator of strings a pattern can match.
#[derive(Debug, Clone)]
pub struct Sampler {
    repeat_limit: u32,
    max_bytes: usize,
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new(DEFAULT_REPEAT_LIMIT)
    }
}

impl Sampler {
    pub fn new(repeat_limit: u32) -> Self {
        Self {
            repeat_limit,
            max_bytes: DEFAULT_MAX_SAMPLE_BYTES,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Parse a pattern with the same flags the compiled matchers use.
    pub fn parse(&self, pattern: &str) -> Result<Hir, SampleError> {
        ParserBuilder::new()
            .case_insensitive(true)
            .multi_line(true)
            .dot_matches_new_line(true)
            .build()
            .parse(pattern)
            .map_err(|e| SampleError::Parse(e.to_string()))
    }

    /// Produce one random string from the language of `hir`.
    pub fn sample<R: Rng + ?Sized>(&self, hir: &Hir, rng: &mut R) -> Result<String, SampleError> {
        let mut out = Vec::new();
        self.emit(hir, rng, &mut out)?;
        String::from_utf8(out).map_err(|_| SampleError::NonUtf8)
    }

    /// Parse `pattern` and draw `count` samples from it.
    pub fn sample_pattern<R: Rng + ?Sized>(
        &self,
        pattern: &str,
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<String>, SampleError> {
        let hir = self.parse(pattern)?;
        (0..count).map(|_| self.sample(&hir, &mut *rng)).collect()
    }

    fn emit<R: Rng + ?Sized>(
        &self,
        hir: &Hir,
        rng: &mut R,
        out: &mut Vec<u8>,
    ) -> Result<(), SampleError> {
        match hir.kind() {
            // Assertions consume no text
            HirKind::Empty | HirKind::Look(_) => {}
            HirKind::Literal(literal) => out.extend_from_slice(&literal.0),
            HirKind::Class(Class::Unicode(class)) => {
                let c = pick_char(class.ranges(), rng).ok_or(SampleError::EmptyClass)?;
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
            HirKind::Class(Class::Bytes(class)) => {
                let ranges: Vec<(u32, u32)> = class
                    .ranges()
                    .iter()
                    .map(|r| (u32::from(r.start()), u32::from(r.end())))
                    .collect();
                let byte = pick_in_ranges(&ranges, rng).ok_or(SampleError::EmptyClass)?;
                out.push(byte as u8);
            }
            HirKind::Repetition(repetition) => {
                let count = self.repeat_count(repetition.min, repetition.max, rng);
                for _ in 0..count {
                    self.emit(&repetition.sub, rng, out)?;
                }
            }
            HirKind::Capture(capture) => self.emit(&capture.sub, rng, out)?,
            HirKind::Concat(parts) => {
                for part in parts {
                    self.emit(part, rng, out)?;
                }
            }
            HirKind::Alternation(branches) => {
                let branch = &branches[rng.gen_range(0..branches.len())];
                self.emit(branch, rng, out)?;
            }
        }

        if out.len() > self.max_bytes {
            return Err(SampleError::TooLong {
                limit: self.max_bytes,
            });
        }
        Ok(())
    }

    fn repeat_count<R: Rng + ?Sized>(&self, min: u32, max: Option<u32>, rng: &mut R) -> u32 {
        let cap = min.saturating_add(self.repeat_limit);
        let hi = max.map_or(cap, |max| max.min(cap));
        rng.gen_range(min..=hi.max(min))
    }
}

/// Pick a char from a class, preferring printable ASCII members.
fn pick_char<R: Rng + ?Sized>(ranges: &[ClassUnicodeRange], rng: &mut R) -> Option<char> {
    let (ascii_lo, ascii_hi) = PRINTABLE_ASCII;
    let ascii: Vec<(u32, u32)> = ranges
        .iter()
        .filter_map(|r| {
            let lo = u32::from(r.start()).max(ascii_lo);
            let hi = u32::from(r.end()).min(ascii_hi);
            (lo <= hi).then_some((lo, hi))
        })
        .collect();

    let pool = if ascii.is_empty() {
        ranges
            .iter()
            .map(|r| (u32::from(r.start()), u32::from(r.end())))
            .collect()
    } else {
        ascii
    };

    let code = pick_in_ranges(&pool, rng)?;
    // Wide ranges may span the surrogate block; fall back to the range start
    char::from_u32(code).or_else(|| {
        pool.iter()
            .find(|(lo, hi)| (*lo..=*hi).contains(&code))
            .and_then(|(lo, _)| char::from_u32(*lo))
    })
}

/// Uniform pick across a union of inclusive ranges.
fn pick_in_ranges<R: Rng + ?Sized>(ranges: &[(u32, u32)], rng: &mut R) -> Option<u32> {
    let total: u64 = ranges
        .iter()
        .map(|(lo, hi)| u64::from(hi - lo) + 1)
        .sum();
    if total == 0 {
        return None;
    }

    let mut n = rng.gen_range(0..total);
    for (lo, hi) in ranges {
        let span = u64::from(hi - lo) + 1;
        if n < span {
            return Some(lo + n as u32);
        }
        n -= span;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::compile_pattern;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn literal_samples_match_case_insensitively() {
        let sampler = Sampler::default();
        let mut rng = StdRng::seed_from_u64(7);

        let samples = sampler.sample_pattern("foo", 20, &mut rng).unwrap();
        for sample in samples {
            assert_eq!(sample.to_lowercase(), "foo");
        }
    }

    #[test]
    fn star_is_bounded_by_repeat_limit() {
        let sampler = Sampler::new(32);
        let mut rng = StdRng::seed_from_u64(1);

        for sample in sampler.sample_pattern("a*", 200, &mut rng).unwrap() {
            assert!(sample.len() <= 32, "sample too long: {}", sample.len());
        }
        for sample in sampler.sample_pattern("b+", 200, &mut rng).unwrap() {
            assert!((1..=33).contains(&sample.len()));
        }
    }

    #[test]
    fn counted_repetition_respects_bounds() {
        let sampler = Sampler::default();
        let mut rng = StdRng::seed_from_u64(3);

        for sample in sampler.sample_pattern("x{2,4}", 100, &mut rng).unwrap() {
            assert!((2..=4).contains(&sample.len()));
        }
    }

    #[test]
    fn alternation_covers_branches() {
        let sampler = Sampler::default();
        let mut rng = StdRng::seed_from_u64(11);

        let samples = sampler.sample_pattern("cat|dog", 100, &mut rng).unwrap();
        assert!(samples.iter().any(|s| s.eq_ignore_ascii_case("cat")));
        assert!(samples.iter().any(|s| s.eq_ignore_ascii_case("dog")));
    }

    #[test]
    fn dot_prefers_printable_ascii() {
        let sampler = Sampler::default();
        let mut rng = StdRng::seed_from_u64(5);

        for sample in sampler.sample_pattern(".", 100, &mut rng).unwrap() {
            let c = sample.chars().next().unwrap();
            assert!(c.is_ascii() && !c.is_ascii_control());
        }
    }

    #[test]
    fn negated_ascii_class_falls_back_to_unicode() {
        let sampler = Sampler::default();
        let mut rng = StdRng::seed_from_u64(9);

        let samples = sampler
            .sample_pattern(r"[^\x00-\x7F]", 50, &mut rng)
            .unwrap();
        for sample in samples {
            assert!(!sample.chars().next().unwrap().is_ascii());
        }
    }

    #[test]
    fn oversized_samples_are_rejected() {
        let sampler = Sampler::default().with_max_bytes(64);
        let mut rng = StdRng::seed_from_u64(2);

        assert_eq!(
            sampler.sample_pattern("a{500}", 1, &mut rng),
            Err(SampleError::TooLong { limit: 64 })
        );
    }

    #[test]
    fn parse_errors_are_reported() {
        let sampler = Sampler::default();
        assert!(matches!(
            sampler.parse("(unclosed"),
            Err(SampleError::Parse(_))
        ));
    }

    #[test]
    fn seeded_sampling_is_reproducible() {
        let sampler = Sampler::default();
        let first = sampler
            .sample_pattern("[a-z]{3,9}", 10, &mut StdRng::seed_from_u64(42))
            .unwrap();
        let second = sampler
            .sample_pattern("[a-z]{3,9}", 10, &mut StdRng::seed_from_u64(42))
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn samples_match_their_pattern() {
        let sampler = Sampler::default();
        let mut rng = StdRng::seed_from_u64(13);

        for pattern in [r"^free-(?:btc|eth)\s+promo$", r"t\.me/[a-z_]{5,}", r"\bspam\w*"] {
            let regex = compile_pattern(pattern).unwrap();
            for sample in sampler.sample_pattern(pattern, 25, &mut rng).unwrap() {
                assert!(regex.is_match(&sample), "{} should match {:?}", pattern, sample);
            }
        }
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::validator::compile_pattern;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Every sample belongs to the language of the pattern it came from.
        #[test]
        fn prop_samples_are_members(
            head in "[a-z]{2,6}",
            left in "[a-z]{1,4}",
            right in "[a-z]{1,4}",
            seed in any::<u64>(),
        ) {
            let pattern = format!(r"{}(?:{}|{})+\d*", head, left, right);
            let regex = compile_pattern(&pattern).expect("generated pattern should compile");
            let sampler = Sampler::default();
            let mut rng = StdRng::seed_from_u64(seed);

            for sample in sampler.sample_pattern(&pattern, 5, &mut rng).expect("should sample") {
                prop_assert!(regex.is_match(&sample), "{} should match {:?}", pattern, sample);
            }
        }
    }
}
