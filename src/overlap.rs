//! Heuristic overlap detection between patterns of one category.
//!
//! Two patterns conflict when a sample drawn from either one is matched by
//! the other. Sampling is random, so the test is neither sound nor complete.
//! A comparison that cannot be carried out (an existing entry that no longer
//! compiles, or a sample that blows the size cap) counts as no conflict.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use regex_syntax::hir::Hir;
use thiserror::Error;

use crate::sampler::{SampleError, Sampler};
use crate::validator::compile_pattern;

/// Default samples drawn per direction per comparison.
pub const DEFAULT_SAMPLES_PER_PATTERN: usize = 4;

/// Why a pattern could not take part in an overlap comparison.
#[derive(Debug, Error)]
pub enum ComparisonError {
    #[error("pattern does not compile: {0}")]
    Compile(#[from] regex::Error),

    #[error(transparent)]
    Sample(#[from] SampleError),
}

/// A pattern parsed and compiled once, ready for repeated comparisons.
#[derive(Debug)]
pub struct PreparedPattern {
    pattern: String,
    regex: Regex,
    hir: Hir,
}

impl PreparedPattern {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

/// Sampling-based detector for overlapping patterns.
pub struct OverlapDetector {
    sampler: Sampler,
    samples_per_pattern: usize,
    rng: Mutex<StdRng>,
}

impl OverlapDetector {
    /// Create a detector seeded from OS entropy.
    pub fn new(sampler: Sampler, samples_per_pattern: usize) -> Self {
        Self::with_rng(sampler, samples_per_pattern, StdRng::from_entropy())
    }

    /// Create a detector with a fixed seed for reproducible scans.
    pub fn with_seed(sampler: Sampler, samples_per_pattern: usize, seed: u64) -> Self {
        Self::with_rng(sampler, samples_per_pattern, StdRng::seed_from_u64(seed))
    }

    fn with_rng(sampler: Sampler, samples_per_pattern: usize, rng: StdRng) -> Self {
        Self {
            sampler,
            samples_per_pattern: samples_per_pattern.max(1),
            rng: Mutex::new(rng),
        }
    }

    /// Parse and compile `pattern` for later scans.
    pub fn prepare(&self, pattern: &str) -> Result<PreparedPattern, ComparisonError> {
        Ok(PreparedPattern {
            pattern: pattern.to_string(),
            regex: compile_pattern(pattern)?,
            hir: self.sampler.parse(pattern)?,
        })
    }

    /// Fresh generator for one scan, derived from the detector's own.
    ///
    /// The shared generator is locked only long enough to draw a seed, so
    /// concurrent scans never wait on each other.
    fn scan_rng(&self) -> StdRng {
        // A poisoned rng is still a usable rng
        let mut shared = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        StdRng::seed_from_u64(shared.gen())
    }

    /// Existing patterns that conflict with `candidate`, in iteration order.
    pub fn find_conflicts<I>(&self, candidate: &str, existing: I) -> Vec<String>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut rng = self.scan_rng();
        self.find_conflicts_with(candidate, existing, &mut rng)
    }

    /// Same as [`find_conflicts`](Self::find_conflicts) with a caller-supplied
    /// source of randomness.
    pub fn find_conflicts_with<I, R>(&self, candidate: &str, existing: I, rng: &mut R) -> Vec<String>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        R: Rng + ?Sized,
    {
        let prepared: Vec<PreparedPattern> = existing
            .into_iter()
            .filter_map(|old| {
                let old = old.as_ref();
                match self.prepare(old) {
                    Ok(prepared) => Some(prepared),
                    Err(e) => {
                        tracing::debug!(
                            candidate = candidate,
                            existing = old,
                            error = %e,
                            "Overlap comparison skipped"
                        );
                        None
                    }
                }
            })
            .collect();

        self.find_conflicts_prepared_with(candidate, &prepared, rng)
    }

    /// Scan against patterns prepared ahead of time.
    pub fn find_conflicts_prepared<'a, I>(&self, candidate: &str, existing: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a PreparedPattern>,
    {
        let mut rng = self.scan_rng();
        self.find_conflicts_prepared_with(candidate, existing, &mut rng)
    }

    fn find_conflicts_prepared_with<'a, I, R>(
        &self,
        candidate: &str,
        existing: I,
        rng: &mut R,
    ) -> Vec<String>
    where
        I: IntoIterator<Item = &'a PreparedPattern>,
        R: Rng + ?Sized,
    {
        let candidate_prepared = match self.prepare(candidate) {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::warn!(pattern = candidate, error = %e, "Cannot sample candidate, skipping overlap scan");
                return Vec::new();
            }
        };

        let mut conflicts = Vec::new();
        for old in existing {
            match self.compare(&candidate_prepared, old, rng) {
                Ok(true) => conflicts.push(old.pattern().to_string()),
                Ok(false) => {}
                Err(e) => {
                    tracing::debug!(
                        candidate = candidate,
                        existing = old.pattern(),
                        error = %e,
                        "Overlap comparison skipped"
                    );
                }
            }
        }

        conflicts
    }

    fn compare<R: Rng + ?Sized>(
        &self,
        candidate: &PreparedPattern,
        old: &PreparedPattern,
        rng: &mut R,
    ) -> Result<bool, ComparisonError> {
        for _ in 0..self.samples_per_pattern {
            let from_old = self.sampler.sample(&old.hir, rng)?;
            if candidate.regex.is_match(&from_old) {
                return Ok(true);
            }

            let from_candidate = self.sampler.sample(&candidate.hir, rng)?;
            if old.regex.is_match(&from_candidate) {
                return Ok(true);
            }
        }

        Ok(false)
    }
}

impl Default for OverlapDetector {
    fn default() -> Self {
        Self::new(Sampler::default(), DEFAULT_SAMPLES_PER_PATTERN)
    }
}
