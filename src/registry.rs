//! Category registry: pattern sets and their compiled matchers.
//!
//! Each category owns a set of pattern strings and one matcher compiled from
//! their disjunction. Both live behind the same lock, and a mutation builds
//! the new matcher before touching the set, so readers only ever see a set
//! together with the matcher derived from it.
//!
//! Compilation and overlap scans are CPU-bound and run on the blocking pool.
//! Each pattern is prepared for overlap scans once, when it enters the set.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::error::{Result, WardenError};
use crate::models::{
    AddOutcome, Category, Decision, Durability, RemoveOutcome, ResolveOutcome, ResolveSummary,
};
use crate::overlap::{OverlapDetector, PreparedPattern};
use crate::pager::{paginate, Listing, DEFAULT_PAGE_SIZE};
use crate::pending::{random_token, PendingStore};
use crate::storage::{Storage, COMPILED_KEY};
use crate::validator::{compile_pattern, matcher_builder, PatternValidator, Rejection};

/// Default compiled program size cap for a category's combined matcher.
///
/// Reaching it means the category is full, not that a pattern is malformed.
pub const DEFAULT_MATCHER_SIZE_LIMIT: usize = 512 * (1 << 20);

/// The single executable matcher derived from a category's pattern set.
#[derive(Debug)]
pub struct CompiledMatcher {
    regex: Regex,
    source: String,
    sentinel: bool,
}

impl CompiledMatcher {
    /// Compile the disjunction of `patterns` under the default size limit.
    pub fn build<I>(category: Category, patterns: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        Self::build_with_limit(category, patterns, DEFAULT_MATCHER_SIZE_LIMIT)
    }

    /// Compile the disjunction of `patterns`.
    ///
    /// Each pattern is wrapped in its own non-capturing group so inline flags
    /// cannot leak into neighbouring alternatives. An empty set compiles to an
    /// escaped random sentinel that real text will not contain; the sentinel
    /// is always held to the default limit.
    pub fn build_with_limit<I>(category: Category, patterns: I, size_limit: usize) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let alternatives: Vec<String> = patterns
            .into_iter()
            .map(|p| format!("(?:{})", p.as_ref()))
            .collect();

        let (source, sentinel, size_limit) = if alternatives.is_empty() {
            let marker = format!("reserved {} patterns {}", category.as_str(), random_token(16));
            (regex::escape(&marker), true, DEFAULT_MATCHER_SIZE_LIMIT)
        } else {
            (alternatives.join("|"), false, size_limit)
        };

        let regex = matcher_builder(&source).size_limit(size_limit).build()?;

        Ok(Self {
            regex,
            source,
            sentinel,
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// The combined pattern this matcher was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// True when built from an empty set.
    pub fn is_sentinel(&self) -> bool {
        self.sentinel
    }
}

/// True when compilation failed only because the program grew too large.
fn exceeds_capacity(error: &WardenError) -> bool {
    matches!(
        error,
        WardenError::RegexPattern(regex::Error::CompiledTooBig(_))
    )
}

fn join_error(error: tokio::task::JoinError) -> WardenError {
    WardenError::InternalState(format!("Background task failed: {}", error))
}

/// Largest sorted prefix of `patterns` whose matcher fits `size_limit`.
fn fit_prefix(
    category: Category,
    mut patterns: Vec<String>,
    size_limit: usize,
) -> Result<(BTreeSet<String>, CompiledMatcher)> {
    match CompiledMatcher::build_with_limit(category, &patterns, size_limit) {
        Ok(matcher) => return Ok((patterns.into_iter().collect(), matcher)),
        Err(e) if !exceeds_capacity(&e) => return Err(e),
        Err(_) => {}
    }

    // patterns[..lo] fits, patterns[..hi] does not
    let (mut lo, mut hi) = (0, patterns.len());
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        match CompiledMatcher::build_with_limit(category, &patterns[..mid], size_limit) {
            Ok(_) => lo = mid,
            Err(e) if exceeds_capacity(&e) => hi = mid,
            Err(e) => return Err(e),
        }
    }

    let dropped = patterns.split_off(lo);
    tracing::warn!(
        category = category.as_str(),
        kept = lo,
        dropped = dropped.len(),
        first_dropped = ?dropped.first(),
        size_limit = size_limit,
        "Category exceeds matcher size limit, dropping trailing patterns"
    );

    let matcher = CompiledMatcher::build_with_limit(category, &patterns, size_limit)?;
    Ok((patterns.into_iter().collect(), matcher))
}

/// One category's set, its prepared patterns and the matcher derived from it.
struct CategoryState {
    patterns: BTreeSet<String>,
    /// Overlap-scan form of each pattern that could be prepared.
    prepared: BTreeMap<String, Arc<PreparedPattern>>,
    matcher: Arc<CompiledMatcher>,
}

/// A prospective category state, compiled but not yet swapped in.
struct Staged {
    patterns: BTreeSet<String>,
    prepared: BTreeMap<String, Arc<PreparedPattern>>,
    matcher: CompiledMatcher,
}

enum Stage {
    Ready(Staged),
    /// The combined matcher would exceed the size limit.
    Full,
    /// The combined matcher failed to compile for another reason.
    Invalid(String),
}

/// Per-category view inside a [`RegistrySnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySnapshot {
    pub name: String,
    pub patterns: Vec<String>,
    pub source: String,
}

/// Distributable view of the whole registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub generated_at: DateTime<Utc>,
    /// Keyed by category wire name.
    pub categories: BTreeMap<String, CategorySnapshot>,
}

/// Owner of every category's pattern set and compiled matcher.
pub struct CategoryRegistry {
    categories: BTreeMap<Category, RwLock<CategoryState>>,
    storage: Arc<dyn Storage>,
    validator: PatternValidator,
    detector: Arc<OverlapDetector>,
    pending: PendingStore,
    page_size: usize,
    matcher_size_limit: usize,
    /// Matcher sources by category wire name, saved under [`COMPILED_KEY`].
    artifact: Mutex<BTreeMap<String, String>>,
}

impl CategoryRegistry {
    /// Create a registry with empty sets for `categories`.
    ///
    /// Call [`load`](Self::load) before serving requests.
    pub fn new(categories: &[Category], storage: Arc<dyn Storage>) -> Result<Self> {
        let mut slots = BTreeMap::new();
        let mut artifact = BTreeMap::new();
        for &category in categories {
            let matcher = CompiledMatcher::build(category, std::iter::empty::<&str>())?;
            artifact.insert(category.as_str().to_string(), matcher.source().to_string());
            slots.insert(
                category,
                RwLock::new(CategoryState {
                    patterns: BTreeSet::new(),
                    prepared: BTreeMap::new(),
                    matcher: Arc::new(matcher),
                }),
            );
        }

        Ok(Self {
            categories: slots,
            storage,
            validator: PatternValidator::new(),
            detector: Arc::new(OverlapDetector::default()),
            pending: PendingStore::new(),
            page_size: DEFAULT_PAGE_SIZE,
            matcher_size_limit: DEFAULT_MATCHER_SIZE_LIMIT,
            artifact: Mutex::new(artifact),
        })
    }

    pub fn with_detector(mut self, detector: OverlapDetector) -> Self {
        self.detector = Arc::new(detector);
        self
    }

    pub fn with_pending_store(mut self, pending: PendingStore) -> Self {
        self.pending = pending;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Cap on each category's compiled matcher program size, in bytes.
    pub fn with_matcher_size_limit(mut self, size_limit: usize) -> Self {
        self.matcher_size_limit = size_limit;
        self
    }

    /// Enabled categories in wire-name order.
    pub fn categories(&self) -> Vec<Category> {
        self.categories.keys().copied().collect()
    }

    pub fn pending(&self) -> &PendingStore {
        &self.pending
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn slot(&self, category: Category) -> Result<&RwLock<CategoryState>> {
        self.categories
            .get(&category)
            .ok_or_else(|| WardenError::UnknownCategory(category.as_str().to_string()))
    }

    /// Populate every category from storage.
    ///
    /// Categories with nothing stored fall back to `seeds`. Stored entries
    /// that no longer compile are dropped with a warning, and seeds must
    /// also pass validation. A set too large for the matcher size limit
    /// keeps its largest sorted prefix that fits. Returns the number of
    /// patterns loaded per category.
    pub async fn load(
        &self,
        seeds: &HashMap<Category, Vec<String>>,
    ) -> Result<BTreeMap<Category, usize>> {
        let mut loaded = BTreeMap::new();

        for (&category, slot) in &self.categories {
            let (candidates, seeded) = match self.storage.load(&category.storage_key()).await? {
                Some(bytes) => (serde_json::from_slice::<Vec<String>>(&bytes)?, false),
                None => (seeds.get(&category).cloned().unwrap_or_default(), true),
            };

            let patterns: Vec<String> = candidates
                .into_iter()
                .filter(|pattern| self.accept_on_load(category, pattern, seeded))
                .collect::<BTreeSet<String>>()
                .into_iter()
                .collect();

            let size_limit = self.matcher_size_limit;
            let (patterns, matcher) =
                tokio::task::spawn_blocking(move || fit_prefix(category, patterns, size_limit))
                    .await
                    .map_err(join_error)??;
            let prepared = self.prepare(&patterns, &BTreeMap::new()).await?;

            let count = patterns.len();
            {
                let mut state = slot.write().await;
                state.patterns = patterns;
                state.prepared = prepared;
                state.matcher = Arc::new(matcher);
                self.artifact
                    .lock()
                    .await
                    .insert(category.as_str().to_string(), state.matcher.source().to_string());
            }

            tracing::info!(category = category.as_str(), count = count, "Category loaded");
            loaded.insert(category, count);
        }

        Ok(loaded)
    }

    fn accept_on_load(&self, category: Category, pattern: &str, seeded: bool) -> bool {
        let rejection = if seeded {
            self.validator.validate(pattern).err()
        } else {
            compile_pattern(pattern)
                .err()
                .map(|e| Rejection::CompileError(e.to_string()))
        };

        match rejection {
            None => true,
            Some(reason) => {
                tracing::warn!(
                    category = category.as_str(),
                    pattern = pattern,
                    seeded = seeded,
                    reason = %reason,
                    "Dropping pattern on load"
                );
                false
            }
        }
    }

    /// Save every category and the compiled artifact.
    pub async fn flush(&self) -> Result<()> {
        for (&category, slot) in &self.categories {
            let state = slot.read().await;
            self.save_patterns(category, &state.patterns).await?;
        }
        self.save_artifact().await?;
        tracing::info!("Registry flushed to storage");
        Ok(())
    }

    /// Add `word` to `category`, or park it for confirmation if it overlaps
    /// existing patterns.
    pub async fn add(&self, category: Category, word: &str) -> Result<AddOutcome> {
        let mut state = self.slot(category)?.write().await;

        if state.patterns.contains(word) {
            return Ok(AddOutcome::AlreadyExists);
        }

        match self.validator.validate(word) {
            Ok(()) => {}
            Err(Rejection::CompileError(reason)) => {
                return Ok(AddOutcome::InvalidPattern { reason });
            }
            Err(Rejection::NonSpecific) => return Ok(AddOutcome::NonSpecific),
        }

        let conflicts = self.scan(word, &state).await?;
        if !conflicts.is_empty() {
            let token = self
                .pending
                .create(category, word, conflicts.clone())
                .await;
            tracing::info!(
                category = category.as_str(),
                pattern = word,
                conflicts = conflicts.len(),
                token = %token,
                "Pattern awaiting confirmation"
            );
            return Ok(AddOutcome::PendingDecision { token, conflicts });
        }

        let mut next = state.patterns.clone();
        next.insert(word.to_string());
        let staged = match self.stage(category, &state, next).await? {
            Stage::Ready(staged) => staged,
            Stage::Full => return Ok(AddOutcome::CategoryFull),
            Stage::Invalid(reason) => return Ok(AddOutcome::InvalidPattern { reason }),
        };
        let durability = self.apply(category, &mut state, staged).await;

        tracing::info!(category = category.as_str(), pattern = word, "Pattern added");
        Ok(AddOutcome::Added { durability })
    }

    /// Remove `word` from `category`.
    pub async fn remove(&self, category: Category, word: &str) -> Result<RemoveOutcome> {
        let mut state = self.slot(category)?.write().await;

        if !state.patterns.contains(word) {
            return Ok(RemoveOutcome::NotFound);
        }

        let mut next = state.patterns.clone();
        next.remove(word);
        let staged = self.stage_existing(category, &state, next).await?;
        let durability = self.apply(category, &mut state, staged).await;

        tracing::info!(category = category.as_str(), pattern = word, "Pattern removed");
        Ok(RemoveOutcome::Removed { durability })
    }

    /// Apply a decision to a pending confirmation.
    ///
    /// The confirmation is consumed once the decision takes effect. If the
    /// resulting set cannot be compiled, nothing changes and the token stays
    /// pending so the decision can be retried or cancelled.
    pub async fn resolve(&self, token: &str, decision: Decision) -> Result<ResolveOutcome> {
        let Some(entry) = self.pending.get(token).await else {
            tracing::debug!(token = token, "Confirmation token expired or unknown");
            return Ok(ResolveOutcome::Expired);
        };
        let category = entry.category;

        if decision == Decision::Cancel {
            if self.pending.take(token).await.is_none() {
                return Ok(ResolveOutcome::Expired);
            }
            tracing::info!(
                category = category.as_str(),
                pattern = %entry.candidate,
                "Pending pattern cancelled"
            );
            return Ok(ResolveOutcome::Resolved(ResolveSummary {
                category,
                pattern: entry.candidate.clone(),
                decision,
                replaced: Vec::new(),
                durability: None,
            }));
        }

        let mut state = self.slot(category)?.write().await;
        let mut next = state.patterns.clone();
        next.insert(entry.candidate.clone());

        let mut replaced = Vec::new();
        if decision == Decision::ReplaceConflicting {
            for old in &entry.conflicts {
                if next.remove(old) {
                    replaced.push(old.clone());
                }
            }
        }

        let staged = match self.stage(category, &state, next).await? {
            Stage::Ready(staged) => staged,
            Stage::Full => {
                return Ok(ResolveOutcome::NotApplied {
                    token: token.to_string(),
                    category,
                    pattern: entry.candidate.clone(),
                    reason: "category is full".to_string(),
                });
            }
            Stage::Invalid(reason) => {
                return Ok(ResolveOutcome::NotApplied {
                    token: token.to_string(),
                    category,
                    pattern: entry.candidate.clone(),
                    reason,
                });
            }
        };

        // Only one resolver can win the token; a loser changes nothing.
        if self.pending.take(token).await.is_none() {
            return Ok(ResolveOutcome::Expired);
        }
        let durability = self.apply(category, &mut state, staged).await;

        tracing::info!(
            category = category.as_str(),
            pattern = %entry.candidate,
            decision = decision.as_str(),
            replaced = replaced.len(),
            "Pending pattern resolved"
        );
        Ok(ResolveOutcome::Resolved(ResolveSummary {
            category,
            pattern: entry.candidate.clone(),
            decision,
            replaced,
            durability: Some(durability),
        }))
    }

    /// Rebuild a category's matcher from its current set.
    pub async fn recompile(&self, category: Category) -> Result<Durability> {
        let mut state = self.slot(category)?.write().await;
        let current = state.patterns.clone();
        let staged = self.stage_existing(category, &state, current).await?;
        Ok(self.apply(category, &mut state, staged).await)
    }

    /// One page of a category's patterns, in sorted order.
    pub async fn list(&self, category: Category, page: usize) -> Result<Listing<String>> {
        let state = self.slot(category)?.read().await;
        let patterns: Vec<String> = state.patterns.iter().cloned().collect();
        paginate(&patterns, page, self.page_size)
    }

    /// All patterns of a category, in sorted order.
    pub async fn patterns(&self, category: Category) -> Result<Vec<String>> {
        let state = self.slot(category)?.read().await;
        Ok(state.patterns.iter().cloned().collect())
    }

    /// Current matcher snapshot for a category.
    pub async fn matcher(&self, category: Category) -> Result<Arc<CompiledMatcher>> {
        let state = self.slot(category)?.read().await;
        Ok(Arc::clone(&state.matcher))
    }

    pub async fn is_match(&self, category: Category, text: &str) -> Result<bool> {
        Ok(self.matcher(category).await?.is_match(text))
    }

    /// Every enabled category whose matcher accepts `text`.
    pub async fn matching_categories(&self, text: &str) -> Vec<Category> {
        let mut matched = Vec::new();
        for (&category, slot) in &self.categories {
            let matcher = Arc::clone(&slot.read().await.matcher);
            if matcher.is_match(text) {
                matched.push(category);
            }
        }
        matched
    }

    /// Consistent per-category view of the registry.
    pub async fn snapshot(&self) -> RegistrySnapshot {
        let mut categories = BTreeMap::new();
        for (&category, slot) in &self.categories {
            let state = slot.read().await;
            categories.insert(
                category.as_str().to_string(),
                CategorySnapshot {
                    name: category.display_name().to_string(),
                    patterns: state.patterns.iter().cloned().collect(),
                    source: state.matcher.source().to_string(),
                },
            );
        }

        RegistrySnapshot {
            generated_at: Utc::now(),
            categories,
        }
    }

    /// Existing patterns in the category that overlap `word`.
    async fn scan(&self, word: &str, state: &CategoryState) -> Result<Vec<String>> {
        let existing: Vec<Arc<PreparedPattern>> = state.prepared.values().cloned().collect();
        let detector = Arc::clone(&self.detector);
        let candidate = word.to_string();

        tokio::task::spawn_blocking(move || {
            detector.find_conflicts_prepared(&candidate, existing.iter().map(|p| &**p))
        })
        .await
        .map_err(join_error)
    }

    /// Prepared forms for `patterns`, reusing those already in `previous`.
    async fn prepare(
        &self,
        patterns: &BTreeSet<String>,
        previous: &BTreeMap<String, Arc<PreparedPattern>>,
    ) -> Result<BTreeMap<String, Arc<PreparedPattern>>> {
        let mut prepared = BTreeMap::new();
        let mut missing = Vec::new();
        for pattern in patterns {
            match previous.get(pattern) {
                Some(existing) => {
                    prepared.insert(pattern.clone(), Arc::clone(existing));
                }
                None => missing.push(pattern.clone()),
            }
        }
        if missing.is_empty() {
            return Ok(prepared);
        }

        let detector = Arc::clone(&self.detector);
        let fresh = tokio::task::spawn_blocking(move || {
            missing
                .into_iter()
                .filter_map(|pattern| match detector.prepare(&pattern) {
                    Ok(ready) => Some((pattern, Arc::new(ready))),
                    Err(e) => {
                        tracing::debug!(
                            pattern = %pattern,
                            error = %e,
                            "Pattern left out of overlap scans"
                        );
                        None
                    }
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(join_error)?;

        prepared.extend(fresh);
        Ok(prepared)
    }

    /// Compile `next` off the async workers and prepare its new members.
    async fn stage(
        &self,
        category: Category,
        state: &CategoryState,
        next: BTreeSet<String>,
    ) -> Result<Stage> {
        let sources: Vec<String> = next.iter().cloned().collect();
        let size_limit = self.matcher_size_limit;
        let compiled = tokio::task::spawn_blocking(move || {
            CompiledMatcher::build_with_limit(category, &sources, size_limit)
        })
        .await
        .map_err(join_error)?;

        let matcher = match compiled {
            Ok(matcher) => matcher,
            Err(e) if exceeds_capacity(&e) => {
                tracing::warn!(
                    category = category.as_str(),
                    patterns = next.len(),
                    size_limit = size_limit,
                    "Category matcher would exceed its size limit"
                );
                return Ok(Stage::Full);
            }
            Err(WardenError::RegexPattern(e)) => return Ok(Stage::Invalid(e.to_string())),
            Err(e) => return Err(e),
        };

        let prepared = self.prepare(&next, &state.prepared).await?;
        Ok(Stage::Ready(Staged {
            patterns: next,
            prepared,
            matcher,
        }))
    }

    /// Stage a set that only shrinks or stays the same; it must compile.
    async fn stage_existing(
        &self,
        category: Category,
        state: &CategoryState,
        next: BTreeSet<String>,
    ) -> Result<Staged> {
        match self.stage(category, state, next).await? {
            Stage::Ready(staged) => Ok(staged),
            Stage::Full => Err(WardenError::InternalState(format!(
                "{} matcher no longer fits its size limit",
                category.as_str()
            ))),
            Stage::Invalid(reason) => Err(WardenError::InternalState(format!(
                "{} matcher no longer compiles: {}",
                category.as_str(),
                reason
            ))),
        }
    }

    /// Swap in a staged state, then persist.
    ///
    /// Storage failures after the swap are reported, not raised.
    async fn apply(
        &self,
        category: Category,
        state: &mut CategoryState,
        staged: Staged,
    ) -> Durability {
        state.patterns = staged.patterns;
        state.prepared = staged.prepared;
        state.matcher = Arc::new(staged.matcher);

        self.artifact
            .lock()
            .await
            .insert(category.as_str().to_string(), state.matcher.source().to_string());

        let saved = match self.save_patterns(category, &state.patterns).await {
            Ok(()) => self.save_artifact().await,
            Err(e) => Err(e),
        };

        match saved {
            Ok(()) => Durability::Persisted,
            Err(e) => {
                tracing::warn!(
                    category = category.as_str(),
                    error = %e,
                    "Registry changed in memory but was not persisted"
                );
                Durability::PersistedPartially {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn save_patterns(&self, category: Category, patterns: &BTreeSet<String>) -> Result<()> {
        let bytes = serde_json::to_vec(patterns)?;
        self.storage.save(&category.storage_key(), &bytes).await
    }

    /// Serialize and save the artifact while holding its lock, so the last
    /// writer always saves the newest sources.
    async fn save_artifact(&self) -> Result<()> {
        let artifact = self.artifact.lock().await;
        let bytes = serde_json::to_vec(&*artifact)?;
        self.storage.save(COMPILED_KEY, &bytes).await
    }
}
