//! Pending confirmations for candidates that overlap existing patterns.
//!
//! Entries live in a moka cache with a fixed time-to-live, so an abandoned
//! confirmation disappears on its own. Token allocation goes through the
//! cache's entry API, which makes check-and-insert a single atomic step.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::models::Category;

/// Length of generated confirmation tokens.
pub const TOKEN_LENGTH: usize = 8;

/// How long an unanswered confirmation stays valid.
pub const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(15 * 60);

/// Upper bound on simultaneously pending confirmations.
const MAX_PENDING: u64 = 10_000;

/// A candidate waiting for a human decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConfirmation {
    pub category: Category,
    pub candidate: String,
    /// Existing patterns found to overlap, in detection order.
    pub conflicts: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Process-wide store of pending confirmations keyed by token.
#[derive(Clone)]
pub struct PendingStore {
    entries: Cache<String, Arc<PendingConfirmation>>,
    ttl: Duration,
}

impl PendingStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_PENDING_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(MAX_PENDING)
                .time_to_live(ttl)
                .build(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record a confirmation and return its freshly allocated token.
    pub async fn create(
        &self,
        category: Category,
        candidate: &str,
        conflicts: Vec<String>,
    ) -> String {
        let confirmation = Arc::new(PendingConfirmation {
            category,
            candidate: candidate.to_string(),
            conflicts,
            created_at: Utc::now(),
        });

        loop {
            let token = random_token(TOKEN_LENGTH);
            let value = Arc::clone(&confirmation);
            let entry = self
                .entries
                .entry(token.clone())
                .or_insert_with(async move { value })
                .await;

            if entry.is_fresh() {
                tracing::debug!(
                    token = %token,
                    category = category.as_str(),
                    candidate = candidate,
                    "Pending confirmation created"
                );
                return token;
            }
            tracing::debug!(token = %token, "Pending token collision, regenerating");
        }
    }

    /// Look up a confirmation without consuming it.
    pub async fn get(&self, token: &str) -> Option<Arc<PendingConfirmation>> {
        self.entries.get(token).await
    }

    /// Remove and return a confirmation. Only one caller can win a given token.
    pub async fn take(&self, token: &str) -> Option<Arc<PendingConfirmation>> {
        self.entries.remove(token).await
    }

    pub async fn delete(&self, token: &str) {
        self.entries.invalidate(token).await;
    }

    /// Number of live confirmations after applying pending evictions.
    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for PendingStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Random alphanumeric token of `len` characters.
pub fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn tokens_are_fixed_length_alphanumeric() {
        let token = random_token(TOKEN_LENGTH);
        assert_eq!(token.len(), TOKEN_LENGTH);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn create_and_get() {
        let store = PendingStore::new();
        let token = store
            .create(Category::Bad, "fo+", vec!["foo".to_string()])
            .await;

        let entry = store.get(&token).await.expect("entry should exist");
        assert_eq!(entry.category, Category::Bad);
        assert_eq!(entry.candidate, "fo+");
        assert_eq!(entry.conflicts, vec!["foo".to_string()]);
    }

    #[tokio::test]
    async fn take_consumes_exactly_once() {
        let store = PendingStore::new();
        let token = store.create(Category::Spam, "promo+", vec![]).await;

        assert!(store.take(&token).await.is_some());
        assert!(store.take(&token).await.is_none());
        assert!(store.get(&token).await.is_none());
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let store = PendingStore::new();
        let token = store.create(Category::Spam, "promo+", vec![]).await;

        store.delete(&token).await;
        assert!(store.get(&token).await.is_none());
    }

    #[tokio::test]
    async fn unknown_token_is_absent() {
        let store = PendingStore::new();
        assert!(store.get("nope1234").await.is_none());
        assert!(store.take("nope1234").await.is_none());
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let store = PendingStore::with_ttl(Duration::from_millis(50));
        let token = store.create(Category::Watch, "watch-me", vec![]).await;

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(store.get(&token).await.is_none());
        assert!(store.take(&token).await.is_none());
    }

    #[tokio::test]
    async fn thousand_tokens_never_collide() {
        let store = PendingStore::new();
        let mut tokens = HashSet::new();

        for i in 0..1000 {
            let token = store
                .create(Category::Bad, &format!("candidate-{}", i), vec![])
                .await;
            assert!(tokens.insert(token), "duplicate token generated");
        }

        assert_eq!(tokens.len(), 1000);
        assert_eq!(store.len().await, 1000);
    }

    #[tokio::test]
    async fn concurrent_creation_yields_unique_tokens() {
        let store = Arc::new(PendingStore::new());
        let mut handles = Vec::new();

        for worker in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut tokens = Vec::new();
                for i in 0..100 {
                    tokens.push(
                        store
                            .create(Category::Ad, &format!("w{}-{}", worker, i), vec![])
                            .await,
                    );
                }
                tokens
            }));
        }

        let mut all = HashSet::new();
        for handle in futures::future::join_all(handles).await {
            for token in handle.expect("task should not panic") {
                assert!(all.insert(token));
            }
        }
        assert_eq!(all.len(), 800);
    }
}
