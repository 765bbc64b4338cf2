//! Persistence collaborator for pattern sets and the compiled artifact.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Result, WardenError};

/// Storage key for the combined matcher sources of every category.
pub const COMPILED_KEY: &str = "compiled";

/// Byte-oriented key/value persistence.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Load the bytes stored under `key`, if any.
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Replace the bytes stored under `key`.
    async fn save(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// In-process storage for ephemeral runs and tests.
#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    fail_saves: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent save fail until switched off again.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(WardenError::Storage(format!(
                "save of {} rejected by memory storage",
                key
            )));
        }
        self.entries
            .write()
            .await
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}
