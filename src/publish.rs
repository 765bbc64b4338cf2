//! Snapshot publishing to peer consumers.
//!
//! After a committed mutation the publisher announces an update on the
//! exchange. Peers either reload from shared local state or receive the
//! packaged snapshot as a file, depending on the configured mode.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;

use crate::error::{ErrorContext, Result, WardenError};
use crate::registry::{CategoryRegistry, RegistrySnapshot};

/// File name of the packaged snapshot inside the staging directory.
pub const ARTIFACT_FILE_NAME: &str = "compiled";

/// Action requested of exchange peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeAction {
    Add,
    Backup,
    Config,
    Declare,
    Help,
    Leave,
    Remove,
    Request,
    Update,
}

impl ExchangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Backup => "backup",
            Self::Config => "config",
            Self::Declare => "declare",
            Self::Help => "help",
            Self::Leave => "leave",
            Self::Remove => "remove",
            Self::Request => "request",
            Self::Update => "update",
        }
    }
}

/// How peers pick up a new snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    /// Peers reload from a shared path.
    Reload,
    /// Peers receive the packaged snapshot.
    Download,
}

impl UpdateMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reload => "reload",
            Self::Download => "download",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reload" => Ok(Self::Reload),
            "download" => Ok(Self::Download),
            other => Err(WardenError::Config(format!("unknown update mode: {}", other))),
        }
    }
}

/// Structured message posted to the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeMessage {
    pub from: String,
    pub to: Vec<String>,
    pub action: ExchangeAction,
    #[serde(rename = "type")]
    pub action_type: String,
    pub data: serde_json::Value,
}

impl ExchangeMessage {
    pub fn update(from: &str, to: &[String], mode: UpdateMode, data: serde_json::Value) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_vec(),
            action: ExchangeAction::Update,
            action_type: mode.as_str().to_string(),
            data,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Delivery channel to peers.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_notice(&self, recipients: &[String], message: &ExchangeMessage) -> Result<()>;

    async fn send_artifact(
        &self,
        recipients: &[String],
        path: &Path,
        caption: &ExchangeMessage,
    ) -> Result<()>;
}

/// Transport that only writes exchange traffic to the log.
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    async fn send_notice(&self, recipients: &[String], message: &ExchangeMessage) -> Result<()> {
        tracing::info!(
            recipients = ?recipients,
            message = %message.encode()?,
            "Exchange notice"
        );
        Ok(())
    }

    async fn send_artifact(
        &self,
        recipients: &[String],
        path: &Path,
        caption: &ExchangeMessage,
    ) -> Result<()> {
        tracing::info!(
            recipients = ?recipients,
            path = %path.display(),
            caption = %caption.encode()?,
            "Exchange artifact"
        );
        Ok(())
    }
}

/// Snapshot plus its integrity digest, as shipped to peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagedSnapshot {
    pub digest: String,
    pub snapshot: RegistrySnapshot,
}

impl PackagedSnapshot {
    /// Digest is the hex SHA-256 of the snapshot's JSON encoding.
    pub fn new(snapshot: RegistrySnapshot) -> Result<Self> {
        let digest = snapshot_digest(&snapshot)?;
        Ok(Self { digest, snapshot })
    }

    /// True when the digest still matches the snapshot.
    pub fn verify(&self) -> bool {
        snapshot_digest(&self.snapshot)
            .map(|digest| digest == self.digest)
            .unwrap_or(false)
    }
}

fn snapshot_digest(snapshot: &RegistrySnapshot) -> Result<String> {
    let bytes = serde_json::to_vec(snapshot)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Publisher settings taken from configuration.
#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub sender: String,
    pub recipients: Vec<String>,
    pub mode: UpdateMode,
    /// Path announced to peers in reload mode.
    pub reload_path: String,
    /// Directory where download-mode artifacts are written.
    pub staging_dir: PathBuf,
    pub delay: Duration,
}

/// Announces registry updates to peers.
pub struct SnapshotPublisher {
    registry: Arc<CategoryRegistry>,
    transport: Arc<dyn Transport>,
    settings: PublishSettings,
}

impl SnapshotPublisher {
    pub fn new(
        registry: Arc<CategoryRegistry>,
        transport: Arc<dyn Transport>,
        settings: PublishSettings,
    ) -> Self {
        Self {
            registry,
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &PublishSettings {
        &self.settings
    }

    /// Publish after the configured delay without blocking the caller.
    ///
    /// Failures are logged and dropped; the mutation that triggered the
    /// publish has already committed.
    pub fn spawn_publish(self: &Arc<Self>) -> JoinHandle<()> {
        let publisher = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(publisher.settings.delay).await;

            if let Err(e) = publisher.publish_now().await {
                e.log_with_context(&ErrorContext::new("publish_snapshot"));
            }
        })
    }

    /// Snapshot the registry and hand it to the transport right away.
    pub async fn publish_now(&self) -> Result<()> {
        if self.settings.recipients.is_empty() {
            tracing::debug!("No update recipients configured, skipping publish");
            return Ok(());
        }

        let packaged = PackagedSnapshot::new(self.registry.snapshot().await)?;

        match self.settings.mode {
            UpdateMode::Reload => {
                let message = ExchangeMessage::update(
                    &self.settings.sender,
                    &self.settings.recipients,
                    UpdateMode::Reload,
                    serde_json::Value::String(self.settings.reload_path.clone()),
                );
                self.transport
                    .send_notice(&self.settings.recipients, &message)
                    .await?;
            }
            UpdateMode::Download => {
                let path = self.write_artifact(&packaged).await?;
                let message = ExchangeMessage::update(
                    &self.settings.sender,
                    &self.settings.recipients,
                    UpdateMode::Download,
                    serde_json::Value::String(packaged.digest.clone()),
                );
                self.transport
                    .send_artifact(&self.settings.recipients, &path, &message)
                    .await?;
            }
        }

        tracing::info!(
            mode = self.settings.mode.as_str(),
            recipients = self.settings.recipients.len(),
            digest = %packaged.digest,
            "Snapshot published"
        );
        Ok(())
    }

    async fn write_artifact(&self, packaged: &PackagedSnapshot) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.settings.staging_dir)
            .await
            .map_err(|e| WardenError::Io(format!("Failed to create staging dir: {}", e)))?;

        let path = self.settings.staging_dir.join(ARTIFACT_FILE_NAME);
        let bytes = serde_json::to_vec(packaged)?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| WardenError::Io(format!("Failed to write artifact: {}", e)))?;

        Ok(path)
    }
}
