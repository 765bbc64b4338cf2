//! Core data models for the pattern registry.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WardenError};

/// A named bucket of related filter patterns.
///
/// The set is fixed at compile time; configuration may enable a subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Ad,
    Bad,
    Contact,
    Name,
    Spam,
    Watch,
}

impl Category {
    /// Every known category, in wire-name order.
    pub fn all() -> &'static [Category] {
        &[
            Category::Ad,
            Category::Bad,
            Category::Contact,
            Category::Name,
            Category::Spam,
            Category::Watch,
        ]
    }

    /// Wire name used in storage keys, commands and callback data.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ad => "ad",
            Self::Bad => "bad",
            Self::Contact => "contact",
            Self::Name => "name",
            Self::Spam => "spam",
            Self::Watch => "watch",
        }
    }

    /// Human-readable display name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Ad => "Advertisement",
            Self::Bad => "Bad content",
            Self::Contact => "Contact info",
            Self::Name => "Display name",
            Self::Spam => "Spam",
            Self::Watch => "Watch list",
        }
    }

    /// Parse from a wire name.
    pub fn parse(s: &str) -> Result<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| WardenError::UnknownCategory(s.to_string()))
    }

    /// Storage key holding this category's pattern set.
    pub fn storage_key(&self) -> String {
        format!("{}_words", self.as_str())
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Whether a committed mutation also reached storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Durability {
    Persisted,
    /// In-memory state changed but saving it failed.
    PersistedPartially { error: String },
}

impl Durability {
    pub fn is_persisted(&self) -> bool {
        matches!(self, Self::Persisted)
    }
}

/// Result of adding a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    AlreadyExists,
    InvalidPattern { reason: String },
    NonSpecific,
    /// Conflicts found; a human must choose how to proceed.
    PendingDecision { token: String, conflicts: Vec<String> },
    /// The category's combined matcher would outgrow its size limit.
    CategoryFull,
    Added { durability: Durability },
}

/// Result of removing a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    NotFound,
    Removed { durability: Durability },
}

/// How to settle a pending confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Keep every existing pattern and add the candidate.
    AddAlongside,
    /// Add the candidate and drop every recorded conflict.
    ReplaceConflicting,
    Cancel,
}

impl Decision {
    /// Short name carried in callback data.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddAlongside => "new",
            Self::ReplaceConflicting => "replace",
            Self::Cancel => "cancel",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim() {
            "new" | "add-new" => Ok(Self::AddAlongside),
            "replace" | "replace-all" => Ok(Self::ReplaceConflicting),
            "cancel" => Ok(Self::Cancel),
            other => Err(WardenError::InvalidRequest(format!(
                "unknown decision: {}",
                other
            ))),
        }
    }
}

/// What a resolved confirmation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveSummary {
    pub category: Category,
    pub pattern: String,
    pub decision: Decision,
    /// Patterns removed by a replace decision.
    pub replaced: Vec<String>,
    /// `None` when the decision was cancel and nothing changed.
    pub durability: Option<Durability>,
}

/// Result of resolving a pending confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// Token unknown, already consumed or past its TTL.
    Expired,
    /// The decision could not take effect; the token stays pending.
    NotApplied {
        token: String,
        category: Category,
        pattern: String,
        reason: String,
    },
    Resolved(ResolveSummary),
}

/// Status of a mutation as shown to the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Added,
    NotAdded,
    Pending,
    Removed,
    NotRemoved,
    Cancelled,
    Expired,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::NotAdded => "not added",
            Self::Pending => "awaiting confirmation",
            Self::Removed => "removed",
            Self::NotRemoved => "not removed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

/// Structured result of a mutation, rendered by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationReport {
    pub status: ReportStatus,
    pub category: Option<Category>,
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<String>,
    /// Patterns dropped by a replace decision.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub replaced: Vec<String>,
    /// Token for pending decisions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub persisted: bool,
}

impl MutationReport {
    fn base(status: ReportStatus, category: Option<Category>, pattern: Option<&str>) -> Self {
        Self {
            status,
            category,
            pattern: pattern.map(str::to_string),
            reason: None,
            conflicts: Vec::new(),
            replaced: Vec::new(),
            token: None,
            persisted: true,
        }
    }

    fn with_durability(mut self, durability: &Durability) -> Self {
        if let Durability::PersistedPartially { error } = durability {
            self.persisted = false;
            self.reason = Some(format!("not persisted: {}", error));
        }
        self
    }

    pub fn from_add(category: Category, pattern: &str, outcome: &AddOutcome) -> Self {
        let report = |status| Self::base(status, Some(category), Some(pattern));
        match outcome {
            AddOutcome::AlreadyExists => Self {
                reason: Some("already exists".to_string()),
                ..report(ReportStatus::NotAdded)
            },
            AddOutcome::InvalidPattern { reason } => Self {
                reason: Some(format!("invalid pattern: {}", reason)),
                ..report(ReportStatus::NotAdded)
            },
            AddOutcome::NonSpecific => Self {
                reason: Some("pattern is not specific".to_string()),
                ..report(ReportStatus::NotAdded)
            },
            AddOutcome::CategoryFull => Self {
                reason: Some("category is full".to_string()),
                ..report(ReportStatus::NotAdded)
            },
            AddOutcome::PendingDecision { token, conflicts } => Self {
                reason: Some("overlaps existing patterns".to_string()),
                conflicts: conflicts.clone(),
                token: Some(token.clone()),
                ..report(ReportStatus::Pending)
            },
            AddOutcome::Added { durability } => {
                report(ReportStatus::Added).with_durability(durability)
            }
        }
    }

    pub fn from_remove(category: Category, pattern: &str, outcome: &RemoveOutcome) -> Self {
        match outcome {
            RemoveOutcome::NotFound => Self {
                reason: Some("not found".to_string()),
                ..Self::base(ReportStatus::NotRemoved, Some(category), Some(pattern))
            },
            RemoveOutcome::Removed { durability } => {
                Self::base(ReportStatus::Removed, Some(category), Some(pattern))
                    .with_durability(durability)
            }
        }
    }

    pub fn from_resolve(outcome: &ResolveOutcome) -> Self {
        match outcome {
            ResolveOutcome::Expired => Self {
                reason: Some("confirmation expired".to_string()),
                ..Self::base(ReportStatus::Expired, None, None)
            },
            ResolveOutcome::NotApplied {
                token,
                category,
                pattern,
                reason,
            } => Self {
                reason: Some(reason.clone()),
                token: Some(token.clone()),
                ..Self::base(ReportStatus::NotAdded, Some(*category), Some(pattern))
            },
            ResolveOutcome::Resolved(summary) => {
                let status = match summary.decision {
                    Decision::Cancel => ReportStatus::Cancelled,
                    _ => ReportStatus::Added,
                };
                let report = Self {
                    replaced: summary.replaced.clone(),
                    ..Self::base(status, Some(summary.category), Some(&summary.pattern))
                };
                match &summary.durability {
                    Some(durability) => report.with_durability(durability),
                    None => report,
                }
            }
        }
    }

    /// True when the registry changed and peers should be told.
    pub fn is_committed(&self) -> bool {
        matches!(self.status, ReportStatus::Added | ReportStatus::Removed)
    }
}

/// Compact callback payload attached to a selectable action.
///
/// Encodes as `{"a":"ask","t":"new","d":"Ab3dEf9h"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackData {
    #[serde(rename = "a")]
    pub action: String,
    #[serde(rename = "t")]
    pub action_type: Option<String>,
    #[serde(rename = "d")]
    pub data: Option<serde_json::Value>,
}

impl CallbackData {
    pub fn new(
        action: impl Into<String>,
        action_type: Option<&str>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            action: action.into(),
            action_type: action_type.map(str::to_string),
            data,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// A choice the presentation layer offers alongside a reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectableAction {
    pub label: String,
    pub callback: CallbackData,
}

impl SelectableAction {
    pub fn new(label: impl Into<String>, callback: CallbackData) -> Self {
        Self {
            label: label.into(),
            callback,
        }
    }

    /// The three choices offered for a pending confirmation.
    pub fn for_pending(token: &str) -> Vec<Self> {
        [
            ("add-new", Decision::AddAlongside),
            ("replace-all", Decision::ReplaceConflicting),
            ("cancel", Decision::Cancel),
        ]
        .into_iter()
        .map(|(label, decision)| {
            Self::new(
                label,
                CallbackData::new(
                    "ask",
                    Some(decision.as_str()),
                    Some(serde_json::Value::String(token.to_string())),
                ),
            )
        })
        .collect()
    }
}
