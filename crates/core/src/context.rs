//! Context packets, deltas, and version snapshots.
//!
//! A [`ContextPacket`] is the versioned container agents pass between each
//! other. Every mutating operation bumps `version` by exactly one; a
//! [`VersionSnapshot`] is an immutable copy taken on demand.

use crate::fragment::Fragment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of a packet's decision trace.
///
/// Agents send free-form decision records, so everything beyond the common
/// fields is kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_fragments: Vec<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl DecisionRecord {
    /// A record produced by the service itself for one of its operations.
    pub fn system(operation: &str, decision: impl Into<String>) -> Self {
        Self {
            operation: Some(operation.to_string()),
            decision: Some(decision.into()),
            timestamp: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn with_affected(mut self, ids: Vec<String>) -> Self {
        self.affected_fragments = ids;
        self
    }

    /// Short human-readable description used in automatic version summaries.
    pub fn headline(&self) -> String {
        match (&self.operation, &self.decision) {
            (Some(op), Some(d)) => format!("{op}: {d}"),
            (None, Some(d)) => d.clone(),
            (Some(op), None) => op.clone(),
            (None, None) => serde_json::Value::Object(self.extra.clone()).to_string(),
        }
    }
}

/// A versioned, ordered collection of fragments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPacket {
    #[serde(rename = "context_id")]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Insertion order is recency order.
    #[serde(default)]
    pub fragments: Vec<Fragment>,

    #[serde(default)]
    pub decision_trace: Vec<DecisionRecord>,

    #[serde(default)]
    pub version: u64,

    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContextPacket {
    /// A new packet at version 0.
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            session_id: None,
            fragments: Vec::new(),
            decision_trace: Vec::new(),
            version: 0,
            metadata: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// A new packet with a generated UUID.
    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_fragments(mut self, fragments: Vec<Fragment>) -> Self {
        self.fragments = fragments;
        self
    }

    /// Record a mutation: bump the version and touch `updated_at`.
    ///
    /// Returns the version the packet had before the bump, which is what
    /// the store must still hold for the write to succeed.
    pub fn bump_version(&mut self) -> u64 {
        let previous = self.version;
        self.version += 1;
        self.updated_at = Utc::now();
        previous
    }

    pub fn fragment(&self, id: &str) -> Option<&Fragment> {
        self.fragments.iter().find(|f| f.id == id)
    }

    pub fn fragment_ids(&self) -> Vec<String> {
        self.fragments.iter().map(|f| f.id.clone()).collect()
    }

    /// Summary of the last three decisions, or a fallback when there are none.
    pub fn auto_summary(&self) -> String {
        let start = self.decision_trace.len().saturating_sub(3);
        let recent: Vec<String> = self.decision_trace[start..]
            .iter()
            .map(DecisionRecord::headline)
            .collect();

        if recent.is_empty() {
            format!(
                "Version {} with {} fragments",
                self.version,
                self.fragments.len()
            )
        } else {
            format!("Recent decisions: {}", recent.join("; "))
        }
    }

    /// Take an immutable snapshot of the current state.
    pub fn snapshot(&self, label: Option<String>) -> VersionSnapshot {
        let summary = label.clone().unwrap_or_else(|| self.auto_summary());
        VersionSnapshot {
            snapshot_id: uuid::Uuid::new_v4().to_string(),
            context_id: self.id.clone(),
            version_number: self.version,
            fragments: self.fragments.clone(),
            decision_trace: self.decision_trace.clone(),
            label,
            summary,
            timestamp: Utc::now(),
        }
    }
}

/// Changes an agent relays against a shared packet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextDelta {
    #[serde(default)]
    pub new_fragments: Vec<Fragment>,

    #[serde(default)]
    pub removed_fragment_ids: Vec<String>,

    #[serde(default)]
    pub decision_updates: Vec<DecisionRecord>,
}

impl ContextDelta {
    pub fn is_empty(&self) -> bool {
        self.new_fragments.is_empty()
            && self.removed_fragment_ids.is_empty()
            && self.decision_updates.is_empty()
    }
}

/// Immutable copy of a packet at a point in time. Never mutated or deleted
/// by normal operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionSnapshot {
    pub snapshot_id: String,
    pub context_id: String,
    pub version_number: u64,
    pub fragments: Vec<Fragment>,
    #[serde(default)]
    pub decision_trace: Vec<DecisionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
}

/// Listing view of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version_id: String,
    pub context_id: String,
    pub version_number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub summary: String,
    pub fragment_count: usize,
    pub timestamp: DateTime<Utc>,
}

impl From<&VersionSnapshot> for VersionInfo {
    fn from(s: &VersionSnapshot) -> Self {
        Self {
            version_id: s.snapshot_id.clone(),
            context_id: s.context_id.clone(),
            version_number: s.version_number,
            label: s.label.clone(),
            summary: s.summary.clone(),
            fragment_count: s.fragments.len(),
            timestamp: s.timestamp,
        }
    }
}
