//! Relay events: what the service announces after each operation.
//!
//! Events are ephemeral. They carry a monotonically increasing id, a type,
//! a timestamp and a camelCase JSON payload, and each one has a
//! visualization companion (`viz:<type>`) with rendering hints for the UI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// All event types the broadcaster knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    ContextInitialized,
    RelaySent,
    RelayReceived,
    ContextMerged,
    ContextPruned,
    VersionCreated,
    Error,
}

impl EventType {
    pub const ALL: [EventType; 7] = [
        EventType::ContextInitialized,
        EventType::RelaySent,
        EventType::RelayReceived,
        EventType::ContextMerged,
        EventType::ContextPruned,
        EventType::VersionCreated,
        EventType::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContextInitialized => "contextInitialized",
            Self::RelaySent => "relaySent",
            Self::RelayReceived => "relayReceived",
            Self::ContextMerged => "contextMerged",
            Self::ContextPruned => "contextPruned",
            Self::VersionCreated => "versionCreated",
            Self::Error => "error",
        }
    }

    /// Parse a comma-separated list such as `relaySent,relayReceived`.
    ///
    /// Blank input means every type.
    pub fn parse_list(list: &str) -> Result<HashSet<EventType>, String> {
        let mut types = HashSet::new();
        for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            types.insert(part.parse()?);
        }
        if types.is_empty() {
            types.extend(Self::ALL);
        }
        Ok(types)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown event type: {s}"))
    }
}

/// Typed payloads. Serialized untagged; the type travels beside the data.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum EventPayload {
    ContextInitialized {
        context_id: String,
        session_id: Option<String>,
        fragment_count: usize,
    },
    RelaySent {
        context_id: String,
        from_agent: String,
        to_agent: String,
        fragment_count: usize,
    },
    RelayReceived {
        context_id: String,
        from_agent: String,
        to_agent: String,
        accepted_fragments: usize,
        rejected_fragments: usize,
        conflicts: Vec<String>,
        version: u64,
    },
    ContextMerged {
        context_id: String,
        source_context_ids: Vec<String>,
        merge_strategy: String,
        merged_fragment_count: usize,
        conflict_count: usize,
    },
    ContextPruned {
        context_id: String,
        pruning_strategy: String,
        original_fragment_count: usize,
        remaining_fragment_count: usize,
    },
    VersionCreated {
        context_id: String,
        version_id: String,
        version_label: Option<String>,
        version_number: u64,
    },
    Error {
        error_code: String,
        message: String,
        context_id: Option<String>,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::ContextInitialized { .. } => EventType::ContextInitialized,
            Self::RelaySent { .. } => EventType::RelaySent,
            Self::RelayReceived { .. } => EventType::RelayReceived,
            Self::ContextMerged { .. } => EventType::ContextMerged,
            Self::ContextPruned { .. } => EventType::ContextPruned,
            Self::VersionCreated { .. } => EventType::VersionCreated,
            Self::Error { .. } => EventType::Error,
        }
    }

    pub fn into_data(self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// A published event, as stored in history and sent to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEvent {
    pub id: u64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

/// Rendering hints for a visualization event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiHint {
    pub color: String,
    pub animation: String,
    pub animate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<String>,
}

/// The `viz:<type>` companion of a [`RelayEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub ui: UiHint,
    pub data: serde_json::Value,
}

impl RelayEvent {
    fn context_id(&self) -> &str {
        self.data
            .get("contextId")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
    }

    fn has_conflicts(&self) -> bool {
        let listed = self
            .data
            .get("conflicts")
            .and_then(|v| v.as_array())
            .is_some_and(|a| !a.is_empty());
        let counted = self
            .data
            .get("conflictCount")
            .and_then(|v| v.as_u64())
            .is_some_and(|n| n > 0);
        listed || counted
    }

    /// SSE event name of the visualization companion.
    pub fn visualization_name(&self) -> String {
        format!("viz:{}", self.event_type)
    }

    pub fn visualization(&self) -> VisualizationEvent {
        let hint = |color: &str, animation: &str| UiHint {
            color: color.to_string(),
            animation: animation.to_string(),
            animate: true,
            edge_id: None,
        };

        let ui = match self.event_type {
            EventType::ContextInitialized => hint("purple", "pulse"),
            EventType::RelaySent => UiHint {
                edge_id: Some(format!("relay-{}", self.context_id())),
                ..hint("blue", "flow")
            },
            EventType::RelayReceived if self.has_conflicts() => hint("orange", "highlight"),
            EventType::RelayReceived => hint("green", "highlight"),
            EventType::ContextMerged if self.has_conflicts() => hint("orange", "merge"),
            EventType::ContextMerged => hint("green", "merge"),
            EventType::ContextPruned => hint("red", "shrink"),
            EventType::VersionCreated => UiHint {
                animate: false,
                ..hint("gray", "snapshot")
            },
            EventType::Error => hint("red", "shake"),
        };

        VisualizationEvent {
            kind: self.visualization_name(),
            timestamp: self.timestamp,
            ui,
            data: self.data.clone(),
        }
    }
}
