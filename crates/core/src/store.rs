//! Context store trait: key-value persistence of packets and snapshots.
//!
//! Implementations: in-memory (default, tests), SQLite.
//!
//! Writes to an existing packet go through [`ContextStore::update`], which
//! takes the version the caller read. A store holding a different version
//! rejects the write with [`StoreError::VersionConflict`], so two concurrent
//! relays against the same packet cannot silently overwrite each other.

use crate::context::{ContextPacket, VersionSnapshot};
use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Short listing entry for a stored packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSummary {
    pub context_id: String,
    pub session_id: Option<String>,
    pub version: u64,
    pub fragment_count: usize,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<&ContextPacket> for ContextSummary {
    fn from(p: &ContextPacket) -> Self {
        Self {
            context_id: p.id.clone(),
            session_id: p.session_id.clone(),
            version: p.version,
            fragment_count: p.fragments.len(),
            updated_at: p.updated_at,
        }
    }
}

#[async_trait]
pub trait ContextStore: Send + Sync {
    /// The backend name (e.g., "memory", "sqlite").
    fn name(&self) -> &str;

    /// Fetch a packet by id.
    async fn get(&self, id: &str) -> Result<Option<ContextPacket>, StoreError>;

    /// Insert or replace a packet unconditionally (last write wins).
    async fn put(&self, packet: &ContextPacket) -> Result<(), StoreError>;

    /// Replace an existing packet if the stored version equals
    /// `expected_version`.
    async fn update(&self, packet: &ContextPacket, expected_version: u64)
    -> Result<(), StoreError>;

    /// Delete a packet and its snapshots. Returns whether it existed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// All packets, most recently updated first.
    async fn list(&self) -> Result<Vec<ContextSummary>, StoreError>;

    /// Persist an immutable snapshot.
    async fn store_version(&self, snapshot: &VersionSnapshot) -> Result<(), StoreError>;

    /// Snapshots of a packet, oldest first.
    async fn list_versions(&self, context_id: &str) -> Result<Vec<VersionSnapshot>, StoreError>;

    async fn get_version(&self, snapshot_id: &str)
    -> Result<Option<VersionSnapshot>, StoreError>;

    /// Remove everything.
    async fn clear(&self) -> Result<(), StoreError>;

    /// Whether the backend is currently reachable.
    fn is_available(&self) -> bool {
        true
    }

    /// Simulate an outage. Returns `false` when the backend does not support it.
    fn set_available(&self, _available: bool) -> bool {
        false
    }

    /// Like [`get`](Self::get), with absence as [`StoreError::NotFound`].
    async fn fetch(&self, id: &str) -> Result<ContextPacket, StoreError> {
        self.get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}
