//! In-memory store: the default backend, also used by tests.

use async_trait::async_trait;
use contextrelay_core::context::{ContextPacket, VersionSnapshot};
use contextrelay_core::error::StoreError;
use contextrelay_core::store::{ContextStore, ContextSummary};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// Packets and snapshots kept in hash maps behind tokio `RwLock`s.
///
/// Each instance is independent, so tests never share state.
pub struct InMemoryStore {
    contexts: RwLock<HashMap<String, ContextPacket>>,
    versions: RwLock<HashMap<String, Vec<VersionSnapshot>>>,
    available: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            contexts: RwLock::new(HashMap::new()),
            versions: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store switched off".into()))
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContextStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, id: &str) -> Result<Option<ContextPacket>, StoreError> {
        self.ensure_available()?;
        Ok(self.contexts.read().await.get(id).cloned())
    }

    async fn put(&self, packet: &ContextPacket) -> Result<(), StoreError> {
        self.ensure_available()?;
        self.contexts
            .write()
            .await
            .insert(packet.id.clone(), packet.clone());
        debug!(context_id = %packet.id, version = packet.version, "Stored context");
        Ok(())
    }

    async fn update(
        &self,
        packet: &ContextPacket,
        expected_version: u64,
    ) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut contexts = self.contexts.write().await;
        let current = contexts
            .get_mut(&packet.id)
            .ok_or_else(|| StoreError::NotFound(packet.id.clone()))?;

        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                context_id: packet.id.clone(),
                expected: expected_version,
                actual: current.version,
            });
        }

        *current = packet.clone();
        debug!(context_id = %packet.id, version = packet.version, "Updated context");
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.ensure_available()?;
        self.versions.write().await.remove(id);
        Ok(self.contexts.write().await.remove(id).is_some())
    }

    async fn list(&self) -> Result<Vec<ContextSummary>, StoreError> {
        self.ensure_available()?;
        let contexts = self.contexts.read().await;
        let mut summaries: Vec<ContextSummary> = contexts.values().map(ContextSummary::from).collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn store_version(&self, snapshot: &VersionSnapshot) -> Result<(), StoreError> {
        self.ensure_available()?;
        self.versions
            .write()
            .await
            .entry(snapshot.context_id.clone())
            .or_default()
            .push(snapshot.clone());
        Ok(())
    }

    async fn list_versions(&self, context_id: &str) -> Result<Vec<VersionSnapshot>, StoreError> {
        self.ensure_available()?;
        Ok(self
            .versions
            .read()
            .await
            .get(context_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_version(&self, snapshot_id: &str) -> Result<Option<VersionSnapshot>, StoreError> {
        self.ensure_available()?;
        Ok(self
            .versions
            .read()
            .await
            .values()
            .flatten()
            .find(|s| s.snapshot_id == snapshot_id)
            .cloned())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.contexts.write().await.clear();
        self.versions.write().await.clear();
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn set_available(&self, available: bool) -> bool {
        self.available.store(available, Ordering::SeqCst);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextrelay_core::Fragment;

    #[tokio::test]
    async fn put_and_get() {
        let store = InMemoryStore::new();
        let packet = ContextPacket::new("ctx").with_fragments(vec![Fragment::text("a")]);
        store.put(&packet).await.unwrap();

        let loaded = store.get("ctx").await.unwrap().unwrap();
        assert_eq!(loaded, packet);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fetch_maps_absence_to_not_found() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.fetch("nope").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_requires_matching_version() {
        let store = InMemoryStore::new();
        let packet = ContextPacket::new("ctx");
        store.put(&packet).await.unwrap();

        let mut first = packet.clone();
        let expected = first.bump_version();
        store.update(&first, expected).await.unwrap();

        // A second writer that read version 0 loses.
        let mut stale = packet.clone();
        let expected = stale.bump_version();
        let err = store.update(&stale, expected).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionConflict { expected: 0, actual: 1, .. }
        ));
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let store = InMemoryStore::new();
        let packet = ContextPacket::new("ghost");
        assert!(matches!(
            store.update(&packet, 0).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn versions_are_listed_in_order() {
        let store = InMemoryStore::new();
        let mut packet = ContextPacket::new("ctx");
        store.put(&packet).await.unwrap();

        let first = packet.snapshot(Some("v1".into()));
        packet.bump_version();
        let second = packet.snapshot(None);
        store.store_version(&first).await.unwrap();
        store.store_version(&second).await.unwrap();

        let versions = store.list_versions("ctx").await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].label.as_deref(), Some("v1"));
        assert_eq!(
            store.get_version(&second.snapshot_id).await.unwrap().unwrap().version_number,
            1
        );
    }

    #[tokio::test]
    async fn switched_off_store_rejects_calls() {
        let store = InMemoryStore::new();
        assert!(store.set_available(false));
        assert!(matches!(store.get("x").await, Err(StoreError::Unavailable(_))));
        store.set_available(true);
        assert!(store.get("x").await.is_ok());
    }

    #[tokio::test]
    async fn clear_and_delete() {
        let store = InMemoryStore::new();
        store.put(&ContextPacket::new("a")).await.unwrap();
        store.put(&ContextPacket::new("b")).await.unwrap();
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert_eq!(store.list().await.unwrap().len(), 1);

        store.clear().await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }
}
