//! Context operations, independent of HTTP.
//!
//! [`ContextService`] owns nothing global: the store, the embedder and the
//! broadcaster are handed in at construction, so every test builds its own
//! isolated instance.

use chrono::Utc;
use contextrelay_config::AppConfig;
use contextrelay_core::conflict::{ConflictMatch, find_conflicts};
use contextrelay_core::context::{ContextDelta, ContextPacket, DecisionRecord, VersionInfo, VersionSnapshot};
use contextrelay_core::error::{EmbeddingError, Error, Result, StoreError};
use contextrelay_core::event::EventPayload;
use contextrelay_core::fragment::Fragment;
use contextrelay_core::merge::{MergeConflict, MergeStrategy, merge_fragments};
use contextrelay_core::prune::{PruningStrategy, prune_fragments};
use contextrelay_core::similarity::rank_by_similarity;
use contextrelay_core::store::{ContextStore, ContextSummary};
use contextrelay_core::{EmbeddingProvider, EventBroadcaster};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-operation tuning taken from [`AppConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServiceSettings {
    pub conflict_threshold: f64,
    pub reject_conflicting: bool,
    pub merge_threshold: f64,
    pub search_threshold: f64,
    pub search_top_k: usize,
}

impl ServiceSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            conflict_threshold: config.relay.conflict_threshold,
            reject_conflicting: config.relay.reject_conflicting,
            merge_threshold: config.merge.similarity_threshold,
            search_threshold: config.search.similarity_threshold,
            search_top_k: config.search.top_k,
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Input of [`ContextService::initialize`].
#[derive(Debug, Clone, Default)]
pub struct InitializeInput {
    pub session_id: String,
    /// Becomes the first fragment when present and not null.
    pub initial_input: Option<Value>,
    pub fragments: Vec<Fragment>,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayOutcome {
    pub context: ContextPacket,
    /// Fragment ids on either side of a detected conflict, each listed once.
    pub conflicts: Vec<String>,
    pub conflict_details: Vec<ConflictMatch>,
    pub accepted_fragment_ids: Vec<String>,
    pub rejected_fragment_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeResult {
    pub context: ContextPacket,
    pub conflicts: Vec<MergeConflict>,
    /// False when an existing target packet was updated in place.
    pub created: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PruneOutcome {
    pub context: ContextPacket,
    pub removed_fragment_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimilarFragment {
    pub fragment: Fragment,
    pub similarity: f64,
}

/// Route-independent orchestration of context operations.
pub struct ContextService {
    store: Arc<dyn ContextStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    events: Arc<EventBroadcaster>,
    settings: ServiceSettings,
}

impl ContextService {
    pub fn new(
        store: Arc<dyn ContextStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        events: Arc<EventBroadcaster>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            store,
            embedder,
            events,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn ContextStore> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub fn events(&self) -> &Arc<EventBroadcaster> {
        &self.events
    }

    pub fn settings(&self) -> ServiceSettings {
        self.settings
    }

    // ── Mutating operations ───────────────────────────────────────────────

    /// Create a packet at version 0.
    pub async fn initialize(&self, input: InitializeInput) -> Result<ContextPacket> {
        self.try_initialize(input)
            .await
            .inspect_err(|e| self.report("INITIALIZATION_ERROR", e, None))
    }

    async fn try_initialize(&self, input: InitializeInput) -> Result<ContextPacket> {
        let session_id = input.session_id.trim();
        if session_id.is_empty() {
            return Err(Error::invalid("session_id must not be empty"));
        }
        validate_fragments(&input.fragments, self.embedder.dimensions())?;

        let mut fragments = Vec::with_capacity(input.fragments.len() + 1);
        if let Some(value) = input.initial_input.filter(|v| !v.is_null()) {
            let mut seed = Fragment::text(String::new());
            seed.content = value;
            seed.metadata.insert("source".into(), json!("initial_input"));
            fragments.push(seed);
        }
        fragments.extend(input.fragments);

        let mut packet = ContextPacket::generate()
            .with_session(session_id)
            .with_fragments(fragments);
        packet.metadata = input.metadata;
        packet.decision_trace.push(DecisionRecord::system(
            "initialize",
            format!("Context initialized for session {session_id}"),
        ));

        self.embed_tolerant(&mut packet.fragments, &packet.id).await;
        self.store.put(&packet).await?;

        info!(
            context_id = %packet.id,
            session_id = %session_id,
            fragments = packet.fragments.len(),
            "Context initialized"
        );
        self.events.publish(EventPayload::ContextInitialized {
            context_id: packet.id.clone(),
            session_id: packet.session_id.clone(),
            fragment_count: packet.fragments.len(),
        });
        Ok(packet)
    }

    /// Apply a delta from one agent to another against a stored packet.
    pub async fn relay(
        &self,
        from_agent: &str,
        to_agent: &str,
        context_id: &str,
        delta: ContextDelta,
    ) -> Result<RelayOutcome> {
        self.try_relay(from_agent, to_agent, context_id, delta)
            .await
            .inspect_err(|e| self.report("RELAY_ERROR", e, Some(context_id)))
    }

    async fn try_relay(
        &self,
        from_agent: &str,
        to_agent: &str,
        context_id: &str,
        delta: ContextDelta,
    ) -> Result<RelayOutcome> {
        if from_agent.trim().is_empty() || to_agent.trim().is_empty() {
            return Err(Error::invalid("from_agent and to_agent must not be empty"));
        }
        validate_fragments(&delta.new_fragments, self.embedder.dimensions())?;

        let mut packet = self.store.fetch(context_id).await?;

        // Removals apply first, so a delta may replace a fragment with one
        // that reuses its id or content.
        let ContextDelta {
            mut new_fragments,
            removed_fragment_ids,
            decision_updates,
        } = delta;
        packet
            .fragments
            .retain(|f| !removed_fragment_ids.contains(&f.id));
        if let Some(dup) = new_fragments.iter().find(|f| packet.fragment(&f.id).is_some()) {
            return Err(Error::invalid(format!(
                "fragment {} already exists in context {context_id}",
                dup.id
            )));
        }

        self.events.publish(EventPayload::RelaySent {
            context_id: context_id.to_string(),
            from_agent: from_agent.to_string(),
            to_agent: to_agent.to_string(),
            fragment_count: new_fragments.len(),
        });

        self.embed_tolerant(&mut new_fragments, context_id).await;

        let mut conflicts: Vec<String> = Vec::new();
        let mut conflict_details = Vec::new();
        let mut accepted = Vec::new();
        let mut rejected_fragment_ids = Vec::new();

        for fragment in new_fragments {
            let matches = find_conflicts(
                &fragment,
                &packet.fragments,
                self.settings.conflict_threshold,
            )?;

            if !matches.is_empty() {
                push_unique(&mut conflicts, &fragment.id);
                for m in &matches {
                    push_unique(&mut conflicts, &m.existing_id);
                }
            }

            let blocked = self.settings.reject_conflicting && !matches.is_empty();
            conflict_details.extend(matches);
            if blocked {
                rejected_fragment_ids.push(fragment.id.clone());
            } else {
                accepted.push(fragment);
            }
        }

        let accepted_fragment_ids: Vec<String> = accepted.iter().map(|f| f.id.clone()).collect();
        packet.fragments.extend(accepted);
        packet.decision_trace.extend(decision_updates);
        packet.metadata.insert(
            "last_relay".into(),
            json!({
                "from_agent": from_agent,
                "to_agent": to_agent,
                "timestamp": Utc::now(),
                "conflicts": conflicts.len(),
            }),
        );

        let expected = packet.bump_version();
        self.save(&packet, expected).await?;

        if !conflicts.is_empty() {
            debug!(context_id, conflicts = conflicts.len(), "Relay detected conflicts");
        }
        info!(
            context_id,
            from = %from_agent,
            to = %to_agent,
            accepted = accepted_fragment_ids.len(),
            rejected = rejected_fragment_ids.len(),
            version = packet.version,
            "Relay applied"
        );

        self.events.publish(EventPayload::RelayReceived {
            context_id: context_id.to_string(),
            from_agent: from_agent.to_string(),
            to_agent: to_agent.to_string(),
            accepted_fragments: accepted_fragment_ids.len(),
            rejected_fragments: rejected_fragment_ids.len(),
            conflicts: conflicts.clone(),
            version: packet.version,
        });

        Ok(RelayOutcome {
            context: packet,
            conflicts,
            conflict_details,
            accepted_fragment_ids,
            rejected_fragment_ids,
        })
    }

    /// Merge two or more packets, into `target_context_id` when given.
    pub async fn merge(
        &self,
        context_ids: &[String],
        strategy: MergeStrategy,
        target_context_id: Option<&str>,
    ) -> Result<MergeResult> {
        self.try_merge(context_ids, strategy, target_context_id)
            .await
            .inspect_err(|e| self.report("MERGE_ERROR", e, target_context_id))
    }

    async fn try_merge(
        &self,
        context_ids: &[String],
        strategy: MergeStrategy,
        target_context_id: Option<&str>,
    ) -> Result<MergeResult> {
        if context_ids.len() < 2 {
            return Err(Error::invalid("merge needs at least two context_ids"));
        }

        let mut sources = Vec::with_capacity(context_ids.len());
        for id in context_ids {
            sources.push(self.store.fetch(id).await?);
        }

        let slices: Vec<&[Fragment]> = sources.iter().map(|p| p.fragments.as_slice()).collect();
        let outcome = merge_fragments(&slices, strategy, self.settings.merge_threshold)?;

        let existing = match target_context_id {
            Some(id) => self.store.get(id).await?,
            None => None,
        };
        let created = existing.is_none();
        let mut packet = match existing {
            Some(packet) => packet,
            None => {
                let mut packet = match target_context_id {
                    Some(id) => ContextPacket::new(id),
                    None => ContextPacket::generate(),
                };
                packet.session_id = sources[0].session_id.clone();
                packet
            }
        };

        // An existing target that is not itself a source keeps its history.
        let mut trace = if !created && !context_ids.contains(&packet.id) {
            std::mem::take(&mut packet.decision_trace)
        } else {
            Vec::new()
        };
        for source in &sources {
            trace.extend(source.decision_trace.iter().cloned());
        }
        trace.push(
            DecisionRecord::system(
                "merge",
                format!("Merged {} contexts using {strategy}", sources.len()),
            )
            .with_affected(outcome.conflicts.iter().map(|c| c.fragment_id.clone()).collect()),
        );
        packet.decision_trace = trace;
        packet.fragments = outcome.fragments;
        packet
            .metadata
            .insert("merge_strategy".into(), json!(strategy.as_str()));
        packet
            .metadata
            .insert("source_contexts".into(), json!(context_ids));
        packet
            .metadata
            .insert("merge_timestamp".into(), json!(Utc::now()));

        if created {
            self.store.put(&packet).await?;
        } else {
            let expected = packet.bump_version();
            self.save(&packet, expected).await?;
        }

        info!(
            context_id = %packet.id,
            strategy = %strategy,
            sources = sources.len(),
            fragments = packet.fragments.len(),
            conflicts = outcome.conflicts.len(),
            "Contexts merged"
        );
        self.events.publish(EventPayload::ContextMerged {
            context_id: packet.id.clone(),
            source_context_ids: context_ids.to_vec(),
            merge_strategy: strategy.as_str().to_string(),
            merged_fragment_count: packet.fragments.len(),
            conflict_count: outcome.conflicts.len(),
        });

        Ok(MergeResult {
            context: packet,
            conflicts: outcome.conflicts,
            created,
        })
    }

    /// Cut a packet down to `budget` fragments.
    pub async fn prune(
        &self,
        context_id: &str,
        strategy: PruningStrategy,
        budget: usize,
    ) -> Result<PruneOutcome> {
        self.try_prune(context_id, strategy, budget)
            .await
            .inspect_err(|e| self.report("PRUNE_ERROR", e, Some(context_id)))
    }

    async fn try_prune(
        &self,
        context_id: &str,
        strategy: PruningStrategy,
        budget: usize,
    ) -> Result<PruneOutcome> {
        let mut packet = self.store.fetch(context_id).await?;
        let original = packet.fragments.len();

        let kept = prune_fragments(&packet.fragments, strategy, budget)?;
        let kept_ids: HashSet<&str> = kept.iter().map(|f| f.id.as_str()).collect();
        let removed_fragment_ids: Vec<String> = packet
            .fragments
            .iter()
            .filter(|f| !kept_ids.contains(f.id.as_str()))
            .map(|f| f.id.clone())
            .collect();

        packet.decision_trace.push(
            DecisionRecord::system(
                "prune",
                format!("Pruned {original} -> {} fragments using {strategy}", kept.len()),
            )
            .with_affected(removed_fragment_ids.clone()),
        );
        packet.metadata.insert(
            "pruned".into(),
            json!({
                "strategy": strategy.as_str(),
                "budget": budget,
                "removed": removed_fragment_ids.len(),
                "timestamp": Utc::now(),
            }),
        );
        packet.fragments = kept;

        let expected = packet.bump_version();
        self.save(&packet, expected).await?;

        info!(
            context_id,
            strategy = %strategy,
            budget,
            original,
            remaining = packet.fragments.len(),
            "Context pruned"
        );
        self.events.publish(EventPayload::ContextPruned {
            context_id: context_id.to_string(),
            pruning_strategy: strategy.as_str().to_string(),
            original_fragment_count: original,
            remaining_fragment_count: packet.fragments.len(),
        });

        Ok(PruneOutcome {
            context: packet,
            removed_fragment_ids,
        })
    }

    /// Bump the packet's version and store an immutable snapshot of it.
    ///
    /// A blank label counts as no label; the summary then describes the
    /// last three decisions.
    pub async fn create_version(
        &self,
        context_id: &str,
        label: Option<String>,
    ) -> Result<VersionSnapshot> {
        self.try_create_version(context_id, label)
            .await
            .inspect_err(|e| self.report("VERSION_ERROR", e, Some(context_id)))
    }

    async fn try_create_version(
        &self,
        context_id: &str,
        label: Option<String>,
    ) -> Result<VersionSnapshot> {
        let original = self.store.fetch(context_id).await?;
        let mut packet = original.clone();
        let expected = packet.bump_version();
        let snapshot = packet.snapshot(label.filter(|l| !l.trim().is_empty()));

        self.save(&packet, expected).await?;
        if let Err(e) = self.store.store_version(&snapshot).await {
            // No version without its snapshot.
            if let Err(rollback) = self.store.update(&original, packet.version).await {
                warn!(context_id, error = %rollback, "Version rollback failed");
            }
            return Err(e.into());
        }

        info!(
            context_id,
            version_id = %snapshot.snapshot_id,
            version = snapshot.version_number,
            "Version created"
        );
        self.events.publish(EventPayload::VersionCreated {
            context_id: context_id.to_string(),
            version_id: snapshot.snapshot_id.clone(),
            version_label: snapshot.label.clone(),
            version_number: snapshot.version_number,
        });
        Ok(snapshot)
    }

    // ── Reads ─────────────────────────────────────────────────────────────

    pub async fn get_context(&self, context_id: &str) -> Result<ContextPacket> {
        Ok(self.store.fetch(context_id).await?)
    }

    pub async fn list_contexts(&self) -> Result<Vec<ContextSummary>> {
        Ok(self.store.list().await?)
    }

    /// Snapshots of an existing packet, oldest first.
    pub async fn list_versions(&self, context_id: &str) -> Result<Vec<VersionInfo>> {
        self.store.fetch(context_id).await?;
        let versions = self.store.list_versions(context_id).await?;
        Ok(versions.iter().map(VersionInfo::from).collect())
    }

    /// A snapshot, only if it belongs to `context_id`.
    pub async fn get_version(&self, context_id: &str, version_id: &str) -> Result<VersionSnapshot> {
        self.store
            .get_version(version_id)
            .await?
            .filter(|s| s.context_id == context_id)
            .ok_or_else(|| StoreError::NotFound(format!("version {version_id}")).into())
    }

    /// Fragments of a packet ranked by similarity to `query`.
    ///
    /// Fragments without an embedding are not candidates. Unlike relay, an
    /// embedding failure here is an error: there is nothing to fall back to.
    pub async fn find_similar(
        &self,
        context_id: &str,
        query: &str,
        top_k: Option<usize>,
        threshold: Option<f64>,
    ) -> Result<Vec<SimilarFragment>> {
        if query.trim().is_empty() {
            return Err(Error::invalid("query must not be empty"));
        }
        let packet = self.store.fetch(context_id).await?;
        let vector = self.embedder.embed_one(query).await?;

        let candidates = packet
            .fragments
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.embedding.as_deref().map(|e| (i, e)));
        let ranked = rank_by_similarity(
            &vector,
            candidates,
            top_k.unwrap_or(self.settings.search_top_k),
            threshold.unwrap_or(self.settings.search_threshold),
        )?;

        Ok(ranked
            .into_iter()
            .map(|(i, similarity)| SimilarFragment {
                fragment: packet.fragments[i].clone(),
                similarity,
            })
            .collect())
    }

    /// Run conflict detection for an ad-hoc candidate without storing it.
    pub async fn detect_conflicts(
        &self,
        context_id: &str,
        candidate: Fragment,
        threshold: Option<f64>,
    ) -> Result<Vec<ConflictMatch>> {
        validate_fragments(std::slice::from_ref(&candidate), self.embedder.dimensions())?;
        let packet = self.store.fetch(context_id).await?;
        let mut candidate = [candidate];
        self.embed_tolerant(&mut candidate, context_id).await;
        let [candidate] = candidate;

        Ok(find_conflicts(
            &candidate,
            &packet.fragments,
            threshold.unwrap_or(self.settings.conflict_threshold),
        )?)
    }

    // ── Helpers ───────────────────────────────────────────────────────────

    /// Embed every fragment that has no embedding yet.
    async fn embed_missing(&self, fragments: &mut [Fragment]) -> std::result::Result<usize, EmbeddingError> {
        let pending: Vec<usize> = fragments
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.has_embedding())
            .map(|(i, _)| i)
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = pending
            .iter()
            .map(|&i| fragments[i].text_content().into_owned())
            .collect();
        let vectors = self.embedder.embed(&texts).await?;
        for (&i, vector) in pending.iter().zip(vectors) {
            fragments[i].embedding = Some(vector);
        }
        Ok(pending.len())
    }

    /// [`Self::embed_missing`], logging instead of failing. Fragments left
    /// without embeddings are compared by content prefix.
    async fn embed_tolerant(&self, fragments: &mut [Fragment], context_id: &str) {
        if let Err(e) = self.embed_missing(fragments).await {
            warn!(
                context_id,
                provider = %self.embedder.name(),
                error = %e,
                "Embedding failed, falling back to content prefix comparison"
            );
        }
    }

    async fn save(&self, packet: &ContextPacket, expected_version: u64) -> Result<()> {
        self.store
            .update(packet, expected_version)
            .await
            .inspect_err(|e| {
                if let StoreError::VersionConflict { expected, actual, .. } = e {
                    warn!(
                        context_id = %packet.id,
                        expected,
                        actual,
                        "Concurrent update rejected"
                    );
                }
            })?;
        Ok(())
    }

    /// Publish an `error` event for a failed operation.
    fn report(&self, code: &'static str, err: &Error, context_id: Option<&str>) {
        let code = if err.is_not_found() {
            "CONTEXT_NOT_FOUND"
        } else {
            code
        };
        warn!(code, error = %err, "Context operation failed");
        self.events.publish(EventPayload::Error {
            error_code: code.to_string(),
            message: err.to_string(),
            context_id: context_id.map(str::to_string),
        });
    }
}

/// Reject out-of-range importance, repeated ids and embeddings whose length
/// differs from the configured embedder's.
fn validate_fragments(fragments: &[Fragment], dimensions: usize) -> Result<()> {
    let mut seen = HashSet::new();
    for f in fragments {
        if !(0.0..=1.0).contains(&f.importance_score) {
            return Err(Error::invalid(format!(
                "importance_score of fragment {} must be within [0, 1], got {}",
                f.id, f.importance_score
            )));
        }
        if !seen.insert(f.id.as_str()) {
            return Err(Error::invalid(format!("duplicate fragment id {}", f.id)));
        }
        if let Some(embedding) = &f.embedding {
            if embedding.len() != dimensions {
                return Err(Error::invalid(format!(
                    "embedding of fragment {} has {} dimensions, expected {dimensions}",
                    f.id,
                    embedding.len()
                )));
            }
        }
    }
    Ok(())
}

fn push_unique(ids: &mut Vec<String>, id: &str) {
    if !ids.iter().any(|existing| existing == id) {
        ids.push(id.to_string());
    }
}
