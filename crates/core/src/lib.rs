//! # Context Relay Core
//!
//! Domain types, traits, pure algorithms and error definitions for the
//! context relay service. Agents exchange versioned context packets through
//! initialize/relay/merge/prune/version operations; everything in this crate
//! is independent of HTTP and storage.
//!
//! ## Layout
//!
//! - [`similarity`], [`conflict`], [`diversity`]: synchronous, side-effect-free
//!   numeric logic over fragment embeddings
//! - [`prune`] and [`merge`]: fragment-list strategies built on top of them
//! - [`store::ContextStore`] and [`embedding::EmbeddingProvider`]: the seams
//!   other crates implement, selected by configuration
//! - [`broadcaster::EventBroadcaster`]: in-process fan-out of [`event::RelayEvent`]s

pub mod error;
pub mod fragment;
pub mod context;
pub mod similarity;
pub mod conflict;
pub mod diversity;
pub mod prune;
pub mod merge;
pub mod store;
pub mod embedding;
pub mod event;
pub mod broadcaster;

// Re-export key types at crate root for ergonomics
pub use error::{EmbeddingError, Error, Result, SimilarityError, StoreError};
pub use fragment::{Fragment, FragmentType};
pub use context::{ContextDelta, ContextPacket, DecisionRecord, VersionInfo, VersionSnapshot};
pub use similarity::cosine_similarity;
pub use conflict::{ConflictMatch, MatchMethod, detect_conflicts, find_conflicts};
pub use diversity::select_diverse_subset;
pub use prune::{PruningStrategy, prune_fragments};
pub use merge::{MergeConflict, MergeOutcome, MergeStrategy, merge_fragments};
pub use store::{ContextStore, ContextSummary};
pub use embedding::EmbeddingProvider;
pub use event::{EventPayload, EventType, RelayEvent, VisualizationEvent};
pub use broadcaster::{BroadcasterConfig, EventBroadcaster, PublishOutcome, Subscription};
