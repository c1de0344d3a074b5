//! # blendgraph-core
//!
//! The formula composition graph for Blendgraph.
//!
//! A formula contains raw substances and, optionally, other formulas used as
//! compounds. This crate keeps that graph acyclic and resolves any formula
//! into its total raw-substance composition.
//!
//! ## Components
//!
//! - `cycle`: reachability check run before every compound insert
//! - `mutation`: validated add/update/remove of both edge kinds
//! - `flatten`: depth-first bill-of-materials resolution
//! - `store` / `storage`: in-memory and redb-backed graph storage
//! - `session`: one facade over either backend
//!
//! ## Architectural Constraints
//!
//! - No async, no network dependencies
//! - Deterministic: ordered collections only, stable result ordering
//! - Access control and event delivery are injected through traits

// =============================================================================
// MODULES
// =============================================================================

pub mod access;
pub mod catalog;
pub mod cycle;
pub mod events;
pub mod flatten;
pub mod mutation;
pub mod primitives;
pub mod session;
pub mod storage;
pub mod store;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    BaseUnit, BlendError, Capability, CommercialInfo, Concentration, ErrorKind, Formula,
    FormulaId, FormulaStatus, IngredientPatch, IngredientRelation, NewIngredient,
    NewSubstanceEdge, Substance, SubstanceId, SubstancePatch, SubstanceRelation, UserId,
};

// =============================================================================
// RE-EXPORTS: Graph Engine
// =============================================================================

pub use access::{AccessList, AccessPolicy, AllowAll};
pub use catalog::{Catalog, ImportSummary};
pub use cycle::CycleGuard;
pub use events::{EventSink, GraphEvent, NullSink, RecordingSink, SinkError, TracingSink};
pub use flatten::{Composition, FlatRow, Flattener, Source, TreeLeaf, TreeNode};
pub use mutation::MutationEngine;
pub use primitives::TraversalLimits;
pub use session::{Session, StorageBackend, StoreStats};
pub use storage::{RedbSnapshot, RedbStore};
pub use store::{CompositionRead, CompositionStore, MemoryStore};
