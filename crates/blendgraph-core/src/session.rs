//! # Session Module
//!
//! One entry point for every graph operation, over either storage backend.
//!
//! ## Storage Backends
//!
//! - `InMemory`: `MemoryStore` (fast, volatile unless exported)
//! - `Persistent`: `RedbStore` (disk-backed, ACID). Multi-query reads such as
//!   flatten run against one pinned snapshot.
//!
//! Reads check `can_read` on the formula they start from; writes go through
//! the [`MutationEngine`].

use crate::access::{AccessPolicy, require};
use crate::catalog::{Catalog, ImportSummary};
use crate::cycle::CycleGuard;
use crate::events::EventSink;
use crate::flatten::{Composition, Flattener, TreeNode};
use crate::mutation::MutationEngine;
use crate::primitives::TraversalLimits;
use crate::storage::RedbStore;
use crate::store::{CompositionRead, CompositionStore, MemoryStore};
use crate::{
    BlendError, Capability, Formula, FormulaId, IngredientPatch, IngredientRelation,
    NewIngredient, NewSubstanceEdge, Substance, SubstanceId, SubstancePatch, SubstanceRelation,
    UserId,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Storage backend for a Session.
#[derive(Debug)]
pub enum StorageBackend {
    /// In-memory store (fast, volatile).
    InMemory(MemoryStore),
    /// Disk-backed store using redb (ACID, persistent).
    Persistent(RedbStore),
}

impl StorageBackend {
    fn store_mut(&mut self) -> &mut dyn CompositionStore {
        match self {
            Self::InMemory(store) => store,
            Self::Persistent(store) => store,
        }
    }
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::InMemory(MemoryStore::new())
    }
}

/// Record counts, for status output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub formulas: usize,
    pub substances: usize,
    pub ingredients: usize,
    pub substance_edges: usize,
}

/// A composition graph plus the policy and sink its operations consult.
#[derive(Debug)]
pub struct Session<P, E> {
    backend: StorageBackend,
    engine: MutationEngine<P, E>,
    flattener: Flattener,
}

impl<P: AccessPolicy, E: EventSink> Session<P, E> {
    /// Create a session with in-memory storage.
    pub fn new(policy: P, events: E) -> Self {
        Self::with_backend(StorageBackend::default(), policy, events)
    }

    /// Create a session with persistent redb storage at `path`.
    pub fn with_redb(path: impl AsRef<Path>, policy: P, events: E) -> Result<Self, BlendError> {
        let store = RedbStore::open(path)?;
        Ok(Self::with_backend(
            StorageBackend::Persistent(store),
            policy,
            events,
        ))
    }

    #[must_use]
    pub fn with_backend(backend: StorageBackend, policy: P, events: E) -> Self {
        Self {
            backend,
            engine: MutationEngine::new(policy, events),
            flattener: Flattener::default(),
        }
    }

    /// Replace the traversal limits used by the guard and by flatten.
    #[must_use]
    pub fn with_limits(mut self, limits: TraversalLimits) -> Self {
        self.flattener = Flattener::new(limits);
        self.engine = self.engine.with_limits(limits);
        self
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, StorageBackend::Persistent(_))
    }

    pub fn backend(&self) -> &StorageBackend {
        &self.backend
    }

    pub fn policy(&self) -> &P {
        self.engine.policy()
    }

    pub fn limits(&self) -> &TraversalLimits {
        self.engine.limits()
    }

    // =========================================================================
    // BACKEND DISPATCH
    // =========================================================================

    /// Run `f` over a consistent read view.
    fn read<T>(
        &self,
        f: impl FnOnce(&dyn CompositionRead) -> Result<T, BlendError>,
    ) -> Result<T, BlendError> {
        match &self.backend {
            StorageBackend::InMemory(store) => f(store),
            StorageBackend::Persistent(store) => f(&store.snapshot()?),
        }
    }

    // =========================================================================
    // NODES
    // =========================================================================

    /// Insert or replace a formula. No access check: registration is the
    /// caller's concern.
    pub fn register_formula(&mut self, formula: Formula) -> Result<(), BlendError> {
        self.backend.store_mut().put_formula(formula)
    }

    pub fn register_substance(&mut self, substance: Substance) -> Result<(), BlendError> {
        self.backend.store_mut().put_substance(substance)
    }

    /// A formula the user may read.
    pub fn formula(&self, user: UserId, id: FormulaId) -> Result<Formula, BlendError> {
        self.read(|store| self.engine.require_formula(store, user, id, Capability::Read))
    }

    pub fn substance(&self, id: SubstanceId) -> Result<Substance, BlendError> {
        self.read(|store| {
            store
                .substance(id)?
                .ok_or(BlendError::SubstanceNotFound(id))
        })
    }

    /// All formulas, unfiltered. For administrative tooling.
    pub fn formulas(&self) -> Result<Vec<Formula>, BlendError> {
        self.read(|store| store.formulas())
    }

    pub fn stats(&self) -> Result<StoreStats, BlendError> {
        let (ingredients, substance_edges) = match &self.backend {
            StorageBackend::InMemory(store) => {
                (store.ingredient_count(), store.substance_edge_count())
            }
            StorageBackend::Persistent(store) => {
                (store.ingredient_count()?, store.substance_edge_count()?)
            }
        };
        self.read(|store| {
            Ok(StoreStats {
                formulas: store.formulas()?.len(),
                substances: store.substances()?.len(),
                ingredients,
                substance_edges,
            })
        })
    }

    // =========================================================================
    // CYCLE GUARD
    // =========================================================================

    /// Would nesting `candidate` inside `parent` close a cycle? Checked with
    /// the same existence and access rules as the real add.
    pub fn would_create_cycle(
        &self,
        user: UserId,
        parent: FormulaId,
        candidate: FormulaId,
    ) -> Result<bool, BlendError> {
        self.read(|store| self.engine.check_cycle(store, user, parent, candidate))
    }

    /// Scan the stored graph for a cycle. `None` means the graph is sound.
    pub fn verify_acyclic(&self) -> Result<Option<Vec<FormulaId>>, BlendError> {
        self.read(|store| CycleGuard::find_cycle(store))
    }

    // =========================================================================
    // EDGE MUTATIONS
    // =========================================================================

    pub fn add_compound_ingredient(
        &mut self,
        user: UserId,
        request: NewIngredient,
    ) -> Result<IngredientRelation, BlendError> {
        let store = self.backend.store_mut();
        self.engine.add_compound_ingredient(store, user, request)
    }

    pub fn update_compound_ingredient(
        &mut self,
        user: UserId,
        parent: FormulaId,
        ingredient: FormulaId,
        patch: IngredientPatch,
    ) -> Result<IngredientRelation, BlendError> {
        let store = self.backend.store_mut();
        self.engine
            .update_compound_ingredient(store, user, parent, ingredient, patch)
    }

    pub fn remove_compound_ingredient(
        &mut self,
        user: UserId,
        parent: FormulaId,
        ingredient: FormulaId,
    ) -> Result<IngredientRelation, BlendError> {
        let store = self.backend.store_mut();
        self.engine
            .remove_compound_ingredient(store, user, parent, ingredient)
    }

    pub fn add_substance(
        &mut self,
        user: UserId,
        request: NewSubstanceEdge,
    ) -> Result<SubstanceRelation, BlendError> {
        let store = self.backend.store_mut();
        self.engine.add_substance(store, user, request)
    }

    pub fn update_substance(
        &mut self,
        user: UserId,
        formula: FormulaId,
        substance: SubstanceId,
        patch: SubstancePatch,
    ) -> Result<SubstanceRelation, BlendError> {
        let store = self.backend.store_mut();
        self.engine
            .update_substance(store, user, formula, substance, patch)
    }

    pub fn remove_substance(
        &mut self,
        user: UserId,
        formula: FormulaId,
        substance: SubstanceId,
    ) -> Result<SubstanceRelation, BlendError> {
        let store = self.backend.store_mut();
        self.engine.remove_substance(store, user, formula, substance)
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Flatten `root` into raw substances. Requires read access on the root.
    pub fn flatten(&self, user: UserId, root: FormulaId) -> Result<Composition, BlendError> {
        self.read(|store| {
            self.engine
                .require_formula(store, user, root, Capability::Read)?;
            self.flattener.flatten(store, root)
        })
    }

    /// Nested structure of `root`. Requires read access on the root.
    pub fn tree(&self, user: UserId, root: FormulaId) -> Result<TreeNode, BlendError> {
        self.read(|store| {
            self.engine
                .require_formula(store, user, root, Capability::Read)?;
            self.flattener.tree(store, root)
        })
    }

    /// Direct compound edges of `parent`, in display order.
    pub fn ingredients_of(
        &self,
        user: UserId,
        parent: FormulaId,
    ) -> Result<Vec<IngredientRelation>, BlendError> {
        self.read(|store| {
            self.engine
                .require_formula(store, user, parent, Capability::Read)?;
            store.ingredients(parent)
        })
    }

    /// Direct substance edges of `formula`, in display order.
    pub fn substances_of(
        &self,
        user: UserId,
        formula: FormulaId,
    ) -> Result<Vec<SubstanceRelation>, BlendError> {
        self.read(|store| {
            self.engine
                .require_formula(store, user, formula, Capability::Read)?;
            store.substance_edges(formula)
        })
    }

    /// Formulas that directly use `ingredient`, limited to those the user
    /// may read.
    pub fn used_in(&self, user: UserId, ingredient: FormulaId) -> Result<Vec<Formula>, BlendError> {
        self.read(|store| {
            self.engine
                .require_formula(store, user, ingredient, Capability::Read)?;
            let mut parents = Vec::new();
            for id in store.parents_of(ingredient)? {
                if require(self.engine.policy(), user, id, Capability::Read).is_err() {
                    continue;
                }
                if let Some(formula) = store.formula(id)? {
                    parents.push(formula);
                }
            }
            Ok(parents)
        })
    }

    // =========================================================================
    // CATALOG
    // =========================================================================

    pub fn export_catalog(&self) -> Result<Catalog, BlendError> {
        self.read(|store| Catalog::capture(store))
    }

    pub fn import_catalog(&mut self, catalog: Catalog) -> Result<ImportSummary, BlendError> {
        let limits = *self.engine.limits();
        catalog.apply(self.backend.store_mut(), &limits)
    }

    /// Compact the database file. No-op for in-memory sessions.
    pub fn compact(&mut self) -> Result<(), BlendError> {
        match &mut self.backend {
            StorageBackend::InMemory(_) => Ok(()),
            StorageBackend::Persistent(store) => store.compact(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessList, AllowAll};
    use crate::events::{NullSink, RecordingSink};
    use crate::ErrorKind;
    use tempfile::tempdir;

    const ALICE: UserId = UserId(1);
    const BOB: UserId = UserId(2);

    fn seed<P: AccessPolicy, E: EventSink>(session: &mut Session<P, E>) {
        for (id, name) in [(1, "Top"), (2, "Base")] {
            session
                .register_formula(Formula::new(FormulaId(id), name, ALICE))
                .expect("register");
        }
        for (id, name) in [(10, "S1"), (20, "S2")] {
            session
                .register_substance(Substance::new(SubstanceId(id), name))
                .expect("register");
        }
    }

    fn build<P: AccessPolicy, E: EventSink>(session: &mut Session<P, E>) {
        seed(session);
        session
            .add_compound_ingredient(
                ALICE,
                NewIngredient::new(FormulaId(1), FormulaId(2), 500.0),
            )
            .expect("add base");
        session
            .add_substance(
                ALICE,
                NewSubstanceEdge::new(FormulaId(1), SubstanceId(20), 100.0),
            )
            .expect("add S2");
        session
            .add_substance(
                ALICE,
                NewSubstanceEdge::new(FormulaId(2), SubstanceId(10), 200.0),
            )
            .expect("add S1");
    }

    fn assert_end_to_end<P: AccessPolicy, E: EventSink>(session: &Session<P, E>) {
        let composition = session.flatten(ALICE, FormulaId(1)).expect("flatten");
        let ids: Vec<_> = composition.rows.iter().map(|r| r.substance.id).collect();
        assert_eq!(ids, vec![SubstanceId(20), SubstanceId(10)]);
        for row in &composition.rows {
            assert!((row.total_concentration - 100.0).abs() < 1e-9);
        }
    }

    #[test]
    fn in_memory_end_to_end() {
        let mut session = Session::new(AllowAll, RecordingSink::new());
        build(&mut session);
        assert_end_to_end(&session);
        assert!(
            session
                .would_create_cycle(ALICE, FormulaId(2), FormulaId(1))
                .expect("check")
        );
        assert_eq!(session.verify_acyclic().expect("verify"), None);
    }

    #[test]
    fn persistent_end_to_end_and_reopen() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("session.redb");
        {
            let mut session =
                Session::with_redb(&db_path, AllowAll, NullSink).expect("open session");
            assert!(session.is_persistent());
            build(&mut session);
            assert_end_to_end(&session);
        }
        let session = Session::with_redb(&db_path, AllowAll, NullSink).expect("reopen session");
        assert_end_to_end(&session);
        let stats = session.stats().expect("stats");
        assert_eq!(stats.ingredients, 1);
        assert_eq!(stats.substance_edges, 2);
    }

    #[test]
    fn reads_require_read_access() {
        let mut acl = AccessList::new();
        acl.grant_edit(ALICE, FormulaId(1)).grant_edit(ALICE, FormulaId(2));
        let mut session = Session::new(acl, NullSink);
        build(&mut session);

        let err = session.flatten(BOB, FormulaId(1)).expect_err("denied");
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
        let err = session.tree(BOB, FormulaId(1)).expect_err("denied");
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
        assert!(session.flatten(ALICE, FormulaId(1)).is_ok());
    }

    #[test]
    fn used_in_hides_unreadable_parents() {
        let mut acl = AccessList::new();
        acl.grant_edit(ALICE, FormulaId(1))
            .grant_edit(ALICE, FormulaId(2))
            .grant_read(BOB, FormulaId(2));
        let mut session = Session::new(acl, NullSink);
        build(&mut session);

        let alice_view = session.used_in(ALICE, FormulaId(2)).expect("used in");
        assert_eq!(alice_view.len(), 1);
        let bob_view = session.used_in(BOB, FormulaId(2)).expect("used in");
        assert!(bob_view.is_empty());
    }

    #[test]
    fn catalog_moves_between_backends() {
        let mut memory = Session::new(AllowAll, NullSink);
        build(&mut memory);
        let catalog = memory.export_catalog().expect("export");

        let temp = tempdir().expect("temp dir");
        let mut disk =
            Session::with_redb(temp.path().join("copy.redb"), AllowAll, NullSink).expect("open");
        let summary = disk.import_catalog(catalog).expect("import");
        assert_eq!(summary.formulas, 2);
        assert_end_to_end(&disk);
    }

    #[test]
    fn limits_flow_to_flatten() {
        let mut session =
            Session::new(AllowAll, NullSink).with_limits(TraversalLimits::new(100, 1));
        build(&mut session);
        let err = session.flatten(ALICE, FormulaId(1)).expect_err("too deep");
        assert_eq!(err.kind(), ErrorKind::TraversalLimit);
    }
}
