//! # redb-backed Composition Storage
//!
//! Formulas, substances and both edge kinds persisted in a redb database.
//!
//! - Records are postcard-encoded.
//! - Edge tables are keyed `(owner, child)` so one owner's edges are a
//!   contiguous key range.
//! - `USED_IN` is the reverse index `(child, parent)` for where-used lookups.
//!
//! redb admits one write transaction at a time. `insert_ingredient` runs its
//! duplicate and cycle checks inside that transaction, so two concurrent
//! inserts can never jointly close a cycle.

use crate::cycle;
use crate::primitives::TraversalLimits;
use crate::store::{CompositionRead, CompositionStore};
use crate::{
    BlendError, Formula, FormulaId, IngredientRelation, Substance, SubstanceId, SubstanceRelation,
};
use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, ReadableTableMetadata,
    TableDefinition,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::path::Path;

/// formula id -> Formula
const FORMULAS: TableDefinition<u64, &[u8]> = TableDefinition::new("formulas");

/// substance id -> Substance
const SUBSTANCES: TableDefinition<u64, &[u8]> = TableDefinition::new("substances");

/// (parent, ingredient) -> IngredientRelation
const INGREDIENTS: TableDefinition<(u64, u64), &[u8]> = TableDefinition::new("ingredients");

/// (ingredient, parent) -> ()
const USED_IN: TableDefinition<(u64, u64), ()> = TableDefinition::new("used_in");

/// (formula, substance) -> SubstanceRelation
const SUBSTANCE_EDGES: TableDefinition<(u64, u64), &[u8]> =
    TableDefinition::new("substance_edges");

// =============================================================================
// ENCODING HELPERS
// =============================================================================

fn storage_err<E: Display>(e: E) -> BlendError {
    BlendError::Storage(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, BlendError> {
    postcard::to_allocvec(value).map_err(|e| BlendError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, BlendError> {
    postcard::from_bytes(bytes).map_err(|e| BlendError::Serialization(e.to_string()))
}

fn record<T, V>(table: &T, id: u64) -> Result<Option<V>, BlendError>
where
    T: ReadableTable<u64, &'static [u8]>,
    V: DeserializeOwned,
{
    match table.get(id).map_err(storage_err)? {
        Some(data) => Ok(Some(decode(data.value())?)),
        None => Ok(None),
    }
}

fn all_records<T, V>(table: &T) -> Result<Vec<V>, BlendError>
where
    T: ReadableTable<u64, &'static [u8]>,
    V: DeserializeOwned,
{
    let mut out = Vec::new();
    for entry in table.iter().map_err(storage_err)? {
        let (_, value) = entry.map_err(storage_err)?;
        out.push(decode(value.value())?);
    }
    Ok(out)
}

fn edge<T, V>(table: &T, owner: u64, child: u64) -> Result<Option<V>, BlendError>
where
    T: ReadableTable<(u64, u64), &'static [u8]>,
    V: DeserializeOwned,
{
    match table.get((owner, child)).map_err(storage_err)? {
        Some(data) => Ok(Some(decode(data.value())?)),
        None => Ok(None),
    }
}

/// Every edge owned by `owner`, in child id order.
fn edges_of<T, V>(table: &T, owner: u64) -> Result<Vec<V>, BlendError>
where
    T: ReadableTable<(u64, u64), &'static [u8]>,
    V: DeserializeOwned,
{
    let mut out = Vec::new();
    for entry in table
        .range((owner, 0u64)..=(owner, u64::MAX))
        .map_err(storage_err)?
    {
        let (_, value) = entry.map_err(storage_err)?;
        out.push(decode(value.value())?);
    }
    Ok(out)
}

/// Second key component of every key starting with `first`.
fn second_keys<T, V>(table: &T, first: u64) -> Result<Vec<u64>, BlendError>
where
    T: ReadableTable<(u64, u64), V>,
    V: redb::Value + 'static,
{
    let mut out = Vec::new();
    for entry in table
        .range((first, 0u64)..=(first, u64::MAX))
        .map_err(storage_err)?
    {
        let (key, _) = entry.map_err(storage_err)?;
        out.push(key.value().1);
    }
    Ok(out)
}

fn child_formulas<T, V>(table: &T, parent: FormulaId) -> Result<Vec<FormulaId>, BlendError>
where
    T: ReadableTable<(u64, u64), V>,
    V: redb::Value + 'static,
{
    Ok(second_keys(table, parent.0)?
        .into_iter()
        .map(FormulaId)
        .collect())
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// A pinned, read-only view of the database.
///
/// Every read through a snapshot observes the same committed state, however
/// many writes land in the meantime.
pub struct RedbSnapshot {
    txn: ReadTransaction,
}

impl std::fmt::Debug for RedbSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbSnapshot").finish_non_exhaustive()
    }
}

impl CompositionRead for RedbSnapshot {
    fn formula(&self, id: FormulaId) -> Result<Option<Formula>, BlendError> {
        let table = self.txn.open_table(FORMULAS).map_err(storage_err)?;
        record(&table, id.0)
    }

    fn substance(&self, id: SubstanceId) -> Result<Option<Substance>, BlendError> {
        let table = self.txn.open_table(SUBSTANCES).map_err(storage_err)?;
        record(&table, id.0)
    }

    fn ingredients(&self, parent: FormulaId) -> Result<Vec<IngredientRelation>, BlendError> {
        let table = self.txn.open_table(INGREDIENTS).map_err(storage_err)?;
        let mut edges: Vec<IngredientRelation> = edges_of(&table, parent.0)?;
        edges.sort_by_key(IngredientRelation::sort_key);
        Ok(edges)
    }

    fn substance_edges(&self, formula: FormulaId) -> Result<Vec<SubstanceRelation>, BlendError> {
        let table = self.txn.open_table(SUBSTANCE_EDGES).map_err(storage_err)?;
        let mut edges: Vec<SubstanceRelation> = edges_of(&table, formula.0)?;
        edges.sort_by_key(SubstanceRelation::sort_key);
        Ok(edges)
    }

    fn ingredient_edge(
        &self,
        parent: FormulaId,
        ingredient: FormulaId,
    ) -> Result<Option<IngredientRelation>, BlendError> {
        let table = self.txn.open_table(INGREDIENTS).map_err(storage_err)?;
        edge(&table, parent.0, ingredient.0)
    }

    fn substance_edge(
        &self,
        formula: FormulaId,
        substance: SubstanceId,
    ) -> Result<Option<SubstanceRelation>, BlendError> {
        let table = self.txn.open_table(SUBSTANCE_EDGES).map_err(storage_err)?;
        edge(&table, formula.0, substance.0)
    }

    fn parents_of(&self, ingredient: FormulaId) -> Result<Vec<FormulaId>, BlendError> {
        let table = self.txn.open_table(USED_IN).map_err(storage_err)?;
        child_formulas(&table, ingredient)
    }

    fn formulas(&self) -> Result<Vec<Formula>, BlendError> {
        let table = self.txn.open_table(FORMULAS).map_err(storage_err)?;
        all_records(&table)
    }

    fn substances(&self) -> Result<Vec<Substance>, BlendError> {
        let table = self.txn.open_table(SUBSTANCES).map_err(storage_err)?;
        all_records(&table)
    }

    fn ingredient_ids(&self, parent: FormulaId) -> Result<Vec<FormulaId>, BlendError> {
        let table = self.txn.open_table(INGREDIENTS).map_err(storage_err)?;
        child_formulas(&table, parent)
    }
}

// =============================================================================
// STORE
// =============================================================================

/// A disk-backed composition store using redb.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a composition database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BlendError> {
        let db = Database::create(path.as_ref()).map_err(storage_err)?;

        // Create every table up front so read transactions never miss one.
        let txn = db.begin_write().map_err(storage_err)?;
        {
            txn.open_table(FORMULAS).map_err(storage_err)?;
            txn.open_table(SUBSTANCES).map_err(storage_err)?;
            txn.open_table(INGREDIENTS).map_err(storage_err)?;
            txn.open_table(USED_IN).map_err(storage_err)?;
            txn.open_table(SUBSTANCE_EDGES).map_err(storage_err)?;
        }
        txn.commit().map_err(storage_err)?;

        tracing::debug!(path = %path.as_ref().display(), "opened composition database");
        Ok(Self { db })
    }

    /// Pin the current committed state for a multi-query read.
    pub fn snapshot(&self) -> Result<RedbSnapshot, BlendError> {
        let txn = self.db.begin_read().map_err(storage_err)?;
        Ok(RedbSnapshot { txn })
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), BlendError> {
        self.db.compact().map_err(storage_err)?;
        Ok(())
    }

    pub fn formula_count(&self) -> Result<usize, BlendError> {
        let txn = self.db.begin_read().map_err(storage_err)?;
        let table = txn.open_table(FORMULAS).map_err(storage_err)?;
        Ok(table.len().map_err(storage_err)? as usize)
    }

    pub fn ingredient_count(&self) -> Result<usize, BlendError> {
        let txn = self.db.begin_read().map_err(storage_err)?;
        let table = txn.open_table(INGREDIENTS).map_err(storage_err)?;
        Ok(table.len().map_err(storage_err)? as usize)
    }

    pub fn substance_edge_count(&self) -> Result<usize, BlendError> {
        let txn = self.db.begin_read().map_err(storage_err)?;
        let table = txn.open_table(SUBSTANCE_EDGES).map_err(storage_err)?;
        Ok(table.len().map_err(storage_err)? as usize)
    }

    /// Overwrite an edge that must already exist.
    fn replace_edge<V: Serialize>(
        &mut self,
        table: TableDefinition<'_, (u64, u64), &'static [u8]>,
        key: (u64, u64),
        value: &V,
        missing: BlendError,
    ) -> Result<(), BlendError> {
        let bytes = encode(value)?;
        let txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut edges = txn.open_table(table).map_err(storage_err)?;
            if edges.get(key).map_err(storage_err)?.is_none() {
                return Err(missing);
            }
            edges.insert(key, bytes.as_slice()).map_err(storage_err)?;
        }
        txn.commit().map_err(storage_err)?;
        Ok(())
    }
}

impl CompositionRead for RedbStore {
    fn formula(&self, id: FormulaId) -> Result<Option<Formula>, BlendError> {
        self.snapshot()?.formula(id)
    }

    fn substance(&self, id: SubstanceId) -> Result<Option<Substance>, BlendError> {
        self.snapshot()?.substance(id)
    }

    fn ingredients(&self, parent: FormulaId) -> Result<Vec<IngredientRelation>, BlendError> {
        self.snapshot()?.ingredients(parent)
    }

    fn substance_edges(&self, formula: FormulaId) -> Result<Vec<SubstanceRelation>, BlendError> {
        self.snapshot()?.substance_edges(formula)
    }

    fn ingredient_edge(
        &self,
        parent: FormulaId,
        ingredient: FormulaId,
    ) -> Result<Option<IngredientRelation>, BlendError> {
        self.snapshot()?.ingredient_edge(parent, ingredient)
    }

    fn substance_edge(
        &self,
        formula: FormulaId,
        substance: SubstanceId,
    ) -> Result<Option<SubstanceRelation>, BlendError> {
        self.snapshot()?.substance_edge(formula, substance)
    }

    fn parents_of(&self, ingredient: FormulaId) -> Result<Vec<FormulaId>, BlendError> {
        self.snapshot()?.parents_of(ingredient)
    }

    fn formulas(&self) -> Result<Vec<Formula>, BlendError> {
        self.snapshot()?.formulas()
    }

    fn substances(&self) -> Result<Vec<Substance>, BlendError> {
        self.snapshot()?.substances()
    }

    fn ingredient_ids(&self, parent: FormulaId) -> Result<Vec<FormulaId>, BlendError> {
        self.snapshot()?.ingredient_ids(parent)
    }
}

impl CompositionStore for RedbStore {
    fn put_formula(&mut self, formula: Formula) -> Result<(), BlendError> {
        let bytes = encode(&formula)?;
        let txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = txn.open_table(FORMULAS).map_err(storage_err)?;
            table
                .insert(formula.id.0, bytes.as_slice())
                .map_err(storage_err)?;
        }
        txn.commit().map_err(storage_err)?;
        Ok(())
    }

    fn put_substance(&mut self, substance: Substance) -> Result<(), BlendError> {
        let bytes = encode(&substance)?;
        let txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = txn.open_table(SUBSTANCES).map_err(storage_err)?;
            table
                .insert(substance.id.0, bytes.as_slice())
                .map_err(storage_err)?;
        }
        txn.commit().map_err(storage_err)?;
        Ok(())
    }

    fn insert_ingredient(
        &mut self,
        edge: IngredientRelation,
        limits: &TraversalLimits,
    ) -> Result<(), BlendError> {
        let (parent, ingredient) = (edge.parent, edge.ingredient);
        if parent == ingredient {
            return Err(BlendError::SelfReference(parent));
        }
        let bytes = encode(&edge)?;

        // Validation and write share one transaction; an early return
        // drops it uncommitted.
        let txn = self.db.begin_write().map_err(storage_err)?;
        {
            let formulas = txn.open_table(FORMULAS).map_err(storage_err)?;
            for id in [parent, ingredient] {
                if formulas.get(id.0).map_err(storage_err)?.is_none() {
                    return Err(BlendError::FormulaNotFound(id));
                }
            }

            let mut ingredients = txn.open_table(INGREDIENTS).map_err(storage_err)?;
            if ingredients
                .get((parent.0, ingredient.0))
                .map_err(storage_err)?
                .is_some()
            {
                return Err(BlendError::DuplicateIngredient { parent, ingredient });
            }
            if cycle::reaches(ingredient, parent, limits, |id| {
                child_formulas(&ingredients, id)
            })? {
                return Err(BlendError::CycleDetected { parent, ingredient });
            }
            ingredients
                .insert((parent.0, ingredient.0), bytes.as_slice())
                .map_err(storage_err)?;

            let mut used_in = txn.open_table(USED_IN).map_err(storage_err)?;
            used_in
                .insert((ingredient.0, parent.0), ())
                .map_err(storage_err)?;
        }
        txn.commit().map_err(storage_err)?;
        Ok(())
    }

    fn replace_ingredient(&mut self, edge: IngredientRelation) -> Result<(), BlendError> {
        let missing = BlendError::IngredientNotFound {
            parent: edge.parent,
            ingredient: edge.ingredient,
        };
        self.replace_edge(
            INGREDIENTS,
            (edge.parent.0, edge.ingredient.0),
            &edge,
            missing,
        )
    }

    fn delete_ingredient(
        &mut self,
        parent: FormulaId,
        ingredient: FormulaId,
    ) -> Result<Option<IngredientRelation>, BlendError> {
        let txn = self.db.begin_write().map_err(storage_err)?;
        let removed = {
            let mut ingredients = txn.open_table(INGREDIENTS).map_err(storage_err)?;
            let removed: Option<IngredientRelation> = match ingredients
                .remove((parent.0, ingredient.0))
                .map_err(storage_err)?
            {
                Some(data) => Some(decode(data.value())?),
                None => None,
            };
            if removed.is_some() {
                let mut used_in = txn.open_table(USED_IN).map_err(storage_err)?;
                used_in
                    .remove((ingredient.0, parent.0))
                    .map_err(storage_err)?;
            }
            removed
        };
        txn.commit().map_err(storage_err)?;
        Ok(removed)
    }

    fn insert_substance_edge(&mut self, edge: SubstanceRelation) -> Result<(), BlendError> {
        let bytes = encode(&edge)?;
        let key = (edge.formula.0, edge.substance.0);

        let txn = self.db.begin_write().map_err(storage_err)?;
        {
            let formulas = txn.open_table(FORMULAS).map_err(storage_err)?;
            if formulas.get(edge.formula.0).map_err(storage_err)?.is_none() {
                return Err(BlendError::FormulaNotFound(edge.formula));
            }
            let substances = txn.open_table(SUBSTANCES).map_err(storage_err)?;
            if substances
                .get(edge.substance.0)
                .map_err(storage_err)?
                .is_none()
            {
                return Err(BlendError::SubstanceNotFound(edge.substance));
            }

            let mut edges = txn.open_table(SUBSTANCE_EDGES).map_err(storage_err)?;
            if edges.get(key).map_err(storage_err)?.is_some() {
                return Err(BlendError::DuplicateSubstance {
                    formula: edge.formula,
                    substance: edge.substance,
                });
            }
            edges.insert(key, bytes.as_slice()).map_err(storage_err)?;
        }
        txn.commit().map_err(storage_err)?;
        Ok(())
    }

    fn replace_substance_edge(&mut self, edge: SubstanceRelation) -> Result<(), BlendError> {
        let missing = BlendError::SubstanceEdgeNotFound {
            formula: edge.formula,
            substance: edge.substance,
        };
        self.replace_edge(
            SUBSTANCE_EDGES,
            (edge.formula.0, edge.substance.0),
            &edge,
            missing,
        )
    }

    fn delete_substance_edge(
        &mut self,
        formula: FormulaId,
        substance: SubstanceId,
    ) -> Result<Option<SubstanceRelation>, BlendError> {
        let txn = self.db.begin_write().map_err(storage_err)?;
        let removed = {
            let mut edges = txn.open_table(SUBSTANCE_EDGES).map_err(storage_err)?;
            match edges
                .remove((formula.0, substance.0))
                .map_err(storage_err)?
            {
                Some(data) => Some(decode(data.value())?),
                None => None,
            }
        };
        txn.commit().map_err(storage_err)?;
        Ok(removed)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Concentration, UserId};
    use tempfile::tempdir;

    fn relation(parent: u64, ingredient: u64, order: u32) -> IngredientRelation {
        IngredientRelation {
            parent: FormulaId(parent),
            ingredient: FormulaId(ingredient),
            concentration: Concentration::new(100.0).expect("valid"),
            unit: "parts".into(),
            order,
        }
    }

    fn seeded(store: &mut RedbStore, n: u64) {
        for id in 1..=n {
            store
                .put_formula(Formula::new(FormulaId(id), format!("F{id}"), UserId(1)))
                .expect("put formula");
        }
    }

    #[test]
    fn formula_round_trip_and_counts() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("blend.redb")).expect("open db");
        seeded(&mut store, 3);

        assert_eq!(store.formula_count().expect("count"), 3);
        let f = store.formula(FormulaId(2)).expect("get").expect("present");
        assert_eq!(f.name, "F2");
        assert!(store.formula(FormulaId(9)).expect("get").is_none());
    }

    #[test]
    fn ingredient_lifecycle() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("blend.redb")).expect("open db");
        seeded(&mut store, 3);
        let limits = TraversalLimits::default();

        store.insert_ingredient(relation(1, 2, 1), &limits).expect("insert");
        store.insert_ingredient(relation(1, 3, 0), &limits).expect("insert");

        let listed: Vec<_> = store
            .ingredients(FormulaId(1))
            .expect("list")
            .into_iter()
            .map(|e| e.ingredient)
            .collect();
        assert_eq!(listed, vec![FormulaId(3), FormulaId(2)]);
        assert_eq!(
            store.parents_of(FormulaId(2)).expect("parents"),
            vec![FormulaId(1)]
        );

        let removed = store
            .delete_ingredient(FormulaId(1), FormulaId(2))
            .expect("delete");
        assert!(removed.is_some());
        assert!(store.parents_of(FormulaId(2)).expect("parents").is_empty());
        assert_eq!(store.ingredient_count().expect("count"), 1);
    }

    #[test]
    fn commit_rejects_cycle_and_duplicate() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("blend.redb")).expect("open db");
        seeded(&mut store, 3);
        let limits = TraversalLimits::default();

        store.insert_ingredient(relation(1, 2, 0), &limits).expect("insert");
        store.insert_ingredient(relation(2, 3, 0), &limits).expect("insert");

        let err = store
            .insert_ingredient(relation(3, 1, 0), &limits)
            .expect_err("cycle");
        assert!(matches!(err, BlendError::CycleDetected { .. }));

        let err = store
            .insert_ingredient(relation(1, 2, 0), &limits)
            .expect_err("duplicate");
        assert!(matches!(err, BlendError::DuplicateIngredient { .. }));
        assert_eq!(store.ingredient_count().expect("count"), 2);
    }

    #[test]
    fn replace_requires_existing_edge() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("blend.redb")).expect("open db");
        seeded(&mut store, 2);

        let err = store
            .replace_ingredient(relation(1, 2, 0))
            .expect_err("missing");
        assert!(matches!(err, BlendError::IngredientNotFound { .. }));

        store
            .insert_ingredient(relation(1, 2, 0), &TraversalLimits::default())
            .expect("insert");
        store.replace_ingredient(relation(1, 2, 7)).expect("replace");
        let edge = store
            .ingredient_edge(FormulaId(1), FormulaId(2))
            .expect("get")
            .expect("present");
        assert_eq!(edge.order, 7);
    }

    #[test]
    fn substance_edges_persist_after_reopen() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("blend.redb");

        {
            let mut store = RedbStore::open(&db_path).expect("open db");
            seeded(&mut store, 2);
            store
                .put_substance(Substance::new(SubstanceId(5), "Iso E Super"))
                .expect("put");
            store
                .insert_ingredient(relation(1, 2, 0), &TraversalLimits::default())
                .expect("insert");
            store
                .insert_substance_edge(SubstanceRelation {
                    formula: FormulaId(2),
                    substance: SubstanceId(5),
                    concentration: Concentration::new(80.0).expect("valid"),
                    unit: "parts".into(),
                    order: 0,
                    commercial: Default::default(),
                })
                .expect("insert");
        }

        {
            let store = RedbStore::open(&db_path).expect("reopen db");
            assert_eq!(store.formula_count().expect("count"), 2);
            assert_eq!(store.ingredient_count().expect("count"), 1);
            let edges = store.substance_edges(FormulaId(2)).expect("edges");
            assert_eq!(edges.len(), 1);
            assert_eq!(edges[0].concentration.value(), 80.0);
            assert_eq!(
                store.parents_of(FormulaId(2)).expect("parents"),
                vec![FormulaId(1)]
            );
        }
    }

    #[test]
    fn snapshot_ignores_later_writes() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("blend.redb")).expect("open db");
        seeded(&mut store, 2);

        let snapshot = store.snapshot().expect("snapshot");
        store
            .insert_ingredient(relation(1, 2, 0), &TraversalLimits::default())
            .expect("insert");

        assert!(snapshot.ingredients(FormulaId(1)).expect("list").is_empty());
        assert_eq!(store.ingredients(FormulaId(1)).expect("list").len(), 1);
    }

    #[test]
    fn compact_keeps_data() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("blend.redb");
        {
            let mut store = RedbStore::open(&db_path).expect("open db");
            seeded(&mut store, 4);
            store.compact().expect("compact");
        }
        let store = RedbStore::open(&db_path).expect("reopen");
        assert_eq!(store.formula_count().expect("count"), 4);
    }
}
