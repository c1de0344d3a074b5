//! # Composition Store
//!
//! Storage traits for formulas, substances and the two edge types, plus the
//! in-memory implementation.
//!
//! All data structures use `BTreeMap` for deterministic ordering.

use crate::cycle;
use crate::primitives::TraversalLimits;
use crate::{
    BlendError, Formula, FormulaId, IngredientRelation, Substance, SubstanceId, SubstanceRelation,
};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// STORE TRAITS
// =============================================================================

/// Read access to the composition graph.
///
/// Each call returns a consistent answer on its own. Whether consecutive
/// calls observe the same state depends on the implementation; see
/// `RedbStore::snapshot` for a pinned view.
pub trait CompositionRead {
    /// Lookup a formula by id.
    fn formula(&self, id: FormulaId) -> Result<Option<Formula>, BlendError>;

    /// Lookup a substance by id.
    fn substance(&self, id: SubstanceId) -> Result<Option<Substance>, BlendError>;

    /// Compound edges of `parent`, ordered by `(order, ingredient id)`.
    fn ingredients(&self, parent: FormulaId) -> Result<Vec<IngredientRelation>, BlendError>;

    /// Substance edges of `formula`, ordered by `(order, substance id)`.
    fn substance_edges(&self, formula: FormulaId) -> Result<Vec<SubstanceRelation>, BlendError>;

    /// A single compound edge.
    fn ingredient_edge(
        &self,
        parent: FormulaId,
        ingredient: FormulaId,
    ) -> Result<Option<IngredientRelation>, BlendError>;

    /// A single substance edge.
    fn substance_edge(
        &self,
        formula: FormulaId,
        substance: SubstanceId,
    ) -> Result<Option<SubstanceRelation>, BlendError>;

    /// Formulas that directly include `ingredient`, in id order.
    fn parents_of(&self, ingredient: FormulaId) -> Result<Vec<FormulaId>, BlendError>;

    /// All formulas in id order.
    fn formulas(&self) -> Result<Vec<Formula>, BlendError>;

    /// All substances in id order.
    fn substances(&self) -> Result<Vec<Substance>, BlendError>;

    /// Ids of the compounds directly inside `parent`.
    fn ingredient_ids(&self, parent: FormulaId) -> Result<Vec<FormulaId>, BlendError> {
        Ok(self
            .ingredients(parent)?
            .into_iter()
            .map(|edge| edge.ingredient)
            .collect())
    }
}

/// Write access to the composition graph.
///
/// Edge writes are the commit point for the graph invariants: an
/// implementation must refuse `insert_ingredient` when, at the moment of the
/// write, the edge is a self-loop, a duplicate, dangles, or closes a cycle.
/// The mutation engine checks the same conditions first so that the caller
/// sees errors in a fixed order; the store check is what makes the
/// read-then-write sequence safe.
pub trait CompositionStore: CompositionRead {
    /// Insert or replace a formula node.
    fn put_formula(&mut self, formula: Formula) -> Result<(), BlendError>;

    /// Insert or replace a substance node.
    fn put_substance(&mut self, substance: Substance) -> Result<(), BlendError>;

    /// Insert a new compound edge after re-validating every invariant.
    fn insert_ingredient(
        &mut self,
        edge: IngredientRelation,
        limits: &TraversalLimits,
    ) -> Result<(), BlendError>;

    /// Overwrite an existing compound edge. The endpoints may not change.
    fn replace_ingredient(&mut self, edge: IngredientRelation) -> Result<(), BlendError>;

    /// Delete a compound edge, returning it if it existed.
    fn delete_ingredient(
        &mut self,
        parent: FormulaId,
        ingredient: FormulaId,
    ) -> Result<Option<IngredientRelation>, BlendError>;

    /// Insert a new substance edge; fails on duplicates or dangling endpoints.
    fn insert_substance_edge(&mut self, edge: SubstanceRelation) -> Result<(), BlendError>;

    /// Overwrite an existing substance edge.
    fn replace_substance_edge(&mut self, edge: SubstanceRelation) -> Result<(), BlendError>;

    /// Delete a substance edge, returning it if it existed.
    fn delete_substance_edge(
        &mut self,
        formula: FormulaId,
        substance: SubstanceId,
    ) -> Result<Option<SubstanceRelation>, BlendError>;
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// In-memory composition store.
///
/// Uses `BTreeMap` exclusively for deterministic ordering.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    formulas: BTreeMap<FormulaId, Formula>,
    substances: BTreeMap<SubstanceId, Substance>,
    /// parent -> (ingredient -> edge)
    ingredients: BTreeMap<FormulaId, BTreeMap<FormulaId, IngredientRelation>>,
    /// ingredient -> parents
    used_in: BTreeMap<FormulaId, BTreeSet<FormulaId>>,
    /// formula -> (substance -> edge)
    substance_edges: BTreeMap<FormulaId, BTreeMap<SubstanceId, SubstanceRelation>>,
}

impl MemoryStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of formulas.
    #[must_use]
    pub fn formula_count(&self) -> usize {
        self.formulas.len()
    }

    /// Number of compound edges.
    #[must_use]
    pub fn ingredient_count(&self) -> usize {
        self.ingredients.values().map(BTreeMap::len).sum()
    }

    /// Number of substance edges.
    #[must_use]
    pub fn substance_edge_count(&self) -> usize {
        self.substance_edges.values().map(BTreeMap::len).sum()
    }

    /// Iterate compound edges in `(parent, ingredient)` order.
    pub fn ingredient_edges(&self) -> impl Iterator<Item = &IngredientRelation> + '_ {
        self.ingredients.values().flat_map(BTreeMap::values)
    }

    fn sorted_ingredients(&self, parent: FormulaId) -> Vec<IngredientRelation> {
        let mut edges: Vec<_> = self
            .ingredients
            .get(&parent)
            .into_iter()
            .flat_map(|targets| targets.values().cloned())
            .collect();
        edges.sort_by_key(IngredientRelation::sort_key);
        edges
    }

    fn children_internal(&self, parent: FormulaId) -> Vec<FormulaId> {
        self.ingredients
            .get(&parent)
            .map(|targets| targets.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Write a compound edge without any checks. Only used to build corrupted
    /// graphs in tests.
    #[cfg(test)]
    pub(crate) fn insert_ingredient_unchecked(&mut self, edge: IngredientRelation) {
        self.used_in
            .entry(edge.ingredient)
            .or_default()
            .insert(edge.parent);
        self.ingredients
            .entry(edge.parent)
            .or_default()
            .insert(edge.ingredient, edge);
    }
}

impl CompositionRead for MemoryStore {
    fn formula(&self, id: FormulaId) -> Result<Option<Formula>, BlendError> {
        Ok(self.formulas.get(&id).cloned())
    }

    fn substance(&self, id: SubstanceId) -> Result<Option<Substance>, BlendError> {
        Ok(self.substances.get(&id).cloned())
    }

    fn ingredients(&self, parent: FormulaId) -> Result<Vec<IngredientRelation>, BlendError> {
        Ok(self.sorted_ingredients(parent))
    }

    fn substance_edges(&self, formula: FormulaId) -> Result<Vec<SubstanceRelation>, BlendError> {
        let mut edges: Vec<_> = self
            .substance_edges
            .get(&formula)
            .into_iter()
            .flat_map(|targets| targets.values().cloned())
            .collect();
        edges.sort_by_key(SubstanceRelation::sort_key);
        Ok(edges)
    }

    fn ingredient_edge(
        &self,
        parent: FormulaId,
        ingredient: FormulaId,
    ) -> Result<Option<IngredientRelation>, BlendError> {
        Ok(self
            .ingredients
            .get(&parent)
            .and_then(|targets| targets.get(&ingredient).cloned()))
    }

    fn substance_edge(
        &self,
        formula: FormulaId,
        substance: SubstanceId,
    ) -> Result<Option<SubstanceRelation>, BlendError> {
        Ok(self
            .substance_edges
            .get(&formula)
            .and_then(|targets| targets.get(&substance).cloned()))
    }

    fn parents_of(&self, ingredient: FormulaId) -> Result<Vec<FormulaId>, BlendError> {
        Ok(self
            .used_in
            .get(&ingredient)
            .map(|parents| parents.iter().copied().collect())
            .unwrap_or_default())
    }

    fn formulas(&self) -> Result<Vec<Formula>, BlendError> {
        Ok(self.formulas.values().cloned().collect())
    }

    fn substances(&self) -> Result<Vec<Substance>, BlendError> {
        Ok(self.substances.values().cloned().collect())
    }

    fn ingredient_ids(&self, parent: FormulaId) -> Result<Vec<FormulaId>, BlendError> {
        Ok(self.children_internal(parent))
    }
}

impl CompositionStore for MemoryStore {
    fn put_formula(&mut self, formula: Formula) -> Result<(), BlendError> {
        self.formulas.insert(formula.id, formula);
        Ok(())
    }

    fn put_substance(&mut self, substance: Substance) -> Result<(), BlendError> {
        self.substances.insert(substance.id, substance);
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
        for id in [parent, ingredient] {
            if !self.formulas.contains_key(&id) {
                return Err(BlendError::FormulaNotFound(id));
            }
        }
        if self
            .ingredients
            .get(&parent)
            .is_some_and(|targets| targets.contains_key(&ingredient))
        {
            return Err(BlendError::DuplicateIngredient { parent, ingredient });
        }
        if cycle::reaches(ingredient, parent, limits, |id| {
            Ok(self.children_internal(id))
        })? {
            return Err(BlendError::CycleDetected { parent, ingredient });
        }

        self.used_in.entry(ingredient).or_default().insert(parent);
        self.ingredients
            .entry(parent)
            .or_default()
            .insert(ingredient, edge);
        Ok(())
    }

    fn replace_ingredient(&mut self, edge: IngredientRelation) -> Result<(), BlendError> {
        let slot = self
            .ingredients
            .get_mut(&edge.parent)
            .and_then(|targets| targets.get_mut(&edge.ingredient))
            .ok_or(BlendError::IngredientNotFound {
                parent: edge.parent,
                ingredient: edge.ingredient,
            })?;
        *slot = edge;
        Ok(())
    }

    fn delete_ingredient(
        &mut self,
        parent: FormulaId,
        ingredient: FormulaId,
    ) -> Result<Option<IngredientRelation>, BlendError> {
        let removed = self
            .ingredients
            .get_mut(&parent)
            .and_then(|targets| targets.remove(&ingredient));
        if removed.is_some() {
            if self.ingredients.get(&parent).is_some_and(BTreeMap::is_empty) {
                self.ingredients.remove(&parent);
            }
            if let Some(parents) = self.used_in.get_mut(&ingredient) {
                parents.remove(&parent);
                if parents.is_empty() {
                    self.used_in.remove(&ingredient);
                }
            }
        }
        Ok(removed)
    }

    fn insert_substance_edge(&mut self, edge: SubstanceRelation) -> Result<(), BlendError> {
        if !self.formulas.contains_key(&edge.formula) {
            return Err(BlendError::FormulaNotFound(edge.formula));
        }
        if !self.substances.contains_key(&edge.substance) {
            return Err(BlendError::SubstanceNotFound(edge.substance));
        }
        let targets = self.substance_edges.entry(edge.formula).or_default();
        if targets.contains_key(&edge.substance) {
            return Err(BlendError::DuplicateSubstance {
                formula: edge.formula,
                substance: edge.substance,
            });
        }
        targets.insert(edge.substance, edge);
        Ok(())
    }

    fn replace_substance_edge(&mut self, edge: SubstanceRelation) -> Result<(), BlendError> {
        let slot = self
            .substance_edges
            .get_mut(&edge.formula)
            .and_then(|targets| targets.get_mut(&edge.substance))
            .ok_or(BlendError::SubstanceEdgeNotFound {
                formula: edge.formula,
                substance: edge.substance,
            })?;
        *slot = edge;
        Ok(())
    }

    fn delete_substance_edge(
        &mut self,
        formula: FormulaId,
        substance: SubstanceId,
    ) -> Result<Option<SubstanceRelation>, BlendError> {
        let removed = self
            .substance_edges
            .get_mut(&formula)
            .and_then(|targets| targets.remove(&substance));
        if self
            .substance_edges
            .get(&formula)
            .is_some_and(BTreeMap::is_empty)
        {
            self.substance_edges.remove(&formula);
        }
        Ok(removed)
    }
}

// =============================================================================
// TESTS
// =============================================================================
