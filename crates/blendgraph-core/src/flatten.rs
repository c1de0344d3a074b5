//! # Flattening Engine
//!
//! Resolves a formula into the total concentration of every raw substance
//! it contains, through any depth of compound nesting.
//!
//! A substance reached by several paths (diamond sharing) gets one row whose
//! total is the sum over paths, with every path kept as a separate source.
//! Rows are sorted by total, highest first; equal totals keep the order in
//! which the depth-first walk first met them.

use crate::primitives::{MAX_DISPLAY_PLACES, TraversalLimits};
use crate::store::CompositionRead;
use crate::{BaseUnit, BlendError, Formula, FormulaId, Substance, SubstanceId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// RESULT TYPES
// =============================================================================

/// One path's contribution to a flattened row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Formula that directly holds the substance edge.
    pub formula_id: FormulaId,
    pub formula_name: String,
    /// Parts per 1000 of the root contributed along this path.
    pub contribution: f64,
}

/// A raw substance and its total concentration in the root formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatRow {
    pub substance: Substance,
    pub total_concentration: f64,
    /// Unit label of the first contributing edge.
    pub unit: String,
    pub sources: Vec<Source>,
}

/// Result of flattening one formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Composition {
    pub root: FormulaId,
    pub root_name: String,
    pub base_unit: BaseUnit,
    pub rows: Vec<FlatRow>,
}

impl Composition {
    /// Sum of all row totals.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.rows.iter().map(|r| r.total_concentration).sum()
    }

    #[must_use]
    pub fn row(&self, substance: SubstanceId) -> Option<&FlatRow> {
        self.rows.iter().find(|r| r.substance.id == substance)
    }

    /// Copy with totals and contributions rounded to `places` decimals,
    /// capped at [`MAX_DISPLAY_PLACES`].
    ///
    /// Presentation only: row order is not recomputed.
    #[must_use]
    pub fn rounded(&self, places: u32) -> Self {
        let scale = 10f64.powi(places.min(MAX_DISPLAY_PLACES) as i32);
        let round = |v: f64| (v * scale).round() / scale;

        let mut out = self.clone();
        for row in &mut out.rows {
            row.total_concentration = round(row.total_concentration);
            for source in &mut row.sources {
                source.contribution = round(source.contribution);
            }
        }
        out
    }
}

/// A raw substance as seen inside one tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeLeaf {
    pub substance_id: SubstanceId,
    pub substance_name: String,
    /// Concentration within the owning formula.
    pub concentration: f64,
    pub unit: String,
    /// Concentration relative to the root.
    pub effective: f64,
}

/// Nested view of a formula and its compounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub formula_id: FormulaId,
    pub formula_name: String,
    /// Concentration within the parent; `None` for the root.
    pub concentration: Option<f64>,
    pub unit: Option<String>,
    /// Fraction of the root this node represents.
    pub multiplier: f64,
    pub substances: Vec<TreeLeaf>,
    pub children: Vec<TreeNode>,
}

// =============================================================================
// WALK STATE
// =============================================================================

/// Path tracking shared by `flatten` and `tree`.
struct Walk<'a, R: ?Sized> {
    store: &'a R,
    limits: &'a TraversalLimits,
    path: Vec<FormulaId>,
    on_path: BTreeSet<FormulaId>,
    visits: usize,
}

impl<'a, R: CompositionRead + ?Sized> Walk<'a, R> {
    fn new(store: &'a R, limits: &'a TraversalLimits) -> Self {
        Self {
            store,
            limits,
            path: Vec::new(),
            on_path: BTreeSet::new(),
            visits: 0,
        }
    }

    /// Push `id` onto the current path and load it.
    fn enter(&mut self, id: FormulaId) -> Result<Formula, BlendError> {
        if self.on_path.contains(&id) {
            let mut path = self.path.clone();
            path.push(id);
            tracing::warn!(formula = id.0, ?path, "cycle found while flattening");
            return Err(BlendError::GraphIntegrity { formula: id, path });
        }
        if self.path.len() >= self.limits.max_depth {
            return Err(BlendError::TraversalLimit {
                bound: "nesting depth",
                limit: self.limits.max_depth,
            });
        }
        self.visits += 1;
        if self.visits > self.limits.max_nodes {
            return Err(BlendError::TraversalLimit {
                bound: "visited formula",
                limit: self.limits.max_nodes,
            });
        }

        let formula = self
            .store
            .formula(id)?
            .ok_or(BlendError::FormulaNotFound(id))?;
        self.on_path.insert(id);
        self.path.push(id);
        Ok(formula)
    }

    fn leave(&mut self, id: FormulaId) {
        self.on_path.remove(&id);
        self.path.pop();
    }

    fn substance(&self, id: SubstanceId) -> Result<Substance, BlendError> {
        self.store
            .substance(id)?
            .ok_or(BlendError::SubstanceNotFound(id))
    }
}

/// Rows in first-encounter order, indexed by substance.
#[derive(Default)]
struct Accumulator {
    index: BTreeMap<SubstanceId, usize>,
    rows: Vec<FlatRow>,
}

impl Accumulator {
    fn add<R: CompositionRead + ?Sized>(
        &mut self,
        walk: &Walk<'_, R>,
        id: SubstanceId,
        unit: &str,
        source: Source,
    ) -> Result<(), BlendError> {
        let slot = match self.index.get(&id) {
            Some(&slot) => slot,
            None => {
                let substance = walk.substance(id)?;
                self.rows.push(FlatRow {
                    substance,
                    total_concentration: 0.0,
                    unit: unit.to_string(),
                    sources: Vec::new(),
                });
                let slot = self.rows.len() - 1;
                self.index.insert(id, slot);
                slot
            }
        };
        let row = &mut self.rows[slot];
        row.total_concentration += source.contribution;
        row.sources.push(source);
        Ok(())
    }

    fn into_sorted_rows(self) -> Vec<FlatRow> {
        let mut rows = self.rows;
        // sort_by is stable: ties keep first-encounter order
        rows.sort_by(|a, b| b.total_concentration.total_cmp(&a.total_concentration));
        rows
    }
}

// =============================================================================
// FLATTENER
// =============================================================================

/// Flattens formulas against a [`CompositionRead`] store.
#[derive(Debug, Clone, Default)]
pub struct Flattener {
    limits: TraversalLimits,
}

impl Flattener {
    #[must_use]
    pub fn new(limits: TraversalLimits) -> Self {
        Self { limits }
    }

    /// Resolve `root` into its raw substances.
    ///
    /// Fails without partial output when a referenced formula or substance
    /// is missing, when the stored graph contains a cycle, or when a
    /// traversal limit is exceeded.
    pub fn flatten<R: CompositionRead + ?Sized>(
        &self,
        store: &R,
        root: FormulaId,
    ) -> Result<Composition, BlendError> {
        let mut walk = Walk::new(store, &self.limits);
        let mut acc = Accumulator::default();

        let formula = walk.enter(root)?;
        Self::visit(&mut walk, &mut acc, &formula, 1.0)?;
        walk.leave(root);

        tracing::debug!(
            root = root.0,
            visits = walk.visits,
            rows = acc.rows.len(),
            "flattened formula"
        );

        Ok(Composition {
            root,
            root_name: formula.name,
            base_unit: formula.base_unit,
            rows: acc.into_sorted_rows(),
        })
    }

    fn visit<R: CompositionRead + ?Sized>(
        walk: &mut Walk<'_, R>,
        acc: &mut Accumulator,
        formula: &Formula,
        multiplier: f64,
    ) -> Result<(), BlendError> {
        for edge in walk.store.substance_edges(formula.id)? {
            let source = Source {
                formula_id: formula.id,
                formula_name: formula.name.clone(),
                contribution: edge.concentration.value() * multiplier,
            };
            acc.add(walk, edge.substance, &edge.unit, source)?;
        }

        for edge in walk.store.ingredients(formula.id)? {
            let child = walk.enter(edge.ingredient)?;
            Self::visit(walk, acc, &child, multiplier * edge.concentration.ratio())?;
            walk.leave(edge.ingredient);
        }
        Ok(())
    }

    /// Nested structure of `root` with cumulative multipliers.
    pub fn tree<R: CompositionRead + ?Sized>(
        &self,
        store: &R,
        root: FormulaId,
    ) -> Result<TreeNode, BlendError> {
        let mut walk = Walk::new(store, &self.limits);
        let formula = walk.enter(root)?;
        let node = Self::build(&mut walk, formula, None, 1.0)?;
        walk.leave(root);
        Ok(node)
    }

    fn build<R: CompositionRead + ?Sized>(
        walk: &mut Walk<'_, R>,
        formula: Formula,
        via: Option<(f64, String)>,
        multiplier: f64,
    ) -> Result<TreeNode, BlendError> {
        let mut substances = Vec::new();
        for edge in walk.store.substance_edges(formula.id)? {
            let substance = walk.substance(edge.substance)?;
            substances.push(TreeLeaf {
                substance_id: substance.id,
                substance_name: substance.name,
                concentration: edge.concentration.value(),
                unit: edge.unit,
                effective: edge.concentration.value() * multiplier,
            });
        }

        let mut children = Vec::new();
        for edge in walk.store.ingredients(formula.id)? {
            let child = walk.enter(edge.ingredient)?;
            let child_multiplier = multiplier * edge.concentration.ratio();
            children.push(Self::build(
                walk,
                child,
                Some((edge.concentration.value(), edge.unit)),
                child_multiplier,
            )?);
            walk.leave(edge.ingredient);
        }

        let (concentration, unit) = match via {
            Some((c, u)) => (Some(c), Some(u)),
            None => (None, None),
        };
        Ok(TreeNode {
            formula_id: formula.id,
            formula_name: formula.name,
            concentration,
            unit,
            multiplier,
            substances,
            children,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
