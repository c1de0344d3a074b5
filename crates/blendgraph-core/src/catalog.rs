//! # Catalog
//!
//! A serializable dump of a composition store: every formula, substance and
//! edge. Used for seeding a store from a file and for exporting one.
//!
//! Import goes through the store's validated edge inserts, so a catalog that
//! contains a cycle, a duplicate or a dangling edge is rejected at the first
//! offending edge.

use crate::primitives::TraversalLimits;
use crate::store::{CompositionRead, CompositionStore};
use crate::{BlendError, Formula, IngredientRelation, Substance, SubstanceRelation};
use serde::{Deserialize, Serialize};

/// Full contents of a composition store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub formulas: Vec<Formula>,
    #[serde(default)]
    pub substances: Vec<Substance>,
    #[serde(default)]
    pub ingredients: Vec<IngredientRelation>,
    #[serde(default)]
    pub substance_edges: Vec<SubstanceRelation>,
}

/// Number of records written by [`Catalog::apply`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub formulas: usize,
    pub substances: usize,
    pub ingredients: usize,
    pub substance_edges: usize,
}

impl Catalog {
    /// Read everything from `store`, in id order.
    pub fn capture<R: CompositionRead + ?Sized>(store: &R) -> Result<Self, BlendError> {
        let formulas = store.formulas()?;
        let substances = store.substances()?;

        let mut ingredients = Vec::new();
        let mut substance_edges = Vec::new();
        for formula in &formulas {
            ingredients.extend(store.ingredients(formula.id)?);
            substance_edges.extend(store.substance_edges(formula.id)?);
        }

        Ok(Self {
            formulas,
            substances,
            ingredients,
            substance_edges,
        })
    }

    /// Write the catalog into `store`.
    ///
    /// Nodes are upserted. Edges are inserted with full validation; the
    /// first rejected edge aborts the import and is returned as the error.
    /// Edges written before it stay written.
    pub fn apply<S: CompositionStore + ?Sized>(
        self,
        store: &mut S,
        limits: &TraversalLimits,
    ) -> Result<ImportSummary, BlendError> {
        let summary = ImportSummary {
            formulas: self.formulas.len(),
            substances: self.substances.len(),
            ingredients: self.ingredients.len(),
            substance_edges: self.substance_edges.len(),
        };

        for formula in self.formulas {
            store.put_formula(formula)?;
        }
        for substance in self.substances {
            store.put_substance(substance)?;
        }
        for edge in self.ingredients {
            store.insert_ingredient(edge, limits)?;
        }
        for edge in self.substance_edges {
            store.insert_substance_edge(edge)?;
        }

        tracing::info!(
            formulas = summary.formulas,
            substances = summary.substances,
            ingredients = summary.ingredients,
            substance_edges = summary.substance_edges,
            "catalog imported"
        );
        Ok(summary)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.formulas.is_empty() && self.substances.is_empty()
    }
}
