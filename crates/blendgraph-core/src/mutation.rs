//! # Mutation Engine
//!
//! The only way edges enter, change or leave the composition graph.
//!
//! Every operation:
//! - checks its preconditions in a fixed order and stops at the first failure
//! - commits through the store, which re-validates the graph invariants
//! - emits a [`GraphEvent`] after the commit; sink failures are only logged

use crate::access::{AccessPolicy, require};
use crate::cycle::CycleGuard;
use crate::events::{EventSink, GraphEvent};
use crate::primitives::TraversalLimits;
use crate::store::{CompositionRead, CompositionStore};
use crate::types::unit_or_default;
use crate::{
    BlendError, Capability, CommercialInfo, Concentration, Formula, FormulaId, IngredientPatch,
    IngredientRelation, NewIngredient, NewSubstanceEdge, Substance, SubstanceId, SubstancePatch,
    SubstanceRelation, UserId,
};

/// Applies edge mutations on behalf of a user.
#[derive(Debug, Clone)]
pub struct MutationEngine<P, E> {
    policy: P,
    events: E,
    limits: TraversalLimits,
}

impl<P: AccessPolicy, E: EventSink> MutationEngine<P, E> {
    /// Create an engine with default traversal limits.
    pub fn new(policy: P, events: E) -> Self {
        Self {
            policy,
            events,
            limits: TraversalLimits::default(),
        }
    }

    #[must_use]
    pub fn with_limits(mut self, limits: TraversalLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn limits(&self) -> &TraversalLimits {
        &self.limits
    }

    /// Dry run of the cycle check in [`Self::add_compound_ingredient`]: both
    /// formulas must exist, `user` must be able to edit `parent` and read
    /// `candidate`.
    pub fn check_cycle<R: CompositionRead + ?Sized>(
        &self,
        store: &R,
        user: UserId,
        parent: FormulaId,
        candidate: FormulaId,
    ) -> Result<bool, BlendError> {
        self.require_formula(store, user, parent, Capability::Edit)?;
        self.require_formula(store, user, candidate, Capability::Read)?;
        self.would_create_cycle(store, parent, candidate)
    }

    /// Would `parent -> candidate` create a cycle? Pure read, no access check.
    pub fn would_create_cycle<R: CompositionRead + ?Sized>(
        &self,
        store: &R,
        parent: FormulaId,
        candidate: FormulaId,
    ) -> Result<bool, BlendError> {
        CycleGuard::would_create_cycle(store, parent, candidate, &self.limits)
    }

    // =========================================================================
    // COMPOUND INGREDIENTS
    // =========================================================================

    /// Nest `request.ingredient` inside `request.parent`.
    ///
    /// Order of checks:
    /// 1. self-reference
    /// 2. parent exists, caller may edit it
    /// 3. ingredient exists, caller may read it
    /// 4. concentration
    /// 5. no cycle
    /// 6. no existing edge
    pub fn add_compound_ingredient<S: CompositionStore + ?Sized>(
        &self,
        store: &mut S,
        user: UserId,
        request: NewIngredient,
    ) -> Result<IngredientRelation, BlendError> {
        let NewIngredient {
            parent,
            ingredient,
            concentration,
            unit,
            order,
        } = request;

        if parent == ingredient {
            return Err(BlendError::SelfReference(parent));
        }
        self.require_formula(store, user, parent, Capability::Edit)?;
        self.require_formula(store, user, ingredient, Capability::Read)?;
        let concentration = Concentration::new(concentration)?;

        if CycleGuard::would_create_cycle(store, parent, ingredient, &self.limits)? {
            tracing::info!(
                parent = parent.0,
                ingredient = ingredient.0,
                "rejected ingredient: cycle"
            );
            return Err(BlendError::CycleDetected { parent, ingredient });
        }
        if store.ingredient_edge(parent, ingredient)?.is_some() {
            return Err(BlendError::DuplicateIngredient { parent, ingredient });
        }

        let order = match order {
            Some(order) => order,
            None => next_order(store.ingredients(parent)?.iter().map(|e| e.order)),
        };
        let edge = IngredientRelation {
            parent,
            ingredient,
            concentration,
            unit: unit_or_default(unit),
            order,
        };
        store.insert_ingredient(edge.clone(), &self.limits)?;

        tracing::info!(
            user = user.0,
            parent = parent.0,
            ingredient = ingredient.0,
            concentration = concentration.value(),
            "ingredient added"
        );
        self.notify(&GraphEvent::IngredientAdded {
            user,
            parent,
            ingredient,
            concentration: concentration.value(),
        });
        Ok(edge)
    }

    /// Change concentration, unit or order of an existing compound edge.
    ///
    /// Fields absent from the patch keep their stored values. The endpoints
    /// do not change, so no cycle check is needed.
    pub fn update_compound_ingredient<S: CompositionStore + ?Sized>(
        &self,
        store: &mut S,
        user: UserId,
        parent: FormulaId,
        ingredient: FormulaId,
        patch: IngredientPatch,
    ) -> Result<IngredientRelation, BlendError> {
        self.require_formula(store, user, parent, Capability::Edit)?;
        let concentration = patch.concentration.map(Concentration::new).transpose()?;

        let mut edge = store
            .ingredient_edge(parent, ingredient)?
            .ok_or(BlendError::IngredientNotFound { parent, ingredient })?;

        if let Some(concentration) = concentration {
            edge.concentration = concentration;
        }
        if let Some(unit) = patch.unit {
            edge.unit = unit_or_default(Some(unit));
        }
        if let Some(order) = patch.order {
            edge.order = order;
        }
        store.replace_ingredient(edge.clone())?;

        tracing::info!(
            user = user.0,
            parent = parent.0,
            ingredient = ingredient.0,
            "ingredient updated"
        );
        self.notify(&GraphEvent::IngredientUpdated {
            user,
            parent,
            ingredient,
        });
        Ok(edge)
    }

    /// Remove a compound edge. The ingredient formula itself is untouched.
    pub fn remove_compound_ingredient<S: CompositionStore + ?Sized>(
        &self,
        store: &mut S,
        user: UserId,
        parent: FormulaId,
        ingredient: FormulaId,
    ) -> Result<IngredientRelation, BlendError> {
        self.require_formula(store, user, parent, Capability::Edit)?;

        let removed = store
            .delete_ingredient(parent, ingredient)?
            .ok_or(BlendError::IngredientNotFound { parent, ingredient })?;

        tracing::info!(
            user = user.0,
            parent = parent.0,
            ingredient = ingredient.0,
            "ingredient removed"
        );
        self.notify(&GraphEvent::IngredientRemoved {
            user,
            parent,
            ingredient,
        });
        Ok(removed)
    }

    // =========================================================================
    // SUBSTANCES
    // =========================================================================

    /// Add a raw substance to a formula. Substances are leaves; no cycle check.
    pub fn add_substance<S: CompositionStore + ?Sized>(
        &self,
        store: &mut S,
        user: UserId,
        request: NewSubstanceEdge,
    ) -> Result<SubstanceRelation, BlendError> {
        let NewSubstanceEdge {
            formula,
            substance,
            concentration,
            unit,
            order,
            commercial,
        } = request;

        self.require_formula(store, user, formula, Capability::Edit)?;
        let concentration = Concentration::new(concentration)?;
        require_substance(store, substance)?;

        if store.substance_edge(formula, substance)?.is_some() {
            return Err(BlendError::DuplicateSubstance { formula, substance });
        }

        let order = match order {
            Some(order) => order,
            None => next_order(store.substance_edges(formula)?.iter().map(|e| e.order)),
        };
        let edge = SubstanceRelation {
            formula,
            substance,
            concentration,
            unit: unit_or_default(unit),
            order,
            commercial,
        };
        store.insert_substance_edge(edge.clone())?;

        tracing::info!(
            user = user.0,
            formula = formula.0,
            substance = substance.0,
            concentration = concentration.value(),
            "substance added"
        );
        self.notify(&GraphEvent::SubstanceAdded {
            user,
            formula,
            substance,
            concentration: concentration.value(),
        });
        Ok(edge)
    }

    /// Partially update a substance edge, including its commercial metadata.
    pub fn update_substance<S: CompositionStore + ?Sized>(
        &self,
        store: &mut S,
        user: UserId,
        formula: FormulaId,
        substance: SubstanceId,
        patch: SubstancePatch,
    ) -> Result<SubstanceRelation, BlendError> {
        self.require_formula(store, user, formula, Capability::Edit)?;
        let concentration = patch.concentration.map(Concentration::new).transpose()?;

        let mut edge = store
            .substance_edge(formula, substance)?
            .ok_or(BlendError::SubstanceEdgeNotFound { formula, substance })?;

        if let Some(concentration) = concentration {
            edge.concentration = concentration;
        }
        if let Some(unit) = patch.unit {
            edge.unit = unit_or_default(Some(unit));
        }
        if let Some(order) = patch.order {
            edge.order = order;
        }
        merge_commercial(&mut edge.commercial, patch.supplier, patch.dilution, patch.price);
        store.replace_substance_edge(edge.clone())?;

        tracing::info!(
            user = user.0,
            formula = formula.0,
            substance = substance.0,
            "substance updated"
        );
        self.notify(&GraphEvent::SubstanceUpdated {
            user,
            formula,
            substance,
        });
        Ok(edge)
    }

    /// Remove a substance edge.
    pub fn remove_substance<S: CompositionStore + ?Sized>(
        &self,
        store: &mut S,
        user: UserId,
        formula: FormulaId,
        substance: SubstanceId,
    ) -> Result<SubstanceRelation, BlendError> {
        self.require_formula(store, user, formula, Capability::Edit)?;

        let removed = store
            .delete_substance_edge(formula, substance)?
            .ok_or(BlendError::SubstanceEdgeNotFound { formula, substance })?;

        tracing::info!(
            user = user.0,
            formula = formula.0,
            substance = substance.0,
            "substance removed"
        );
        self.notify(&GraphEvent::SubstanceRemoved {
            user,
            formula,
            substance,
        });
        Ok(removed)
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    /// Existence first, then capability.
    pub(crate) fn require_formula<R: CompositionRead + ?Sized>(
        &self,
        store: &R,
        user: UserId,
        id: FormulaId,
        capability: Capability,
    ) -> Result<Formula, BlendError> {
        let formula = store.formula(id)?.ok_or(BlendError::FormulaNotFound(id))?;
        require(&self.policy, user, id, capability)?;
        Ok(formula)
    }

    fn notify(&self, event: &GraphEvent) {
        if let Err(e) = self.events.emit(event) {
            tracing::warn!(event = event.name(), error = %e, "event delivery failed");
        }
    }
}

fn require_substance<R: CompositionRead + ?Sized>(
    store: &R,
    id: SubstanceId,
) -> Result<Substance, BlendError> {
    store.substance(id)?.ok_or(BlendError::SubstanceNotFound(id))
}

/// Append after the current last position.
fn next_order(existing: impl Iterator<Item = u32>) -> u32 {
    existing.max().map_or(0, |max| max.saturating_add(1))
}

fn merge_commercial(
    commercial: &mut CommercialInfo,
    supplier: Option<String>,
    dilution: Option<String>,
    price: Option<String>,
) {
    if supplier.is_some() {
        commercial.supplier = supplier;
    }
    if dilution.is_some() {
        commercial.dilution = dilution;
    }
    if price.is_some() {
        commercial.price = price;
    }
}

// =============================================================================
// TESTS
// =============================================================================
