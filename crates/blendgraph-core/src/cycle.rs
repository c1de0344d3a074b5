//! # Cycle Guard
//!
//! Decides whether a proposed `parent -> ingredient` edge would close a
//! directed cycle in the ingredient graph.
//!
//! The graph is acyclic before the insert, so any new cycle must run through
//! the new edge. It is enough to ask whether `parent` is already reachable
//! from `ingredient`.
//!
//! Reachability is computed breadth-first over a visited set and is not
//! depth-limited. `TraversalLimits::max_nodes` bounds the work; hitting it
//! is an error, never a "no cycle" answer.

use crate::primitives::TraversalLimits;
use crate::store::CompositionRead;
use crate::{BlendError, FormulaId};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Breadth-first reachability from `from` to `target`.
///
/// `children` lists the direct ingredients of a formula. Taking a closure
/// lets storage backends run the same search inside their own write
/// transaction.
pub fn reaches<F>(
    from: FormulaId,
    target: FormulaId,
    limits: &TraversalLimits,
    mut children: F,
) -> Result<bool, BlendError>
where
    F: FnMut(FormulaId) -> Result<Vec<FormulaId>, BlendError>,
{
    if from == target {
        return Ok(true);
    }

    let mut visited = BTreeSet::new();
    let mut queue = VecDeque::new();
    visited.insert(from);
    queue.push_back(from);

    while let Some(current) = queue.pop_front() {
        for child in children(current)? {
            if child == target {
                return Ok(true);
            }
            if visited.insert(child) {
                if visited.len() > limits.max_nodes {
                    return Err(BlendError::TraversalLimit {
                        bound: "visited formula",
                        limit: limits.max_nodes,
                    });
                }
                queue.push_back(child);
            }
        }
    }

    Ok(false)
}

/// Cycle checks over a [`CompositionRead`] store.
pub struct CycleGuard;

impl CycleGuard {
    /// Would inserting `parent -> candidate` create a cycle?
    ///
    /// Self-reference counts as a cycle. Storage failures are returned as
    /// errors, distinct from a `true` answer.
    pub fn would_create_cycle<R: CompositionRead + ?Sized>(
        store: &R,
        parent: FormulaId,
        candidate: FormulaId,
        limits: &TraversalLimits,
    ) -> Result<bool, BlendError> {
        if parent == candidate {
            return Ok(true);
        }
        let found = reaches(candidate, parent, limits, |id| store.ingredient_ids(id))?;
        tracing::debug!(
            parent = parent.0,
            candidate = candidate.0,
            cycle = found,
            "cycle check"
        );
        Ok(found)
    }

    /// Scan the whole ingredient graph for a directed cycle.
    ///
    /// Returns the first cycle found as a closed path (first and last id are
    /// equal), or `None` when the graph is acyclic. Used to audit stores that
    /// may have been edited outside the mutation engine.
    pub fn find_cycle<R: CompositionRead + ?Sized>(
        store: &R,
    ) -> Result<Option<Vec<FormulaId>>, BlendError> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            OnPath,
            Done,
        }

        let mut marks: BTreeMap<FormulaId, Mark> = BTreeMap::new();

        for root in store.formulas()? {
            if marks.contains_key(&root.id) {
                continue;
            }

            // Iterative DFS: (node, children, next child index)
            let mut path: Vec<FormulaId> = vec![root.id];
            let mut stack: Vec<(FormulaId, Vec<FormulaId>, usize)> =
                vec![(root.id, store.ingredient_ids(root.id)?, 0)];
            marks.insert(root.id, Mark::OnPath);

            while let Some(frame) = stack.last_mut() {
                let (node, children, next) = frame;
                let node = *node;

                let Some(&child) = children.get(*next) else {
                    marks.insert(node, Mark::Done);
                    stack.pop();
                    path.pop();
                    continue;
                };
                *next += 1;

                match marks.get(&child) {
                    Some(Mark::OnPath) => {
                        let start = path.iter().position(|&id| id == child).unwrap_or(0);
                        let mut cycle = path[start..].to_vec();
                        cycle.push(child);
                        return Ok(Some(cycle));
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(child, Mark::OnPath);
                        path.push(child);
                        stack.push((child, store.ingredient_ids(child)?, 0));
                    }
                }
            }
        }

        Ok(None)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CompositionStore, MemoryStore};
    use crate::{Concentration, Formula, IngredientRelation, UserId};

    fn chain(store: &mut MemoryStore, pairs: &[(u64, u64)]) {
        let limits = TraversalLimits::default();
        for &(p, c) in pairs {
            store
                .insert_ingredient(relation(p, c), &limits)
                .expect("insert");
        }
    }

    fn relation(parent: u64, ingredient: u64) -> IngredientRelation {
        IngredientRelation {
            parent: FormulaId(parent),
            ingredient: FormulaId(ingredient),
            concentration: Concentration::new(100.0).expect("valid"),
            unit: "parts".into(),
            order: 0,
        }
    }

    fn store_with(n: u64) -> MemoryStore {
        let mut store = MemoryStore::new();
        for id in 1..=n {
            store
                .put_formula(Formula::new(FormulaId(id), format!("F{id}"), UserId(1)))
                .expect("put");
        }
        store
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let store = store_with(1);
        let limits = TraversalLimits::default();
        assert!(
            CycleGuard::would_create_cycle(&store, FormulaId(1), FormulaId(1), &limits)
                .expect("check")
        );
    }

    #[test]
    fn closing_a_chain_is_detected() {
        // A -> B -> C
        let mut store = store_with(4);
        chain(&mut store, &[(1, 2), (2, 3)]);
        let limits = TraversalLimits::default();

        assert!(
            CycleGuard::would_create_cycle(&store, FormulaId(3), FormulaId(1), &limits)
                .expect("check")
        );
        assert!(
            !CycleGuard::would_create_cycle(&store, FormulaId(1), FormulaId(4), &limits)
                .expect("check")
        );
        // Adding a shortcut A -> C is fine.
        assert!(
            !CycleGuard::would_create_cycle(&store, FormulaId(1), FormulaId(3), &limits)
                .expect("check")
        );
    }

    #[test]
    fn deep_chain_beyond_any_depth_cap_is_still_detected() {
        let n = 600;
        let mut store = store_with(n);
        let pairs: Vec<_> = (1..n).map(|i| (i, i + 1)).collect();
        chain(&mut store, &pairs);

        let limits = TraversalLimits::default();
        assert!(
            CycleGuard::would_create_cycle(&store, FormulaId(n), FormulaId(1), &limits)
                .expect("check")
        );
    }

    #[test]
    fn node_ceiling_is_an_error_not_a_false_negative() {
        let mut store = store_with(10);
        let pairs: Vec<_> = (1..10).map(|i| (i, i + 1)).collect();
        chain(&mut store, &pairs);

        let limits = TraversalLimits::new(3, 256);
        let result = CycleGuard::would_create_cycle(&store, FormulaId(10), FormulaId(1), &limits);
        assert!(matches!(result, Err(BlendError::TraversalLimit { .. })));
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        // 1 -> 2, 1 -> 3, 2 -> 4, 3 -> 4
        let mut store = store_with(4);
        chain(&mut store, &[(1, 2), (1, 3), (2, 4), (3, 4)]);
        assert_eq!(CycleGuard::find_cycle(&store).expect("scan"), None);
    }

    #[test]
    fn find_cycle_reports_closed_path() {
        let mut store = store_with(3);
        chain(&mut store, &[(1, 2), (2, 3)]);
        store.insert_ingredient_unchecked(relation(3, 1));

        let cycle = CycleGuard::find_cycle(&store)
            .expect("scan")
            .expect("cycle present");
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
    }
}
