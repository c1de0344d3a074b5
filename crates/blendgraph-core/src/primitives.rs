//! # Primitives
//!
//! Hardcoded constants and resource ceilings for the composition graph.
//!
//! ## Concentration Semantics
//!
//! Every edge weight is expressed in parts per [`PARTS_PER_WHOLE`] of the
//! immediate parent. Nesting a compound multiplies by `weight / 1000`.

use serde::{Deserialize, Serialize};

/// Parts that make up one whole formula.
pub const PARTS_PER_WHOLE: f64 = 1000.0;

/// Unit label stored on an edge when the caller supplies none.
pub const DEFAULT_UNIT_LABEL: &str = "parts";

/// Default ceiling on formulas visited by one traversal.
///
/// - Counts every visit, so a diamond reached through two paths counts twice
///   during flattening.
/// - Exceeding it is reported as an error, never as "no cycle".
pub const MAX_VISITED_NODES: usize = 100_000;

/// Default ceiling on nesting depth for recursive traversals (flatten, tree).
///
/// The cycle guard is iterative and does not use this bound.
pub const MAX_NESTING_DEPTH: usize = 256;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length for unit labels accepted at the API boundary.
pub const MAX_UNIT_LENGTH: usize = 32;

/// Most decimal places a rounded composition keeps. An `f64` holds no more
/// than about 15 significant decimal digits.
pub const MAX_DISPLAY_PLACES: u32 = 15;

/// Resource ceilings applied to graph traversals.
///
/// These bound work per request. They are independent of correctness: the
/// cycle guard terminates on its visited set alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraversalLimits {
    /// Maximum number of formula visits.
    pub max_nodes: usize,
    /// Maximum recursion depth for flatten and tree views.
    pub max_depth: usize,
}

impl Default for TraversalLimits {
    fn default() -> Self {
        Self {
            max_nodes: MAX_VISITED_NODES,
            max_depth: MAX_NESTING_DEPTH,
        }
    }
}

impl TraversalLimits {
    #[must_use]
    pub const fn new(max_nodes: usize, max_depth: usize) -> Self {
        Self {
            max_nodes,
            max_depth,
        }
    }
}
