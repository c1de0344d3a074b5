//! # Core Type Definitions
//!
//! This module contains all core types for the composition graph:
//! - Identifiers (`FormulaId`, `SubstanceId`, `UserId`)
//! - Nodes (`Formula`, `Substance`)
//! - Edges (`IngredientRelation`, `SubstanceRelation`)
//! - Mutation requests and partial updates
//! - Error types (`BlendError`, `ErrorKind`)
//!
//! ## Ordering Guarantees
//!
//! Identifiers implement `Ord` so every collection in the crate can be a
//! `BTreeMap`/`BTreeSet`. Edges are listed by `(order, child id)`.

use crate::primitives::{DEFAULT_UNIT_LABEL, PARTS_PER_WHOLE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Identifier of a formula (a graph node that may contain other formulas).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormulaId(pub u64);

/// Identifier of a raw substance (always a leaf).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubstanceId(pub u64);

/// Identifier of the acting user, handed to the access policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for FormulaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for SubstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// FORMULA
// =============================================================================

/// Lifecycle status of a formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FormulaStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

/// What "1000 parts" of a formula means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BaseUnit {
    /// Parts by mass (g per kg).
    #[default]
    Mass,
    /// Parts by volume (ml per l).
    Volume,
}

impl BaseUnit {
    /// Label used when presenting parts-per-1000 of this base.
    #[must_use]
    pub const fn per_mille_label(self) -> &'static str {
        match self {
            Self::Mass => "g/kg",
            Self::Volume => "ml/l",
        }
    }
}

/// A named composition: a finished product or a reusable compound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formula {
    pub id: FormulaId,
    pub name: String,
    #[serde(default)]
    pub status: FormulaStatus,
    /// Monotonically increasing revision counter.
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub base_unit: BaseUnit,
    pub owner: UserId,
}

impl Formula {
    /// Create a draft formula at version 1 with a mass base.
    #[must_use]
    pub fn new(id: FormulaId, name: impl Into<String>, owner: UserId) -> Self {
        Self {
            id,
            name: name.into(),
            status: FormulaStatus::Draft,
            version: 1,
            base_unit: BaseUnit::Mass,
            owner,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: FormulaStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_base_unit(mut self, base_unit: BaseUnit) -> Self {
        self.base_unit = base_unit;
        self
    }
}

// =============================================================================
// SUBSTANCE
// =============================================================================

/// A raw chemical reference entity.
///
/// The attribute bag (sensory descriptors, physical properties, identifiers)
/// is opaque to the graph and carried through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substance {
    pub id: SubstanceId,
    pub name: String,
    #[serde(default)]
    pub cas: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Substance {
    #[must_use]
    pub fn new(id: SubstanceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            cas: None,
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_cas(mut self, cas: impl Into<String>) -> Self {
        self.cas = Some(cas.into());
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// CONCENTRATION
// =============================================================================

/// Inclusion ratio of a child within its immediate parent, in parts per 1000.
///
/// Always finite and non-negative. Construction is the only validation point;
/// deserialization goes through the same check.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Concentration(f64);

impl Concentration {
    /// Validate a raw parts-per-1000 value.
    pub fn new(parts: f64) -> Result<Self, BlendError> {
        if !parts.is_finite() || parts < 0.0 {
            return Err(BlendError::InvalidConcentration(parts.to_string()));
        }
        Ok(Self(parts))
    }

    /// Parse a user-supplied value such as `"12.5"`.
    pub fn parse(text: &str) -> Result<Self, BlendError> {
        let parts = text
            .trim()
            .parse::<f64>()
            .map_err(|_| BlendError::InvalidConcentration(text.to_string()))?;
        Self::new(parts)
    }

    /// Raw parts per 1000.
    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }

    /// Fraction of the parent (`value / 1000`).
    #[must_use]
    pub fn ratio(self) -> f64 {
        self.0 / PARTS_PER_WHOLE
    }
}

impl TryFrom<f64> for Concentration {
    type Error = BlendError;

    fn try_from(parts: f64) -> Result<Self, Self::Error> {
        Self::new(parts)
    }
}

impl From<Concentration> for f64 {
    fn from(c: Concentration) -> Self {
        c.0
    }
}

impl FromStr for Concentration {
    type Err = BlendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// =============================================================================
// EDGES
// =============================================================================

/// "Parent formula includes this much of this compound."
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngredientRelation {
    pub parent: FormulaId,
    pub ingredient: FormulaId,
    pub concentration: Concentration,
    pub unit: String,
    /// Display position within the parent.
    #[serde(default)]
    pub order: u32,
}

impl IngredientRelation {
    /// Listing key within the parent.
    #[must_use]
    pub fn sort_key(&self) -> (u32, FormulaId) {
        (self.order, self.ingredient)
    }
}

/// Supplier-side data attached to a substance edge. Never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommercialInfo {
    #[serde(default)]
    pub supplier: Option<String>,
    #[serde(default)]
    pub dilution: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
}

/// "This formula includes this much of this raw substance."
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubstanceRelation {
    pub formula: FormulaId,
    pub substance: SubstanceId,
    pub concentration: Concentration,
    pub unit: String,
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub commercial: CommercialInfo,
}

impl SubstanceRelation {
    #[must_use]
    pub fn sort_key(&self) -> (u32, SubstanceId) {
        (self.order, self.substance)
    }
}

// =============================================================================
// MUTATION REQUESTS
// =============================================================================

/// Request to nest `ingredient` inside `parent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewIngredient {
    pub parent: FormulaId,
    pub ingredient: FormulaId,
    /// Raw parts per 1000; validated by the mutation engine.
    pub concentration: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub order: Option<u32>,
}

impl NewIngredient {
    #[must_use]
    pub fn new(parent: FormulaId, ingredient: FormulaId, concentration: f64) -> Self {
        Self {
            parent,
            ingredient,
            concentration,
            unit: None,
            order: None,
        }
    }

    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    #[must_use]
    pub fn with_order(mut self, order: u32) -> Self {
        self.order = Some(order);
        self
    }
}

/// Request to add a raw substance to a formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSubstanceEdge {
    pub formula: FormulaId,
    pub substance: SubstanceId,
    pub concentration: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub order: Option<u32>,
    #[serde(default)]
    pub commercial: CommercialInfo,
}

impl NewSubstanceEdge {
    #[must_use]
    pub fn new(formula: FormulaId, substance: SubstanceId, concentration: f64) -> Self {
        Self {
            formula,
            substance,
            concentration,
            unit: None,
            order: None,
            commercial: CommercialInfo::default(),
        }
    }

    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    #[must_use]
    pub fn with_commercial(mut self, commercial: CommercialInfo) -> Self {
        self.commercial = commercial;
        self
    }
}

/// Partial update of an ingredient edge. `None` leaves the field unchanged.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IngredientPatch {
    #[serde(default)]
    pub concentration: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub order: Option<u32>,
}

impl IngredientPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.concentration.is_none() && self.unit.is_none() && self.order.is_none()
    }
}

/// Partial update of a substance edge. `None` leaves the field unchanged.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SubstancePatch {
    #[serde(default)]
    pub concentration: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub order: Option<u32>,
    #[serde(default)]
    pub supplier: Option<String>,
    #[serde(default)]
    pub dilution: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
}

pub(crate) fn unit_or_default(unit: Option<String>) -> String {
    unit.filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_UNIT_LABEL.to_string())
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Capability requested from the access policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Read,
    Edit,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Edit => f.write_str("edit"),
        }
    }
}

/// Coarse error category, stable across variants, for callers that render
/// one message per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AccessDenied,
    SelfReference,
    CycleDetected,
    DuplicateEdge,
    InvalidConcentration,
    GraphIntegrity,
    TraversalLimit,
    Storage,
}

/// Errors returned by every fallible operation in the crate.
///
/// Domain errors and storage failures are separate variants; nothing is
/// swallowed or retried here.
#[derive(Debug, Error)]
pub enum BlendError {
    #[error("formula {0} does not exist")]
    FormulaNotFound(FormulaId),

    #[error("substance {0} does not exist")]
    SubstanceNotFound(SubstanceId),

    #[error("formula {ingredient} is not an ingredient of formula {parent}")]
    IngredientNotFound {
        parent: FormulaId,
        ingredient: FormulaId,
    },

    #[error("substance {substance} is not part of formula {formula}")]
    SubstanceEdgeNotFound {
        formula: FormulaId,
        substance: SubstanceId,
    },

    #[error("user {user} is not allowed to {capability} formula {formula}")]
    AccessDenied {
        user: UserId,
        formula: FormulaId,
        capability: Capability,
    },

    #[error("formula {0} cannot contain itself")]
    SelfReference(FormulaId),

    #[error("adding formula {ingredient} to formula {parent} would create a circular dependency")]
    CycleDetected {
        parent: FormulaId,
        ingredient: FormulaId,
    },

    #[error("formula {ingredient} is already added as an ingredient of formula {parent}")]
    DuplicateIngredient {
        parent: FormulaId,
        ingredient: FormulaId,
    },

    #[error("substance {substance} is already part of formula {formula}")]
    DuplicateSubstance {
        formula: FormulaId,
        substance: SubstanceId,
    },

    #[error("invalid concentration '{0}': expected a non-negative number of parts per 1000")]
    InvalidConcentration(String),

    #[error("composition graph is corrupted: formula {formula} contains itself via {path:?}")]
    GraphIntegrity {
        formula: FormulaId,
        path: Vec<FormulaId>,
    },

    #[error("traversal stopped after exceeding the {limit} {bound} ceiling")]
    TraversalLimit { bound: &'static str, limit: usize },

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("serialization failure: {0}")]
    Serialization(String),
}

impl BlendError {
    /// Category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::FormulaNotFound(_)
            | Self::SubstanceNotFound(_)
            | Self::IngredientNotFound { .. }
            | Self::SubstanceEdgeNotFound { .. } => ErrorKind::NotFound,
            Self::AccessDenied { .. } => ErrorKind::AccessDenied,
            Self::SelfReference(_) => ErrorKind::SelfReference,
            Self::CycleDetected { .. } => ErrorKind::CycleDetected,
            Self::DuplicateIngredient { .. } | Self::DuplicateSubstance { .. } => {
                ErrorKind::DuplicateEdge
            }
            Self::InvalidConcentration(_) => ErrorKind::InvalidConcentration,
            Self::GraphIntegrity { .. } => ErrorKind::GraphIntegrity,
            Self::TraversalLimit { .. } => ErrorKind::TraversalLimit,
            Self::Storage(_) | Self::Serialization(_) => ErrorKind::Storage,
        }
    }

    /// True for infrastructure failures rather than domain outcomes.
    #[must_use]
    pub fn is_storage(&self) -> bool {
        self.kind() == ErrorKind::Storage
    }
}

// =============================================================================
// TESTS
// =============================================================================
