//! # API Request/Response Types
//!
//! JSON bodies for the HTTP API, and the mapping from core errors to HTTP
//! status codes.

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use blendgraph_core::{
    BlendError, CommercialInfo, ErrorKind, Formula, FormulaId, IngredientPatch,
    IngredientRelation, NewIngredient, NewSubstanceEdge, SubstanceId, SubstancePatch,
    SubstanceRelation, StoreStats, primitives::{MAX_DISPLAY_PLACES, MAX_UNIT_LENGTH},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// =============================================================================
// HEALTH / STATUS
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Store statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub persistent: bool,
    #[serde(flatten)]
    pub stats: StoreStats,
}

// =============================================================================
// FORMULA
// =============================================================================

/// A formula with its direct edges, in display order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormulaResponse {
    pub formula: Formula,
    pub ingredients: Vec<IngredientRelation>,
    pub substances: Vec<SubstanceRelation>,
}

/// Query string for `GET /formulas/{id}/flatten`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlattenQuery {
    /// Round totals and contributions to this many decimal places.
    pub places: Option<u32>,
}

impl FlattenQuery {
    /// `places`, refused past [`MAX_DISPLAY_PLACES`].
    pub fn places(&self) -> Result<Option<u32>, ApiError> {
        match self.places {
            Some(p) if p > MAX_DISPLAY_PLACES => Err(ApiError::BadRequest(format!(
                "places {} exceeds maximum {}",
                p, MAX_DISPLAY_PLACES
            ))),
            places => Ok(places),
        }
    }
}

// =============================================================================
// COMPOUND INGREDIENT REQUESTS
// =============================================================================

/// Body of `POST /formulas/{id}/ingredients`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddIngredientRequest {
    pub ingredient: u64,
    pub concentration: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub order: Option<u32>,
}

impl AddIngredientRequest {
    pub fn into_new_ingredient(self, parent: FormulaId) -> Result<NewIngredient, ApiError> {
        validate_unit(self.unit.as_deref())?;
        Ok(NewIngredient {
            parent,
            ingredient: FormulaId(self.ingredient),
            concentration: self.concentration,
            unit: self.unit,
            order: self.order,
        })
    }
}

/// Body of `PATCH /formulas/{id}/ingredients/{child}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateIngredientRequest {
    #[serde(default)]
    pub concentration: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub order: Option<u32>,
}

impl UpdateIngredientRequest {
    pub fn into_patch(self) -> Result<IngredientPatch, ApiError> {
        validate_unit(self.unit.as_deref())?;
        Ok(IngredientPatch {
            concentration: self.concentration,
            unit: self.unit,
            order: self.order,
        })
    }
}

// =============================================================================
// SUBSTANCE REQUESTS
// =============================================================================

/// Body of `POST /formulas/{id}/substances`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddSubstanceRequest {
    pub substance: u64,
    pub concentration: f64,
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

impl AddSubstanceRequest {
    pub fn into_new_edge(self, formula: FormulaId) -> Result<NewSubstanceEdge, ApiError> {
        validate_unit(self.unit.as_deref())?;
        Ok(NewSubstanceEdge {
            formula,
            substance: SubstanceId(self.substance),
            concentration: self.concentration,
            unit: self.unit,
            order: self.order,
            commercial: CommercialInfo {
                supplier: self.supplier,
                dilution: self.dilution,
                price: self.price,
            },
        })
    }
}

/// Body of `PATCH /formulas/{id}/substances/{child}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSubstanceRequest {
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

impl UpdateSubstanceRequest {
    pub fn into_patch(self) -> Result<SubstancePatch, ApiError> {
        validate_unit(self.unit.as_deref())?;
        Ok(SubstancePatch {
            concentration: self.concentration,
            unit: self.unit,
            order: self.order,
            supplier: self.supplier,
            dilution: self.dilution,
            price: self.price,
        })
    }
}

// =============================================================================
// CYCLE CHECK
// =============================================================================

/// Body of `POST /cycle-check`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleCheckRequest {
    pub parent: u64,
    pub ingredient: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleCheckResponse {
    pub parent: u64,
    pub ingredient: u64,
    pub would_create_cycle: bool,
}

// =============================================================================
// ERRORS
// =============================================================================

/// JSON error body. `kind` is stable; `error` is for humans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

/// An error on its way to becoming an HTTP response.
#[derive(Debug)]
pub enum ApiError {
    /// A failure reported by the composition graph.
    Graph(BlendError),
    /// A request the API rejected before reaching the graph.
    BadRequest(String),
    /// Missing or wrong API key.
    Unauthorized,
    /// The global rate limiter is empty; retry after the given wait.
    RateLimited(Duration),
}

impl From<BlendError> for ApiError {
    fn from(e: BlendError) -> Self {
        Self::Graph(e)
    }
}

/// HTTP status for each error category.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::AccessDenied => StatusCode::FORBIDDEN,
        ErrorKind::SelfReference | ErrorKind::CycleDetected | ErrorKind::DuplicateEdge => {
            StatusCode::CONFLICT
        }
        ErrorKind::InvalidConcentration
        | ErrorKind::GraphIntegrity
        | ErrorKind::TraversalLimit => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn kind_label(kind: ErrorKind) -> String {
    serde_json::to_value(kind)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{:?}", kind))
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Graph(e) => {
                let kind = e.kind();
                if kind == ErrorKind::Storage {
                    tracing::error!(error = %e, "storage failure while serving request");
                }
                (
                    status_for(kind),
                    ErrorResponse {
                        error: e.to_string(),
                        kind: kind_label(kind),
                    },
                )
            }
            Self::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: message,
                    kind: "bad_request".to_string(),
                },
            ),
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse {
                    error: "missing or invalid API key".to_string(),
                    kind: "unauthorized".to_string(),
                },
            ),
            Self::RateLimited(wait) => {
                let body = ErrorResponse {
                    error: "too many requests".to_string(),
                    kind: "rate_limited".to_string(),
                };
                let retry_after = wait.as_secs().max(1).to_string();
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, retry_after)],
                    Json(body),
                )
                    .into_response();
            }
        };
        (status, Json(body)).into_response()
    }
}

/// Reject unit labels longer than [`MAX_UNIT_LENGTH`] bytes.
fn validate_unit(unit: Option<&str>) -> Result<(), ApiError> {
    match unit {
        Some(u) if u.len() > MAX_UNIT_LENGTH => Err(ApiError::BadRequest(format!(
            "unit length {} exceeds maximum {} bytes",
            u.len(),
            MAX_UNIT_LENGTH
        ))),
        _ => Ok(()),
    }
}

// =============================================================================
// TESTS
// =============================================================================
