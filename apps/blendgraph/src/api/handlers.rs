//! # API Endpoint Handlers
//!
//! Reads take the session's read lock; edge mutations take the write lock
//! for the whole validate-and-commit step.

use super::{
    AppState,
    auth::ActingUser,
    types::{
        AddIngredientRequest, AddSubstanceRequest, ApiError, CycleCheckRequest,
        CycleCheckResponse, FlattenQuery, FormulaResponse, HealthResponse, StatusResponse,
        UpdateIngredientRequest, UpdateSubstanceRequest,
    },
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use blendgraph_core::{
    Composition, Formula, FormulaId, IngredientRelation, SubstanceId, SubstanceRelation, TreeNode,
};

type ApiResult<T> = Result<Json<T>, ApiError>;

// =============================================================================
// HEALTH / STATUS
// =============================================================================

pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

pub async fn status_handler(State(state): State<AppState>) -> ApiResult<StatusResponse> {
    let session = state.session.read().await;
    Ok(Json(StatusResponse {
        persistent: session.is_persistent(),
        stats: session.stats()?,
    }))
}

// =============================================================================
// FORMULA READS
// =============================================================================

/// `GET /formulas/{id}`
pub async fn formula_handler(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Path(id): Path<u64>,
) -> ApiResult<FormulaResponse> {
    let id = FormulaId(id);
    let session = state.session.read().await;
    let formula = session.formula(user, id)?;
    let ingredients = session.ingredients_of(user, id)?;
    let substances = session.substances_of(user, id)?;
    Ok(Json(FormulaResponse {
        formula,
        ingredients,
        substances,
    }))
}

/// `GET /formulas/{id}/flatten[?places=N]`
pub async fn flatten_handler(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Path(id): Path<u64>,
    Query(query): Query<FlattenQuery>,
) -> ApiResult<Composition> {
    let places = query.places()?;
    let session = state.session.read().await;
    let composition = session.flatten(user, FormulaId(id))?;
    Ok(Json(match places {
        Some(places) => composition.rounded(places),
        None => composition,
    }))
}

/// `GET /formulas/{id}/tree`
pub async fn tree_handler(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Path(id): Path<u64>,
) -> ApiResult<TreeNode> {
    let session = state.session.read().await;
    Ok(Json(session.tree(user, FormulaId(id))?))
}

/// `GET /formulas/{id}/used-in`
pub async fn used_in_handler(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Path(id): Path<u64>,
) -> ApiResult<Vec<Formula>> {
    let session = state.session.read().await;
    Ok(Json(session.used_in(user, FormulaId(id))?))
}

// =============================================================================
// COMPOUND INGREDIENTS
// =============================================================================

/// `POST /formulas/{id}/ingredients`
pub async fn add_ingredient_handler(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Path(parent): Path<u64>,
    Json(request): Json<AddIngredientRequest>,
) -> Result<(StatusCode, Json<IngredientRelation>), ApiError> {
    let request = request.into_new_ingredient(FormulaId(parent))?;
    let mut session = state.session.write().await;
    let edge = session.add_compound_ingredient(user, request)?;
    Ok((StatusCode::CREATED, Json(edge)))
}

/// `PATCH /formulas/{id}/ingredients/{child}`
pub async fn update_ingredient_handler(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Path((parent, child)): Path<(u64, u64)>,
    Json(request): Json<UpdateIngredientRequest>,
) -> ApiResult<IngredientRelation> {
    let patch = request.into_patch()?;
    let mut session = state.session.write().await;
    let edge =
        session.update_compound_ingredient(user, FormulaId(parent), FormulaId(child), patch)?;
    Ok(Json(edge))
}

/// `DELETE /formulas/{id}/ingredients/{child}`
pub async fn remove_ingredient_handler(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Path((parent, child)): Path<(u64, u64)>,
) -> ApiResult<IngredientRelation> {
    let mut session = state.session.write().await;
    let edge = session.remove_compound_ingredient(user, FormulaId(parent), FormulaId(child))?;
    Ok(Json(edge))
}

// =============================================================================
// SUBSTANCES
// =============================================================================

/// `POST /formulas/{id}/substances`
pub async fn add_substance_handler(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Path(formula): Path<u64>,
    Json(request): Json<AddSubstanceRequest>,
) -> Result<(StatusCode, Json<SubstanceRelation>), ApiError> {
    let request = request.into_new_edge(FormulaId(formula))?;
    let mut session = state.session.write().await;
    let edge = session.add_substance(user, request)?;
    Ok((StatusCode::CREATED, Json(edge)))
}

/// `PATCH /formulas/{id}/substances/{child}`
pub async fn update_substance_handler(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Path((formula, substance)): Path<(u64, u64)>,
    Json(request): Json<UpdateSubstanceRequest>,
) -> ApiResult<SubstanceRelation> {
    let patch = request.into_patch()?;
    let mut session = state.session.write().await;
    let edge =
        session.update_substance(user, FormulaId(formula), SubstanceId(substance), patch)?;
    Ok(Json(edge))
}

/// `DELETE /formulas/{id}/substances/{child}`
pub async fn remove_substance_handler(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Path((formula, substance)): Path<(u64, u64)>,
) -> ApiResult<SubstanceRelation> {
    let mut session = state.session.write().await;
    let edge = session.remove_substance(user, FormulaId(formula), SubstanceId(substance))?;
    Ok(Json(edge))
}

// =============================================================================
// CYCLE CHECK
// =============================================================================

/// `POST /cycle-check`: would adding `ingredient` under `parent` close a
/// cycle? Nothing is written. Same 404/403 answers as the real add.
pub async fn cycle_check_handler(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Json(request): Json<CycleCheckRequest>,
) -> ApiResult<CycleCheckResponse> {
    let session = state.session.read().await;
    let would_create_cycle = session.would_create_cycle(
        user,
        FormulaId(request.parent),
        FormulaId(request.ingredient),
    )?;
    Ok(Json(CycleCheckResponse {
        parent: request.parent,
        ingredient: request.ingredient,
        would_create_cycle,
    }))
}
