//! Integration tests for the Blendgraph HTTP API.
//!
//! Uses axum-test to exercise the router without binding a socket.

#![allow(clippy::unwrap_used, clippy::panic)]

use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum_test::TestServer;
use blendgraph::api::{
    AppState, CycleCheckResponse, ErrorResponse, FormulaResponse, HealthResponse, ServerSession,
    StatusResponse, USER_HEADER, create_router,
};
use blendgraph::config::ServerConfig;
use blendgraph_core::{
    AccessList, Composition, Formula, FormulaId, FormulaStatus, IngredientRelation,
    NewIngredient, NewSubstanceEdge, Session, Substance, SubstanceId, SubstanceRelation,
    TracingSink, TreeNode, UserId,
};
use serde_json::json;

const ALICE: UserId = UserId(1);
const BOB: UserId = UserId(2);

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Top(1) contains Base(2) at 500 and S2 at 100; Base contains S1 at 200.
/// Base is published. Private(3) belongs to Bob. Accord(4) is an unused
/// draft of Alice's.
fn seeded_session() -> ServerSession {
    let formulas = vec![
        Formula::new(FormulaId(1), "Top", ALICE),
        Formula::new(FormulaId(2), "Base", ALICE).with_status(FormulaStatus::Published),
        Formula::new(FormulaId(3), "Private", BOB),
        Formula::new(FormulaId(4), "Accord", ALICE),
    ];
    let acl = AccessList::from_formulas(&formulas);
    let mut session = Session::new(acl, TracingSink);
    for formula in formulas {
        session.register_formula(formula).unwrap();
    }
    session
        .register_substance(Substance::new(SubstanceId(10), "S1").with_cas("100-51-6"))
        .unwrap();
    session
        .register_substance(Substance::new(SubstanceId(20), "S2"))
        .unwrap();

    session
        .add_compound_ingredient(ALICE, NewIngredient::new(FormulaId(1), FormulaId(2), 500.0))
        .unwrap();
    session
        .add_substance(
            ALICE,
            NewSubstanceEdge::new(FormulaId(1), SubstanceId(20), 100.0),
        )
        .unwrap();
    session
        .add_substance(
            ALICE,
            NewSubstanceEdge::new(FormulaId(2), SubstanceId(10), 200.0),
        )
        .unwrap();
    session
}

fn open_config() -> ServerConfig {
    ServerConfig {
        rate_limit: 0,
        ..ServerConfig::default()
    }
}

fn create_test_server_with(config: ServerConfig) -> TestServer {
    let router = create_router(AppState::new(seeded_session()), &config);
    TestServer::new(router).unwrap()
}

fn create_test_server() -> TestServer {
    create_test_server_with(open_config())
}

fn user(id: UserId) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static(USER_HEADER),
        id.0.to_string().parse::<HeaderValue>().unwrap(),
    )
}

// =============================================================================
// HEALTH / STATUS
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let server = create_test_server();

    let response = server.get("/health").await;

    response.assert_status_ok();
    let health: HealthResponse = response.json();
    assert_eq!(health.status, "ok");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_status_counts_records() {
    let server = create_test_server();

    let response = server.get("/status").await;

    response.assert_status_ok();
    let status: StatusResponse = response.json();
    assert!(!status.persistent);
    assert_eq!(status.stats.formulas, 4);
    assert_eq!(status.stats.substances, 2);
    assert_eq!(status.stats.ingredients, 1);
    assert_eq!(status.stats.substance_edges, 2);
}

// =============================================================================
// FORMULA READS
// =============================================================================

#[tokio::test]
async fn test_formula_with_edges_for_owner() {
    let server = create_test_server();
    let (name, value) = user(ALICE);

    let response = server.get("/formulas/1").add_header(name, value).await;

    response.assert_status_ok();
    let body: FormulaResponse = response.json();
    assert_eq!(body.formula.name, "Top");
    assert_eq!(body.ingredients.len(), 1);
    assert_eq!(body.ingredients[0].ingredient, FormulaId(2));
    assert_eq!(body.substances.len(), 1);
    assert_eq!(body.substances[0].substance, SubstanceId(20));
}

#[tokio::test]
async fn test_draft_formula_hidden_from_other_users() {
    let server = create_test_server();
    let (name, value) = user(BOB);

    let response = server.get("/formulas/1").add_header(name, value).await;

    response.assert_status(StatusCode::FORBIDDEN);
    let body: ErrorResponse = response.json();
    assert_eq!(body.kind, "access_denied");
}

#[tokio::test]
async fn test_published_formula_readable_anonymously() {
    let server = create_test_server();

    let response = server.get("/formulas/2").await;

    response.assert_status_ok();
}

#[tokio::test]
async fn test_missing_formula_is_404() {
    let server = create_test_server();
    let (name, value) = user(ALICE);

    let response = server.get("/formulas/999").add_header(name, value).await;

    response.assert_status(StatusCode::NOT_FOUND);
    let body: ErrorResponse = response.json();
    assert_eq!(body.kind, "not_found");
}

#[tokio::test]
async fn test_malformed_user_header_is_400() {
    let server = create_test_server();

    let response = server
        .get("/formulas/2")
        .add_header(
            HeaderName::from_static(USER_HEADER),
            "alice".parse::<HeaderValue>().unwrap(),
        )
        .await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn test_flatten_end_to_end() {
    let server = create_test_server();
    let (name, value) = user(ALICE);

    let response = server
        .get("/formulas/1/flatten")
        .add_header(name, value)
        .await;

    response.assert_status_ok();
    let composition: Composition = response.json();
    let ids: Vec<_> = composition.rows.iter().map(|r| r.substance.id).collect();
    assert_eq!(ids, vec![SubstanceId(20), SubstanceId(10)]);
    for row in &composition.rows {
        assert!((row.total_concentration - 100.0).abs() < 1e-9);
    }
    let s1 = composition.row(SubstanceId(10)).unwrap();
    assert_eq!(s1.sources.len(), 1);
    assert_eq!(s1.sources[0].formula_id, FormulaId(2));
}

#[tokio::test]
async fn test_flatten_rounds_when_asked() {
    let server = create_test_server();
    let (name, value) = user(ALICE);

    server
        .patch("/formulas/1/ingredients/2")
        .add_header(name.clone(), value.clone())
        .json(&json!({ "concentration": 333.3333 }))
        .await
        .assert_status_ok();

    let response = server
        .get("/formulas/1/flatten")
        .add_query_param("places", 2)
        .add_header(name, value)
        .await;

    response.assert_status_ok();
    let composition: Composition = response.json();
    let s1 = composition.row(SubstanceId(10)).unwrap();
    assert_eq!(s1.total_concentration, 66.67);
}

#[tokio::test]
async fn test_flatten_rejects_places_beyond_f64_precision() {
    let server = create_test_server();
    let (name, value) = user(ALICE);

    let response = server
        .get("/formulas/1/flatten")
        .add_query_param("places", 400)
        .add_header(name.clone(), value.clone())
        .await;
    response.assert_status_bad_request();
    let body: ErrorResponse = response.json();
    assert_eq!(body.kind, "bad_request");

    let response = server
        .get("/formulas/1/flatten")
        .add_query_param("places", 15)
        .add_header(name, value)
        .await;
    response.assert_status_ok();
    let composition: Composition = response.json();
    let s1 = composition.row(SubstanceId(10)).unwrap();
    assert!((s1.total_concentration - 100.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_tree_nests_compounds() {
    let server = create_test_server();
    let (name, value) = user(ALICE);

    let response = server.get("/formulas/1/tree").add_header(name, value).await;

    response.assert_status_ok();
    let tree: TreeNode = response.json();
    assert_eq!(tree.formula_id, FormulaId(1));
    assert_eq!(tree.concentration, None);
    assert_eq!(tree.children.len(), 1);
    let base = &tree.children[0];
    assert_eq!(base.formula_id, FormulaId(2));
    assert!((base.multiplier - 0.5).abs() < 1e-12);
    assert!((base.substances[0].effective - 100.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_used_in_filters_unreadable_parents() {
    let server = create_test_server();

    let (name, value) = user(ALICE);
    let response = server
        .get("/formulas/2/used-in")
        .add_header(name, value)
        .await;
    response.assert_status_ok();
    let parents: Vec<Formula> = response.json();
    assert_eq!(parents.len(), 1);
    assert_eq!(parents[0].id, FormulaId(1));

    let (name, value) = user(BOB);
    let response = server
        .get("/formulas/2/used-in")
        .add_header(name, value)
        .await;
    response.assert_status_ok();
    let parents: Vec<Formula> = response.json();
    assert!(parents.is_empty());
}

// =============================================================================
// COMPOUND INGREDIENTS
// =============================================================================

#[tokio::test]
async fn test_ingredient_lifecycle() {
    let server = create_test_server();
    let (name, value) = user(ALICE);

    let response = server
        .post("/formulas/1/ingredients")
        .add_header(name.clone(), value.clone())
        .json(&json!({ "ingredient": 4, "concentration": 100.0, "unit": "g" }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let edge: IngredientRelation = response.json();
    assert_eq!(edge.ingredient, FormulaId(4));
    assert_eq!(edge.order, 1);
    assert_eq!(edge.unit, "g");

    let response = server
        .patch("/formulas/1/ingredients/4")
        .add_header(name.clone(), value.clone())
        .json(&json!({ "concentration": 150.0 }))
        .await;
    response.assert_status_ok();
    let edge: IngredientRelation = response.json();
    assert_eq!(edge.concentration.value(), 150.0);
    assert_eq!(edge.unit, "g");

    server
        .delete("/formulas/1/ingredients/4")
        .add_header(name.clone(), value.clone())
        .await
        .assert_status_ok();

    server
        .delete("/formulas/1/ingredients/4")
        .add_header(name, value)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cycle_is_rejected_with_409() {
    let server = create_test_server();
    let (name, value) = user(ALICE);

    let response = server
        .post("/formulas/2/ingredients")
        .add_header(name, value)
        .json(&json!({ "ingredient": 1, "concentration": 10.0 }))
        .await;

    response.assert_status(StatusCode::CONFLICT);
    let body: ErrorResponse = response.json();
    assert_eq!(body.kind, "cycle_detected");
    assert!(body.error.contains("circular"));
}

#[tokio::test]
async fn test_self_reference_and_duplicate_are_409() {
    let server = create_test_server();
    let (name, value) = user(ALICE);

    let response = server
        .post("/formulas/1/ingredients")
        .add_header(name.clone(), value.clone())
        .json(&json!({ "ingredient": 1, "concentration": 10.0 }))
        .await;
    response.assert_status(StatusCode::CONFLICT);
    let body: ErrorResponse = response.json();
    assert_eq!(body.kind, "self_reference");

    let response = server
        .post("/formulas/1/ingredients")
        .add_header(name, value)
        .json(&json!({ "ingredient": 2, "concentration": 10.0 }))
        .await;
    response.assert_status(StatusCode::CONFLICT);
    let body: ErrorResponse = response.json();
    assert_eq!(body.kind, "duplicate_edge");
}

#[tokio::test]
async fn test_edit_requires_edit_access() {
    let server = create_test_server();
    let (name, value) = user(BOB);

    let response = server
        .post("/formulas/1/ingredients")
        .add_header(name, value)
        .json(&json!({ "ingredient": 2, "concentration": 10.0 }))
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_private_formula_cannot_be_used_as_compound() {
    let server = create_test_server();
    let (name, value) = user(ALICE);

    let response = server
        .post("/formulas/4/ingredients")
        .add_header(name, value)
        .json(&json!({ "ingredient": 3, "concentration": 10.0 }))
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_negative_concentration_is_422() {
    let server = create_test_server();
    let (name, value) = user(ALICE);

    let response = server
        .post("/formulas/1/ingredients")
        .add_header(name, value)
        .json(&json!({ "ingredient": 4, "concentration": -5.0 }))
        .await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let body: ErrorResponse = response.json();
    assert_eq!(body.kind, "invalid_concentration");
}

#[tokio::test]
async fn test_long_unit_is_400() {
    let server = create_test_server();
    let (name, value) = user(ALICE);

    let response = server
        .post("/formulas/1/ingredients")
        .add_header(name, value)
        .json(&json!({ "ingredient": 4, "concentration": 5.0, "unit": "u".repeat(64) }))
        .await;

    response.assert_status_bad_request();
}

// =============================================================================
// SUBSTANCES
// =============================================================================

#[tokio::test]
async fn test_substance_lifecycle() {
    let server = create_test_server();
    let (name, value) = user(ALICE);

    let response = server
        .post("/formulas/1/substances")
        .add_header(name.clone(), value.clone())
        .json(&json!({ "substance": 10, "concentration": 50.0, "supplier": "Acme" }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let edge: SubstanceRelation = response.json();
    assert_eq!(edge.order, 1);
    assert_eq!(edge.commercial.supplier.as_deref(), Some("Acme"));

    let response = server
        .patch("/formulas/1/substances/10")
        .add_header(name.clone(), value.clone())
        .json(&json!({ "price": "12.00" }))
        .await;
    response.assert_status_ok();
    let edge: SubstanceRelation = response.json();
    assert_eq!(edge.commercial.supplier.as_deref(), Some("Acme"));
    assert_eq!(edge.commercial.price.as_deref(), Some("12.00"));

    // S1 now reaches Top directly (50) and through Base (100).
    let response = server
        .get("/formulas/1/flatten")
        .add_header(name.clone(), value.clone())
        .await;
    let composition: Composition = response.json();
    let s1 = composition.row(SubstanceId(10)).unwrap();
    assert!((s1.total_concentration - 150.0).abs() < 1e-9);
    assert_eq!(s1.sources.len(), 2);
    assert_eq!(composition.rows[0].substance.id, SubstanceId(10));

    server
        .delete("/formulas/1/substances/10")
        .add_header(name.clone(), value.clone())
        .await
        .assert_status_ok();

    server
        .post("/formulas/1/substances")
        .add_header(name, value)
        .json(&json!({ "substance": 99, "concentration": 1.0 }))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

// =============================================================================
// CYCLE CHECK
// =============================================================================

#[tokio::test]
async fn test_cycle_check_is_a_dry_run() {
    let server = create_test_server();

    let (name, value) = user(ALICE);
    let response = server
        .post("/cycle-check")
        .add_header(name, value)
        .json(&json!({ "parent": 2, "ingredient": 1 }))
        .await;
    response.assert_status_ok();
    let check: CycleCheckResponse = response.json();
    assert!(check.would_create_cycle);

    let (name, value) = user(ALICE);
    let response = server
        .post("/cycle-check")
        .add_header(name, value)
        .json(&json!({ "parent": 1, "ingredient": 4 }))
        .await;
    let check: CycleCheckResponse = response.json();
    assert!(!check.would_create_cycle);

    let status: StatusResponse = server.get("/status").await.json();
    assert_eq!(status.stats.ingredients, 1);
}

#[tokio::test]
async fn test_cycle_check_hides_private_nesting() {
    let server = create_test_server();

    // Top(1) is Alice's draft; anonymous callers must not learn it holds Base.
    let response = server
        .post("/cycle-check")
        .json(&json!({ "parent": 2, "ingredient": 1 }))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
    let body: ErrorResponse = response.json();
    assert_eq!(body.kind, "access_denied");

    // Bob can read published Base but may not edit it.
    let (name, value) = user(BOB);
    server
        .post("/cycle-check")
        .add_header(name, value)
        .json(&json!({ "parent": 2, "ingredient": 3 }))
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_cycle_check_unknown_formula_is_404() {
    let server = create_test_server();

    let (name, value) = user(ALICE);
    let response = server
        .post("/cycle-check")
        .add_header(name, value)
        .json(&json!({ "parent": 900, "ingredient": 901 }))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: ErrorResponse = response.json();
    assert_eq!(body.kind, "not_found");

    let (name, value) = user(ALICE);
    server
        .post("/cycle-check")
        .add_header(name, value)
        .json(&json!({ "parent": 1, "ingredient": 901 }))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

// =============================================================================
// AUTHENTICATION / RATE LIMITING
// =============================================================================

fn keyed_server(key: &str) -> TestServer {
    create_test_server_with(ServerConfig {
        api_key: Some(key.to_string()),
        ..open_config()
    })
}

fn bearer(key: &str) -> HeaderValue {
    format!("Bearer {key}").parse().unwrap()
}

#[tokio::test]
async fn matching_key_reaches_the_graph() {
    let server = keyed_server("bg-key-7f3a");

    let response = server
        .get("/formulas/2/flatten")
        .add_header(header::AUTHORIZATION, bearer("bg-key-7f3a"))
        .await;

    response.assert_status_ok();
}

#[tokio::test]
async fn wrong_key_is_unauthorized() {
    let server = keyed_server("bg-key-7f3a");

    let response = server
        .get("/status")
        .add_header(header::AUTHORIZATION, bearer("bg-key-7f3b"))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: ErrorResponse = response.json();
    assert_eq!(body.kind, "unauthorized");
}

#[tokio::test]
async fn missing_key_is_unauthorized() {
    let server = keyed_server("bg-key-7f3a");

    server
        .get("/formulas/2")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_is_reachable_without_key() {
    let server = keyed_server("bg-key-7f3a");

    server.get("/health").await.assert_status_ok();
}

#[tokio::test]
async fn throttled_request_gets_429_with_retry_after() {
    let server = create_test_server_with(ServerConfig {
        rate_limit: 1,
        ..ServerConfig::default()
    });

    server.get("/health").await.assert_status_ok();
    let response = server.get("/health").await;

    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    let body: ErrorResponse = response.json();
    assert_eq!(body.kind, "rate_limited");
}
