use axum::http::StatusCode;
use liquidity_rewards::api::{self, AppState};
use liquidity_rewards::db::init_db;
use liquidity_rewards::domain::{Timestamp, SECONDS_PER_DAY, SECONDS_PER_WEEK};
use liquidity_rewards::engine::ManualClock;
use liquidity_rewards::{RewardsService, Repository};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

const T0: u64 = 1_000_000;

const SUPERVISOR: &str = "0x0000000000000000000000000000000000000001";
const DISTRIBUTOR: &str = "0x0000000000000000000000000000000000000002";
const POOL: &str = "0x0000000000000000000000000000000000000010";
const RESERVE: &str = "0x0000000000000000000000000000000000000020";
const ALICE: &str = "0x00000000000000000000000000000000000000a1";
const BOB: &str = "0x00000000000000000000000000000000000000b2";

struct TestApp {
    app: axum::Router,
    clock: Arc<ManualClock>,
    _temp: TempDir,
}

async fn setup_test_app() -> TestApp {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let clock = Arc::new(ManualClock::new(Timestamp::new(T0)));

    let service = RewardsService::open(
        Repository::new(pool),
        clock.clone(),
        "0x00000000000000000000000000000000000000ee".parse().unwrap(),
        "0x00000000000000000000000000000000000000aa".parse().unwrap(),
        SUPERVISOR.parse().unwrap(),
    )
    .await
    .unwrap();
    let app = api::create_router(AppState::new(Arc::new(service)));

    TestApp {
        app,
        clock,
        _temp: temp_dir,
    }
}

async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    caller: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = axum::http::Request::builder().method(method).uri(uri);
    if let Some(caller) = caller {
        builder = builder.header("x-caller", caller);
    }
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(axum::body::Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(axum::body::Body::empty()).unwrap(),
    };

    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn program_body() -> Value {
    json!({
        "poolToken": POOL,
        "startTime": T0,
        "endTime": T0 + 10 * SECONDS_PER_WEEK,
        "rewardRate": "1000",
        "reserveShares": [{"reserveToken": RESERVE, "sharePpm": 1_000_000}],
    })
}

/// Grant the distributor role and register the pool program.
async fn with_program(app: &axum::Router) {
    let (status, _) = send(
        app,
        "POST",
        "/v1/roles/grant",
        Some(SUPERVISOR),
        Some(json!({"account": DISTRIBUTOR, "role": "distributor"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(app, "POST", "/v1/programs", Some(DISTRIBUTOR), Some(program_body())).await;
    assert_eq!(status, StatusCode::CREATED);
}

async fn add_liquidity(app: &axum::Router, provider: &str, amount: &str) -> Value {
    let (status, body) = send(
        app,
        "POST",
        "/v1/positions",
        Some(provider),
        Some(json!({"poolToken": POOL, "reserveToken": RESERVE, "amount": amount})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body
}

#[tokio::test]
async fn test_health_and_ready() {
    let test_app = setup_test_app().await;

    let (status, body) = send(&test_app.app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(&test_app.app, "GET", "/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn test_add_program_requires_distributor() {
    let test_app = setup_test_app().await;

    let (status, body) = send(&test_app.app, "POST", "/v1/programs", Some(ALICE), Some(program_body())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("access denied"));

    with_program(&test_app.app).await;

    let (status, body) = send(&test_app.app, "GET", &format!("/v1/programs/{}", POOL), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rewardRate"], "1000");
    assert_eq!(body["reserveShares"][0]["rewardRate"], "1000");

    let (status, _) = send(&test_app.app, "POST", "/v1/programs", Some(DISTRIBUTOR), Some(program_body())).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_invalid_program_is_bad_request() {
    let test_app = setup_test_app().await;
    with_program(&test_app.app).await;

    let mut body = program_body();
    body["poolToken"] = json!("0x0000000000000000000000000000000000000011");
    body["reserveShares"] = json!([{"reserveToken": RESERVE, "sharePpm": 400_000}]);
    let (status, _) = send(&test_app.app, "POST", "/v1/programs", Some(DISTRIBUTOR), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_caller_header_is_bad_request() {
    let test_app = setup_test_app().await;

    let (status, body) = send(&test_app.app, "POST", "/v1/rewards/claim", None, Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("x-caller"));

    let (status, _) = send(&test_app.app, "POST", "/v1/rewards/claim", Some("alice"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_liquidity_accrual_and_claim_flow() {
    let test_app = setup_test_app().await;
    let app = &test_app.app;
    with_program(app).await;

    let position = add_liquidity(app, ALICE, "500").await;
    assert_eq!(position["provider"], ALICE);
    assert_eq!(position["reserveAmount"], "500");
    let position_id = position["id"].as_u64().unwrap();

    test_app.clock.advance(8 * SECONDS_PER_DAY);

    let uri = format!("/v1/rewards/pending?provider={}&pool={}", ALICE, POOL);
    let (status, body) = send(app, "GET", &uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["base"], "691200000");
    assert_eq!(body["pending"], "864000000");

    let uri = format!("/v1/rewards/multiplier?provider={}&pool={}&reserve={}", ALICE, POOL, RESERVE);
    let (_, body) = send(app, "GET", &uri, None, None).await;
    assert_eq!(body["multiplier"], 1_250_000);
    assert_eq!(body["resolution"], 1_000_000);

    let (status, body) = send(app, "GET", &format!("/v1/positions/{}/rewards", position_id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["amount"], "864000000");

    let (status, body) = send(
        app,
        "POST",
        "/v1/rewards/claim",
        Some(ALICE),
        Some(json!({"poolToken": POOL})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["amount"], "864000000");

    let (status, _) = send(app, "POST", "/v1/rewards/claim", Some(ALICE), Some(json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let uri = format!("/v1/events?provider={}", ALICE);
    let (status, body) = send(app, "GET", &uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    let events = body["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["event"]["type"], "rewards_claimed");
    assert_eq!(events[0]["event"]["amount"], "864000000");
    assert!(events[0]["event_key"].as_str().unwrap().starts_with("evt:"));
}

#[tokio::test]
async fn test_multiplier_query_needs_pool_and_reserve_together() {
    let test_app = setup_test_app().await;
    let uri = format!("/v1/rewards/multiplier?provider={}&pool={}", ALICE, POOL);
    let (status, _) = send(&test_app.app, "GET", &uri, None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let uri = format!("/v1/rewards/multiplier?provider={}", ALICE);
    let (status, body) = send(&test_app.app, "GET", &uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["multiplier"], 1_000_000);
}

#[tokio::test]
async fn test_withdraw_rules() {
    let test_app = setup_test_app().await;
    let app = &test_app.app;
    with_program(app).await;
    let position = add_liquidity(app, ALICE, "500").await;
    let id = position["id"].as_u64().unwrap();

    let (status, _) = send(app, "POST", "/v1/positions/999/withdraw", Some(ALICE), Some(json!({"amount": "1"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let uri = format!("/v1/positions/{}/withdraw", id);
    let (status, _) = send(app, "POST", &uri, Some(BOB), Some(json!({"amount": "1"}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(app, "POST", &uri, Some(ALICE), Some(json!({"amount": "501"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(app, "POST", &uri, Some(ALICE), Some(json!({"amount": "200"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["position"]["reserveAmount"], "300");

    let (status, body) = send(app, "POST", &uri, Some(ALICE), Some(json!({"amount": "300"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["position"].is_null());

    let (_, body) = send(app, "GET", &format!("/v1/positions?provider={}", ALICE), None, None).await;
    assert!(body["positions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_seed_commit_and_claim_epoch_rewards() {
    let test_app = setup_test_app().await;
    let app = &test_app.app;
    with_program(app).await;

    let (status, _) = send(
        app,
        "PUT",
        "/v1/ceilings",
        Some(SUPERVISOR),
        Some(json!({"maxRewards": "100", "maxRewardsPerEpoch": "50"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let columns = json!({
        "providers": [ALICE, BOB],
        "poolTokens": [POOL, POOL],
        "reserveTokens": [RESERVE],
        "amounts": ["10", "20"],
    });
    let (status, _) = send(app, "POST", "/v1/epochs/1/rewards", Some(DISTRIBUTOR), Some(columns)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let over = json!({
        "providers": [ALICE, BOB],
        "poolTokens": [POOL, POOL],
        "reserveTokens": [RESERVE, RESERVE],
        "amounts": ["10", "41"],
    });
    let (status, _) = send(app, "POST", "/v1/epochs/1/rewards", Some(DISTRIBUTOR), Some(over)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let columns = json!({
        "providers": [ALICE, BOB],
        "poolTokens": [POOL, POOL],
        "reserveTokens": [RESERVE, RESERVE],
        "amounts": ["10", "20"],
    });
    let (status, body) = send(app, "POST", "/v1/epochs/1/rewards", Some(DISTRIBUTOR), Some(columns)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entries"], 2);

    let (_, body) = send(app, "GET", "/v1/ceilings", None, None).await;
    assert_eq!(body["totalRewards"], "30");

    let (status, _) = send(app, "POST", "/v1/epochs/1/commit", Some(DISTRIBUTOR), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(app, "POST", "/v1/epochs/1/commit", Some(SUPERVISOR), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], "30");

    let (status, _) = send(app, "POST", "/v1/epochs/1/commit", Some(SUPERVISOR), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = send(app, "GET", &format!("/v1/rewards/total?provider={}", BOB), None, None).await;
    assert_eq!(body["amount"], "20");

    let (status, body) = send(app, "POST", "/v1/rewards/claim", Some(BOB), Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["amount"], "20");
}
