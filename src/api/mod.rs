pub mod admin;
pub mod health;
pub mod liquidity;
pub mod programs;
pub mod rewards;

use crate::domain::{parse_amount, Address};
use crate::error::AppError;
use crate::orchestration::RewardsService;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Header carrying the acting account.
pub const CALLER_HEADER: &str = "x-caller";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RewardsService>,
}

impl AppState {
    pub fn new(service: Arc<RewardsService>) -> Self {
        Self { service }
    }
}

/// The account on whose behalf a request acts, from the `x-caller` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller(pub Address);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(CALLER_HEADER)
            .ok_or_else(|| AppError::BadRequest(format!("missing {} header", CALLER_HEADER)))?
            .to_str()
            .map_err(|_| AppError::BadRequest(format!("invalid {} header", CALLER_HEADER)))?;
        Ok(Caller(parse_address(CALLER_HEADER, value)?))
    }
}

pub(crate) fn parse_address(field: &str, value: &str) -> Result<Address, AppError> {
    value
        .parse()
        .map_err(|e| AppError::BadRequest(format!("invalid {}: {}", field, e)))
}

pub(crate) fn parse_amount_field(field: &str, value: &str) -> Result<u128, AppError> {
    parse_amount(value).map_err(|e| AppError::BadRequest(format!("invalid {}: {}", field, e)))
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route(
            "/v1/programs",
            get(programs::list_programs).post(programs::add_program),
        )
        .route(
            "/v1/programs/:pool",
            get(programs::get_program).delete(programs::remove_program),
        )
        .route(
            "/v1/ceilings",
            get(admin::get_ceilings).put(admin::set_ceilings),
        )
        .route("/v1/epochs/:epoch/rewards", post(admin::set_rewards))
        .route("/v1/epochs/:epoch/commit", post(admin::commit_epoch))
        .route("/v1/roles/grant", post(admin::grant_role))
        .route("/v1/roles/revoke", post(admin::revoke_role))
        .route(
            "/v1/positions",
            get(liquidity::list_positions).post(liquidity::add_liquidity),
        )
        .route(
            "/v1/positions/:id/withdraw",
            post(liquidity::remove_liquidity),
        )
        .route(
            "/v1/positions/:id/rewards",
            get(rewards::get_position_rewards),
        )
        .route("/v1/rewards/pending", get(rewards::get_pending))
        .route("/v1/rewards/total", get(rewards::get_total_pending))
        .route("/v1/rewards/multiplier", get(rewards::get_multiplier))
        .route("/v1/rewards/claim", post(rewards::claim))
        .route("/v1/rewards/stake", post(rewards::stake))
        .route("/v1/events", get(rewards::get_events))
        .layer(cors)
        .with_state(state)
}
