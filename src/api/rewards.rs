use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{parse_address, AppState, Caller};
use crate::domain::{EventRecord, PositionId, PPM_RESOLUTION};
use crate::error::AppError;

const MAX_EVENTS_LIMIT: u32 = 1_000;

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    pub provider: String,
    pub pool: String,
    pub reserve: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingResponse {
    /// Payable now, multiplier applied.
    pub pending: String,
    /// Accrued before the multiplier.
    pub base: String,
}

pub async fn get_pending(
    Query(params): Query<PendingQuery>,
    State(state): State<AppState>,
) -> Result<Json<PendingResponse>, AppError> {
    let provider = parse_address("provider", &params.provider)?;
    let pool_token = parse_address("pool", &params.pool)?;
    let reserve_token = match params.reserve.as_deref() {
        Some("") | None => None,
        Some(r) => Some(parse_address("reserve", r)?),
    };

    let pending = state
        .service
        .pending_rewards(&provider, &pool_token, reserve_token.as_ref())
        .await?;
    let base = state
        .service
        .pending_base_rewards(&provider, &pool_token, reserve_token.as_ref())
        .await?;
    Ok(Json(PendingResponse {
        pending: pending.to_string(),
        base: base.to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ProviderQuery {
    pub provider: String,
}

#[derive(Debug, Serialize)]
pub struct AmountResponse {
    pub amount: String,
}

pub async fn get_total_pending(
    Query(params): Query<ProviderQuery>,
    State(state): State<AppState>,
) -> Result<Json<AmountResponse>, AppError> {
    let provider = parse_address("provider", &params.provider)?;
    let amount = state.service.total_pending_rewards(&provider).await?;
    Ok(Json(AmountResponse {
        amount: amount.to_string(),
    }))
}

pub async fn get_position_rewards(
    Path(id): Path<u64>,
    State(state): State<AppState>,
) -> Result<Json<AmountResponse>, AppError> {
    let amount = state
        .service
        .pending_rewards_for_position(PositionId::new(id))
        .await?;
    Ok(Json(AmountResponse {
        amount: amount.to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct MultiplierQuery {
    pub provider: String,
    pub pool: Option<String>,
    pub reserve: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiplierResponse {
    /// Parts per million.
    pub multiplier: u32,
    pub resolution: u32,
}

/// Entry multiplier when `pool` and `reserve` are given, the provider-level
/// multiplier otherwise.
pub async fn get_multiplier(
    Query(params): Query<MultiplierQuery>,
    State(state): State<AppState>,
) -> Result<Json<MultiplierResponse>, AppError> {
    let provider = parse_address("provider", &params.provider)?;
    let multiplier = match (params.pool.as_deref(), params.reserve.as_deref()) {
        (Some(pool), Some(reserve)) => {
            let pool_token = parse_address("pool", pool)?;
            let reserve_token = parse_address("reserve", reserve)?;
            state
                .service
                .multiplier(&provider, &pool_token, &reserve_token)
                .await?
        }
        (None, None) => state.service.provider_multiplier(&provider).await?,
        _ => {
            return Err(AppError::BadRequest(
                "pool and reserve must be given together".to_string(),
            ))
        }
    };
    Ok(Json(MultiplierResponse {
        multiplier,
        resolution: PPM_RESOLUTION,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClaimRequest {
    /// Claim one pool; every pool when absent.
    pub pool_token: Option<String>,
}

pub async fn claim(
    State(state): State<AppState>,
    Caller(provider): Caller,
    Json(body): Json<ClaimRequest>,
) -> Result<Json<AmountResponse>, AppError> {
    let amount = match body.pool_token.as_deref() {
        Some(pool) => {
            let pool_token = parse_address("poolToken", pool)?;
            state.service.claim(&provider, &pool_token).await?
        }
        None => state.service.claim_all(&provider).await?,
    };
    Ok(Json(AmountResponse {
        amount: amount.to_string(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeRequest {
    /// Restake one pool's rewards; every pool when absent.
    #[serde(default)]
    pub pool_token: Option<String>,
    pub target_pool: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeResponse {
    pub amount: String,
    pub position_id: u64,
}

pub async fn stake(
    State(state): State<AppState>,
    Caller(provider): Caller,
    Json(body): Json<StakeRequest>,
) -> Result<Json<StakeResponse>, AppError> {
    let target_pool = parse_address("targetPool", &body.target_pool)?;
    let outcome = match body.pool_token.as_deref() {
        Some(pool) => {
            let pool_token = parse_address("poolToken", pool)?;
            state
                .service
                .stake(&provider, &pool_token, &target_pool)
                .await?
        }
        None => state.service.stake_all(&provider, &target_pool).await?,
    };
    Ok(Json(StakeResponse {
        amount: outcome.amount.to_string(),
        position_id: outcome.position_id.as_u64(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    pub provider: Option<String>,
    pub after_seq: Option<u64>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub events: Vec<EventRecord>,
}

pub async fn get_events(
    Query(params): Query<EventsQuery>,
    State(state): State<AppState>,
) -> Result<Json<EventsResponse>, AppError> {
    let provider = match params.provider.as_deref() {
        Some("") | None => None,
        Some(p) => Some(parse_address("provider", p)?),
    };
    let limit = params.limit.unwrap_or(100).clamp(1, MAX_EVENTS_LIMIT);
    let events = state
        .service
        .events(provider.as_ref(), params.after_seq.unwrap_or(0), limit)
        .await?;
    Ok(Json(EventsResponse { events }))
}
