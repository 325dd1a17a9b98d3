use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{parse_address, parse_amount_field, AppState, Caller};
use crate::domain::{Position, PositionId};
use crate::error::AppError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionDto {
    pub id: u64,
    pub provider: String,
    pub pool_token: String,
    pub reserve_token: String,
    pub reserve_amount: String,
    pub start_time: u64,
}

impl From<&Position> for PositionDto {
    fn from(p: &Position) -> Self {
        PositionDto {
            id: p.id.as_u64(),
            provider: p.provider.to_string(),
            pool_token: p.pool_token.to_string(),
            reserve_token: p.reserve_token.to_string(),
            reserve_amount: p.reserve_amount.to_string(),
            start_time: p.start_time.as_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PositionsQuery {
    pub provider: String,
}

#[derive(Debug, Serialize)]
pub struct PositionsResponse {
    pub positions: Vec<PositionDto>,
}

pub async fn list_positions(
    Query(params): Query<PositionsQuery>,
    State(state): State<AppState>,
) -> Result<Json<PositionsResponse>, AppError> {
    let provider = parse_address("provider", &params.provider)?;
    let positions = state.service.positions(&provider);
    Ok(Json(PositionsResponse {
        positions: positions.iter().map(PositionDto::from).collect(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddLiquidityRequest {
    pub pool_token: String,
    pub reserve_token: String,
    pub amount: String,
}

/// Open a position for the caller.
pub async fn add_liquidity(
    State(state): State<AppState>,
    Caller(provider): Caller,
    Json(body): Json<AddLiquidityRequest>,
) -> Result<(StatusCode, Json<PositionDto>), AppError> {
    let pool_token = parse_address("poolToken", &body.pool_token)?;
    let reserve_token = parse_address("reserveToken", &body.reserve_token)?;
    let amount = parse_amount_field("amount", &body.amount)?;
    let position = state
        .service
        .add_liquidity(&provider, &pool_token, &reserve_token, amount)
        .await?;
    Ok((StatusCode::CREATED, Json(PositionDto::from(&position))))
}

#[derive(Debug, Deserialize)]
pub struct RemoveLiquidityRequest {
    pub amount: String,
}

#[derive(Debug, Serialize)]
pub struct RemoveLiquidityResponse {
    /// None once the position is closed.
    pub position: Option<PositionDto>,
}

pub async fn remove_liquidity(
    Path(id): Path<u64>,
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(body): Json<RemoveLiquidityRequest>,
) -> Result<Json<RemoveLiquidityResponse>, AppError> {
    let amount = parse_amount_field("amount", &body.amount)?;
    let remaining = state
        .service
        .remove_liquidity(&caller, PositionId::new(id), amount)
        .await?;
    Ok(Json(RemoveLiquidityResponse {
        position: remaining.as_ref().map(PositionDto::from),
    }))
}
