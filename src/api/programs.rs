use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{parse_address, AppState, Caller};
use crate::domain::{PoolProgram, ReserveShare, Timestamp};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveShareDto {
    pub reserve_token: String,
    pub share_ppm: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddProgramRequest {
    pub pool_token: String,
    pub start_time: u64,
    pub end_time: u64,
    /// Base units per second, as a decimal string.
    pub reward_rate: String,
    pub reserve_shares: Vec<ReserveShareDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramDto {
    pub pool_token: String,
    pub start_time: u64,
    pub end_time: u64,
    pub reward_rate: String,
    pub reserve_shares: Vec<ReserveShareView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveShareView {
    pub reserve_token: String,
    pub share_ppm: u32,
    pub reward_rate: String,
}

impl From<&PoolProgram> for ProgramDto {
    fn from(program: &PoolProgram) -> Self {
        ProgramDto {
            pool_token: program.pool_token.to_string(),
            start_time: program.start_time.as_secs(),
            end_time: program.end_time.as_secs(),
            reward_rate: program.reward_rate.to_string(),
            reserve_shares: program
                .reserve_shares
                .iter()
                .map(|s| ReserveShareView {
                    reserve_token: s.reserve_token.to_string(),
                    share_ppm: s.share_ppm,
                    reward_rate: program
                        .reserve_rate(&s.reserve_token)
                        .unwrap_or(0)
                        .to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProgramsResponse {
    pub programs: Vec<ProgramDto>,
}

pub async fn list_programs(State(state): State<AppState>) -> Json<ProgramsResponse> {
    let programs = state.service.programs().await;
    Json(ProgramsResponse {
        programs: programs.iter().map(ProgramDto::from).collect(),
    })
}

pub async fn get_program(
    Path(pool): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ProgramDto>, AppError> {
    let pool_token = parse_address("pool", &pool)?;
    let program = state
        .service
        .program(&pool_token)
        .await
        .ok_or_else(|| AppError::NotFound(format!("pool {} has no reward program", pool_token)))?;
    Ok(Json(ProgramDto::from(&program)))
}

pub async fn add_program(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(body): Json<AddProgramRequest>,
) -> Result<(StatusCode, Json<ProgramDto>), AppError> {
    let reserve_shares = body
        .reserve_shares
        .iter()
        .map(|s| {
            Ok(ReserveShare {
                reserve_token: parse_address("reserveToken", &s.reserve_token)?,
                share_ppm: s.share_ppm,
            })
        })
        .collect::<Result<Vec<_>, AppError>>()?;
    let program = PoolProgram {
        pool_token: parse_address("poolToken", &body.pool_token)?,
        start_time: Timestamp::new(body.start_time),
        end_time: Timestamp::new(body.end_time),
        reward_rate: super::parse_amount_field("rewardRate", &body.reward_rate)?,
        reserve_shares,
    };

    state.service.add_program(&caller, program.clone()).await?;
    Ok((StatusCode::CREATED, Json(ProgramDto::from(&program))))
}

pub async fn remove_program(
    Path(pool): Path<String>,
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<StatusCode, AppError> {
    let pool_token = parse_address("pool", &pool)?;
    state.service.remove_program(&caller, &pool_token).await?;
    Ok(StatusCode::NO_CONTENT)
}
