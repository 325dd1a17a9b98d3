//! Role-gated administration: ceilings, epoch seeding and roles.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{parse_address, parse_amount_field, AppState, Caller};
use crate::engine::{Role, SeedEntry};
use crate::error::AppError;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CeilingsDto {
    pub max_rewards: String,
    pub max_rewards_per_epoch: String,
    #[serde(default, skip_deserializing)]
    pub total_rewards: String,
    #[serde(default, skip_deserializing)]
    pub distributed: String,
}

pub async fn get_ceilings(State(state): State<AppState>) -> Json<CeilingsDto> {
    let ceilings = state.service.ceilings().await;
    Json(CeilingsDto {
        max_rewards: ceilings.max_rewards.to_string(),
        max_rewards_per_epoch: ceilings.max_rewards_per_epoch.to_string(),
        total_rewards: ceilings.total_rewards.to_string(),
        distributed: ceilings.distributed.to_string(),
    })
}

pub async fn set_ceilings(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(body): Json<CeilingsDto>,
) -> Result<Json<CeilingsDto>, AppError> {
    let max_rewards = parse_amount_field("maxRewards", &body.max_rewards)?;
    let max_rewards_per_epoch = parse_amount_field("maxRewardsPerEpoch", &body.max_rewards_per_epoch)?;
    state
        .service
        .set_max_rewards(&caller, max_rewards, max_rewards_per_epoch)
        .await?;
    Ok(get_ceilings(State(state)).await)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedEntryDto {
    pub provider: String,
    pub pool_token: String,
    pub reserve_token: String,
    pub amount: String,
}

/// Either a list of entries or four parallel columns.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SetRewardsRequest {
    pub entries: Vec<SeedEntryDto>,
    pub providers: Vec<String>,
    pub pool_tokens: Vec<String>,
    pub reserve_tokens: Vec<String>,
    pub amounts: Vec<String>,
}

impl SetRewardsRequest {
    fn has_columns(&self) -> bool {
        !(self.providers.is_empty()
            && self.pool_tokens.is_empty()
            && self.reserve_tokens.is_empty()
            && self.amounts.is_empty())
    }

    fn into_entries(self) -> Result<Vec<SeedEntry>, AppError> {
        if self.has_columns() {
            if !self.entries.is_empty() {
                return Err(AppError::BadRequest(
                    "give either entries or columns, not both".to_string(),
                ));
            }
            let addresses = |field: &str, values: &[String]| {
                values
                    .iter()
                    .map(|v| parse_address(field, v))
                    .collect::<Result<Vec<_>, _>>()
            };
            let amounts = self
                .amounts
                .iter()
                .map(|a| parse_amount_field("amounts", a))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(SeedEntry::from_columns(
                addresses("providers", &self.providers)?,
                addresses("poolTokens", &self.pool_tokens)?,
                addresses("reserveTokens", &self.reserve_tokens)?,
                amounts,
            )?);
        }

        self.entries
            .iter()
            .map(|e| {
                Ok(SeedEntry {
                    provider: parse_address("provider", &e.provider)?,
                    pool_token: parse_address("poolToken", &e.pool_token)?,
                    reserve_token: parse_address("reserveToken", &e.reserve_token)?,
                    amount: parse_amount_field("amount", &e.amount)?,
                })
            })
            .collect()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetRewardsResponse {
    pub epoch: u64,
    pub entries: usize,
}

pub async fn set_rewards(
    Path(epoch): Path<u64>,
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(body): Json<SetRewardsRequest>,
) -> Result<Json<SetRewardsResponse>, AppError> {
    let entries = body.into_entries()?;
    state.service.set_rewards(&caller, epoch, &entries).await?;
    Ok(Json(SetRewardsResponse {
        epoch,
        entries: entries.len(),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitEpochResponse {
    pub epoch: u64,
    pub total: String,
}

pub async fn commit_epoch(
    Path(epoch): Path<u64>,
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<CommitEpochResponse>, AppError> {
    let total = state.service.commit_epoch(&caller, epoch).await?;
    Ok(Json(CommitEpochResponse {
        epoch,
        total: total.to_string(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRequest {
    pub account: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleResponse {
    pub account: String,
    pub role: Role,
    /// Whether membership actually changed.
    pub changed: bool,
}

pub async fn grant_role(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(body): Json<RoleRequest>,
) -> Result<Json<RoleResponse>, AppError> {
    let account = parse_address("account", &body.account)?;
    let changed = state.service.grant_role(&caller, &account, body.role).await?;
    Ok(Json(RoleResponse {
        account: account.to_string(),
        role: body.role,
        changed,
    }))
}

pub async fn revoke_role(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(body): Json<RoleRequest>,
) -> Result<Json<RoleResponse>, AppError> {
    let account = parse_address("account", &body.account)?;
    let changed = state.service.revoke_role(&caller, &account, body.role).await?;
    Ok(Json(RoleResponse {
        account: account.to_string(),
        role: body.role,
        changed,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "0x00000000000000000000000000000000000000a1";
    const P: &str = "0x0000000000000000000000000000000000000010";
    const R: &str = "0x0000000000000000000000000000000000000020";

    #[test]
    fn test_set_rewards_request_from_columns() {
        let body: SetRewardsRequest = serde_json::from_value(serde_json::json!({
            "providers": [A, A],
            "poolTokens": [P, P],
            "reserveTokens": [R, R],
            "amounts": ["1", "2"],
        }))
        .unwrap();
        let entries = body.into_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].amount, 2);
    }

    #[test]
    fn test_set_rewards_request_column_mismatch() {
        let body: SetRewardsRequest = serde_json::from_value(serde_json::json!({
            "providers": [A, A],
            "poolTokens": [P],
            "reserveTokens": [R, R],
            "amounts": ["1", "2"],
        }))
        .unwrap();
        assert!(matches!(body.into_entries(), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_set_rewards_request_from_entries() {
        let body: SetRewardsRequest = serde_json::from_value(serde_json::json!({
            "entries": [{"provider": A, "poolToken": P, "reserveToken": R, "amount": "9"}],
        }))
        .unwrap();
        let entries = body.into_entries().unwrap();
        assert_eq!(entries[0].amount, 9);
        assert_eq!(entries[0].provider.as_str(), A);
    }
}
