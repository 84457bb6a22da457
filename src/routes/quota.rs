use axum::extract::{Json, State};

use crate::error::AppResult;
use crate::quota::QuotaSnapshot;
use crate::state::AppState;
use crate::tenant::TenantContext;

pub async fn get_quota(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> AppResult<Json<QuotaSnapshot>> {
    let snapshot = state.quota.get_quota(&ctx.user_email, ctx.tier).await?;
    Ok(Json(snapshot))
}
