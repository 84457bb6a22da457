use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use uuid::Uuid;

use crate::error::AppResult;
use crate::feedback::NewFeedback;
use crate::models::{ExportRecord, FeedbackRecord};
use crate::state::AppState;
use crate::tenant::TenantContext;

pub async fn get_export(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ExportRecord>> {
    let export = state.workflow.get_export(&ctx, &id.to_string()).await?;
    Ok(Json(export))
}

pub async fn submit_feedback(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<NewFeedback>,
) -> AppResult<(StatusCode, Json<FeedbackRecord>)> {
    let record = state
        .workflow
        .submit_export_feedback(&ctx, &id.to_string(), payload)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn list_feedback(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<FeedbackRecord>>> {
    let records = state
        .workflow
        .list_export_feedback(&ctx, &id.to_string())
        .await?;
    Ok(Json(records))
}
