use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{Conversion, ExportRecord};
use crate::state::AppState;
use crate::tenant::TenantContext;

#[derive(Deserialize, Default)]
pub struct CreateConversionRequest {
    #[serde(default)]
    pub metadata: Option<Value>,
}

pub async fn create_conversion(
    State(state): State<AppState>,
    ctx: TenantContext,
    payload: Option<Json<CreateConversionRequest>>,
) -> AppResult<(StatusCode, Json<Conversion>)> {
    let metadata = payload
        .and_then(|Json(body)| body.metadata)
        .unwrap_or_else(|| json!({}));
    let conversion = state.workflow.create_conversion(&ctx, metadata).await?;
    Ok((StatusCode::CREATED, Json(conversion)))
}

pub async fn get_conversion(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Conversion>> {
    let conversion = state
        .workflow
        .get_conversion(&ctx, &id.to_string())
        .await?;
    Ok(Json(conversion))
}

pub async fn archive_conversion(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Conversion>> {
    let conversion = state
        .workflow
        .archive_conversion(&ctx, &id.to_string())
        .await?;
    Ok(Json(conversion))
}

#[derive(Deserialize)]
pub struct GenerateOutputRequest {
    pub conversion_id: Uuid,
    #[serde(default)]
    pub format: Option<String>,
}

pub async fn generate_output(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(payload): Json<GenerateOutputRequest>,
) -> AppResult<(StatusCode, Json<ExportRecord>)> {
    let export = state
        .workflow
        .generate_output(&ctx, &payload.conversion_id.to_string(), payload.format)
        .await?;
    Ok((StatusCode::CREATED, Json(export)))
}
