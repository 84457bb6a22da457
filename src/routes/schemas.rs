use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{SchemaLineage, SchemaRecord};
use crate::state::AppState;
use crate::tenant::TenantContext;

#[derive(Deserialize)]
pub struct GenerateSchemaRequest {
    pub conversion_id: Uuid,
}

pub async fn generate_schema(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(payload): Json<GenerateSchemaRequest>,
) -> AppResult<(StatusCode, Json<SchemaRecord>)> {
    let record = state
        .workflow
        .generate_schema(&ctx, &payload.conversion_id.to_string())
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

#[derive(Deserialize)]
pub struct ReviseSchemaRequest {
    pub conversion_id: Uuid,
    pub content: Value,
}

pub async fn revise_schema(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(payload): Json<ReviseSchemaRequest>,
) -> AppResult<(StatusCode, Json<SchemaRecord>)> {
    let record = state
        .workflow
        .revise_schema(&ctx, &payload.conversion_id.to_string(), payload.content)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

#[derive(Deserialize)]
pub struct FinalizeSchemaRequest {
    pub conversion_id: Uuid,
}

pub async fn finalize_schema(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(payload): Json<FinalizeSchemaRequest>,
) -> AppResult<(StatusCode, Json<SchemaRecord>)> {
    let record = state
        .workflow
        .finalize_schema(&ctx, &payload.conversion_id.to_string())
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn schema_lineage(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<SchemaLineage>> {
    let lineage = state
        .workflow
        .schema_lineage(&ctx, &id.to_string())
        .await?;
    Ok(Json(lineage))
}
