use axum::extract::{Json, State};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::ExtractionSource;
use crate::state::AppState;
use crate::tenant::TenantContext;

#[derive(Deserialize)]
pub struct GenerateSummaryRequest {
    pub document_id: Uuid,
    #[serde(default)]
    pub source: Option<ExtractionSource>,
}

pub async fn generate_summary(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(payload): Json<GenerateSummaryRequest>,
) -> AppResult<Json<Value>> {
    let source = payload.source.unwrap_or(ExtractionSource::ExternalDi);
    let summary = state
        .workflow
        .generate_summary(&ctx, &payload.document_id.to_string(), source)
        .await?;
    Ok(Json(summary))
}
