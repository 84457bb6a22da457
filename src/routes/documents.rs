use axum::extract::{Json, Multipart, Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Document, ExportRecord, ExtractionRecord, ExtractionSource};
use crate::state::AppState;
use crate::tenant::TenantContext;
use crate::workflow::DocumentStatusView;

pub async fn upload_document(
    State(state): State<AppState>,
    ctx: TenantContext,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<Document>)> {
    let mut conversion_id: Option<Uuid> = None;
    let mut filename: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::validation(format!("malformed multipart body: {err}")))?
    {
        match field.name() {
            Some("conversion_id") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|err| AppError::validation(err.to_string()))?;
                let parsed = raw
                    .parse()
                    .map_err(|_| AppError::validation("conversion_id must be a UUID"))?;
                conversion_id = Some(parsed);
            }
            Some("file") => {
                filename = field.file_name().map(str::to_string);
                content_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|err| AppError::validation(err.to_string()))?;
                bytes = Some(data.to_vec());
            }
            _ => {}
        }
    }

    let conversion_id =
        conversion_id.ok_or_else(|| AppError::validation("conversion_id field is required"))?;
    let filename = filename.ok_or_else(|| AppError::validation("file field is required"))?;
    let bytes = bytes.ok_or_else(|| AppError::validation("file field is required"))?;

    let document = state
        .workflow
        .upload_document(
            &ctx,
            &conversion_id.to_string(),
            &filename,
            content_type,
            bytes,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(document)))
}

pub async fn get_document(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Document>> {
    let document = state.workflow.get_document(&ctx, &id.to_string()).await?;
    Ok(Json(document))
}

#[derive(Serialize)]
pub struct ConversionStatusResponse {
    pub conversion_id: Uuid,
    pub status: crate::models::ConversionStatus,
    pub documents: Vec<DocumentStatusView>,
}

/// `{id}` here is the conversion id, matching the status polling path.
pub async fn conversion_status(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ConversionStatusResponse>> {
    let conversion = state.workflow.get_conversion(&ctx, &id.to_string()).await?;
    let documents = state
        .workflow
        .conversion_status(&ctx, &id.to_string())
        .await?;
    Ok(Json(ConversionStatusResponse {
        conversion_id: conversion.id,
        status: conversion.status,
        documents,
    }))
}

#[derive(Deserialize, Default)]
pub struct ExtractRequest {
    #[serde(default)]
    pub source: Option<ExtractionSource>,
}

pub async fn extract_document(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
    payload: Option<Json<ExtractRequest>>,
) -> AppResult<Json<ExtractionRecord>> {
    let source = payload
        .and_then(|Json(body)| body.source)
        .unwrap_or(ExtractionSource::ExternalDi);
    let record = state
        .workflow
        .extract_document(&ctx, &id.to_string(), source)
        .await?;
    Ok(Json(record))
}

#[derive(Deserialize)]
pub struct ModificationRequest {
    #[serde(default)]
    pub source: Option<ExtractionSource>,
    pub field: String,
    pub new_value: Value,
}

pub async fn append_modification(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<ModificationRequest>,
) -> AppResult<Json<ExtractionRecord>> {
    let source = payload.source.unwrap_or(ExtractionSource::ExternalDi);
    let record = state
        .workflow
        .append_modification(&ctx, &id.to_string(), source, &payload.field, payload.new_value)
        .await?;
    Ok(Json(record))
}

pub async fn document_output(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ExportRecord>> {
    let export = state
        .workflow
        .output_for_document(&ctx, &id.to_string())
        .await?;
    Ok(Json(export))
}
