use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::clients::extract_with_retry;
use crate::error::{AppError, AppResult};
use crate::models::{
    entity, resource, Document, DocumentStatus, ExtractionPayload, ExtractionRecord,
    ExtractionSource, UserModification,
};
use crate::store::{Filter, StoreError};
use crate::tenant::TenantContext;

use super::{ConversionWorkflow, CAS_ATTEMPTS, DOCUMENTS_CONTAINER};

const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "application/pdf",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "image/png",
    "image/jpeg",
    "image/tiff",
    "text/plain",
];

#[derive(Debug, Serialize)]
pub struct DocumentStatusView {
    pub id: Uuid,
    pub filename: String,
    pub status: DocumentStatus,
    pub error: Option<String>,
}

impl ConversionWorkflow {
    /// Accept raw bytes for a conversion. The blob write happens before
    /// the record insert, so a client disconnect leaves at worst an
    /// orphaned blob and never a half-visible document.
    pub async fn upload_document(
        &self,
        ctx: &TenantContext,
        conversion_id: &str,
        filename: &str,
        content_type: Option<String>,
        bytes: Vec<u8>,
    ) -> AppResult<Document> {
        let (conversion, _) = self.load_conversion(ctx, conversion_id).await?;
        Self::ensure_in_progress(&conversion, "upload a document")?;

        if filename.trim().is_empty() {
            return Err(AppError::validation("filename must not be empty"));
        }
        if bytes.is_empty() {
            return Err(AppError::validation("uploaded file is empty"));
        }
        let content_type = content_type
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| {
                mime_guess::from_path(filename)
                    .first_or_octet_stream()
                    .essence_str()
                    .to_string()
            });
        if !ALLOWED_CONTENT_TYPES.contains(&content_type.as_str()) {
            return Err(AppError::validation(format!(
                "unsupported content type {content_type}"
            )));
        }

        let document_id = Uuid::new_v4();
        let checksum = hex::encode(Sha256::digest(&bytes));
        let size = bytes.len() as i64;
        let blob_key = Self::blob_key(&ctx.tenant_id, &conversion.id, document_id, filename);
        let blob_ref = self
            .blob
            .put(
                DOCUMENTS_CONTAINER,
                &blob_key,
                bytes,
                Some(content_type.clone()),
            )
            .await
            .map_err(|err| AppError::upstream(format!("blob upload failed: {err}")))?;

        let document = Document {
            id: document_id,
            conversion_id: conversion.id,
            owner_email: ctx.user_email.clone(),
            filename: filename.to_string(),
            content_type,
            size,
            checksum,
            blob_ref,
            status: DocumentStatus::Uploaded,
            error: None,
            uploaded_at: Utc::now(),
        };
        self.store
            .create(
                entity::DOCUMENT,
                &document.id.to_string(),
                &conversion.id.to_string(),
                json!(document),
            )
            .await?;
        self.ownership
            .create_ownership_record(
                &document.id.to_string(),
                resource::DOCUMENT,
                &ctx.user_email,
                &ctx.tenant_id,
            )
            .await?;
        self.append_document_id(ctx, &conversion.id.to_string(), document_id)
            .await?;

        info!(
            document_id = %document.id,
            conversion_id = %conversion.id,
            size,
            "document uploaded"
        );
        Ok(document)
    }

    pub async fn get_document(&self, ctx: &TenantContext, document_id: &str) -> AppResult<Document> {
        self.ownership
            .require_access(document_id, resource::DOCUMENT, ctx)
            .await?;
        self.find_document(document_id).await
    }

    /// Per-document processing state for one conversion.
    pub async fn conversion_status(
        &self,
        ctx: &TenantContext,
        conversion_id: &str,
    ) -> AppResult<Vec<DocumentStatusView>> {
        let (conversion, _) = self.load_conversion(ctx, conversion_id).await?;
        let items = self
            .store
            .query(
                entity::DOCUMENT,
                &Filter::new(),
                Some(&conversion.id.to_string()),
            )
            .await?;
        items
            .iter()
            .map(|item| {
                let document: Document = Self::decode(item)?;
                Ok(DocumentStatusView {
                    id: document.id,
                    filename: document.filename,
                    status: document.status,
                    error: document.error,
                })
            })
            .collect()
    }

    /// Run (or re-run) extraction for one `(document, source)` pair. The
    /// record id is `document_id:source`, so the store's create-once
    /// semantics make this transition idempotent: a repeat call returns
    /// the existing record without touching the collaborator.
    pub async fn extract_document(
        &self,
        ctx: &TenantContext,
        document_id: &str,
        source: ExtractionSource,
    ) -> AppResult<ExtractionRecord> {
        self.ownership
            .require_access(document_id, resource::DOCUMENT, ctx)
            .await?;
        let document = self.find_document(document_id).await?;
        let (conversion, _) = self
            .load_conversion(ctx, &document.conversion_id.to_string())
            .await?;
        Self::ensure_in_progress(&conversion, "extract a document")?;

        let record_id = ExtractionRecord::record_id(document.id, source);
        if let Some(existing) = self
            .store
            .read(entity::EXTRACTION, &record_id, &document.owner_email)
            .await?
        {
            return Self::decode(&existing);
        }

        match document.status {
            DocumentStatus::Uploaded | DocumentStatus::Completed => {}
            DocumentStatus::Processing => {
                return Err(AppError::invalid_state(
                    "document extraction is already in progress",
                ))
            }
            DocumentStatus::Failed => {
                return Err(AppError::invalid_state(
                    "document processing failed; re-upload to retry",
                ))
            }
        }

        self.set_document_status(&document, DocumentStatus::Processing, None)
            .await?;

        let blob_key = Self::blob_key(
            &ctx.tenant_id,
            &document.conversion_id,
            document.id,
            &document.filename,
        );
        let bytes = match self.blob.get(DOCUMENTS_CONTAINER, &blob_key).await {
            Ok(bytes) => bytes,
            Err(err) => {
                let message = format!("failed to fetch document bytes: {err}");
                self.set_document_status(&document, DocumentStatus::Failed, Some(&message))
                    .await?;
                return Err(AppError::upstream(message));
            }
        };

        let payload = match self.run_extraction(source, &bytes, &document.content_type).await {
            Ok(payload) => payload,
            Err(err) => {
                warn!(document_id = %document.id, error = %err, "extraction failed");
                self.set_document_status(&document, DocumentStatus::Failed, Some(&err.to_string()))
                    .await?;
                return Err(AppError::upstream(format!("extraction failed: {err}")));
            }
        };

        let record = ExtractionRecord {
            id: record_id.clone(),
            document_id: document.id,
            conversion_id: document.conversion_id,
            owner_email: document.owner_email.clone(),
            source,
            payload,
            summary: None,
            modifications: Vec::new(),
            preferences: Value::Null,
            extracted_at: Utc::now(),
        };
        let stored = match self
            .store
            .create(
                entity::EXTRACTION,
                &record_id,
                &document.owner_email,
                json!(record),
            )
            .await
        {
            Ok(_) => record,
            // A concurrent extraction won the insert; its record is the
            // one that counts.
            Err(StoreError::AlreadyExists) => {
                let existing = self
                    .store
                    .read(entity::EXTRACTION, &record_id, &document.owner_email)
                    .await?
                    .ok_or_else(AppError::not_found)?;
                Self::decode(&existing)?
            }
            Err(err) => return Err(err.into()),
        };

        self.set_document_status(&document, DocumentStatus::Completed, None)
            .await?;
        info!(
            document_id = %document.id,
            source = source.as_str(),
            "extraction recorded"
        );
        Ok(stored)
    }

    /// Append one user edit to an extraction record. History is strictly
    /// append-only; the original value is whatever the field resolved to
    /// before this edit.
    pub async fn append_modification(
        &self,
        ctx: &TenantContext,
        document_id: &str,
        source: ExtractionSource,
        field: &str,
        new_value: Value,
    ) -> AppResult<ExtractionRecord> {
        self.ownership
            .require_access(document_id, resource::DOCUMENT, ctx)
            .await?;
        let document = self.find_document(document_id).await?;
        let record_id = ExtractionRecord::record_id(document.id, source);

        for _ in 0..CAS_ATTEMPTS {
            let item = self
                .store
                .read(entity::EXTRACTION, &record_id, &document.owner_email)
                .await?
                .ok_or_else(|| {
                    AppError::invalid_state("document has no extraction for that source")
                })?;
            let mut record: ExtractionRecord = Self::decode(&item)?;

            let original_value = record
                .modifications
                .iter()
                .rev()
                .find(|m| m.field == field)
                .map(|m| m.new_value.clone())
                .or_else(|| record.payload.key_value_pairs.get(field).cloned())
                .unwrap_or(Value::Null);
            record.modifications.push(UserModification {
                field: field.to_string(),
                original_value,
                new_value: new_value.clone(),
                author: ctx.user_email.clone(),
                timestamp: Utc::now(),
            });

            match self
                .store
                .replace_if_version(
                    entity::EXTRACTION,
                    &record_id,
                    &document.owner_email,
                    json!(record),
                    item.version,
                )
                .await
            {
                Ok(_) => return Ok(record),
                Err(StoreError::VersionConflict) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(AppError::resource_locked(
            "extraction record is under concurrent modification",
        ))
    }

    pub(crate) async fn find_document(&self, document_id: &str) -> AppResult<Document> {
        let filter = Filter::new().eq("id", document_id);
        let mut items = self.store.query(entity::DOCUMENT, &filter, None).await?;
        match items.pop() {
            Some(item) => Self::decode(&item),
            None => Err(AppError::not_found()),
        }
    }

    async fn run_extraction(
        &self,
        source: ExtractionSource,
        bytes: &[u8],
        content_type: &str,
    ) -> anyhow::Result<ExtractionPayload> {
        match source {
            ExtractionSource::DirectParse => {
                let text = String::from_utf8(bytes.to_vec())
                    .map_err(|_| anyhow::anyhow!("document is not directly parseable text"))?;
                Ok(ExtractionPayload {
                    text,
                    tables: Value::Null,
                    key_value_pairs: json!({}),
                    confidence: 1.0,
                })
            }
            ExtractionSource::Ocr | ExtractionSource::ExternalDi => {
                extract_with_retry(self.intelligence.as_ref(), self.retry, bytes, content_type)
                    .await
            }
        }
    }

    async fn set_document_status(
        &self,
        document: &Document,
        status: DocumentStatus,
        error: Option<&str>,
    ) -> AppResult<()> {
        self.store
            .update(
                entity::DOCUMENT,
                &document.id.to_string(),
                &document.conversion_id.to_string(),
                json!({"status": status, "error": error}),
            )
            .await?;
        Ok(())
    }

    async fn append_document_id(
        &self,
        ctx: &TenantContext,
        conversion_id: &str,
        document_id: Uuid,
    ) -> AppResult<()> {
        for _ in 0..CAS_ATTEMPTS {
            let (mut conversion, version) = self.load_conversion(ctx, conversion_id).await?;
            conversion.document_ids.push(document_id);
            match self.write_conversion(&conversion, version).await {
                Ok(_) => return Ok(()),
                Err(err) if err.code() == crate::error::ErrorCode::ResourceLocked => continue,
                Err(err) => return Err(err),
            }
        }
        Err(AppError::resource_locked(
            "conversion is under concurrent modification",
        ))
    }

    fn blob_key(tenant_id: &str, conversion_id: &Uuid, document_id: Uuid, filename: &str) -> String {
        format!("{tenant_id}/{conversion_id}/{document_id}/{filename}")
    }
}
