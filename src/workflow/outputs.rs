use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::feedback::NewFeedback;
use crate::models::{
    entity, resource, ConversionStatus, ExportRecord, ExtractionRecord, ExtractionSource,
    FeedbackRecord, SchemaRecord,
};
use crate::quota::Counter;
use crate::store::Filter;
use crate::tenant::TenantContext;

use super::{ConversionWorkflow, EXPORTS_CONTAINER};

impl ConversionWorkflow {
    /// Run the summarizer over one extraction and store the result on the
    /// record. Billable (`api_calls_used`).
    pub async fn generate_summary(
        &self,
        ctx: &TenantContext,
        document_id: &str,
        source: ExtractionSource,
    ) -> AppResult<Value> {
        self.ownership
            .require_access(document_id, resource::DOCUMENT, ctx)
            .await?;
        let document = self.find_document(document_id).await?;
        let (conversion, _) = self
            .load_conversion(ctx, &document.conversion_id.to_string())
            .await?;
        Self::ensure_in_progress(&conversion, "generate a summary")?;

        let record_id = ExtractionRecord::record_id(document.id, source);
        let item = self
            .store
            .read(entity::EXTRACTION, &record_id, &document.owner_email)
            .await?
            .ok_or_else(|| {
                AppError::invalid_state("document has not been extracted for that source")
            })?;
        let record: ExtractionRecord = Self::decode(&item)?;

        self.quota
            .check_and_increment(&ctx.user_email, ctx.tier, Counter::ApiCalls)
            .await?;

        let summary = self
            .summarizer
            .summarize(&record.payload)
            .await
            .map_err(|err| AppError::upstream(format!("summarization failed: {err}")))?;

        self.store
            .update(
                entity::EXTRACTION,
                &record_id,
                &document.owner_email,
                json!({"summary": summary}),
            )
            .await?;
        info!(document_id = %document.id, source = source.as_str(), "summary generated");
        Ok(summary)
    }

    /// Produce the final export for a conversion and close it out. Needs
    /// a finalized schema (the initial schema alone is accepted when the
    /// lineage was never finalized). Billable (`exports_used`); the
    /// conversion moves to `completed` through a conditional write, or to
    /// `failed` when the export cannot be stored.
    pub async fn generate_output(
        &self,
        ctx: &TenantContext,
        conversion_id: &str,
        format: Option<String>,
    ) -> AppResult<ExportRecord> {
        let (conversion, _) = self.load_conversion(ctx, conversion_id).await?;
        Self::ensure_in_progress(&conversion, "generate output")?;
        let partition = conversion.id.to_string();

        let schema = match self
            .store
            .read(
                entity::FINAL_SCHEMA,
                &SchemaRecord::final_id(conversion.id),
                &partition,
            )
            .await?
        {
            Some(item) => Self::decode::<SchemaRecord>(&item)?,
            None => {
                let initial = self
                    .store
                    .read(
                        entity::SCHEMA,
                        &SchemaRecord::initial_id(conversion.id),
                        &partition,
                    )
                    .await?
                    .ok_or_else(|| {
                        AppError::invalid_state(
                            "no schema has been generated for this conversion",
                        )
                    })?;
                Self::decode::<SchemaRecord>(&initial)?
            }
        };

        self.quota
            .check_and_increment(&ctx.user_email, ctx.tier, Counter::Exports)
            .await?;

        let format = format.unwrap_or_else(|| "json".to_string());
        let summaries = self.collect_summaries(&conversion.id).await?;
        let output = json!({
            "conversion_id": conversion.id,
            "generated_at": Utc::now(),
            "schema": schema.content,
            "schema_version": schema.version,
            "document_ids": conversion.document_ids,
            "summaries": summaries,
        });
        let bytes = serde_json::to_vec_pretty(&output)?;

        let export_id = Uuid::new_v4();
        let blob_key = format!("{}/{}/{export_id}.json", ctx.tenant_id, conversion.id);
        let output_ref = match self
            .blob
            .put(
                EXPORTS_CONTAINER,
                &blob_key,
                bytes,
                Some("application/json".to_string()),
            )
            .await
        {
            Ok(output_ref) => output_ref,
            // Losing the export bytes is fatal for the whole conversion,
            // not just this request.
            Err(err) => {
                warn!(conversion_id = %conversion.id, error = %err, "export upload failed");
                if let Err(write_err) = self
                    .transition_conversion(ctx, conversion_id, ConversionStatus::Failed, None)
                    .await
                {
                    warn!(
                        conversion_id = %conversion.id,
                        error = write_err.message(),
                        "failed to record conversion failure"
                    );
                }
                return Err(AppError::upstream(format!("export upload failed: {err}")));
            }
        };

        let export = ExportRecord {
            id: export_id,
            conversion_id: conversion.id,
            owner_email: conversion.owner_email.clone(),
            format,
            content_type: "application/json".to_string(),
            output_ref,
            created_at: Utc::now(),
        };
        self.store
            .create(entity::EXPORT, &export.id.to_string(), &partition, json!(export))
            .await?;
        self.ownership
            .create_ownership_record(
                &export.id.to_string(),
                resource::EXPORT,
                &conversion.owner_email,
                &ctx.tenant_id,
            )
            .await?;

        let conversion = self
            .transition_conversion(
                ctx,
                conversion_id,
                ConversionStatus::Completed,
                Some(Utc::now()),
            )
            .await?;

        // Fire-and-forget; delivery failures are logged by the notifier.
        self.notifier
            .send(
                &conversion.owner_email,
                "output-ready",
                &json!({"conversion_id": conversion.id, "export_id": export.id}),
            )
            .await;

        info!(
            conversion_id = %conversion.id,
            export_id = %export.id,
            "output generated, conversion completed"
        );
        Ok(export)
    }

    pub async fn get_export(&self, ctx: &TenantContext, export_id: &str) -> AppResult<ExportRecord> {
        self.ownership
            .require_access(export_id, resource::EXPORT, ctx)
            .await?;
        let filter = Filter::new().eq("id", export_id);
        let mut items = self.store.query(entity::EXPORT, &filter, None).await?;
        match items.pop() {
            Some(item) => Self::decode(&item),
            None => Err(AppError::not_found()),
        }
    }

    /// Latest export belonging to the conversion a document is part of.
    pub async fn output_for_document(
        &self,
        ctx: &TenantContext,
        document_id: &str,
    ) -> AppResult<ExportRecord> {
        self.ownership
            .require_access(document_id, resource::DOCUMENT, ctx)
            .await?;
        let document = self.find_document(document_id).await?;
        let items = self
            .store
            .query(
                entity::EXPORT,
                &Filter::new(),
                Some(&document.conversion_id.to_string()),
            )
            .await?;
        match items.last() {
            Some(item) => Self::decode(item),
            None => Err(AppError::not_found()),
        }
    }

    /// Feedback is legal only once the export exists, which the ownership
    /// gate enforces for free: no export record, no ownership row, not
    /// found. Never billable.
    pub async fn submit_export_feedback(
        &self,
        ctx: &TenantContext,
        export_id: &str,
        feedback: NewFeedback,
    ) -> AppResult<FeedbackRecord> {
        self.ownership
            .require_access(export_id, resource::EXPORT, ctx)
            .await?;
        self.feedback.submit_feedback(ctx, export_id, feedback).await
    }

    pub async fn list_export_feedback(
        &self,
        ctx: &TenantContext,
        export_id: &str,
    ) -> AppResult<Vec<FeedbackRecord>> {
        self.ownership
            .require_access(export_id, resource::EXPORT, ctx)
            .await?;
        self.feedback.list_feedback(export_id).await
    }

    async fn collect_summaries(&self, conversion_id: &Uuid) -> AppResult<Vec<Value>> {
        let filter = Filter::new().eq("conversion_id", conversion_id.to_string());
        let items = self.store.query(entity::EXTRACTION, &filter, None).await?;
        let mut summaries = Vec::new();
        for item in &items {
            let record: ExtractionRecord = Self::decode(item)?;
            if let Some(summary) = record.summary {
                summaries.push(json!({
                    "document_id": record.document_id,
                    "source": record.source.as_str(),
                    "summary": summary,
                }));
            }
        }
        Ok(summaries)
    }
}
