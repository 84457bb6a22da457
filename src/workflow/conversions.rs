use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{entity, resource, Conversion, ConversionStatus};
use crate::quota::Counter;
use crate::tenant::TenantContext;

use super::ConversionWorkflow;

impl ConversionWorkflow {
    /// Open a new conversion session. Billable: one `conversions_used`
    /// per successful create, checked before anything is persisted.
    pub async fn create_conversion(
        &self,
        ctx: &TenantContext,
        metadata: Value,
    ) -> AppResult<Conversion> {
        self.quota
            .check_and_increment(&ctx.user_email, ctx.tier, Counter::Conversions)
            .await?;

        let conversion = Conversion {
            id: Uuid::new_v4(),
            owner_email: ctx.user_email.clone(),
            tenant_id: ctx.tenant_id.clone(),
            status: ConversionStatus::InProgress,
            started_at: Utc::now(),
            completed_at: None,
            document_ids: Vec::new(),
            metadata,
        };

        self.store
            .create(
                entity::CONVERSION,
                &conversion.id.to_string(),
                &ctx.tenant_id,
                json!(conversion),
            )
            .await?;
        self.ownership
            .create_ownership_record(
                &conversion.id.to_string(),
                resource::CONVERSION,
                &ctx.user_email,
                &ctx.tenant_id,
            )
            .await?;

        info!(
            conversion_id = %conversion.id,
            tenant_id = %ctx.tenant_id,
            owner = %ctx.user_email,
            "conversion created"
        );
        Ok(conversion)
    }

    pub async fn get_conversion(
        &self,
        ctx: &TenantContext,
        conversion_id: &str,
    ) -> AppResult<Conversion> {
        let (conversion, _) = self.load_conversion(ctx, conversion_id).await?;
        Ok(conversion)
    }

    /// Terminal soft-delete. Legal from `in_progress` and `completed`
    /// only; the conditional write resolves racing archivers to a single
    /// winner.
    pub async fn archive_conversion(
        &self,
        ctx: &TenantContext,
        conversion_id: &str,
    ) -> AppResult<Conversion> {
        let (mut conversion, version) = self.load_conversion(ctx, conversion_id).await?;
        match conversion.status {
            ConversionStatus::InProgress | ConversionStatus::Completed => {}
            ConversionStatus::Archived => {
                return Err(AppError::resource_locked("conversion is already archived"))
            }
            ConversionStatus::Failed => {
                return Err(AppError::invalid_state(
                    "a failed conversion cannot be archived",
                ))
            }
        }

        conversion.status = ConversionStatus::Archived;
        self.write_conversion(&conversion, version).await?;
        info!(conversion_id = %conversion.id, "conversion archived");
        Ok(conversion)
    }
}
