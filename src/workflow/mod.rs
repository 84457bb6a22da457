use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::blob::BlobStore;
use crate::clients::{DocumentIntelligence, Notifier, RetryPolicy, Summarizer};
use crate::error::{AppError, AppResult, ErrorCode};
use crate::feedback::FeedbackStore;
use crate::models::{entity, resource, Conversion, ConversionStatus};
use crate::ownership::OwnershipRegistry;
use crate::quota::QuotaLedger;
use crate::store::{ItemStore, StoredItem};
use crate::tenant::TenantContext;

mod conversions;
mod documents;
mod outputs;
mod schemas;

pub use documents::DocumentStatusView;

pub(crate) const DOCUMENTS_CONTAINER: &str = "documents";
pub(crate) const EXPORTS_CONTAINER: &str = "exports";

// Bounded attempts for read-modify-write loops on contended records.
pub(crate) const CAS_ATTEMPTS: u32 = 3;

/// The conversion lifecycle service. Every mutating operation runs the
/// same gauntlet in order: tenant context, ownership, quota, then the
/// transition itself. Serialization across stateless instances comes from
/// the store's create-once and versioned writes, never a process lock.
pub struct ConversionWorkflow {
    pub(crate) store: Arc<dyn ItemStore>,
    pub(crate) blob: Arc<dyn BlobStore>,
    pub(crate) intelligence: Arc<dyn DocumentIntelligence>,
    pub(crate) summarizer: Arc<dyn Summarizer>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) ownership: Arc<OwnershipRegistry>,
    pub(crate) quota: Arc<QuotaLedger>,
    pub(crate) feedback: Arc<FeedbackStore>,
    pub(crate) retry: RetryPolicy,
}

impl ConversionWorkflow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ItemStore>,
        blob: Arc<dyn BlobStore>,
        intelligence: Arc<dyn DocumentIntelligence>,
        summarizer: Arc<dyn Summarizer>,
        notifier: Arc<dyn Notifier>,
        ownership: Arc<OwnershipRegistry>,
        quota: Arc<QuotaLedger>,
        feedback: Arc<FeedbackStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            blob,
            intelligence,
            summarizer,
            notifier,
            ownership,
            quota,
            feedback,
            retry,
        }
    }

    pub(crate) fn decode<T: DeserializeOwned>(item: &StoredItem) -> AppResult<T> {
        serde_json::from_value(item.data.clone()).map_err(AppError::from)
    }

    /// Ownership-gated conversion load. Cross-tenant ids fall out of the
    /// registry lookup as `NotFound`; the tenant-partitioned read makes
    /// the same guarantee a second time.
    pub(crate) async fn load_conversion(
        &self,
        ctx: &TenantContext,
        conversion_id: &str,
    ) -> AppResult<(Conversion, i64)> {
        self.ownership
            .require_access(conversion_id, resource::CONVERSION, ctx)
            .await?;
        let item = self
            .store
            .read(entity::CONVERSION, conversion_id, &ctx.tenant_id)
            .await?
            .ok_or_else(AppError::not_found)?;
        Ok((Self::decode(&item)?, item.version))
    }

    /// Guard for transitions that are only legal while the conversion is
    /// open.
    pub(crate) fn ensure_in_progress(conversion: &Conversion, action: &str) -> AppResult<()> {
        match conversion.status {
            ConversionStatus::InProgress => Ok(()),
            ConversionStatus::Archived => Err(AppError::resource_locked(format!(
                "cannot {action}: conversion is archived"
            ))),
            ConversionStatus::Completed => Err(AppError::invalid_state(format!(
                "cannot {action}: conversion is already completed"
            ))),
            ConversionStatus::Failed => Err(AppError::invalid_state(format!(
                "cannot {action}: conversion has failed"
            ))),
        }
    }

    /// Move a conversion to a new status through a bounded CAS loop, so a
    /// concurrent writer that bumps the version (an upload appending its
    /// document id, say) does not fail the transition outright.
    pub(crate) async fn transition_conversion(
        &self,
        ctx: &TenantContext,
        conversion_id: &str,
        status: ConversionStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> AppResult<Conversion> {
        for _ in 0..CAS_ATTEMPTS {
            let (mut conversion, version) = self.load_conversion(ctx, conversion_id).await?;
            conversion.status = status;
            conversion.completed_at = completed_at;
            match self.write_conversion(&conversion, version).await {
                Ok(_) => return Ok(conversion),
                Err(err) if err.code() == ErrorCode::ResourceLocked => continue,
                Err(err) => return Err(err),
            }
        }
        Err(AppError::resource_locked(
            "conversion is under concurrent modification",
        ))
    }

    /// Conditional write of a whole conversion body. A concurrent writer
    /// surfaces as `VersionConflict` from the store.
    pub(crate) async fn write_conversion(
        &self,
        conversion: &Conversion,
        expected_version: i64,
    ) -> AppResult<i64> {
        let item = self
            .store
            .replace_if_version(
                entity::CONVERSION,
                &conversion.id.to_string(),
                &conversion.tenant_id,
                json!(conversion),
                expected_version,
            )
            .await?;
        Ok(item.version)
    }
}
