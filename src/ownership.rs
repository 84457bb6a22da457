use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::{entity, OwnershipRecord};
use crate::store::{ItemStore, StoreError};
use crate::tenant::{TenantContext, ADMIN_ROLE};

/// Tracks which user owns which resource, scoped per tenant. The record
/// key is the full `(tenant_id, resource_type, resource_id)` triple;
/// identical resource ids under different tenants never collide.
pub struct OwnershipRegistry {
    store: Arc<dyn ItemStore>,
}

impl OwnershipRegistry {
    pub fn new(store: Arc<dyn ItemStore>) -> Self {
        Self { store }
    }

    fn record_id(tenant_id: &str, resource_type: &str, resource_id: &str) -> String {
        format!("{tenant_id}:{resource_type}:{resource_id}")
    }

    /// Insert iff the triple is absent. Returns `false` when the resource
    /// is already tracked for this tenant.
    pub async fn create_ownership_record(
        &self,
        resource_id: &str,
        resource_type: &str,
        owner_email: &str,
        tenant_id: &str,
    ) -> AppResult<bool> {
        let record = OwnershipRecord {
            tenant_id: tenant_id.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            owner_email: owner_email.to_string(),
            created_at: Utc::now(),
        };
        let id = Self::record_id(tenant_id, resource_type, resource_id);
        match self
            .store
            .create(entity::OWNERSHIP, &id, tenant_id, json!(record))
            .await
        {
            Ok(_) => {
                debug!(resource_type, resource_id, tenant_id, "ownership recorded");
                Ok(true)
            }
            Err(StoreError::AlreadyExists) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// True iff a record exists for this tenant and resource with a
    /// matching owner, or the requester is a tenant admin. Admins never
    /// cross the tenant boundary: the lookup itself is tenant-keyed.
    pub async fn verify_ownership(
        &self,
        resource_id: &str,
        resource_type: &str,
        ctx: &TenantContext,
    ) -> AppResult<bool> {
        let id = Self::record_id(&ctx.tenant_id, resource_type, resource_id);
        let Some(item) = self.store.read(entity::OWNERSHIP, &id, &ctx.tenant_id).await? else {
            return Ok(false);
        };
        let record: OwnershipRecord = serde_json::from_value(item.data)?;
        Ok(record.owner_email == ctx.user_email || Self::is_admin_override(&ctx.role))
    }

    pub fn is_admin_override(role: &str) -> bool {
        role == ADMIN_ROLE
    }

    /// Access gate used before every resource-scoped operation. A missing
    /// record (including any cross-tenant attempt) is `NotFound`, never
    /// `Forbidden`, so other tenants' resources cannot be enumerated.
    pub async fn require_access(
        &self,
        resource_id: &str,
        resource_type: &str,
        ctx: &TenantContext,
    ) -> AppResult<()> {
        let id = Self::record_id(&ctx.tenant_id, resource_type, resource_id);
        let Some(item) = self.store.read(entity::OWNERSHIP, &id, &ctx.tenant_id).await? else {
            return Err(AppError::not_found());
        };
        let record: OwnershipRecord = serde_json::from_value(item.data)?;
        if record.owner_email == ctx.user_email || Self::is_admin_override(&ctx.role) {
            Ok(())
        } else {
            Err(AppError::forbidden())
        }
    }
}
