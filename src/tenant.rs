use std::cell::RefCell;
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::quota::Tier;

pub const ADMIN_ROLE: &str = "admin";

/// The resolved identity of the caller. Built once per request from the
/// verified bearer claims and passed explicitly into every service call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    pub tenant_id: String,
    pub user_email: String,
    pub role: String,
    pub tier: Tier,
}

impl TenantContext {
    pub fn new(
        tenant_id: impl Into<String>,
        user_email: impl Into<String>,
        role: impl Into<String>,
        tier: Tier,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_email: user_email.into(),
            role: role.into(),
            tier,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }
}

tokio::task_local! {
    static CURRENT_TENANT: RefCell<Option<TenantContext>>;
}

/// Run `fut` inside a fresh tenant scope. Each request gets its own slot;
/// nothing leaks between concurrent tasks and the slot vanishes with the
/// scope.
pub async fn scope<F: Future>(fut: F) -> F::Output {
    CURRENT_TENANT.scope(RefCell::new(None), fut).await
}

pub fn set_current_tenant(ctx: TenantContext) {
    let _ = CURRENT_TENANT.try_with(|slot| *slot.borrow_mut() = Some(ctx));
}

pub fn get_current_tenant() -> AppResult<TenantContext> {
    CURRENT_TENANT
        .try_with(|slot| slot.borrow().clone())
        .ok()
        .flatten()
        .ok_or_else(AppError::unauthenticated)
}

pub fn clear_current_tenant() {
    let _ = CURRENT_TENANT.try_with(|slot| slot.borrow_mut().take());
}
