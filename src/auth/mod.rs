pub mod jwt;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;

use crate::{error::AppError, state::AppState, tenant, tenant::TenantContext};

#[async_trait]
impl FromRequestParts<AppState> for TenantContext {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthenticated())?;

        let claims = state
            .jwt
            .verify_token(bearer.token())
            .map_err(|_| AppError::unauthenticated())?;

        let ctx = TenantContext::new(claims.tenant_id, claims.sub, claims.role, claims.tier);
        // Register with the request-scoped slot so code below the handler
        // can consult the current tenant without threading it manually.
        tenant::set_current_tenant(ctx.clone());
        Ok(ctx)
    }
}
