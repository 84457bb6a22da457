use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::{state::AppState, tenant, tenant::TenantContext};

pub mod conversions;
pub mod documents;
pub mod feedback;
pub mod health;
pub mod quota;
pub mod schemas;
pub mod summaries;

/// Every request runs inside its own tenant slot; the auth extractor
/// fills it, and it evaporates when the response is done.
async fn tenant_scoped(request: Request, next: Next) -> Response {
    tenant::scope(next.run(request)).await
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| {
                    trimmed
                        .parse::<HeaderValue>()
                        .expect("invalid CORS allowed origin")
                })
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(headers))
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let conversions_routes = Router::new()
        .route("/", post(conversions::create_conversion))
        .route("/:id", get(conversions::get_conversion))
        .route("/:id/archive", post(conversions::archive_conversion))
        .route("/:id/schema", get(schemas::schema_lineage));

    let documents_routes = Router::new()
        .route("/upload", post(documents::upload_document))
        .route("/:id", get(documents::get_document))
        .route("/:id/status", get(documents::conversion_status))
        .route("/:id/extract", post(documents::extract_document))
        .route("/:id/modifications", post(documents::append_modification))
        .route("/:id/output", get(documents::document_output));

    let schema_routes = Router::new()
        .route("/generate", post(schemas::generate_schema))
        .route("/revise", post(schemas::revise_schema))
        .route("/finalize", post(schemas::finalize_schema));

    let summary_routes = Router::new().route("/generate", post(summaries::generate_summary));

    let docs_routes = Router::new().route("/convert", post(conversions::generate_output));

    let exports_routes = Router::new()
        .route("/:id", get(feedback::get_export))
        .route(
            "/:id/feedback",
            post(feedback::submit_feedback).get(feedback::list_feedback),
        );

    let quota_routes = Router::new().route("/", get(quota::get_quota));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/v1/conversions", conversions_routes)
        .nest("/api/v1/documents", documents_routes)
        .nest("/api/v1/schema", schema_routes)
        .nest("/api/v1/summary", summary_routes)
        .nest("/api/v1/docs", docs_routes)
        .nest("/api/v1/exports", exports_routes)
        .nest("/api/v1/quota", quota_routes)
        .layer(middleware::from_extractor_with_state::<TenantContext, _>(
            protected_state,
        ));

    Router::new()
        .merge(protected_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(middleware::from_fn(tenant_scoped))
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024 * 64))
}
