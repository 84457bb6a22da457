use std::sync::Arc;
use std::time::Duration;

use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing_subscriber::EnvFilter;

use intake_backend::{
    auth::jwt::JwtService,
    blob::{build_client, BlobStore, S3BlobStore},
    clients::{
        HttpDocumentIntelligence, HttpNotifier, HttpSummarizer, LogNotifier, Notifier, RetryPolicy,
    },
    config::AppConfig,
    db,
    feedback::FeedbackStore,
    ownership::OwnershipRegistry,
    quota::QuotaLedger,
    routes,
    state::AppState,
    store::{ItemStore, PostgresStore},
    workflow::ConversionWorkflow,
};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        database_url = %config.redacted_database_url(),
        s3_bucket = %config.s3_bucket,
        intelligence_enabled = config.intelligence_endpoint.is_some(),
        summarizer_enabled = config.summarizer_endpoint.is_some(),
        "loaded configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    run_migrations(&pool).await?;

    let s3_client = build_client(&config).await?;
    let blob: Arc<dyn BlobStore> = Arc::new(S3BlobStore::new(s3_client, config.s3_bucket.clone()));
    let store: Arc<dyn ItemStore> = Arc::new(PostgresStore::new(pool));

    let http = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()?;
    let intelligence = Arc::new(HttpDocumentIntelligence::new(
        http.clone(),
        config
            .intelligence_endpoint
            .clone()
            .unwrap_or_else(|| "http://localhost:7100".to_string()),
        config.intelligence_api_key.clone(),
    ));
    let summarizer = Arc::new(HttpSummarizer::new(
        http.clone(),
        config
            .summarizer_endpoint
            .clone()
            .unwrap_or_else(|| "http://localhost:7200".to_string()),
        config.processing_timeout,
    ));
    let notifier: Arc<dyn Notifier> = match config.notify_endpoint.clone() {
        Some(endpoint) => Arc::new(HttpNotifier::new(http, endpoint)),
        None => Arc::new(LogNotifier),
    };

    let ownership = Arc::new(OwnershipRegistry::new(store.clone()));
    let quota = Arc::new(QuotaLedger::new(store.clone()));
    let feedback = Arc::new(FeedbackStore::new(store.clone()));
    let retry = RetryPolicy {
        max_retries: config.extraction_max_retries,
        attempt_timeout: config.processing_timeout,
        max_wait: config.retry_max_wait,
    };
    let workflow = Arc::new(ConversionWorkflow::new(
        store.clone(),
        blob,
        intelligence,
        summarizer,
        notifier,
        ownership,
        quota.clone(),
        feedback,
        retry,
    ));

    let jwt = JwtService::from_config(&config)?;
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let state = AppState::new(config, jwt, store, workflow, quota);
    let router = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "intake backend listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn run_migrations(pool: &db::PgPool) -> anyhow::Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow::anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow::anyhow!("failed to run migrations: {err}"))?;
        Ok(())
    })
    .await??;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
    // Give in-flight requests a moment to settle before the listener drops.
    tokio::time::sleep(Duration::from_millis(100)).await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
