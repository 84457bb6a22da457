use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use intake_backend::auth::jwt::JwtService;
use intake_backend::blob::BlobStore;
use intake_backend::clients::{
    DocumentIntelligence, LogNotifier, Notifier, RetryPolicy, Summarizer,
};
use intake_backend::config::AppConfig;
use intake_backend::db::DEFAULT_MAX_POOL_SIZE;
use intake_backend::feedback::FeedbackStore;
use intake_backend::models::ExtractionPayload;
use intake_backend::ownership::OwnershipRegistry;
use intake_backend::quota::{QuotaLedger, Tier};
use intake_backend::routes;
use intake_backend::state::AppState;
use intake_backend::store::{Filter, ItemStore, MemoryStore, StoreResult, StoredItem};
use intake_backend::workflow::ConversionWorkflow;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

#[derive(Default)]
pub struct FakeBlobStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    pub fail_puts: AtomicBool,
}

impl FakeBlobStore {
    #[allow(dead_code)]
    pub async fn object_count(&self) -> usize {
        self.objects.lock().await.len()
    }
}

#[async_trait]
impl BlobStore for FakeBlobStore {
    async fn put(
        &self,
        container: &str,
        key: &str,
        bytes: Vec<u8>,
        _content_type: Option<String>,
    ) -> Result<String> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(anyhow!("blob storage unavailable"));
        }
        let full_key = format!("{container}/{key}");
        self.objects.lock().await.insert(full_key.clone(), bytes);
        Ok(format!("fake://{full_key}"))
    }

    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>> {
        let full_key = format!("{container}/{key}");
        self.objects
            .lock()
            .await
            .get(&full_key)
            .cloned()
            .ok_or_else(|| anyhow!("blob {full_key} missing"))
    }

    async fn delete(&self, container: &str, key: &str) -> Result<bool> {
        let full_key = format!("{container}/{key}");
        Ok(self.objects.lock().await.remove(&full_key).is_some())
    }
}

/// Succeeds with a canned payload once `failures_left` is exhausted.
#[derive(Default)]
pub struct FakeIntelligence {
    pub failures_left: AtomicU32,
    pub calls: AtomicU32,
}

#[async_trait]
impl DocumentIntelligence for FakeIntelligence {
    async fn extract(&self, _bytes: &[u8], _content_type: &str) -> Result<ExtractionPayload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(anyhow!("document intelligence unavailable"));
        }
        Ok(ExtractionPayload {
            text: "Invoice INV-001 issued to Initech for 42.50 EUR".to_string(),
            tables: Value::Null,
            key_value_pairs: json!({
                "invoice_number": "INV-001",
                "customer": "Initech",
                "total": 42.5,
            }),
            confidence: 0.87,
        })
    }
}

pub struct FakeSummarizer {
    pub calls: AtomicU32,
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(&self, extraction: &ExtractionPayload) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({
            "summary": format!("{} characters of procurement text", extraction.text.len()),
            "confidence": extraction.confidence,
        }))
    }
}

/// Queued write executed against the wrapped store just before a watched
/// create lands, standing in for a concurrent writer hitting that window.
#[allow(dead_code)]
pub enum PendingWrite {
    Create {
        entity_type: String,
        id: String,
        partition_key: String,
        data: Value,
    },
    Update {
        entity_type: String,
        id: String,
        partition_key: String,
        patch: Value,
    },
}

#[derive(Default)]
pub struct InterceptStore {
    inner: MemoryStore,
    armed: StdMutex<Option<(String, PendingWrite)>>,
}

#[allow(dead_code)]
impl InterceptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_before_create(&self, watched_entity: &str, write: PendingWrite) {
        *self.armed.lock().unwrap() = Some((watched_entity.to_string(), write));
    }

    async fn fire(&self, entity_type: &str) {
        let pending = {
            let mut guard = self.armed.lock().unwrap();
            match guard.as_ref() {
                Some((watched, _)) if watched == entity_type => guard.take(),
                _ => None,
            }
        };
        let Some((_, write)) = pending else {
            return;
        };
        match write {
            PendingWrite::Create {
                entity_type,
                id,
                partition_key,
                data,
            } => {
                self.inner
                    .create(&entity_type, &id, &partition_key, data)
                    .await
                    .expect("interleaved create");
            }
            PendingWrite::Update {
                entity_type,
                id,
                partition_key,
                patch,
            } => {
                self.inner
                    .update(&entity_type, &id, &partition_key, patch)
                    .await
                    .expect("interleaved update");
            }
        }
    }
}

#[async_trait]
impl ItemStore for InterceptStore {
    async fn create(
        &self,
        entity_type: &str,
        id: &str,
        partition_key: &str,
        data: Value,
    ) -> StoreResult<StoredItem> {
        self.fire(entity_type).await;
        self.inner.create(entity_type, id, partition_key, data).await
    }

    async fn read(
        &self,
        entity_type: &str,
        id: &str,
        partition_key: &str,
    ) -> StoreResult<Option<StoredItem>> {
        self.inner.read(entity_type, id, partition_key).await
    }

    async fn update(
        &self,
        entity_type: &str,
        id: &str,
        partition_key: &str,
        patch: Value,
    ) -> StoreResult<StoredItem> {
        self.inner.update(entity_type, id, partition_key, patch).await
    }

    async fn replace_if_version(
        &self,
        entity_type: &str,
        id: &str,
        partition_key: &str,
        data: Value,
        expected_version: i64,
    ) -> StoreResult<StoredItem> {
        self.inner
            .replace_if_version(entity_type, id, partition_key, data, expected_version)
            .await
    }

    async fn delete(&self, entity_type: &str, id: &str, partition_key: &str) -> StoreResult<bool> {
        self.inner.delete(entity_type, id, partition_key).await
    }

    async fn exists(&self, entity_type: &str, id: &str, partition_key: &str) -> StoreResult<bool> {
        self.inner.exists(entity_type, id, partition_key).await
    }

    async fn query(
        &self,
        entity_type: &str,
        filter: &Filter,
        partition_key: Option<&str>,
    ) -> StoreResult<Vec<StoredItem>> {
        self.inner.query(entity_type, filter, partition_key).await
    }

    async fn increment_bounded(
        &self,
        entity_type: &str,
        id: &str,
        partition_key: &str,
        field: &str,
        limit: Option<i64>,
    ) -> StoreResult<i64> {
        self.inner
            .increment_bounded(entity_type, id, partition_key, field, limit)
            .await
    }
}

/// The workflow service wired over an arbitrary store, for tests that
/// need to interleave writes below the HTTP surface.
#[allow(dead_code)]
pub struct WorkflowHarness {
    pub workflow: Arc<ConversionWorkflow>,
    pub quota: Arc<QuotaLedger>,
    pub blob: Arc<FakeBlobStore>,
    pub store: Arc<dyn ItemStore>,
}

#[allow(dead_code)]
pub fn workflow_over(store: Arc<dyn ItemStore>) -> WorkflowHarness {
    let blob = Arc::new(FakeBlobStore::default());
    let intelligence = Arc::new(FakeIntelligence::default());
    let summarizer = Arc::new(FakeSummarizer {
        calls: AtomicU32::new(0),
    });
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let ownership = Arc::new(OwnershipRegistry::new(store.clone()));
    let quota = Arc::new(QuotaLedger::new(store.clone()));
    let feedback = Arc::new(FeedbackStore::new(store.clone()));
    let retry = RetryPolicy {
        max_retries: 2,
        attempt_timeout: Duration::from_secs(2),
        max_wait: Duration::from_millis(1),
    };
    let workflow = Arc::new(ConversionWorkflow::new(
        store.clone(),
        blob.clone(),
        intelligence,
        summarizer,
        notifier,
        ownership,
        quota.clone(),
        feedback,
        retry,
    ));
    WorkflowHarness {
        workflow,
        quota,
        blob,
        store,
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    pub blob: Arc<FakeBlobStore>,
    pub intelligence: Arc<FakeIntelligence>,
    pub summarizer: Arc<FakeSummarizer>,
}

impl TestApp {
    pub fn new() -> Result<Self> {
        let config = AppConfig {
            database_url: "postgres://unused/test".to_string(),
            database_max_pool_size: DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            cors_allowed_origin: None,
            aws_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: "us-east-1".to_string(),
            s3_bucket: "test-bucket".to_string(),
            intelligence_endpoint: None,
            intelligence_api_key: None,
            summarizer_endpoint: None,
            notify_endpoint: None,
            request_timeout: Duration::from_secs(5),
            processing_timeout: Duration::from_secs(2),
            extraction_max_retries: 2,
            retry_max_wait: Duration::from_millis(1),
        };

        let store: Arc<dyn ItemStore> = Arc::new(MemoryStore::new());
        let blob = Arc::new(FakeBlobStore::default());
        let intelligence = Arc::new(FakeIntelligence::default());
        let summarizer = Arc::new(FakeSummarizer {
            calls: AtomicU32::new(0),
        });
        let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

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
            blob.clone(),
            intelligence.clone(),
            summarizer.clone(),
            notifier,
            ownership,
            quota.clone(),
            feedback,
            retry,
        ));

        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(config, jwt, store, workflow, quota);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            blob,
            intelligence,
            summarizer,
        })
    }

    pub fn token(&self, email: &str, tenant: &str, role: &str, tier: Tier) -> String {
        self.state
            .jwt
            .generate_token(email, tenant, role, tier)
            .expect("token generation")
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn upload_document(
        &self,
        conversion_id: Uuid,
        filename: &str,
        content_type: &str,
        data: &[u8],
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(b"Content-Disposition: form-data; name=\"conversion_id\"\r\n\r\n");
        body.extend(conversion_id.to_string().as_bytes());
        body.extend(b"\r\n");
        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n"
            )
            .as_bytes(),
        );
        body.extend(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
        body.extend(data);
        body.extend(b"\r\n");
        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/documents/upload")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .header("authorization", format!("Bearer {token}"))
            .body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    /// Create a conversion and return its id; asserts success.
    pub async fn create_conversion(&self, token: &str) -> Result<Uuid> {
        let response = self
            .post_json("/api/v1/conversions", &json!({}), Some(token))
            .await?;
        anyhow::ensure!(
            response.status() == StatusCode::CREATED,
            "create conversion failed with status {}",
            response.status()
        );
        let body = body_to_json(response.into_body()).await?;
        Ok(body["id"].as_str().unwrap().parse()?)
    }

    /// Upload a small PDF-typed document and return its id.
    pub async fn upload_sample(&self, conversion_id: Uuid, token: &str) -> Result<Uuid> {
        let response = self
            .upload_document(
                conversion_id,
                "invoice.pdf",
                "application/pdf",
                b"%PDF-1.7 sample",
                token,
            )
            .await?;
        anyhow::ensure!(
            response.status() == StatusCode::CREATED,
            "upload failed with status {}",
            response.status()
        );
        let body = body_to_json(response.into_body()).await?;
        Ok(body["id"].as_str().unwrap().parse()?)
    }
}

pub async fn body_to_json(body: Body) -> Result<Value> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(serde_json::from_slice(&collected.to_bytes())?)
}

/// Fetch the caller's quota snapshot as JSON.
#[allow(dead_code)]
pub async fn quota_snapshot(app: &TestApp, token: &str) -> Result<Value> {
    let response = app.get("/api/v1/quota", Some(token)).await?;
    anyhow::ensure!(
        response.status() == StatusCode::OK,
        "quota read failed with status {}",
        response.status()
    );
    body_to_json(response.into_body()).await
}
