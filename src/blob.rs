use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    Client as S3Client,
};

use crate::config::AppConfig;

/// Raw document and export bytes live behind this trait; the workflow
/// never sees a concrete object store. `container` maps to a key prefix
/// inside one bucket in the S3 implementation.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Store bytes and return a stable reference URI for the blob.
    async fn put(
        &self,
        container: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
    ) -> Result<String>;

    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>>;

    async fn delete(&self, container: &str, key: &str) -> Result<bool>;
}

pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    fn object_key(container: &str, key: &str) -> String {
        format!("{container}/{key}")
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(
        &self,
        container: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
    ) -> Result<String> {
        let object_key = Self::object_key(container, key);
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(ByteStream::from(bytes));

        if let Some(content_type) = content_type {
            request = request.content_type(content_type);
        }

        request
            .send()
            .await
            .context("failed to upload blob to S3")?;

        Ok(format!("s3://{}/{object_key}", self.bucket))
    }

    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(Self::object_key(container, key))
            .send()
            .await
            .context("failed to download blob from S3")?;

        let bytes = response
            .body
            .collect()
            .await
            .context("failed to read blob stream")?
            .into_bytes()
            .to_vec();

        Ok(bytes)
    }

    async fn delete(&self, container: &str, key: &str) -> Result<bool> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(Self::object_key(container, key))
            .send()
            .await
            .context("failed to delete blob from S3")?;
        Ok(true)
    }
}

pub async fn build_client(config: &AppConfig) -> Result<S3Client> {
    let region = Region::new(config.aws_region.clone());
    let region_provider = RegionProviderChain::first_try(Some(region))
        .or_default_provider()
        .or_else("us-east-1");

    #[allow(deprecated)]
    let mut loader = aws_config::from_env().region(region_provider);

    if let Some(endpoint) = &config.aws_endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }

    if let (Some(access_key), Some(secret_key)) = (
        config.aws_access_key_id.clone(),
        config.aws_secret_access_key.clone(),
    ) {
        let credentials = Credentials::new(access_key, secret_key, None, None, "static");
        loader = loader.credentials_provider(credentials);
    }

    let base_config = loader.load().await;
    let s3_config = S3ConfigBuilder::from(&base_config)
        .force_path_style(true)
        .build();

    Ok(S3Client::from_conf(s3_config))
}
