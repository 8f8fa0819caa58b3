//! S3 backend for dirkeep.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Output;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use dirkeep_core::{ListPage, ObjectStore};
use std::path::Path;
use tracing::{debug, info};

/// S3 bucket used as the backup destination.
pub struct S3Remote {
    client: Client,
    bucket: String,
}

impl S3Remote {
    /// Build a client from the ambient AWS configuration (environment, profile, instance role).
    /// A custom `endpoint` switches to path-style addressing for S3-compatible stores.
    pub async fn connect(
        bucket: impl Into<String>,
        endpoint: Option<String>,
        region: Option<String>,
    ) -> Result<Self> {
        let bucket = bucket.into();
        if bucket.trim().is_empty() {
            return Err(anyhow!("s3 bucket name is empty"));
        }
        if let Some(endpoint) = &endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(anyhow!("s3 endpoint {endpoint:?} must start with http:// or https://"));
            }
        }
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        if let Some(endpoint) = &endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let conf = loader.load().await;
        let s3_conf = aws_sdk_s3::config::Builder::from(&conf)
            .force_path_style(endpoint.is_some())
            .build();
        info!(
            %bucket,
            region = ?conf.region(),
            endpoint = endpoint.as_deref().unwrap_or("default"),
            "s3 client ready"
        );
        Ok(Self {
            client: Client::from_conf(s3_conf),
            bucket,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3Remote {
    async fn put(&self, key: &str, local: &Path) -> Result<()> {
        let body = ByteStream::from_path(local)
            .await
            .with_context(|| format!("open {}", local.display()))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| anyhow!("put_object s3://{}/{key}: {}", self.bucket, DisplayErrorContext(&e)))?;
        debug!(bucket = %self.bucket, %key, "put_object ok");
        Ok(())
    }

    async fn list_by_prefix(&self, prefix: &str, continuation: Option<String>) -> Result<ListPage> {
        let out = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .set_continuation_token(continuation)
            .send()
            .await
            .map_err(|e| {
                anyhow!(
                    "list_objects_v2 s3://{}/{prefix}: {}",
                    self.bucket,
                    DisplayErrorContext(&e)
                )
            })?;
        Ok(list_page(&out))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                anyhow!(
                    "delete_object s3://{}/{key}: {}",
                    self.bucket,
                    DisplayErrorContext(&e)
                )
            })?;
        debug!(bucket = %self.bucket, %key, "delete_object ok");
        Ok(())
    }
}

fn list_page(out: &ListObjectsV2Output) -> ListPage {
    let keys = out
        .contents()
        .iter()
        .filter_map(|obj| obj.key().map(str::to_string))
        .collect();
    ListPage {
        keys,
        is_truncated: out.is_truncated().unwrap_or(false),
        next_token: out.next_continuation_token().map(str::to_string),
    }
}
