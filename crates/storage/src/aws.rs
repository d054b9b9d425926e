//! AWS S3 object store client
//!
//! Adapts the AWS SDK to [`ObjectStore`]:
//! - Static credentials from settings, or the default AWS provider chain
//! - Multipart uploads for large packages
//! - Custom endpoint support (for MinIO, LocalStack, etc.)

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Credentials, Region},
    primitives::ByteStream,
    types::{
        BucketLocationConstraint, CompletedMultipartUpload, CompletedPart,
        CreateBucketConfiguration,
    },
    Client,
};
use bytes::Bytes;
use pkgstash_core::{Error, Result, StorageConfig, DEFAULT_REGION};
use tracing::{debug, instrument};

use crate::object_store::{ObjectMetadata, ObjectPage, ObjectStore};

/// Threshold for switching to multipart upload (5 MB)
const MULTIPART_THRESHOLD: usize = 5 * 1024 * 1024;

/// Part size for multipart uploads (5 MB minimum required by S3)
const MULTIPART_PART_SIZE: usize = 5 * 1024 * 1024;

/// Credentials provider name reported to the SDK
const CREDENTIALS_SOURCE: &str = "pkgstash-settings";

/// [`ObjectStore`] backed by the AWS SDK S3 client
#[derive(Debug, Clone)]
pub struct AwsObjectStore {
    client: Client,
}

impl AwsObjectStore {
    /// Wrap an existing SDK client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from storage configuration
    ///
    /// Uses the configured access key pair when present, otherwise the
    /// environment or instance profile.
    pub async fn from_config(config: &StorageConfig) -> Self {
        let region = if config.region.is_empty() {
            DEFAULT_REGION.to_string()
        } else {
            config.region.clone()
        };
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region));

        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                CREDENTIALS_SOURCE,
            ));
        }

        let aws_config = loader.load().await;
        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        if let Some(endpoint) = &config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        Self {
            client: Client::from_conf(s3_config_builder.build()),
        }
    }

    /// Perform multipart upload for large packages
    async fn multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        metadata: ObjectMetadata,
    ) -> Result<()> {
        let size = data.len();

        let create_result = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .set_metadata(Some(metadata))
            .send()
            .await
            .map_err(|e| Error::storage(format!("Failed to initiate multipart upload: {}", e)))?;

        let upload_id = create_result
            .upload_id()
            .ok_or_else(|| Error::storage("No upload_id returned"))?;

        debug!(key, upload_id, size, "Started multipart upload");

        let mut completed_parts = Vec::new();
        let mut offset = 0;
        let mut part_number = 1;

        while offset < data.len() {
            let end = std::cmp::min(offset + MULTIPART_PART_SIZE, data.len());
            let part_data = data.slice(offset..end);

            let upload_part_result = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(part_data))
                .send()
                .await
                .map_err(|e| {
                    self.abort_multipart_upload(bucket, key, upload_id);
                    Error::storage(format!("Failed to upload part {}: {}", part_number, e))
                })?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(upload_part_result.e_tag().map(String::from))
                    .build(),
            );

            debug!(part_number, offset, end, "Uploaded part");
            offset = end;
            part_number += 1;
        }

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| {
                self.abort_multipart_upload(bucket, key, upload_id);
                Error::storage(format!("Failed to complete multipart upload: {}", e))
            })?;

        debug!(key, size, "Completed multipart upload");
        Ok(())
    }

    /// Abort a multipart upload (best effort, for cleanup)
    fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) {
        let client = self.client.clone();
        let bucket = bucket.to_string();
        let key = key.to_string();
        let upload_id = upload_id.to_string();

        tokio::spawn(async move {
            let _ = client
                .abort_multipart_upload()
                .bucket(&bucket)
                .key(&key)
                .upload_id(&upload_id)
                .send()
                .await;
        });
    }
}

#[async_trait]
impl ObjectStore for AwsObjectStore {
    #[instrument(skip(self))]
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(Error::storage(format!("S3 head_bucket failed: {}", e))),
        }
    }

    #[instrument(skip(self))]
    async fn create_bucket(&self, bucket: &str, region: &str) -> Result<()> {
        let mut request = self.client.create_bucket().bucket(bucket);

        // us-east-1 is the implicit location and rejects an explicit constraint
        if region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }

        request
            .send()
            .await
            .map_err(|e| Error::storage(format!("S3 create_bucket failed: {}", e)))?;
        Ok(())
    }

    #[instrument(skip(self, body, metadata), fields(size = body.len()))]
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        metadata: ObjectMetadata,
    ) -> Result<()> {
        if body.len() > MULTIPART_THRESHOLD {
            return self.multipart_upload(bucket, key, body, metadata).await;
        }

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .set_metadata(Some(metadata))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| Error::storage(format!("S3 put_object failed: {}", e)))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn object_metadata(&self, bucket: &str, key: &str) -> Result<Option<ObjectMetadata>> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(output) => Ok(Some(output.metadata().cloned().unwrap_or_default())),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(None),
            Err(e) => Err(Error::storage(format!("S3 head_object failed: {}", e))),
        }
    }

    #[instrument(skip(self))]
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Error::storage(format!("S3 delete_object failed: {}", e)))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_objects(&self, bucket: &str, token: Option<String>) -> Result<ObjectPage> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .set_continuation_token(token)
            .send()
            .await
            .map_err(|e| Error::storage(format!("S3 list_objects failed: {}", e)))?;

        let keys = response
            .contents()
            .iter()
            .filter_map(|object| object.key().map(String::from))
            .collect();

        let next_token = if response.is_truncated() == Some(true) {
            response.next_continuation_token().map(String::from)
        } else {
            None
        };

        Ok(ObjectPage { keys, next_token })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::config::retry::RetryConfig;
    use aws_smithy_runtime::client::http::test_util::{ReplayEvent, StaticReplayClient};
    use aws_smithy_types::body::SdkBody;
    use std::time::Duration;

    const BUCKET: &str = "mybucket";
    const KEY: &str = "mypkg/mypkg-1.0.tar.gz";

    fn event(status: u16, headers: &[(&str, &str)], body: &str) -> ReplayEvent {
        let request = http::Request::builder()
            .uri(format!("https://{}.s3.amazonaws.com/{}", BUCKET, KEY))
            .body(SdkBody::empty())
            .unwrap();
        let mut response = http::Response::builder().status(status);
        for (name, value) in headers {
            response = response.header(*name, *value);
        }
        ReplayEvent::new(request, response.body(SdkBody::from(body.to_string())).unwrap())
    }

    fn store(replay: &StaticReplayClient) -> AwsObjectStore {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(DEFAULT_REGION))
            .credentials_provider(Credentials::new("abc", "bcd", None, None, "test"))
            .retry_config(RetryConfig::disabled())
            .http_client(replay.clone())
            .build();
        AwsObjectStore::from_client(Client::from_conf(config))
    }

    #[tokio::test]
    async fn test_failed_completion_aborts_upload() {
        let replay = StaticReplayClient::new(vec![
            event(
                200,
                &[],
                "<InitiateMultipartUploadResult><Bucket>mybucket</Bucket>\
                 <Key>mypkg/mypkg-1.0.tar.gz</Key><UploadId>upload-1</UploadId>\
                 </InitiateMultipartUploadResult>",
            ),
            event(200, &[("ETag", "\"part-1\"")], ""),
            event(200, &[("ETag", "\"part-2\"")], ""),
            event(
                500,
                &[],
                "<Error><Code>InternalError</Code><Message>failed</Message></Error>",
            ),
            event(204, &[], ""),
        ]);
        let store = store(&replay);

        let body = Bytes::from(vec![0u8; MULTIPART_PART_SIZE + 1]);
        let err = store
            .multipart_upload(BUCKET, KEY, body, ObjectMetadata::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("complete multipart upload"));

        // The abort runs on a spawned task
        let mut aborted = false;
        for _ in 0..100 {
            aborted = replay.actual_requests().any(|request| {
                request.method() == "DELETE" && request.uri().contains("uploadId=upload-1")
            });
            if aborted {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(aborted, "multipart upload should be aborted");
    }
}
