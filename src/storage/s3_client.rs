//! S3-compatible storage client
//!
//! Wraps the AWS SDK for S3-compatible storage access.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    Client,
};
use chrono::{DateTime, Utc};

use crate::config::StorageConfig;
use crate::error::{AppError, Result, StorageError};

use super::types::{
    anonymous_download_policy, AnonymousAccess, BucketStatus, ListOptions, ObjectList,
    ObjectMetadata, StorageObject,
};
use super::ObjectStore;

/// S3-compatible storage client
#[derive(Clone)]
pub struct S3Client {
    client: Client,
}

impl S3Client {
    /// Create a new S3 client from configuration
    pub fn new(config: &StorageConfig) -> Self {
        Self::with_credentials(config, &config.access_key, &config.secret_key)
    }

    /// Create a client for the same endpoint with different credentials
    /// (provisioning runs as the MinIO root user)
    pub fn with_credentials(config: &StorageConfig, access_key: &str, secret_key: &str) -> Self {
        let credentials = Credentials::new(access_key, secret_key, None, None, "ocr-pipeline");

        let region = config
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(region))
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO and other S3-compatible services
            .build();

        Self {
            client: Client::from_conf(s3_config),
        }
    }
}

/// Full error chain; the SDK's `Display` alone only says "service error"
fn sdk_message<E: std::error::Error>(err: &E) -> String {
    format!("{}", DisplayErrorContext(err))
}

fn is_not_found(message: &str) -> bool {
    message.contains("NoSuchKey") || message.contains("NotFound") || message.contains("404")
}

fn to_datetime(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

/// `CopySource` must be URL-encoded, path separators kept
fn encode_copy_source(bucket: &str, key: &str) -> String {
    let encoded: Vec<String> = key
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    format!("{}/{}", bucket, encoded.join("/"))
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn check_connection(&self) -> Result<Vec<String>> {
        let response = self.client.list_buckets().send().await.map_err(|e| {
            StorageError::ConnectionFailed(sdk_message(&e))
        })?;

        Ok(response
            .buckets()
            .iter()
            .filter_map(|b| b.name().map(|n| n.to_string()))
            .collect())
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<BucketStatus> {
        if self.client.head_bucket().bucket(bucket).send().await.is_ok() {
            return Ok(BucketStatus::Existing);
        }

        match self.client.create_bucket().bucket(bucket).send().await {
            Ok(_) => {
                tracing::info!("Bucket {} created", bucket);
                Ok(BucketStatus::Created)
            }
            Err(e) => {
                let message = sdk_message(&e);
                if message.contains("BucketAlreadyOwnedByYou") || message.contains("BucketAlreadyExists") {
                    Ok(BucketStatus::Existing)
                } else if message.contains("AccessDenied") {
                    Err(StorageError::AccessDenied(bucket.to_string()).into())
                } else {
                    Err(StorageError::SdkError(format!("Failed to create bucket {}: {}", bucket, message)).into())
                }
            }
        }
    }

    async fn list_objects(&self, bucket: &str, options: ListOptions) -> Result<ObjectList> {
        let mut request = self.client.list_objects_v2().bucket(bucket);

        if let Some(prefix) = options.prefix {
            request = request.prefix(prefix);
        }

        if let Some(delimiter) = options.delimiter {
            request = request.delimiter(delimiter);
        }

        if let Some(max_keys) = options.max_keys {
            request = request.max_keys(max_keys);
        }

        if let Some(token) = options.continuation_token {
            request = request.continuation_token(token);
        }

        let response = request.send().await.map_err(|e| {
            let message = sdk_message(&e);
            if message.contains("NoSuchBucket") {
                StorageError::BucketNotFound(bucket.to_string())
            } else {
                StorageError::SdkError(format!("Failed to list objects in {}: {}", bucket, message))
            }
        })?;

        let objects: Vec<ObjectMetadata> = response
            .contents()
            .iter()
            .map(|obj| ObjectMetadata {
                key: obj.key().unwrap_or_default().to_string(),
                size: obj.size().unwrap_or(0),
                last_modified: obj.last_modified().and_then(to_datetime),
                content_type: None, // Not available in list response
                etag: obj.e_tag().map(|s| s.to_string()),
            })
            .collect();

        let prefixes: Vec<String> = response
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix().map(|s| s.to_string()))
            .collect();

        Ok(ObjectList {
            objects,
            prefixes,
            continuation_token: response.next_continuation_token().map(|s| s.to_string()),
            is_truncated: response.is_truncated().unwrap_or(false),
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata> {
        let response = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let message = sdk_message(&e);
                if is_not_found(&message) {
                    AppError::Storage(StorageError::ObjectNotFound(key.to_string()))
                } else {
                    AppError::Storage(StorageError::SdkError(format!("Failed to head object {}: {}", key, message)))
                }
            })?;

        Ok(ObjectMetadata {
            key: key.to_string(),
            size: response.content_length().unwrap_or(0),
            last_modified: response.last_modified().and_then(to_datetime),
            content_type: response.content_type().map(|s| s.to_string()),
            etag: response.e_tag().map(|s| s.to_string()),
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<StorageObject> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let message = sdk_message(&e);
                if is_not_found(&message) {
                    AppError::Storage(StorageError::ObjectNotFound(key.to_string()))
                } else {
                    AppError::Storage(StorageError::SdkError(format!("Failed to get object {}: {}", key, message)))
                }
            })?;

        let metadata = ObjectMetadata {
            key: key.to_string(),
            size: response.content_length().unwrap_or(0),
            last_modified: response.last_modified().and_then(to_datetime),
            content_type: response.content_type().map(|s| s.to_string()),
            etag: response.e_tag().map(|s| s.to_string()),
        };

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::SdkError(format!("Failed to read object body: {}", e)))?
            .into_bytes()
            .to_vec();

        Ok(StorageObject { metadata, data })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let length = data.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| {
                StorageError::SdkError(format!("Failed to put object {}/{}: {}", bucket, key, sdk_message(&e)))
            })?;

        tracing::debug!("Stored {}/{} ({} bytes)", bucket, key, length);
        Ok(())
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<()> {
        self.client
            .copy_object()
            .copy_source(encode_copy_source(src_bucket, src_key))
            .bucket(dst_bucket)
            .key(dst_key)
            .send()
            .await
            .map_err(|e| {
                let message = sdk_message(&e);
                if is_not_found(&message) {
                    AppError::Storage(StorageError::ObjectNotFound(src_key.to_string()))
                } else {
                    AppError::Storage(StorageError::SdkError(format!(
                        "Failed to copy {}/{} to {}/{}: {}",
                        src_bucket, src_key, dst_bucket, dst_key, message
                    )))
                }
            })?;

        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                StorageError::SdkError(format!("Failed to delete {}/{}: {}", bucket, key, sdk_message(&e)))
            })?;

        Ok(())
    }

    async fn set_anonymous_access(&self, bucket: &str, access: AnonymousAccess) -> Result<()> {
        match access {
            AnonymousAccess::Download => {
                let policy = anonymous_download_policy(bucket).to_string();
                self.client
                    .put_bucket_policy()
                    .bucket(bucket)
                    .policy(policy)
                    .send()
                    .await
                    .map_err(|e| {
                        StorageError::SdkError(format!("Failed to set policy on {}: {}", bucket, sdk_message(&e)))
                    })?;
            }
            AnonymousAccess::None => {
                if let Err(e) = self.client.delete_bucket_policy().bucket(bucket).send().await {
                    let message = sdk_message(&e);
                    // No policy to remove is already the desired state
                    if !message.contains("NoSuchBucketPolicy") {
                        return Err(StorageError::SdkError(format!(
                            "Failed to clear policy on {}: {}",
                            bucket, message
                        ))
                        .into());
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_copy_source_keeps_separators() {
        assert_eq!(encode_copy_source("documents", "0001/1.jpg"), "documents/0001/1.jpg");
        assert_eq!(
            encode_copy_source("documents", "scan one/page 1.jpg"),
            "documents/scan%20one/page%201.jpg"
        );
    }

    #[test]
    fn test_is_not_found() {
        assert!(is_not_found("service error: NoSuchKey: The specified key does not exist."));
        assert!(is_not_found("unhandled error (NotFound)"));
        assert!(!is_not_found("AccessDenied"));
    }
}
