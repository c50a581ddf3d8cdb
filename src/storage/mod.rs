//! Storage module for S3-compatible backends
//!
//! Supports MinIO, Cloudflare R2, Backblaze B2, and AWS S3. Everything that
//! touches buckets goes through [`ObjectStore`] so the worker and the HTTP
//! routes can run against an in-memory store in tests.

#[cfg(test)]
pub mod memory;
mod s3_client;
mod types;

use async_trait::async_trait;

pub use s3_client::S3Client;
pub use types::*;

use crate::error::{AppError, Result, StorageError};

/// Multi-bucket object storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Verify credentials and reachability, returning bucket names
    async fn check_connection(&self) -> Result<Vec<String>>;

    /// Create a bucket unless it already exists
    async fn ensure_bucket(&self, bucket: &str) -> Result<BucketStatus>;

    /// List one page of objects
    async fn list_objects(&self, bucket: &str, options: ListOptions) -> Result<ObjectList>;

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<StorageObject>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<()>;

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<()>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    async fn set_anonymous_access(&self, bucket: &str, access: AnonymousAccess) -> Result<()>;

    /// Check if an object exists
    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        match self.head_object(bucket, key).await {
            Ok(_) => Ok(true),
            Err(AppError::Storage(StorageError::ObjectNotFound(_))) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// List all objects with a given prefix (handles pagination)
    async fn list_all_objects(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<ObjectMetadata>> {
        let mut all_objects = Vec::new();
        let mut continuation_token = None;

        loop {
            let mut options = ListOptions::new().with_max_keys(1000);

            if let Some(p) = prefix {
                options = options.with_prefix(p);
            }

            if let Some(token) = continuation_token.take() {
                options = options.with_continuation_token(token);
            }

            let result = self.list_objects(bucket, options).await?;
            all_objects.extend(result.objects);

            if !result.is_truncated {
                break;
            }

            continuation_token = result.continuation_token;
        }

        Ok(all_objects)
    }

    /// Top-level "folders" of a bucket, without the trailing slash, plus the
    /// objects stored directly at the root
    async fn list_root(&self, bucket: &str) -> Result<(Vec<String>, Vec<ObjectMetadata>)> {
        let mut folders = Vec::new();
        let mut loose = Vec::new();
        let mut continuation_token = None;

        loop {
            let mut options = ListOptions::new().with_delimiter("/").with_max_keys(1000);
            if let Some(token) = continuation_token.take() {
                options = options.with_continuation_token(token);
            }

            let result = self.list_objects(bucket, options).await?;
            folders.extend(
                result
                    .prefixes
                    .into_iter()
                    .map(|p| p.trim_end_matches('/').to_string())
                    .filter(|p| !p.is_empty()),
            );
            loose.extend(result.objects.into_iter().filter(|o| !o.key.ends_with('/')));

            if !result.is_truncated {
                break;
            }
            continuation_token = result.continuation_token;
        }

        folders.sort();
        folders.dedup();
        Ok((folders, loose))
    }

    /// Delete every object under a prefix, returning how many were removed
    async fn delete_prefix(&self, bucket: &str, prefix: &str) -> Result<usize> {
        let objects = self.list_all_objects(bucket, Some(prefix)).await?;
        for object in &objects {
            self.delete_object(bucket, &object.key).await?;
        }
        Ok(objects.len())
    }
}
