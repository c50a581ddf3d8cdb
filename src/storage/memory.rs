//! In-memory object store for tests

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::error::{Result, StorageError};

use super::types::{
    AnonymousAccess, BucketStatus, ListOptions, ObjectList, ObjectMetadata, StorageObject,
};
use super::ObjectStore;

#[derive(Clone)]
struct Stored {
    data: Vec<u8>,
    content_type: String,
}

#[derive(Default)]
pub struct MemoryStore {
    buckets: Mutex<BTreeMap<String, BTreeMap<String, Stored>>>,
    policies: Mutex<BTreeMap<String, AnonymousAccess>>,
    failing_put_buckets: Mutex<HashSet<String>>,
    failing_delete_prefixes: Mutex<Vec<(String, String)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object, creating the bucket if needed
    pub fn insert(&self, bucket: &str, key: &str, data: &[u8]) {
        self.buckets
            .lock()
            .entry(bucket.to_string())
            .or_default()
            .insert(
                key.to_string(),
                Stored {
                    data: data.to_vec(),
                    content_type: super::content_type_for(key),
                },
            );
    }

    /// Make every put into `bucket` fail
    pub fn fail_puts_to(&self, bucket: &str) {
        self.failing_put_buckets.lock().insert(bucket.to_string());
    }

    /// Make deletes of keys under `prefix` in `bucket` fail
    pub fn fail_deletes_under(&self, bucket: &str, prefix: &str) {
        self.failing_delete_prefixes
            .lock()
            .push((bucket.to_string(), prefix.to_string()));
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .lock()
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn read(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.buckets
            .lock()
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|o| o.data.clone())
    }

    pub fn content_type(&self, bucket: &str, key: &str) -> Option<String> {
        self.buckets
            .lock()
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|o| o.content_type.clone())
    }

    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.buckets.lock().contains_key(bucket)
    }

    pub fn access(&self, bucket: &str) -> AnonymousAccess {
        self.policies
            .lock()
            .get(bucket)
            .copied()
            .unwrap_or(AnonymousAccess::None)
    }

    fn metadata(key: &str, stored: &Stored) -> ObjectMetadata {
        ObjectMetadata {
            key: key.to_string(),
            size: stored.data.len() as i64,
            last_modified: Some(Utc::now()),
            content_type: Some(stored.content_type.clone()),
            etag: None,
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn check_connection(&self) -> Result<Vec<String>> {
        Ok(self.buckets.lock().keys().cloned().collect())
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<BucketStatus> {
        let mut buckets = self.buckets.lock();
        if buckets.contains_key(bucket) {
            Ok(BucketStatus::Existing)
        } else {
            buckets.insert(bucket.to_string(), BTreeMap::new());
            Ok(BucketStatus::Created)
        }
    }

    async fn list_objects(&self, bucket: &str, options: ListOptions) -> Result<ObjectList> {
        let buckets = self.buckets.lock();
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;

        let prefix = options.prefix.unwrap_or_default();
        let mut listed = Vec::new();
        let mut prefixes = Vec::new();

        for (key, stored) in objects.range(prefix.clone()..) {
            if !key.starts_with(&prefix) {
                break;
            }
            let rest = &key[prefix.len()..];
            match options.delimiter.as_deref().and_then(|d| rest.find(d).map(|i| (d, i))) {
                Some((d, i)) => {
                    let common = format!("{}{}", prefix, &rest[..i + d.len()]);
                    if prefixes.last() != Some(&common) {
                        prefixes.push(common);
                    }
                }
                None => listed.push(Self::metadata(key, stored)),
            }
        }

        Ok(ObjectList {
            objects: listed,
            prefixes,
            continuation_token: None,
            is_truncated: false,
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata> {
        self.buckets
            .lock()
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|stored| Self::metadata(key, stored))
            .ok_or_else(|| StorageError::ObjectNotFound(key.to_string()).into())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<StorageObject> {
        let buckets = self.buckets.lock();
        let stored = buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .ok_or_else(|| StorageError::ObjectNotFound(key.to_string()))?;

        Ok(StorageObject {
            metadata: Self::metadata(key, stored),
            data: stored.data.clone(),
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        if self.failing_put_buckets.lock().contains(bucket) {
            return Err(StorageError::SdkError(format!("put into {} rejected", bucket)).into());
        }
        let mut buckets = self.buckets.lock();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;
        objects.insert(
            key.to_string(),
            Stored {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<()> {
        let mut buckets = self.buckets.lock();
        let stored = buckets
            .get(src_bucket)
            .and_then(|objects| objects.get(src_key))
            .cloned()
            .ok_or_else(|| StorageError::ObjectNotFound(src_key.to_string()))?;
        buckets
            .get_mut(dst_bucket)
            .ok_or_else(|| StorageError::BucketNotFound(dst_bucket.to_string()))?
            .insert(dst_key.to_string(), stored);
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let rejected = self
            .failing_delete_prefixes
            .lock()
            .iter()
            .any(|(b, prefix)| b == bucket && key.starts_with(prefix.as_str()));
        if rejected {
            return Err(StorageError::AccessDenied(format!("delete {}/{}", bucket, key)).into());
        }
        if let Some(objects) = self.buckets.lock().get_mut(bucket) {
            objects.remove(key);
        }
        Ok(())
    }

    async fn set_anonymous_access(&self, bucket: &str, access: AnonymousAccess) -> Result<()> {
        if !self.has_bucket(bucket) {
            return Err(StorageError::BucketNotFound(bucket.to_string()).into());
        }
        self.policies.lock().insert(bucket.to_string(), access);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_root_splits_folders_and_loose_objects() {
        let store = MemoryStore::new();
        store.insert("documents", "0001.jpg", b"a");
        store.insert("documents", "abc/1.jpg", b"b");
        store.insert("documents", "abc/2.jpg", b"c");
        store.insert("documents", "def/x/1.png", b"d");

        let (folders, loose) = store.list_root("documents").await.unwrap();
        assert_eq!(folders, vec!["abc".to_string(), "def".to_string()]);
        assert_eq!(loose.len(), 1);
        assert_eq!(loose[0].key, "0001.jpg");
    }

    #[tokio::test]
    async fn test_delete_prefix() {
        let store = MemoryStore::new();
        store.insert("documents", "abc/1.jpg", b"b");
        store.insert("documents", "abc/2.jpg", b"c");
        store.insert("documents", "abcd/1.jpg", b"d");

        let removed = store.delete_prefix("documents", "abc/").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.keys("documents"), vec!["abcd/1.jpg".to_string()]);
    }
}
