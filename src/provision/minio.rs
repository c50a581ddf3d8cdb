//! MinIO bootstrap: buckets, anonymous access, application user and policy

use std::sync::Arc;

use serde::Serialize;

use crate::config::{PolicyKind, ProvisionConfig};
use crate::error::Result;
use crate::storage::{AnonymousAccess, BucketStatus, ObjectStore};

use super::mc::UserAdmin;
use super::policy::policy_document;

/// Bucket readable without credentials
const PUBLIC_BUCKET: &str = "documents";

#[derive(Debug, Clone, Serialize)]
pub struct BucketReport {
    pub name: String,
    pub status: BucketStatus,
    pub access: AnonymousAccess,
}

#[derive(Debug, Clone, Serialize)]
pub struct MinioReport {
    pub buckets: Vec<BucketReport>,
    pub user: String,
    pub policy_name: String,
    pub policy: PolicyKind,
}

pub struct MinioBootstrap {
    store: Arc<dyn ObjectStore>,
    admin: Arc<dyn UserAdmin>,
    buckets: Vec<String>,
    app_user: String,
    app_password: String,
    policy_name: String,
    policy: PolicyKind,
}

impl MinioBootstrap {
    pub fn new(store: Arc<dyn ObjectStore>, admin: Arc<dyn UserAdmin>, config: &ProvisionConfig) -> Self {
        Self {
            store,
            admin,
            buckets: config.bucket_profile.buckets().iter().map(|b| b.to_string()).collect(),
            app_user: config.app_user.clone(),
            app_password: config.app_password.clone(),
            policy_name: config.policy_name.clone(),
            policy: config.policy,
        }
    }

    fn access_for(bucket: &str) -> AnonymousAccess {
        if bucket == PUBLIC_BUCKET {
            AnonymousAccess::Download
        } else {
            AnonymousAccess::None
        }
    }

    /// Apply every step in order, stopping at the first failure
    pub async fn run(&self) -> Result<MinioReport> {
        tracing::info!("Provisioning MinIO buckets: {}", self.buckets.join(", "));

        let mut buckets = Vec::with_capacity(self.buckets.len());
        for name in &self.buckets {
            let status = self.store.ensure_bucket(name).await?;
            let access = Self::access_for(name);
            self.store.set_anonymous_access(name, access).await?;
            tracing::info!("Bucket {}: {:?}, anonymous {:?}", name, status, access);
            buckets.push(BucketReport {
                name: name.clone(),
                status,
                access,
            });
        }

        if self.policy == PolicyKind::Full {
            tracing::warn!(
                "Policy '{}' grants s3:* on every bucket to '{}'",
                self.policy_name,
                self.app_user
            );
        }

        let names: Vec<&str> = self.buckets.iter().map(String::as_str).collect();
        let document = policy_document(self.policy, &names);

        self.admin.add_user(&self.app_user, &self.app_password).await?;
        self.admin.create_policy(&self.policy_name, &document).await?;
        self.admin.attach_policy(&self.policy_name, &self.app_user).await?;

        tracing::info!("MinIO provisioning complete");
        Ok(MinioReport {
            buckets,
            user: self.app_user.clone(),
            policy_name: self.policy_name.clone(),
            policy: self.policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BucketProfile, Config};
    use crate::error::AppError;
    use crate::provision::ProvisionError;
    use crate::storage::memory::MemoryStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Value;

    #[derive(Default)]
    struct RecordingAdmin {
        calls: Mutex<Vec<String>>,
        policies: Mutex<Vec<Value>>,
        fail_user: bool,
    }

    #[async_trait]
    impl UserAdmin for RecordingAdmin {
        async fn add_user(&self, user: &str, _password: &str) -> std::result::Result<(), ProvisionError> {
            if self.fail_user {
                return Err(ProvisionError::CommandFailed {
                    command: "mc admin user add".into(),
                    stderr: "Access Denied".into(),
                });
            }
            self.calls.lock().push(format!("user:{}", user));
            Ok(())
        }

        async fn create_policy(&self, name: &str, document: &Value) -> std::result::Result<(), ProvisionError> {
            self.calls.lock().push(format!("policy:{}", name));
            self.policies.lock().push(document.clone());
            Ok(())
        }

        async fn attach_policy(&self, name: &str, user: &str) -> std::result::Result<(), ProvisionError> {
            self.calls.lock().push(format!("attach:{}:{}", name, user));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_basic_profile_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let admin = Arc::new(RecordingAdmin::default());
        let config = Config::default().provision;
        let bootstrap = MinioBootstrap::new(store.clone(), admin.clone(), &config);

        let first = bootstrap.run().await.unwrap();
        assert_eq!(first.buckets.len(), 2);
        assert!(first.buckets.iter().all(|b| b.status == BucketStatus::Created));
        assert_eq!(store.access("documents"), AnonymousAccess::Download);
        assert_eq!(store.access("templates"), AnonymousAccess::None);

        let second = bootstrap.run().await.unwrap();
        assert!(second.buckets.iter().all(|b| b.status == BucketStatus::Existing));

        assert_eq!(
            admin.calls.lock()[..3],
            [
                "user:appuser".to_string(),
                "policy:app-policy".to_string(),
                "attach:app-policy:appuser".to_string()
            ]
        );
        assert_eq!(
            admin.policies.lock()[0]["Statement"][1]["Resource"][0],
            "arn:aws:s3:::documents/*"
        );
    }

    #[tokio::test]
    async fn test_extended_profile_with_full_policy() {
        let store = Arc::new(MemoryStore::new());
        let admin = Arc::new(RecordingAdmin::default());
        let config = ProvisionConfig {
            bucket_profile: BucketProfile::Extended,
            policy: PolicyKind::Full,
            ..Config::default().provision
        };

        let report = MinioBootstrap::new(store.clone(), admin.clone(), &config)
            .run()
            .await
            .unwrap();
        assert_eq!(report.buckets.len(), 5);
        assert!(store.has_bucket("backups"));
        assert_eq!(store.access("exports"), AnonymousAccess::None);
        assert_eq!(admin.policies.lock()[0]["Statement"][0]["Action"][0], "s3:*");
    }

    #[tokio::test]
    async fn test_failure_aborts_before_policy() {
        let store = Arc::new(MemoryStore::new());
        let admin = Arc::new(RecordingAdmin {
            fail_user: true,
            ..Default::default()
        });
        let config = Config::default().provision;

        let err = MinioBootstrap::new(store, admin.clone(), &config).run().await.unwrap_err();
        assert!(matches!(err, AppError::Provision(ProvisionError::CommandFailed { .. })));
        assert!(admin.calls.lock().is_empty());
    }
}
