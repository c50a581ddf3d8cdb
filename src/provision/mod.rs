//! Infrastructure provisioning
//!
//! Idempotent bootstrap of the MinIO buckets, application user and policy,
//! and of the Postgres databases the pipeline uses. Every step can be
//! re-run against an already provisioned stack.

mod mc;
mod minio;
mod policy;
mod postgres;

pub use mc::{McAdmin, UserAdmin};
pub use minio::{BucketReport, MinioBootstrap, MinioReport};
pub use policy::policy_document;
pub use postgres::{quote_ident, quote_literal, DatabaseSpec, PostgresBootstrap, ProvisionSummary};

/// Provisioning error types
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("Invalid SQL identifier: {0}")]
    InvalidIdentifier(String),

    #[error("{0} is not installed or not on PATH")]
    ToolMissing(String),

    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
}
