//! IAM policy documents for the application user

use serde_json::{json, Value};

use crate::config::PolicyKind;

/// Policy granting the application user access to `buckets`
pub fn policy_document(kind: PolicyKind, buckets: &[&str]) -> Value {
    match kind {
        PolicyKind::Full => json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Action": ["s3:*"],
                "Resource": ["arn:aws:s3:::*"]
            }]
        }),
        PolicyKind::Scoped => {
            let bucket_arns: Vec<String> = buckets.iter().map(|b| format!("arn:aws:s3:::{}", b)).collect();
            let object_arns: Vec<String> = buckets.iter().map(|b| format!("arn:aws:s3:::{}/*", b)).collect();
            json!({
                "Version": "2012-10-17",
                "Statement": [
                    {
                        "Effect": "Allow",
                        "Action": ["s3:GetBucketLocation", "s3:ListBucket"],
                        "Resource": bucket_arns
                    },
                    {
                        "Effect": "Allow",
                        "Action": ["s3:GetObject", "s3:PutObject", "s3:DeleteObject"],
                        "Resource": object_arns
                    }
                ]
            })
        }
    }
}
