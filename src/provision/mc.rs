//! MinIO admin operations through the `mc` client

use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

use super::ProvisionError;

/// User and policy administration on the object store
#[async_trait]
pub trait UserAdmin: Send + Sync {
    async fn add_user(&self, user: &str, password: &str) -> Result<(), ProvisionError>;

    async fn create_policy(&self, name: &str, document: &Value) -> Result<(), ProvisionError>;

    async fn attach_policy(&self, name: &str, user: &str) -> Result<(), ProvisionError>;
}

/// Messages `mc` prints when the requested state is already in place
const ALREADY_DONE: &[&str] = &["already exists", "already attached", "already in effect"];

/// `mc` wrapper bound to one alias
pub struct McAdmin {
    binary: String,
    alias: String,
}

impl McAdmin {
    /// Register `alias` for `endpoint` with root credentials
    pub async fn connect(
        binary: &str,
        alias: &str,
        endpoint: &str,
        root_user: &str,
        root_password: &str,
    ) -> Result<Self, ProvisionError> {
        let admin = Self {
            binary: binary.to_string(),
            alias: alias.to_string(),
        };
        admin
            .run(&["alias", "set", alias, endpoint, root_user, root_password], 5)
            .await?;
        info!("mc alias '{}' points at {}", alias, endpoint);
        Ok(admin)
    }

    /// Run `mc` with `args`; argument `secret_index` and later are not logged
    async fn run(&self, args: &[&str], secret_index: usize) -> Result<String, ProvisionError> {
        let shown = args
            .iter()
            .enumerate()
            .map(|(i, a)| if i >= secret_index { "<redacted>" } else { *a })
            .collect::<Vec<_>>()
            .join(" ");
        let command = format!("{} {}", self.binary, shown);
        debug!("Running {}", command);

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ProvisionError::ToolMissing(self.binary.clone()),
                _ => ProvisionError::CommandFailed {
                    command: command.clone(),
                    stderr: e.to_string(),
                },
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if is_already_done(&stderr) || is_already_done(&stdout) {
            debug!("{}: already in place", command);
            return Ok(stdout);
        }

        Err(ProvisionError::CommandFailed {
            command,
            stderr: if stderr.is_empty() { stdout } else { stderr },
        })
    }
}

fn is_already_done(message: &str) -> bool {
    let message = message.to_lowercase();
    ALREADY_DONE.iter().any(|m| message.contains(m))
}

#[async_trait]
impl UserAdmin for McAdmin {
    async fn add_user(&self, user: &str, password: &str) -> Result<(), ProvisionError> {
        self.run(&["admin", "user", "add", &self.alias, user, password], 5)
            .await?;
        info!("User '{}' present", user);
        Ok(())
    }

    async fn create_policy(&self, name: &str, document: &Value) -> Result<(), ProvisionError> {
        let path = std::env::temp_dir().join(format!("{}-{}.json", name, Uuid::new_v4()));
        let body = serde_json::to_vec_pretty(document).map_err(|e| ProvisionError::CommandFailed {
            command: "serialize policy".to_string(),
            stderr: e.to_string(),
        })?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| ProvisionError::CommandFailed {
                command: format!("write {}", path.display()),
                stderr: e.to_string(),
            })?;

        let path_arg = path.to_string_lossy().to_string();
        let result = self
            .run(&["admin", "policy", "create", &self.alias, name, &path_arg], usize::MAX)
            .await;
        let _ = tokio::fs::remove_file(&path).await;
        result?;

        info!("Policy '{}' present", name);
        Ok(())
    }

    async fn attach_policy(&self, name: &str, user: &str) -> Result<(), ProvisionError> {
        self.run(
            &["admin", "policy", "attach", &self.alias, name, "--user", user],
            usize::MAX,
        )
        .await?;
        info!("Policy '{}' attached to '{}'", name, user);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_done_messages() {
        assert!(is_already_done(
            "mc: <ERROR> Unable to attach policy. The specified policy change is already in effect."
        ));
        assert!(is_already_done("Policy app-policy already exists"));
        assert!(!is_already_done("mc: <ERROR> Access Denied."));
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let err = McAdmin::connect(
            "mc-binary-that-does-not-exist",
            "local",
            "http://minio:9000",
            "root",
            "secret",
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ProvisionError::ToolMissing(_)));
    }
}
