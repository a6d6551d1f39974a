//! Secret resolution for session credentials.
//!
//! Two strategies, chosen at resolve time:
//!
//! 1. Vault: when a 1Password service-account token is discoverable
//!    (env var wins over the on-disk token file), enumerate every item the
//!    service account can see via the `op` CLI and derive env var names
//!    from `item title + field label`. Fails closed: any CLI error aborts
//!    the whole resolution, never a partial map.
//! 2. Plaintext files: fallback; one secret per file under the secrets
//!    directory, filename is the env name.
//!
//! The host resolves secrets; containers never see the service-account
//! token or the `op` binary. The token is passed to the child process via
//! its environment, never argv.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tokio::process::Command;

/// Bound on each `op` CLI invocation.
const OP_TIMEOUT: Duration = Duration::from_secs(30);

/// Secret backend failure. Resolution is all-or-nothing per strategy.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    #[error("op {command} failed: {stderr}")]
    Backend { command: String, stderr: String },

    #[error("op {command} timed out after {}s", OP_TIMEOUT.as_secs())]
    Timeout { command: String },

    #[error("op produced invalid JSON: {reason}")]
    Malformed { reason: String },

    #[error("failed to spawn op: {reason}")]
    Spawn { reason: String },
}

/// Resolves name→value credential maps from the vault or plaintext files.
pub struct SecretResolver {
    secrets_dir: PathBuf,
    sa_token_file: PathBuf,
    vault: Option<String>,
}

impl SecretResolver {
    pub fn new(config: &crate::config::Config) -> Self {
        Self {
            secrets_dir: config.secrets_dir(),
            sa_token_file: config.sa_token_file(),
            vault: if config.vault.is_empty() {
                None
            } else {
                Some(config.vault.clone())
            },
        }
    }

    /// The service-account token, if configured. Env var takes priority
    /// over the token file.
    fn sa_token(&self) -> Option<SecretString> {
        if let Ok(token) = std::env::var("OP_SERVICE_ACCOUNT_TOKEN") {
            if !token.trim().is_empty() {
                return Some(SecretString::from(token));
            }
        }
        match std::fs::read_to_string(&self.sa_token_file) {
            Ok(contents) => {
                let trimmed = contents.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(SecretString::from(trimmed.to_string()))
                }
            }
            Err(_) => None,
        }
    }

    /// Whether the vault strategy would be selected.
    pub fn has_vault_integration(&self) -> bool {
        self.sa_token().is_some()
    }

    /// Resolve secrets using the best available strategy.
    pub async fn resolve(&self) -> Result<HashMap<String, String>, ResolveError> {
        match self.sa_token() {
            Some(token) => self.resolve_from_vault(&token).await,
            None => Ok(self.resolve_from_files()),
        }
    }

    /// Discover and resolve every secret visible to the service account.
    async fn resolve_from_vault(
        &self,
        sa_token: &SecretString,
    ) -> Result<HashMap<String, String>, ResolveError> {
        let mut list_args = vec!["item", "list"];
        if let Some(vault) = &self.vault {
            list_args.extend(["--vault", vault.as_str()]);
        }
        list_args.extend(["--format", "json"]);

        let raw = op_run(&list_args, sa_token).await?;
        let items: Vec<Value> = serde_json::from_str(&raw).map_err(|e| ResolveError::Malformed {
            reason: e.to_string(),
        })?;

        if items.is_empty() {
            tracing::warn!(
                vault = self.vault.as_deref().unwrap_or("(all)"),
                "vault is empty, no secrets resolved"
            );
            return Ok(HashMap::new());
        }

        let mut resolved = HashMap::new();
        for summary in &items {
            let Some(item_id) = summary["id"].as_str() else {
                continue;
            };
            let item_title = summary["title"].as_str().unwrap_or(item_id).to_string();

            let raw = op_run(&["item", "get", item_id, "--format", "json"], sa_token).await?;
            let item: Value = serde_json::from_str(&raw).map_err(|e| ResolveError::Malformed {
                reason: e.to_string(),
            })?;

            collect_item_fields(&item_title, &item, &mut resolved);
        }

        tracing::info!(count = resolved.len(), items = items.len(), "resolved secrets from vault");
        Ok(resolved)
    }

    /// Read secrets from plaintext files. A missing directory is an empty
    /// map, not an error.
    fn resolve_from_files(&self) -> HashMap<String, String> {
        let mut resolved = HashMap::new();
        if let Ok(entries) = std::fs::read_dir(&self.secrets_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if let Ok(contents) = std::fs::read_to_string(&path) {
                    resolved.insert(name.to_string(), contents.trim().to_string());
                }
            }
        }
        tracing::info!(count = resolved.len(), "resolved secrets from files");
        resolved
    }
}

/// Fold one item's fields into the resolved map. Notes, OTPs, and fields
/// without a label or value are skipped; on a derived-name collision the
/// later value wins and a warning is logged.
fn collect_item_fields(item_title: &str, item: &Value, resolved: &mut HashMap<String, String>) {
    for field in item["fields"].as_array().map(Vec::as_slice).unwrap_or(&[]) {
        if field["id"].as_str() == Some("notesPlain") {
            continue;
        }
        if field["type"].as_str() == Some("OTP") {
            continue;
        }
        let label = field["label"].as_str().unwrap_or("");
        let value = field["value"].as_str().unwrap_or("");
        if label.is_empty() || value.is_empty() {
            continue;
        }

        let env_name = to_env_name(item_title, label);
        if resolved.contains_key(&env_name) {
            // Last write wins.
            tracing::warn!(
                env_name = %env_name,
                item = %item_title,
                field = %label,
                "secret name collision"
            );
        }
        resolved.insert(env_name, value.to_string());
    }
}

/// Run an `op` CLI command with the service-account token in its env.
async fn op_run(args: &[&str], sa_token: &SecretString) -> Result<String, ResolveError> {
    let command = args.join(" ");
    let child = Command::new("op")
        .args(args)
        .env("OP_SERVICE_ACCOUNT_TOKEN", sa_token.expose_secret())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(OP_TIMEOUT, child)
        .await
        .map_err(|_| ResolveError::Timeout {
            command: command.clone(),
        })?
        .map_err(|e| ResolveError::Spawn {
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(ResolveError::Backend {
            command,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Derive an env var name from an item title and field label.
///
/// `langfuse-api` + `public-key` → `LANGFUSE_API_PUBLIC_KEY`. Runs of
/// non-alphanumeric characters collapse to a single underscore; edges are
/// trimmed.
pub fn to_env_name(item_title: &str, field_label: &str) -> String {
    let raw = format!("{item_title}_{field_label}");
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c.to_ascii_uppercase());
        } else {
            pending_sep = true;
        }
    }
    out
}
