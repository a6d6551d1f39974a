//! Image provenance verification via the `cosign` CLI.
//!
//! Three enforcement modes: `off` never invokes the tool, `warn` attempts
//! verification and only logs the outcome, `enforce` turns any failure or
//! missing precondition into a pipeline abort. Verification targets the
//! image's first registry digest so the exact content-addressable image is
//! checked; a local-only image (no digests) cannot be verified at all.

use std::time::Duration;

use tokio::process::Command;

use crate::config::{VerifyConfig, VerifyMode};
use crate::error::LifecycleError;

const COSIGN_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a single `cosign verify` invocation.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub verified: bool,
    /// The digest reference that was checked.
    pub image_ref: String,
    pub stdout: String,
    pub stderr: String,
}

enum Strategy<'a> {
    Keyless { identity: &'a str, issuer: &'a str },
    Key { path: &'a std::path::Path },
}

/// Verify `image` according to the configured mode.
///
/// In `enforce` mode, configuration and precondition problems (no strategy,
/// missing key file, no registry digest) are raised before the external
/// tool is spawned. `warn` mode never returns an error.
pub async fn verify_image(
    config: &VerifyConfig,
    image: &str,
    repo_digests: &[String],
) -> Result<(), LifecycleError> {
    let mode = config.mode();
    if mode == VerifyMode::Off {
        tracing::debug!(image = %image, "signature verification is off");
        return Ok(());
    }

    // Keyless preferred when both strategies are configured.
    let strategy = match (&config.identity, &config.issuer, &config.key) {
        (Some(identity), Some(issuer), _) => Some(Strategy::Keyless { identity, issuer }),
        (_, _, Some(path)) => Some(Strategy::Key { path }),
        _ => None,
    };

    let Some(strategy) = strategy else {
        let reason = "signature verification needs a key file or a keyless identity and issuer";
        if mode == VerifyMode::Enforce {
            return Err(LifecycleError::Configuration {
                reason: reason.to_string(),
            });
        }
        tracing::warn!(image = %image, "verification skipped: {reason}");
        return Ok(());
    };

    if let Strategy::Key { path } = &strategy {
        if !path.is_file() {
            let reason = format!("verification key not found: {}", path.display());
            if mode == VerifyMode::Enforce {
                return Err(LifecycleError::Precondition { reason });
            }
            tracing::warn!(image = %image, "verification skipped: {reason}");
            return Ok(());
        }
    }

    let Some(digest_ref) = repo_digests.first() else {
        let reason =
            format!("image '{image}' has no registry digest, a local-only image cannot be verified");
        if mode == VerifyMode::Enforce {
            return Err(LifecycleError::Precondition { reason });
        }
        tracing::info!(image = %image, "verification skipped: {reason}");
        return Ok(());
    };

    let outcome = run_cosign(&strategy, digest_ref).await;

    match outcome {
        Ok(outcome) if outcome.verified => {
            tracing::info!(image_ref = %outcome.image_ref, "image signature verified");
            Ok(())
        }
        Ok(outcome) => {
            if mode == VerifyMode::Enforce {
                return Err(LifecycleError::Verification {
                    image_ref: outcome.image_ref,
                    stdout: outcome.stdout,
                    stderr: outcome.stderr,
                });
            }
            tracing::warn!(
                image_ref = %outcome.image_ref,
                stderr = %outcome.stderr,
                "image signature verification failed"
            );
            Ok(())
        }
        Err(reason) => {
            if mode == VerifyMode::Enforce {
                return Err(LifecycleError::Precondition { reason });
            }
            tracing::warn!(image = %image, "verification skipped: {reason}");
            Ok(())
        }
    }
}

/// Invoke `cosign verify` against a digest. Returns `Err` only for spawn
/// and timeout problems; a non-zero exit is a normal (failed) outcome.
async fn run_cosign(strategy: &Strategy<'_>, digest_ref: &str) -> Result<VerifyOutcome, String> {
    let mut cmd = Command::new("cosign");
    cmd.arg("verify");
    match strategy {
        Strategy::Keyless { identity, issuer } => {
            cmd.args(["--certificate-identity", identity]);
            cmd.args(["--certificate-oidc-issuer", issuer]);
        }
        Strategy::Key { path } => {
            cmd.arg("--key").arg(path);
        }
    }
    cmd.arg(digest_ref);
    cmd.kill_on_drop(true);

    let output = tokio::time::timeout(COSIGN_TIMEOUT, cmd.output())
        .await
        .map_err(|_| format!("cosign timed out after {}s", COSIGN_TIMEOUT.as_secs()))?
        .map_err(|e| format!("failed to spawn cosign: {e}"))?;

    Ok(VerifyOutcome {
        verified: output.status.success(),
        image_ref: digest_ref.to_string(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
