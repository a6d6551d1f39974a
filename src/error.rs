//! Error taxonomy for the session lifecycle.
//!
//! Pipeline phases propagate `LifecycleError` to the caller; the variants
//! distinguish bad configuration, failed preconditions, signature
//! verification failures, engine call failures, and secret resolution
//! failures so callers can map them to sensible responses.

use crate::engine::EngineError;
use crate::secrets::ResolveError;

/// Invalid or missing configuration, surfaced at load time.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error("unknown role '{0}' (expected developer, researcher, or performer)")]
    UnknownRole(String),
}

/// Fatal errors from the provision/configure/start phases.
///
/// A phase that returns one of these never advances the session state past
/// its entry point, and `provision` never registers the session.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// A required setting is missing or inconsistent (e.g. enforce-mode
    /// verification with neither a key nor a keyless identity).
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    /// The environment does not satisfy a precondition (image absent,
    /// key file missing, local-only image in enforce mode).
    #[error("precondition failed: {reason}")]
    Precondition { reason: String },

    /// Signature verification failed in enforce mode.
    #[error("image signature verification failed for {image_ref}: {stderr}")]
    Verification {
        image_ref: String,
        stdout: String,
        stderr: String,
    },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Resolution(#[from] ResolveError),

    #[error("session '{name}' not found")]
    SessionNotFound { name: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}
