//! Configuration for the warden control plane.
//!
//! Everything is environment-driven with a `WARDEN_` prefix; each
//! sub-config has a `resolve()` constructor and sensible defaults, so an
//! empty environment yields a working developer-role setup.

pub(crate) mod helpers;
mod role;

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;

pub use self::role::{Role, RoleSpec};
use self::helpers::{
    optional_env, parse_bool_env, parse_list_env, parse_optional_env, parse_string_env,
};

/// Resource ceilings and tmpfs sizes for hardened containers.
///
/// Sizes are human-readable strings ("2g", "500M") parsed by
/// [`crate::hardening::parse_size`] when the container spec is built.
#[derive(Debug, Clone)]
pub struct ResourceConfig {
    pub memory: String,
    pub cpus: String,
    pub tmpfs_workspace: String,
    pub tmpfs_tmp: String,
    pub tmpfs_secrets: String,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            memory: "2g".to_string(),
            cpus: "2".to_string(),
            tmpfs_workspace: "500M".to_string(),
            tmpfs_tmp: "100M".to_string(),
            tmpfs_secrets: "10M".to_string(),
        }
    }
}

impl ResourceConfig {
    pub(crate) fn resolve() -> Self {
        let defaults = Self::default();
        Self {
            memory: parse_string_env("WARDEN_MEMORY", &defaults.memory),
            cpus: parse_string_env("WARDEN_CPUS", &defaults.cpus),
            tmpfs_workspace: parse_string_env("WARDEN_TMPFS_WORKSPACE", &defaults.tmpfs_workspace),
            tmpfs_tmp: parse_string_env("WARDEN_TMPFS_TMP", &defaults.tmpfs_tmp),
            tmpfs_secrets: parse_string_env("WARDEN_TMPFS_SECRETS", &defaults.tmpfs_secrets),
        }
    }
}

/// Security toggles for the hardened container posture.
#[derive(Debug, Clone)]
pub struct HardeningConfig {
    pub read_only_rootfs: bool,
    pub no_new_privileges: bool,
    pub drop_caps: Vec<String>,
}

const DEFAULT_DROP_CAPS: &[&str] = &["NET_RAW", "SYS_ADMIN", "MKNOD", "SYS_CHROOT", "NET_ADMIN"];

impl Default for HardeningConfig {
    fn default() -> Self {
        Self {
            read_only_rootfs: true,
            no_new_privileges: true,
            drop_caps: DEFAULT_DROP_CAPS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl HardeningConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            read_only_rootfs: parse_bool_env("WARDEN_READ_ONLY_ROOTFS", true)?,
            no_new_privileges: parse_bool_env("WARDEN_NO_NEW_PRIVILEGES", true)?,
            drop_caps: parse_list_env("WARDEN_DROP_CAPS", DEFAULT_DROP_CAPS),
        })
    }
}

/// Image signature verification policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    /// Skip verification entirely.
    Off,
    /// Attempt verification, log the outcome, never fail the pipeline.
    Warn,
    /// Any failure (or missing precondition) aborts provisioning.
    Enforce,
}

impl FromStr for VerifyMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(VerifyMode::Off),
            "warn" => Ok(VerifyMode::Warn),
            "enforce" => Ok(VerifyMode::Enforce),
            other => Err(ConfigError::Invalid {
                key: "WARDEN_VERIFY_MODE".to_string(),
                reason: format!("expected off, warn, or enforce, got '{other}'"),
            }),
        }
    }
}

/// Signature verification settings.
///
/// When both a key file and a keyless identity/issuer pair are configured,
/// keyless is preferred.
#[derive(Debug, Clone, Default)]
pub struct VerifyConfig {
    pub mode: Option<VerifyMode>,
    pub key: Option<PathBuf>,
    pub identity: Option<String>,
    pub issuer: Option<String>,
}

impl VerifyConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let mode = match optional_env("WARDEN_VERIFY_MODE") {
            Some(v) => Some(v.parse()?),
            None => None,
        };
        Ok(Self {
            mode,
            key: optional_env("WARDEN_VERIFY_KEY").map(PathBuf::from),
            identity: optional_env("WARDEN_VERIFY_IDENTITY"),
            issuer: optional_env("WARDEN_VERIFY_ISSUER"),
        })
    }

    pub fn mode(&self) -> VerifyMode {
        self.mode.unwrap_or(VerifyMode::Off)
    }
}

/// Per-kind toggles for host credential mounts, plus the profile env switch.
#[derive(Debug, Clone)]
pub struct ProfileConfig {
    /// Inject the profile-scoped environment snapshot at start.
    pub mount_env: bool,
    pub mount_aws: bool,
    pub mount_azure: bool,
    pub mount_kube: bool,
    pub mount_ssh: bool,
    pub mount_gitconfig: bool,
    /// Opt-in: cloud SDK config.
    pub mount_gcloud: bool,
    /// Opt-in: infra-as-code plugin cache and credentials.
    pub mount_terraform: bool,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            mount_env: true,
            mount_aws: true,
            mount_azure: true,
            mount_kube: true,
            mount_ssh: true,
            mount_gitconfig: true,
            mount_gcloud: false,
            mount_terraform: false,
        }
    }
}

impl ProfileConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            mount_env: parse_bool_env("WARDEN_MOUNT_ENV", true)?,
            mount_aws: parse_bool_env("WARDEN_MOUNT_AWS", true)?,
            mount_azure: parse_bool_env("WARDEN_MOUNT_AZURE", true)?,
            mount_kube: parse_bool_env("WARDEN_MOUNT_KUBE", true)?,
            mount_ssh: parse_bool_env("WARDEN_MOUNT_SSH", true)?,
            mount_gitconfig: parse_bool_env("WARDEN_MOUNT_GITCONFIG", true)?,
            mount_gcloud: parse_bool_env("WARDEN_MOUNT_GCLOUD", false)?,
            mount_terraform: parse_bool_env("WARDEN_MOUNT_TERRAFORM", false)?,
        })
    }
}

/// Main configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct Config {
    /// Default role for sessions that don't specify one.
    pub role: Role,
    /// Explicit image override; empty falls back to the role default.
    pub image: String,
    /// Explicit container-name prefix override; empty falls back to the role default.
    pub container_prefix: String,
    /// Non-root uid:gid for hardened containers.
    pub user: String,
    /// Host directory holding session data, plaintext secrets, and the
    /// vault service-account token file.
    pub config_dir: PathBuf,
    /// Default session TTL in seconds.
    pub ttl_secs: u64,
    /// Vault scope; empty means all vaults visible to the service account.
    pub vault: String,
    pub resources: ResourceConfig,
    pub hardening: HardeningConfig,
    pub verify: VerifyConfig,
    pub profile: ProfileConfig,
}

fn default_config_dir() -> PathBuf {
    if let Some(xdg) = optional_env("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("warden");
    }
    if let Some(ws) = optional_env("WORKSPACE_HOME") {
        return PathBuf::from(ws).join(".config").join("warden");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("warden")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: Role::Developer,
            image: String::new(),
            container_prefix: String::new(),
            user: "65534:65534".to_string(),
            config_dir: default_config_dir(),
            ttl_secs: 3600,
            vault: String::new(),
            resources: ResourceConfig::default(),
            hardening: HardeningConfig::default(),
            verify: VerifyConfig::default(),
            profile: ProfileConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Loads `.env` via dotenvy first (never overwriting existing vars).
    pub fn resolve() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();
        Ok(Self {
            role: match optional_env("WARDEN_ROLE") {
                Some(v) => v.parse()?,
                None => defaults.role,
            },
            image: parse_string_env("WARDEN_IMAGE", ""),
            container_prefix: parse_string_env("WARDEN_CONTAINER_PREFIX", ""),
            user: parse_string_env("WARDEN_USER", &defaults.user),
            config_dir: optional_env("WARDEN_CONFIG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.config_dir),
            ttl_secs: parse_optional_env("WARDEN_TTL_SECS", defaults.ttl_secs)?,
            vault: parse_string_env("WARDEN_VAULT", ""),
            resources: ResourceConfig::resolve(),
            hardening: HardeningConfig::resolve()?,
            verify: VerifyConfig::resolve()?,
            profile: ProfileConfig::resolve()?,
        })
    }

    /// Image for a session of `role`: explicit override wins.
    pub fn image_for(&self, role: Role) -> String {
        if self.image.is_empty() {
            role.spec().image.to_string()
        } else {
            self.image.clone()
        }
    }

    /// Container-name prefix for a session of `role`: explicit override wins.
    pub fn prefix_for(&self, role: Role) -> String {
        if self.container_prefix.is_empty() {
            role.spec().prefix.to_string()
        } else {
            self.container_prefix.clone()
        }
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.config_dir.join("sessions")
    }

    pub fn secrets_dir(&self) -> PathBuf {
        self.config_dir.join(".secrets")
    }

    pub fn sa_token_file(&self) -> PathBuf {
        self.config_dir.join(".op-sa-token")
    }
}
