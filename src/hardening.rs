//! Container security postures.
//!
//! Every provision call gets exactly one of two disjoint spec fragments:
//! hardened (read-only rootfs, dropped capabilities, resource ceilings,
//! tmpfs-backed writable paths) or legacy (host IPC sharing and nothing
//! else). The two are never mixed.

use crate::config::Config;
use crate::error::ConfigError;

/// tmpfs paths inside hardened containers.
pub const SECRETS_DIR: &str = "/run/secrets";
pub const PROFILE_DIR: &str = "/run/profile";

/// One of the two mutually exclusive security postures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecuritySpec {
    Hardened(HardenedSpec),
    Legacy(LegacySpec),
}

impl SecuritySpec {
    pub fn is_hardened(&self) -> bool {
        matches!(self, SecuritySpec::Hardened(_))
    }
}

/// A sized, mode-restricted tmpfs mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmpfsMount {
    pub target: String,
    pub size_bytes: i64,
    /// Octal file mode, e.g. 0o400.
    pub mode: i64,
}

/// Hardened posture: restrictive by default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardenedSpec {
    pub read_only_rootfs: bool,
    pub cap_drop: Vec<String>,
    pub memory_bytes: i64,
    pub nano_cpus: i64,
    /// Non-root uid:gid.
    pub user: String,
    /// target → tmpfs option string, e.g. ("/workspace", "size=500M").
    pub tmpfs: Vec<(String, String)>,
    /// Dedicated mounts for secrets and profile env.
    pub tmpfs_mounts: Vec<TmpfsMount>,
    pub no_new_privileges: bool,
}

/// Legacy posture: host IPC namespace sharing, no other restrictions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacySpec {
    pub host_ipc: bool,
}

/// Convert a human-readable size ("10M", "1G", "512") to bytes.
pub fn parse_size(size: &str) -> Result<i64, ConfigError> {
    let s = size.trim();
    let invalid = |reason: &str| ConfigError::Invalid {
        key: "size".to_string(),
        reason: format!("'{size}': {reason}"),
    };
    if s.is_empty() {
        return Err(invalid("empty"));
    }
    let (digits, multiplier) = match s.chars().last().map(|c| c.to_ascii_uppercase()) {
        Some('K') => (&s[..s.len() - 1], 1024),
        Some('M') => (&s[..s.len() - 1], 1024 * 1024),
        Some('G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    let n: i64 = digits
        .trim()
        .parse()
        .map_err(|_| invalid("not a number"))?;
    Ok(n * multiplier)
}

/// Build the hardened spec fragment from configured limits.
pub fn hardened_spec(config: &Config) -> Result<HardenedSpec, ConfigError> {
    let r = &config.resources;
    let h = &config.hardening;

    let cpus: f64 = r.cpus.trim().parse().map_err(|_| ConfigError::Invalid {
        key: "WARDEN_CPUS".to_string(),
        reason: format!("'{}' is not a number", r.cpus),
    })?;

    Ok(HardenedSpec {
        read_only_rootfs: h.read_only_rootfs,
        cap_drop: h.drop_caps.clone(),
        memory_bytes: parse_size(&r.memory)?,
        nano_cpus: (cpus * 1e9) as i64,
        user: config.user.clone(),
        tmpfs: vec![
            ("/workspace".to_string(), format!("size={}", r.tmpfs_workspace)),
            ("/tmp".to_string(), format!("size={}", r.tmpfs_tmp)),
        ],
        tmpfs_mounts: vec![
            TmpfsMount {
                target: SECRETS_DIR.to_string(),
                size_bytes: parse_size(&r.tmpfs_secrets)?,
                mode: 0o400,
            },
            TmpfsMount {
                target: PROFILE_DIR.to_string(),
                size_bytes: parse_size("1M")?,
                mode: 0o644,
            },
        ],
        no_new_privileges: h.no_new_privileges,
    })
}

/// Build the legacy spec fragment.
pub fn legacy_spec() -> LegacySpec {
    LegacySpec { host_ipc: true }
}
