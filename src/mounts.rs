//! Host credential/config mount resolution and the profile env snapshot.
//!
//! Each credential kind resolves through an ordered candidate list: an
//! explicit env-var override (when it exists on disk), then a conventional
//! path under the resolved home, else the kind is omitted. Supplying a
//! `workspace_home` swaps the home directory *and* disables env-var
//! overrides, so a named profile's mounts never leak paths from the
//! orchestrator's own environment.
//!
//! Independently, a volatile per-profile cache file supplies an environment
//! block for in-container injection, with host-only variables stripped.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::ProfileConfig;

/// Home directory inside session containers.
pub const CONTAINER_HOME: &str = "/home/developer";

/// Bind mount access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountMode {
    ReadWrite,
    ReadOnly,
}

impl MountMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MountMode::ReadWrite => "rw",
            MountMode::ReadOnly => "ro",
        }
    }
}

/// The credential/config kinds the resolver knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MountKind {
    Aws,
    Azure,
    Kube,
    Ssh,
    GitConfig,
    Gcloud,
    Terraform,
}

impl MountKind {
    pub const ALL: [MountKind; 7] = [
        MountKind::Aws,
        MountKind::Azure,
        MountKind::Kube,
        MountKind::Ssh,
        MountKind::GitConfig,
        MountKind::Gcloud,
        MountKind::Terraform,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MountKind::Aws => "aws",
            MountKind::Azure => "azure",
            MountKind::Kube => "kube",
            MountKind::Ssh => "ssh",
            MountKind::GitConfig => "gitconfig",
            MountKind::Gcloud => "gcloud",
            MountKind::Terraform => "terraform",
        }
    }

    fn enabled(&self, profile: &ProfileConfig) -> bool {
        match self {
            MountKind::Aws => profile.mount_aws,
            MountKind::Azure => profile.mount_azure,
            MountKind::Kube => profile.mount_kube,
            MountKind::Ssh => profile.mount_ssh,
            MountKind::GitConfig => profile.mount_gitconfig,
            MountKind::Gcloud => profile.mount_gcloud,
            MountKind::Terraform => profile.mount_terraform,
        }
    }

    fn container_target(&self) -> String {
        let rel = match self {
            MountKind::Aws => ".aws",
            MountKind::Azure => ".azure",
            MountKind::Kube => ".kube",
            MountKind::Ssh => ".ssh",
            MountKind::GitConfig => ".gitconfig",
            MountKind::Gcloud => ".gcloud",
            MountKind::Terraform => ".terraform.d",
        };
        format!("{CONTAINER_HOME}/{rel}")
    }

    /// Ordered resolution candidates; the first one that exists wins.
    fn candidates(&self) -> &'static [Candidate] {
        match self {
            MountKind::Aws => &[
                Candidate::EnvFileParent("AWS_CONFIG_FILE"),
                Candidate::EnvFileParent("AWS_SHARED_CREDENTIALS_FILE"),
                Candidate::HomeDir(".aws"),
            ],
            MountKind::Azure => &[
                Candidate::EnvDir("AZURE_CONFIG_DIR"),
                Candidate::HomeDir(".azure"),
            ],
            MountKind::Kube => &[
                Candidate::EnvFileParent("KUBECONFIG"),
                Candidate::HomeDir(".kube"),
            ],
            MountKind::Ssh => &[Candidate::HomeDir(".ssh")],
            MountKind::GitConfig => &[
                Candidate::EnvFile("GIT_CONFIG_GLOBAL"),
                Candidate::HomeFile(".gitconfig"),
            ],
            MountKind::Gcloud => &[
                Candidate::EnvDir("CLOUDSDK_CONFIG"),
                Candidate::HomeDir(".gcloud"),
            ],
            MountKind::Terraform => &[Candidate::HomeDir(".terraform.d")],
        }
    }
}

impl fmt::Display for MountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One way a host path may be found for a mount kind.
#[derive(Debug, Clone, Copy)]
enum Candidate {
    /// Env var naming a directory; used as-is when it exists.
    EnvDir(&'static str),
    /// Env var naming a file; its parent directory is mounted.
    EnvFileParent(&'static str),
    /// Env var naming a file; the file itself is mounted.
    EnvFile(&'static str),
    /// Directory at a conventional path under the resolved home.
    HomeDir(&'static str),
    /// File at a conventional path under the resolved home.
    HomeFile(&'static str),
}

impl Candidate {
    fn resolve(&self, home: &Path, allow_env: bool) -> Option<PathBuf> {
        match self {
            Candidate::EnvDir(var) => {
                if !allow_env {
                    return None;
                }
                let p = PathBuf::from(std::env::var(var).ok().filter(|v| !v.is_empty())?);
                p.is_dir().then_some(p)
            }
            Candidate::EnvFileParent(var) => {
                if !allow_env {
                    return None;
                }
                let p = PathBuf::from(std::env::var(var).ok().filter(|v| !v.is_empty())?);
                if p.is_file() {
                    p.parent().map(Path::to_path_buf)
                } else {
                    None
                }
            }
            Candidate::EnvFile(var) => {
                if !allow_env {
                    return None;
                }
                let p = PathBuf::from(std::env::var(var).ok().filter(|v| !v.is_empty())?);
                p.is_file().then_some(p)
            }
            Candidate::HomeDir(rel) => {
                let p = home.join(rel);
                p.is_dir().then_some(p)
            }
            Candidate::HomeFile(rel) => {
                let p = home.join(rel);
                p.is_file().then_some(p)
            }
        }
    }
}

/// A resolved host→container credential mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMount {
    pub kind: MountKind,
    pub host: PathBuf,
    pub container: String,
    pub mode: MountMode,
}

/// Resolve credential mounts for every enabled kind.
///
/// `workspace_home` substitutes for the real home directory and disables
/// env-var overrides for the resolution.
pub fn resolve_profile_mounts(
    profile: &ProfileConfig,
    workspace_home: Option<&Path>,
) -> Vec<ResolvedMount> {
    let allow_env = workspace_home.is_none();
    let home = match workspace_home {
        Some(ws) => ws.to_path_buf(),
        None => match std::env::var("WORKSPACE_HOME") {
            Ok(ws) if !ws.is_empty() => PathBuf::from(ws),
            _ => dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")),
        },
    };

    let mut mounts = Vec::new();
    for kind in MountKind::ALL {
        if !kind.enabled(profile) {
            continue;
        }
        let resolved = kind
            .candidates()
            .iter()
            .find_map(|c| c.resolve(&home, allow_env));
        if let Some(host) = resolved {
            mounts.push(ResolvedMount {
                kind,
                host,
                container: kind.container_target(),
                mode: MountMode::ReadWrite,
            });
        }
    }
    mounts
}

/// Host-only variables never injected into containers.
const HOST_ONLY_VARS: &[&str] = &[
    "HOME",
    "TMPDIR",
    "SSH_AUTH_SOCK",
    "GPG_TTY",
    "GIT_SSH_COMMAND",
    "CLAUDE_CONFIG_DIR",
    "GEMINI_CONFIG_DIR",
    "WORKSPACE_HOME",
    "WORKSPACE_PROFILE",
];

fn profile_cache_file(profile: &str) -> PathBuf {
    let tmp = std::env::var("TMPDIR")
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"));
    tmp.join("sp-profiles").join(profile).join(".env")
}

/// Read the volatile per-profile env cache and build the in-container
/// environment block.
///
/// The block opens with the profile identity (`WORKSPACE_PROFILE` and an
/// in-container `WORKSPACE_HOME`), so `$WORKSPACE_HOME` tokens in the
/// cached lines expand to the container home when sourced. Host-only
/// variables are stripped; comments and blank lines are skipped. Returns
/// `None` when no profile is active or the cache file is absent.
pub fn resolve_profile_env(workspace_profile: Option<&str>) -> Option<String> {
    let from_env;
    let profile = match workspace_profile.filter(|p| !p.is_empty()) {
        Some(p) => p,
        None => {
            from_env = std::env::var("WORKSPACE_PROFILE").ok()?;
            if from_env.is_empty() {
                return None;
            }
            from_env.as_str()
        }
    };

    let cache = profile_cache_file(profile);
    let contents = std::fs::read_to_string(&cache).ok()?;

    let mut lines = vec![
        format!("WORKSPACE_PROFILE={profile}"),
        format!("WORKSPACE_HOME={CONTAINER_HOME}"),
    ];
    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let assignment = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let key = assignment.split('=').next().unwrap_or("").trim();
        if HOST_ONLY_VARS.contains(&key) {
            continue;
        }
        lines.push(line.to_string());
    }
    Some(lines.join("\n"))
}
