//! Typed role table.
//!
//! Each sandbox role maps to an image name and a container-name prefix.
//! Explicit `WARDEN_IMAGE` / `WARDEN_CONTAINER_PREFIX` settings override
//! the role-derived defaults.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Sandbox role: selects the image and naming convention for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Developer,
    Researcher,
    Performer,
}

/// Image and prefix defaults for one role.
#[derive(Debug, Clone, Copy)]
pub struct RoleSpec {
    pub image: &'static str,
    pub prefix: &'static str,
    /// Title shown in the session's web terminal.
    pub title: &'static str,
}

impl Role {
    pub fn spec(&self) -> RoleSpec {
        match self {
            Role::Developer => RoleSpec {
                image: "warden-developer",
                prefix: "developer-",
                title: "Developer",
            },
            Role::Researcher => RoleSpec {
                image: "warden-researcher",
                prefix: "researcher-",
                title: "Researcher",
            },
            Role::Performer => RoleSpec {
                image: "warden-performer",
                prefix: "performer-",
                title: "Performer",
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Developer => "developer",
            Role::Researcher => "researcher",
            Role::Performer => "performer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "developer" => Ok(Role::Developer),
            "researcher" => Ok(Role::Researcher),
            "performer" => Ok(Role::Performer),
            other => Err(ConfigError::UnknownRole(other.to_string())),
        }
    }
}
