//! Session data model: one `SessionContext` per active sandbox.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::Role;
use crate::mounts::MountKind;

/// Pipeline state of a session. Only ever advances forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Provisioning,
    Configuring,
    Starting,
    Running,
    Monitoring,
    Recycling,
    Recycled,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Provisioning => "provisioning",
            Self::Configuring => "configuring",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Monitoring => "monitoring",
            Self::Recycling => "recycling",
            Self::Recycled => "recycled",
        };
        f.write_str(s)
    }
}

/// Capability credential issued by the external hub.
///
/// Opaque to this crate: it is validated elsewhere and only embedded into
/// the session as the `agent-token` secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub token_id: String,
    pub agent_name: String,
    pub task_id: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Epoch milliseconds.
    pub issued: i64,
    /// Epoch milliseconds.
    pub expiry: i64,
}

/// Orchestration metadata for one sandbox container.
///
/// Created by `provision`, mutated in place through the pipeline, removed
/// from the registry by `recycle`.
#[derive(Clone)]
pub struct SessionContext {
    pub session_name: String,
    /// Derived: role prefix + session name.
    pub container_name: String,
    /// Host port, bound to loopback only.
    pub port: u16,
    pub role: Role,
    pub state: SessionState,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Seconds until the session is eligible for reclamation.
    pub ttl_secs: u64,
    /// Security posture; immutable for the session's lifetime.
    pub hardened: bool,
    /// User-supplied `host:container[:mode]` specs.
    pub volume_mounts: Vec<String>,
    /// Resolved name→value credential map. Never logged.
    pub secrets: HashMap<String, String>,
    pub token: Option<Token>,
    /// Legacy-mode consolidated `export KEY=VALUE` blob.
    pub env_content: Option<String>,
    pub llm_provider: String,
    pub llm_model: Option<String>,
    pub ollama_host: Option<String>,
    /// Credential mount kinds actually resolved at provision time.
    pub profile_mounts: BTreeSet<MountKind>,
    pub workspace_profile: Option<String>,
    pub workspace_home: Option<PathBuf>,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("session_name", &self.session_name)
            .field("container_name", &self.container_name)
            .field("port", &self.port)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("created_at", &self.created_at)
            .field("ttl_secs", &self.ttl_secs)
            .field("hardened", &self.hardened)
            .field("volume_mounts", &self.volume_mounts)
            .field("secrets", &format_args!("[REDACTED, {}]", self.secrets.len()))
            .field("env_content", &self.env_content.as_ref().map(|_| "[REDACTED]"))
            .field("llm_provider", &self.llm_provider)
            .field("llm_model", &self.llm_model)
            .field("profile_mounts", &self.profile_mounts)
            .field("workspace_profile", &self.workspace_profile)
            .finish()
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SessionContext {
        let mut secrets = HashMap::new();
        secrets.insert("API_KEY".to_string(), "hunter2".to_string());
        SessionContext {
            session_name: "demo".to_string(),
            container_name: "developer-demo".to_string(),
            port: 7681,
            role: Role::Developer,
            state: SessionState::Provisioning,
            created_at: 0,
            ttl_secs: 3600,
            hardened: true,
            volume_mounts: Vec::new(),
            secrets,
            token: None,
            env_content: Some("export API_KEY=hunter2".to_string()),
            llm_provider: "claude".to_string(),
            llm_model: None,
            ollama_host: None,
            profile_mounts: BTreeSet::new(),
            workspace_profile: None,
            workspace_home: None,
        }
    }

    #[test]
    fn debug_redacts_secret_values() {
        let s = format!("{:?}", ctx());
        assert!(!s.contains("hunter2"));
        assert!(s.contains("REDACTED"));
    }

    #[test]
    fn states_order_forward() {
        use SessionState::*;
        let order = [
            Provisioning,
            Configuring,
            Starting,
            Running,
            Monitoring,
            Recycling,
            Recycled,
        ];
        assert!(order.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn state_display_is_lowercase() {
        assert_eq!(SessionState::Provisioning.to_string(), "provisioning");
        assert_eq!(SessionState::Recycled.to_string(), "recycled");
    }

    #[test]
    fn token_round_trips_as_json() {
        let token = Token {
            token_id: "t-1".to_string(),
            agent_name: "demo".to_string(),
            task_id: "task-9".to_string(),
            capabilities: vec!["exec".to_string()],
            issued: 1_700_000_000_000,
            expiry: 1_700_000_360_000,
        };
        let json = serde_json::to_string(&token).unwrap();
        let back: Token = serde_json::from_str(&json).unwrap();
        assert_eq!(back.token_id, "t-1");
        assert_eq!(back.capabilities, vec!["exec"]);
    }
}
