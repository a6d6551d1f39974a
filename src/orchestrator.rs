//! The session lifecycle pipeline.
//!
//! One `SessionOrchestrator` owns the session registry and drives every
//! sandbox through provision → configure → start → monitor → recycle.
//! Fatal errors leave the session at its current state; `start` additionally
//! reports non-fatal injection problems as [`StartWarning`]s. `recycle` is
//! idempotent and best-effort.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::RwLock;

use crate::config::{Config, Role};
use crate::engine::{BindMount, ContainerEngine, ContainerSpec, EngineError};
use crate::error::LifecycleError;
use crate::hardening::{self, PROFILE_DIR, SECRETS_DIR, SecuritySpec};
use crate::mounts::{self, CONTAINER_HOME, MountMode};
use crate::secrets::SecretResolver;
use crate::session::{SessionContext, SessionState, Token, now_ms};
use crate::verify::verify_image;

/// First host port tried for the web terminal.
const BASE_PORT: u16 = 7681;

/// How many ports above the base the allocator will scan.
const PORT_SCAN_RANGE: u16 = 1024;

/// Port ttyd listens on inside every session container.
const TTYD_PORT: u16 = 7681;

/// Shell sentinel that keeps the profile env from being sourced twice when
/// both login and interactive shell hooks fire.
const PROFILE_SENTINEL: &str = "WARDEN_PROFILE_SOURCED";

/// Request to provision a new session.
#[derive(Debug, Clone, Default)]
pub struct ProvisionRequest {
    pub session_name: String,
    /// Falls back to the configured default role.
    pub role: Option<Role>,
    /// Explicit host port; allocated from the scan range when absent.
    pub port: Option<u16>,
    pub hardened: bool,
    pub ttl_secs: Option<u64>,
    /// Extra `host:container[:mode]` bind specs.
    pub volume_mounts: Vec<String>,
    pub token: Option<Token>,
    /// "claude" when unset.
    pub llm_provider: Option<String>,
    pub llm_model: Option<String>,
    pub ollama_host: Option<String>,
    pub workspace_profile: Option<String>,
    pub workspace_home: Option<PathBuf>,
}

/// A non-fatal problem during the start phase.
#[derive(Debug, Clone)]
pub struct StartWarning {
    pub step: String,
    pub detail: String,
}

impl StartWarning {
    fn new(step: &str, detail: impl Into<String>) -> Self {
        Self {
            step: step.to_string(),
            detail: detail.into(),
        }
    }
}

/// Collaborator notified when sessions enter and leave monitoring.
#[async_trait]
pub trait SessionWatcher: Send + Sync {
    async fn start_watch(&self, ctx: &SessionContext);
    async fn stop_watch(&self, session_name: &str);
}

/// Watcher that does nothing.
pub struct NullWatcher;

#[async_trait]
impl SessionWatcher for NullWatcher {
    async fn start_watch(&self, _ctx: &SessionContext) {}
    async fn stop_watch(&self, _session_name: &str) {}
}

/// Owns the registry and drives sessions through the pipeline.
pub struct SessionOrchestrator {
    config: Config,
    engine: Arc<dyn ContainerEngine>,
    watcher: Arc<dyn SessionWatcher>,
    sessions: RwLock<HashMap<String, SessionContext>>,
}

impl SessionOrchestrator {
    pub fn new(
        config: Config,
        engine: Arc<dyn ContainerEngine>,
        watcher: Arc<dyn SessionWatcher>,
    ) -> Self {
        Self {
            config,
            engine,
            watcher,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create the session container and register the session.
    ///
    /// On error nothing is registered; an existing same-named container is
    /// replaced.
    pub async fn provision(
        &self,
        req: ProvisionRequest,
    ) -> Result<SessionContext, LifecycleError> {
        let role = req.role.unwrap_or(self.config.role);
        let image = self.config.image_for(role);
        let container_name = format!("{}{}", self.config.prefix_for(role), req.session_name);

        tracing::info!(
            session = %req.session_name,
            role = %role,
            image = %image,
            hardened = req.hardened,
            "provisioning session"
        );

        let digests = match self.engine.image_repo_digests(&image).await {
            Ok(digests) => digests,
            Err(EngineError::NotFound { .. }) => {
                return Err(LifecycleError::Precondition {
                    reason: format!("image '{image}' is not present on this host"),
                });
            }
            Err(e) => return Err(e.into()),
        };
        verify_image(&self.config.verify, &image, &digests).await?;

        // The registry lock is held through port allocation and creation so
        // concurrent provisions cannot claim the same port.
        let mut sessions = self.sessions.write().await;

        let mut used: BTreeSet<u16> = self.engine.published_host_ports().await?.into_iter().collect();
        used.extend(sessions.values().map(|s| s.port));
        let port = match req.port {
            Some(port) if used.contains(&port) => {
                return Err(LifecycleError::Precondition {
                    reason: format!("requested port {port} is already in use"),
                });
            }
            Some(port) => port,
            None => allocate_port(&used)?,
        };

        // Replace any stale container left from a previous run.
        match self.engine.remove(&container_name).await {
            Ok(()) => tracing::debug!(container = %container_name, "removed stale container"),
            Err(EngineError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let session_dir = self.config.sessions_dir().join(&req.session_name);
        std::fs::create_dir_all(&session_dir).map_err(|e| LifecycleError::Precondition {
            reason: format!("cannot create session dir {}: {e}", session_dir.display()),
        })?;

        let mut binds = vec![BindMount {
            host: session_dir.display().to_string(),
            container: format!("{CONTAINER_HOME}/.claude/projects"),
            mode: MountMode::ReadWrite,
        }];

        // Containers inherit the host's agent permissions when present.
        if let Some(settings) = host_claude_dir().map(|d| d.join("settings.json")) {
            if settings.is_file() {
                binds.push(BindMount {
                    host: settings.display().to_string(),
                    container: format!("{CONTAINER_HOME}/.claude/settings.json"),
                    mode: MountMode::ReadOnly,
                });
            }
        }

        for spec in &req.volume_mounts {
            binds.push(parse_volume_spec(spec)?);
        }

        let resolved = mounts::resolve_profile_mounts(&self.config.profile, req.workspace_home.as_deref());
        let mut profile_mounts = BTreeSet::new();
        for mount in resolved {
            profile_mounts.insert(mount.kind);
            binds.push(BindMount {
                host: mount.host.display().to_string(),
                container: mount.container,
                mode: mount.mode,
            });
        }

        let security = if req.hardened {
            SecuritySpec::Hardened(hardening::hardened_spec(&self.config)?)
        } else {
            SecuritySpec::Legacy(hardening::legacy_spec())
        };

        let llm_provider = req
            .llm_provider
            .clone()
            .unwrap_or_else(|| "claude".to_string());

        let mut labels = BTreeMap::new();
        labels.insert("warden.managed".to_string(), "true".to_string());
        labels.insert("warden.role".to_string(), role.to_string());
        labels.insert("warden.llm_provider".to_string(), llm_provider.clone());
        if let Some(model) = &req.llm_model {
            labels.insert("warden.llm_model".to_string(), model.clone());
        }
        if let Some(profile) = &req.workspace_profile {
            labels.insert("warden.workspace_profile".to_string(), profile.clone());
        }

        self.engine
            .create(&ContainerSpec {
                name: container_name.clone(),
                image,
                command: vec!["sleep".to_string(), "infinity".to_string()],
                host_port: port,
                internal_port: TTYD_PORT,
                binds,
                labels,
                security,
            })
            .await?;

        let ctx = SessionContext {
            session_name: req.session_name.clone(),
            container_name,
            port,
            role,
            state: SessionState::Configuring,
            created_at: now_ms(),
            ttl_secs: req.ttl_secs.unwrap_or(self.config.ttl_secs),
            hardened: req.hardened,
            volume_mounts: req.volume_mounts,
            secrets: HashMap::new(),
            token: req.token,
            env_content: None,
            llm_provider,
            llm_model: req.llm_model,
            ollama_host: req.ollama_host,
            profile_mounts,
            workspace_profile: req.workspace_profile,
            workspace_home: req.workspace_home,
        };
        sessions.insert(req.session_name, ctx.clone());

        tracing::info!(
            session = %ctx.session_name,
            container = %ctx.container_name,
            port = ctx.port,
            "session provisioned"
        );
        Ok(ctx)
    }

    /// Resolve secrets and stage the session's environment.
    pub async fn configure(&self, session_name: &str) -> Result<(), LifecycleError> {
        let resolver = SecretResolver::new(&self.config);
        let mut secrets = resolver.resolve().await?;

        let mut sessions = self.sessions.write().await;
        let ctx = sessions
            .get_mut(session_name)
            .ok_or_else(|| LifecycleError::SessionNotFound {
                name: session_name.to_string(),
            })?;

        for (key, value) in ollama_env(&ctx.llm_provider, ctx.ollama_host.as_deref(), ctx.llm_model.as_deref())
        {
            secrets.insert(key, value);
        }

        // The env blob is rendered before the token is added: the token is
        // not a shell export, it gets its own file at start.
        if !ctx.hardened {
            ctx.env_content = Some(render_env_content(&secrets));
        }
        secrets.insert("agent-token".to_string(), token_secret(ctx.token.as_ref()));
        ctx.secrets = secrets;
        ctx.state = SessionState::Starting;

        tracing::info!(
            session = %session_name,
            secrets = ctx.secrets.len(),
            hardened = ctx.hardened,
            "session configured"
        );
        Ok(())
    }

    /// Start the container and inject the staged environment.
    ///
    /// Only the container start itself is fatal. Every injection step is
    /// best-effort and reported back as a warning.
    pub async fn start(&self, session_name: &str) -> Result<Vec<StartWarning>, LifecycleError> {
        let ctx = self
            .get_session(session_name)
            .await
            .ok_or_else(|| LifecycleError::SessionNotFound {
                name: session_name.to_string(),
            })?;

        self.engine.start(&ctx.container_name).await?;

        let mut warnings = Vec::new();

        // Hardened sessions get only the per-secret files and the profile
        // env; the onboarding patch and the terminal are legacy-mode steps.
        if ctx.hardened {
            self.inject_secret_files(&ctx, &mut warnings).await;
        } else {
            self.inject_env_file(&ctx, &mut warnings).await;
            self.patch_onboarding(&ctx, &mut warnings).await;
        }
        if self.config.profile.mount_env {
            self.inject_profile_env(&ctx, &mut warnings).await;
        }
        if !ctx.hardened {
            self.launch_terminal(&ctx, &mut warnings).await;
        }

        let mut sessions = self.sessions.write().await;
        if let Some(ctx) = sessions.get_mut(session_name) {
            ctx.state = SessionState::Running;
        }

        for w in &warnings {
            tracing::warn!(session = %session_name, step = %w.step, "{}", w.detail);
        }
        tracing::info!(session = %session_name, warnings = warnings.len(), "session started");
        Ok(warnings)
    }

    /// Hand the session to the watcher.
    pub async fn monitor(&self, session_name: &str) -> Result<(), LifecycleError> {
        let mut sessions = self.sessions.write().await;
        let ctx = sessions
            .get_mut(session_name)
            .ok_or_else(|| LifecycleError::SessionNotFound {
                name: session_name.to_string(),
            })?;
        ctx.state = SessionState::Monitoring;
        let snapshot = ctx.clone();
        drop(sessions);

        self.watcher.start_watch(&snapshot).await;
        tracing::info!(session = %session_name, "session monitored");
        Ok(())
    }

    /// Tear the session down. Idempotent; engine failures are swallowed so
    /// a half-dead container never blocks reclamation.
    pub async fn recycle(&self, session_name: &str, reason: &str) -> Result<(), LifecycleError> {
        let container_name = {
            let mut sessions = self.sessions.write().await;
            let Some(ctx) = sessions.get_mut(session_name) else {
                tracing::debug!(session = %session_name, reason = %reason, "recycle of unknown session is a no-op");
                return Ok(());
            };
            ctx.state = SessionState::Recycling;
            ctx.container_name.clone()
        };

        self.watcher.stop_watch(session_name).await;

        if let Err(e) = self.engine.stop(&container_name).await {
            tracing::warn!(container = %container_name, error = %e, "stop failed during recycle");
        }
        if let Err(e) = self.engine.remove(&container_name).await {
            if !matches!(e, EngineError::NotFound { .. }) {
                tracing::warn!(container = %container_name, error = %e, "remove failed during recycle");
            }
        }

        self.sessions.write().await.remove(session_name);
        tracing::info!(
            session = %session_name,
            reason = %reason,
            state = %SessionState::Recycled,
            "session recycled"
        );
        Ok(())
    }

    /// Run the full pipeline for one request.
    pub async fn run_pipeline(
        &self,
        req: ProvisionRequest,
    ) -> Result<SessionContext, LifecycleError> {
        let name = req.session_name.clone();
        self.provision(req).await?;
        self.configure(&name).await?;
        self.start(&name).await?;
        self.monitor(&name).await?;
        Ok(self.get_session(&name).await.ok_or_else(|| {
            LifecycleError::SessionNotFound { name }
        })?)
    }

    pub async fn get_session(&self, session_name: &str) -> Option<SessionContext> {
        self.sessions.read().await.get(session_name).cloned()
    }

    pub async fn list_sessions(&self) -> Vec<SessionContext> {
        let mut all: Vec<_> = self.sessions.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.session_name.cmp(&b.session_name));
        all
    }

    /// Hardened posture: one file per secret on the secrets tmpfs.
    async fn inject_secret_files(&self, ctx: &SessionContext, warnings: &mut Vec<StartWarning>) {
        for (name, value) in &ctx.secrets {
            let script = format!(
                "printf '%s' {} > {dir}/{name} && chmod 400 {dir}/{name}",
                shell_escape(value),
                dir = SECRETS_DIR,
            );
            if let Err(detail) = self.exec_sh(&ctx.container_name, &script).await {
                warnings.push(StartWarning::new("secret-file", format!("{name}: {detail}")));
            }
        }
    }

    /// Legacy posture: one consolidated env file plus the token file.
    async fn inject_env_file(&self, ctx: &SessionContext, warnings: &mut Vec<StartWarning>) {
        let Some(env_content) = &ctx.env_content else {
            return;
        };
        let script = format!(
            "rm -f {home}/.env && printf '%s\\n' {} > {home}/.env && chmod 600 {home}/.env",
            shell_escape(env_content),
            home = CONTAINER_HOME,
        );
        if let Err(detail) = self.exec_sh(&ctx.container_name, &script).await {
            warnings.push(StartWarning::new("env-file", detail));
        }

        if let Some(token) = ctx.secrets.get("agent-token") {
            let script = format!(
                "printf '%s' {} > {home}/.agent-token && chmod 400 {home}/.agent-token",
                shell_escape(token),
                home = CONTAINER_HOME,
            );
            if let Err(detail) = self.exec_sh(&ctx.container_name, &script).await {
                warnings.push(StartWarning::new("agent-token", detail));
            }
        }
    }

    /// Mark onboarding complete inside the container, carrying the host's
    /// account identity over when one exists.
    async fn patch_onboarding(&self, ctx: &SessionContext, warnings: &mut Vec<StartWarning>) {
        let patch = onboarding_patch();
        let script = format!(
            "printf '%s' {} > {home}/.claude.json",
            shell_escape(&patch),
            home = CONTAINER_HOME,
        );
        if let Err(detail) = self.exec_sh(&ctx.container_name, &script).await {
            warnings.push(StartWarning::new("onboarding", detail));
        }
    }

    /// Write the profile env snapshot and hook it into both shell startup
    /// files, guarded by a sentinel so it is only sourced once.
    async fn inject_profile_env(&self, ctx: &SessionContext, warnings: &mut Vec<StartWarning>) {
        let Some(block) = mounts::resolve_profile_env(ctx.workspace_profile.as_deref()) else {
            return;
        };
        let env_file = if ctx.hardened {
            format!("{PROFILE_DIR}/.env")
        } else {
            format!("{CONTAINER_HOME}/.profile-env")
        };

        let script = format!("printf '%s\\n' {} > {env_file}", shell_escape(&block));
        if let Err(detail) = self.exec_sh(&ctx.container_name, &script).await {
            warnings.push(StartWarning::new("profile-env", detail));
            return;
        }

        let hook = format!(
            "if [ -z \"${PROFILE_SENTINEL}\" ] && [ -f {env_file} ]; then set -a; . {env_file}; set +a; export {PROFILE_SENTINEL}=1; fi"
        );
        // .bashrc covers interactive shells, .env non-interactive agent
        // runs; the sentinel makes a shell that reads both source once.
        for rc in [".bashrc", ".env"] {
            let script = format!(
                "grep -qs {PROFILE_SENTINEL} {home}/{rc} || printf '%s\\n' {} >> {home}/{rc}",
                shell_escape(&hook),
                home = CONTAINER_HOME,
            );
            if let Err(detail) = self.exec_sh(&ctx.container_name, &script).await {
                warnings.push(StartWarning::new("profile-hook", format!("{rc}: {detail}")));
            }
        }
    }

    /// Launch the web terminal, detached.
    async fn launch_terminal(&self, ctx: &SessionContext, warnings: &mut Vec<StartWarning>) {
        let title = format!("titleFixed={} {}", ctx.role.spec().title, ctx.session_name);
        let cmd = vec![
            "ttyd".to_string(),
            "-W".to_string(),
            "-p".to_string(),
            TTYD_PORT.to_string(),
            "-t".to_string(),
            title,
            "tmux".to_string(),
            "new".to_string(),
            "-A".to_string(),
            "-s".to_string(),
            "main".to_string(),
        ];
        if let Err(e) = self.engine.exec(&ctx.container_name, cmd, true).await {
            warnings.push(StartWarning::new("terminal", e.to_string()));
        }
    }

    async fn exec_sh(&self, container: &str, script: &str) -> Result<(), String> {
        let cmd = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
        match self.engine.exec(container, cmd, false).await {
            Ok(Some(0)) | Ok(None) => Ok(()),
            Ok(Some(code)) => Err(format!("exited with code {code}")),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// First free port at or above the base, within the scan range.
fn allocate_port(used: &BTreeSet<u16>) -> Result<u16, LifecycleError> {
    (BASE_PORT..BASE_PORT + PORT_SCAN_RANGE)
        .find(|p| !used.contains(p))
        .ok_or_else(|| LifecycleError::Precondition {
            reason: format!(
                "no free port in {BASE_PORT}..{}",
                BASE_PORT + PORT_SCAN_RANGE
            ),
        })
}

/// Parse a `host:container[:mode]` bind spec.
fn parse_volume_spec(spec: &str) -> Result<BindMount, LifecycleError> {
    let parts: Vec<&str> = spec.split(':').collect();
    let invalid = || LifecycleError::Configuration {
        reason: format!("invalid volume spec '{spec}', expected host:container[:mode]"),
    };
    let (host, container, mode) = match parts.as_slice() {
        [host, container] => (host, container, MountMode::ReadWrite),
        [host, container, "rw"] => (host, container, MountMode::ReadWrite),
        [host, container, "ro"] => (host, container, MountMode::ReadOnly),
        _ => return Err(invalid()),
    };
    if host.is_empty() || container.is_empty() {
        return Err(invalid());
    }
    Ok(BindMount {
        host: host.to_string(),
        container: container.to_string(),
        mode,
    })
}

/// Anthropic-compatible env vars pointing an agent at a local ollama.
fn ollama_env(
    llm_provider: &str,
    ollama_host: Option<&str>,
    llm_model: Option<&str>,
) -> Vec<(String, String)> {
    if llm_provider != "ollama" {
        return Vec::new();
    }
    let base_url = ollama_host
        .map(str::to_string)
        .unwrap_or_else(|| "http://host.docker.internal:11434".to_string());
    let mut vars = vec![
        ("ANTHROPIC_AUTH_TOKEN".to_string(), "ollama".to_string()),
        ("ANTHROPIC_BASE_URL".to_string(), base_url),
    ];
    if let Some(model) = llm_model {
        vars.push(("ANTHROPIC_MODEL".to_string(), model.to_string()));
    }
    vars
}

/// Serialize the capability token, or a stub when none was issued.
fn token_secret(token: Option<&Token>) -> String {
    match token {
        Some(token) => serde_json::to_string(token).unwrap_or_else(|_| "{}".to_string()),
        None => json!({
            "stub": true,
            "issued": chrono::Utc::now().to_rfc3339(),
            "note": "Use hub API to get a real token",
        })
        .to_string(),
    }
}

/// Consolidated `export` blob for legacy-mode containers, sorted by name.
fn render_env_content(secrets: &HashMap<String, String>) -> String {
    let mut entries: Vec<_> = secrets.iter().collect();
    entries.sort_by_key(|(k, _)| k.as_str());
    entries
        .iter()
        .map(|(k, v)| format!("export {k}={}", shell_escape(v)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn host_claude_dir() -> Option<PathBuf> {
    match std::env::var("CLAUDE_CONFIG_DIR") {
        Ok(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::home_dir().map(|h| h.join(".claude")),
    }
}

/// Onboarding patch for the container's agent config: marks onboarding
/// done and carries the host's oauth account over when available.
fn onboarding_patch() -> String {
    let mut patch = json!({ "hasCompletedOnboarding": true });
    if let Some(dir) = host_claude_dir() {
        if let Ok(raw) = std::fs::read_to_string(dir.join(".claude.json")) {
            if let Ok(host_config) = serde_json::from_str::<serde_json::Value>(&raw) {
                let account = &host_config["oauthAccount"];
                if account["accountUuid"].is_string() {
                    patch["oauthAccount"] = account.clone();
                }
            }
        }
    }
    patch.to_string()
}

/// Single-quote a value for `sh -c`.
fn shell_escape(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_port_skips_used() {
        let used = BTreeSet::from([7681, 7682, 7684]);
        assert_eq!(allocate_port(&used).unwrap(), 7683);
        assert_eq!(allocate_port(&BTreeSet::new()).unwrap(), 7681);
    }

    #[test]
    fn allocate_port_errors_when_range_exhausted() {
        let used: BTreeSet<u16> = (BASE_PORT..BASE_PORT + PORT_SCAN_RANGE).collect();
        let err = allocate_port(&used).unwrap_err();
        assert!(matches!(err, LifecycleError::Precondition { .. }), "{err}");
    }

    #[test]
    fn volume_spec_parses_modes() {
        let m = parse_volume_spec("/data:/workspace/data").unwrap();
        assert_eq!(m.mode, MountMode::ReadWrite);
        let m = parse_volume_spec("/data:/workspace/data:ro").unwrap();
        assert_eq!(m.mode, MountMode::ReadOnly);
        assert!(parse_volume_spec("/data").is_err());
        assert!(parse_volume_spec("/data:/x:rwx").is_err());
        assert!(parse_volume_spec(":/x").is_err());
    }

    #[test]
    fn ollama_env_only_for_ollama_provider() {
        assert!(ollama_env("claude", None, None).is_empty());

        let vars = ollama_env("ollama", None, Some("qwen2.5-coder"));
        let map: HashMap<_, _> = vars.into_iter().collect();
        assert_eq!(map["ANTHROPIC_AUTH_TOKEN"], "ollama");
        assert_eq!(map["ANTHROPIC_BASE_URL"], "http://host.docker.internal:11434");
        assert_eq!(map["ANTHROPIC_MODEL"], "qwen2.5-coder");
    }

    #[test]
    fn ollama_env_honors_explicit_host() {
        let vars = ollama_env("ollama", Some("http://10.0.0.5:11434"), None);
        let map: HashMap<_, _> = vars.into_iter().collect();
        assert_eq!(map["ANTHROPIC_BASE_URL"], "http://10.0.0.5:11434");
        assert!(!map.contains_key("ANTHROPIC_MODEL"));
    }

    #[test]
    fn token_secret_round_trips_real_token() {
        let token = Token {
            token_id: "t-1".to_string(),
            agent_name: "demo".to_string(),
            task_id: "task-9".to_string(),
            capabilities: vec![],
            issued: 1,
            expiry: 2,
        };
        let raw = token_secret(Some(&token));
        let back: Token = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.token_id, "t-1");
    }

    #[test]
    fn token_secret_stub_shape() {
        let raw = token_secret(None);
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["stub"], true);
        assert!(v["issued"].is_string());
        assert!(v["note"].as_str().unwrap().contains("hub API"));
    }

    #[test]
    fn env_content_is_sorted_and_quoted() {
        let mut secrets = HashMap::new();
        secrets.insert("B_KEY".to_string(), "two".to_string());
        secrets.insert("A_KEY".to_string(), "it's one".to_string());
        let blob = render_env_content(&secrets);
        let lines: Vec<_> = blob.lines().collect();
        assert_eq!(lines[0], r"export A_KEY='it'\''s one'");
        assert_eq!(lines[1], "export B_KEY='two'");
    }

    #[test]
    fn shell_escape_wraps_and_quotes() {
        assert_eq!(shell_escape("plain"), "'plain'");
        assert_eq!(shell_escape("a'b"), r"'a'\''b'");
    }
}
