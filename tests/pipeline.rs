//! End-to-end pipeline tests against a fake container engine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use warden::engine::{ContainerEngine, ContainerSpec, EngineError};
use warden::hardening::SecuritySpec;
use warden::orchestrator::{NullWatcher, SessionWatcher};
use warden::{Config, ProvisionRequest, SessionContext, SessionOrchestrator, SessionState};

#[derive(Default)]
struct FakeState {
    containers: HashMap<String, ContainerSpec>,
    running: Vec<String>,
    execs: Vec<(String, Vec<String>, bool)>,
    removed: Vec<String>,
}

/// In-memory engine that records every call.
struct FakeEngine {
    digests: HashMap<String, Vec<String>>,
    state: Mutex<FakeState>,
}

impl FakeEngine {
    fn with_images(images: &[&str]) -> Self {
        let digests = images
            .iter()
            .map(|i| {
                (
                    i.to_string(),
                    vec![format!("registry.example.com/{i}@sha256:feed")],
                )
            })
            .collect();
        Self {
            digests,
            state: Mutex::new(FakeState::default()),
        }
    }

    fn spec_for(&self, name: &str) -> Option<ContainerSpec> {
        self.state.lock().unwrap().containers.get(name).cloned()
    }

    fn exec_scripts(&self, name: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .execs
            .iter()
            .filter(|(n, _, _)| n == name)
            .map(|(_, cmd, _)| cmd.join(" "))
            .collect()
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn image_repo_digests(&self, image: &str) -> Result<Vec<String>, EngineError> {
        self.digests
            .get(image)
            .cloned()
            .ok_or_else(|| EngineError::NotFound {
                name: image.to_string(),
            })
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.containers.insert(spec.name.clone(), spec.clone());
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if !state.containers.contains_key(name) {
            return Err(EngineError::NotFound {
                name: name.to_string(),
            });
        }
        state.running.push(name.to_string());
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.running.retain(|n| n != name);
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.removed.push(name.to_string());
        if state.containers.remove(name).is_none() {
            return Err(EngineError::NotFound {
                name: name.to_string(),
            });
        }
        state.running.retain(|n| n != name);
        Ok(())
    }

    async fn exec(
        &self,
        name: &str,
        cmd: Vec<String>,
        detach: bool,
    ) -> Result<Option<i64>, EngineError> {
        let mut state = self.state.lock().unwrap();
        state.execs.push((name.to_string(), cmd, detach));
        Ok(if detach { None } else { Some(0) })
    }

    async fn published_host_ports(&self) -> Result<Vec<u16>, EngineError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .running
            .iter()
            .filter_map(|n| state.containers.get(n))
            .map(|spec| spec.host_port)
            .collect())
    }
}

#[derive(Default)]
struct RecordingWatcher {
    events: Mutex<Vec<String>>,
}

#[async_trait]
impl SessionWatcher for RecordingWatcher {
    async fn start_watch(&self, ctx: &SessionContext) {
        self.events
            .lock()
            .unwrap()
            .push(format!("watch:{}", ctx.session_name));
    }

    async fn stop_watch(&self, session_name: &str) {
        self.events
            .lock()
            .unwrap()
            .push(format!("unwatch:{session_name}"));
    }
}

fn test_config(dir: &std::path::Path) -> Config {
    Config {
        config_dir: dir.to_path_buf(),
        ..Config::default()
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn orchestrator(
    config: Config,
    engine: Arc<FakeEngine>,
) -> SessionOrchestrator {
    init_tracing();
    SessionOrchestrator::new(config, engine, Arc::new(NullWatcher))
}

fn request(name: &str, hardened: bool) -> ProvisionRequest {
    ProvisionRequest {
        session_name: name.to_string(),
        hardened,
        ..ProvisionRequest::default()
    }
}

#[tokio::test]
async fn pipeline_advances_through_every_state() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::with_images(&["warden-developer"]));
    let orch = orchestrator(test_config(tmp.path()), engine.clone());

    let ctx = orch.provision(request("demo", true)).await.unwrap();
    assert_eq!(ctx.state, SessionState::Configuring);
    assert_eq!(ctx.container_name, "developer-demo");
    assert_eq!(ctx.port, 7681);
    assert_eq!(ctx.ttl_secs, 3600);

    orch.configure("demo").await.unwrap();
    let ctx = orch.get_session("demo").await.unwrap();
    assert_eq!(ctx.state, SessionState::Starting);
    // A token stub is always staged.
    assert!(ctx.secrets.contains_key("agent-token"));

    let warnings = orch.start("demo").await.unwrap();
    assert!(warnings.is_empty(), "{warnings:?}");
    let ctx = orch.get_session("demo").await.unwrap();
    assert_eq!(ctx.state, SessionState::Running);

    orch.monitor("demo").await.unwrap();
    let ctx = orch.get_session("demo").await.unwrap();
    assert_eq!(ctx.state, SessionState::Monitoring);

    orch.recycle("demo", "test teardown").await.unwrap();
    assert!(orch.get_session("demo").await.is_none());
    assert!(engine.spec_for("developer-demo").is_none());
}

#[tokio::test]
async fn run_pipeline_lands_in_monitoring() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::with_images(&["warden-developer"]));
    let orch = orchestrator(test_config(tmp.path()), engine);

    let ctx = orch.run_pipeline(request("full", false)).await.unwrap();
    assert_eq!(ctx.state, SessionState::Monitoring);
}

#[tokio::test]
async fn ports_are_unique_across_sessions() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::with_images(&["warden-developer"]));
    let orch = orchestrator(test_config(tmp.path()), engine);

    let a = orch.provision(request("one", true)).await.unwrap();
    let b = orch.provision(request("two", true)).await.unwrap();
    let c = orch.provision(request("three", true)).await.unwrap();

    assert_eq!(a.port, 7681);
    assert_eq!(b.port, 7682);
    assert_eq!(c.port, 7683);
}

#[tokio::test]
async fn explicit_port_is_honored_and_checked() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::with_images(&["warden-developer"]));
    let orch = orchestrator(test_config(tmp.path()), engine);

    let req = ProvisionRequest {
        session_name: "pinned".to_string(),
        hardened: true,
        port: Some(9000),
        ..ProvisionRequest::default()
    };
    let ctx = orch.provision(req).await.unwrap();
    assert_eq!(ctx.port, 9000);

    // A second request for the same port is refused, not reallocated.
    let req = ProvisionRequest {
        session_name: "clash".to_string(),
        hardened: true,
        port: Some(9000),
        ..ProvisionRequest::default()
    };
    let err = orch.provision(req).await.unwrap_err();
    assert!(err.to_string().contains("9000"), "{err}");
    assert!(orch.get_session("clash").await.is_none());

    // Unpinned sessions still come from the scan range.
    let ctx = orch.provision(request("scanned", true)).await.unwrap();
    assert_eq!(ctx.port, 7681);
}

#[tokio::test]
async fn recycle_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::with_images(&["warden-developer"]));
    let orch = orchestrator(test_config(tmp.path()), engine);

    orch.provision(request("gone", true)).await.unwrap();
    orch.recycle("gone", "ttl expired").await.unwrap();
    orch.recycle("gone", "ttl expired").await.unwrap();
    // Never-provisioned names are a no-op too.
    orch.recycle("never-existed", "ttl expired").await.unwrap();
}

#[tokio::test]
async fn provision_failure_registers_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    // No images known to the engine.
    let engine = Arc::new(FakeEngine::with_images(&[]));
    let orch = orchestrator(test_config(tmp.path()), engine.clone());

    let err = orch.provision(request("broken", true)).await.unwrap_err();
    assert!(err.to_string().contains("not present"), "{err}");
    assert!(orch.get_session("broken").await.is_none());
    assert!(orch.list_sessions().await.is_empty());
    assert!(engine.spec_for("developer-broken").is_none());
}

#[tokio::test]
async fn hardened_and_legacy_specs_are_disjoint() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::with_images(&["warden-developer"]));
    let orch = orchestrator(test_config(tmp.path()), engine.clone());

    orch.provision(request("locked", true)).await.unwrap();
    orch.provision(request("open", false)).await.unwrap();

    let locked = engine.spec_for("developer-locked").unwrap();
    match &locked.security {
        SecuritySpec::Hardened(h) => {
            assert!(h.read_only_rootfs);
            assert!(h.cap_drop.contains(&"NET_RAW".to_string()));
            assert_eq!(h.user, "65534:65534");
        }
        SecuritySpec::Legacy(_) => panic!("expected hardened posture"),
    }

    let open = engine.spec_for("developer-open").unwrap();
    match &open.security {
        SecuritySpec::Legacy(l) => assert!(l.host_ipc),
        SecuritySpec::Hardened(_) => panic!("expected legacy posture"),
    }
}

#[tokio::test]
async fn start_injects_per_posture() {
    let tmp = tempfile::tempdir().unwrap();
    let secrets_dir = tmp.path().join(".secrets");
    std::fs::create_dir_all(&secrets_dir).unwrap();
    std::fs::write(secrets_dir.join("API_KEY"), "abc123").unwrap();

    let engine = Arc::new(FakeEngine::with_images(&["warden-developer"]));
    let orch = orchestrator(test_config(tmp.path()), engine.clone());

    // Hardened: per-secret files under /run/secrets and nothing else; the
    // onboarding patch and the terminal belong to the legacy path.
    orch.provision(request("locked", true)).await.unwrap();
    orch.configure("locked").await.unwrap();
    orch.start("locked").await.unwrap();
    let scripts = engine.exec_scripts("developer-locked").join("\n");
    assert!(scripts.contains("/run/secrets/API_KEY"), "{scripts}");
    assert!(scripts.contains("chmod 400"), "{scripts}");
    assert!(!scripts.contains("ttyd"), "{scripts}");
    assert!(!scripts.contains(".claude.json"), "{scripts}");

    // Legacy: one consolidated env file, token in its own file, onboarding
    // patch, terminal launch.
    orch.provision(request("open", false)).await.unwrap();
    orch.configure("open").await.unwrap();
    let ctx = orch.get_session("open").await.unwrap();
    let blob = ctx.env_content.as_deref().unwrap();
    assert!(blob.contains("export API_KEY='abc123'"), "{blob}");
    // The token never goes into the sourced env file.
    assert!(!blob.contains("agent-token"), "{blob}");

    orch.start("open").await.unwrap();
    let scripts = engine.exec_scripts("developer-open").join("\n");
    assert!(scripts.contains("/home/developer/.env"), "{scripts}");
    assert!(scripts.contains("/home/developer/.agent-token"), "{scripts}");
    assert!(scripts.contains(".claude.json"), "{scripts}");
    assert!(scripts.contains("ttyd"), "{scripts}");
    assert!(!scripts.contains("/run/secrets/"), "{scripts}");
}

#[tokio::test]
async fn ollama_provider_stages_anthropic_vars() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::with_images(&["warden-developer"]));
    let orch = orchestrator(test_config(tmp.path()), engine);

    let req = ProvisionRequest {
        session_name: "llama".to_string(),
        hardened: false,
        llm_provider: Some("ollama".to_string()),
        llm_model: Some("qwen2.5-coder".to_string()),
        ..ProvisionRequest::default()
    };
    orch.provision(req).await.unwrap();
    orch.configure("llama").await.unwrap();

    let ctx = orch.get_session("llama").await.unwrap();
    assert_eq!(ctx.secrets["ANTHROPIC_AUTH_TOKEN"], "ollama");
    assert_eq!(
        ctx.secrets["ANTHROPIC_BASE_URL"],
        "http://host.docker.internal:11434"
    );
    assert_eq!(ctx.secrets["ANTHROPIC_MODEL"], "qwen2.5-coder");
}

#[tokio::test]
async fn watcher_sees_monitor_and_recycle() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::with_images(&["warden-developer"]));
    let watcher = Arc::new(RecordingWatcher::default());
    let orch = SessionOrchestrator::new(test_config(tmp.path()), engine, watcher.clone());

    orch.run_pipeline(request("watched", true)).await.unwrap();
    orch.recycle("watched", "user requested").await.unwrap();

    let events = watcher.events.lock().unwrap().clone();
    assert_eq!(events, vec!["watch:watched", "unwatch:watched"]);
}

#[tokio::test]
async fn labels_identify_managed_sessions() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::with_images(&["warden-developer"]));
    let orch = orchestrator(test_config(tmp.path()), engine.clone());

    let req = ProvisionRequest {
        session_name: "tagged".to_string(),
        hardened: true,
        workspace_profile: Some("personal".to_string()),
        ..ProvisionRequest::default()
    };
    orch.provision(req).await.unwrap();

    let spec = engine.spec_for("developer-tagged").unwrap();
    assert_eq!(spec.labels["warden.managed"], "true");
    assert_eq!(spec.labels["warden.role"], "developer");
    assert_eq!(spec.labels["warden.llm_provider"], "claude");
    assert_eq!(spec.labels["warden.workspace_profile"], "personal");
}
