//! warden: session lifecycle orchestration for sandboxed agent containers.
//!
//! Each session is one container driven through a forward-only pipeline
//! (provision, configure, start, monitor, recycle) by a
//! [`SessionOrchestrator`]. Policy lives in dedicated modules: container
//! hardening, secret resolution, image signature verification, and host
//! credential mount resolution.

pub mod config;
pub mod engine;
pub mod error;
pub mod hardening;
pub mod mounts;
pub mod orchestrator;
pub mod secrets;
pub mod session;
pub mod verify;

pub use config::{Config, Role, VerifyMode};
pub use engine::{ContainerEngine, ContainerSpec, DockerEngine, EngineError};
pub use error::{ConfigError, LifecycleError};
pub use orchestrator::{
    NullWatcher, ProvisionRequest, SessionOrchestrator, SessionWatcher, StartWarning,
};
pub use session::{SessionContext, SessionState, Token};
