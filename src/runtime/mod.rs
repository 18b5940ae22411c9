//! Narrow facade over the container engine.
//!
//! The [`EngineRuntime`] trait exposes exactly the calls the lifecycle manager needs. Every call
//! is a single request to the runtime: implementations never retry, and every failure is
//! classified into a [`runtime::Error`](Error) variant so that callers branch on the kind of
//! failure instead of on error text.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;

use crate::container::{ContainerID, ContainerName};

mod docker;
mod error;
#[cfg(test)]
pub(crate) mod fake;

pub use docker::DockerRuntime;
pub use error::{Error, Result};

/// Runtime-level description of a container to create.
///
/// This is the engine's native shape: ports are keyed `"port/proto"`, limits are signed and
/// optional, bind mounts are `host:container[:ro]` strings.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerConfig {
    pub name: ContainerName,
    pub image: String,
    pub cmd: Vec<String>,
    /// `"8000/tcp"` -> host port `"8000"`.
    pub port_bindings: BTreeMap<String, String>,
    pub cpu_quota: Option<i64>,
    pub memory: Option<i64>,
    pub gpu: Option<GpuRequest>,
    pub binds: Vec<String>,
    pub restart_policy: RestartPolicy,
    pub labels: HashMap<String, String>,
}

/// GPU device request for the `nvidia` driver.
///
/// `count == Some(-1)` requests every device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuRequest {
    pub count: Option<i64>,
    pub device_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    No,
    #[default]
    UnlessStopped,
}

/// A container as reported by [`EngineRuntime::list_containers`].
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSummary {
    pub id: ContainerID,
    /// Names without the leading `/` some engines report.
    pub names: Vec<String>,
    pub image: String,
    pub state: RuntimeState,
    pub labels: HashMap<String, String>,
}

impl ContainerSummary {
    pub fn has_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Raw container state as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

impl RuntimeState {
    /// Parses the engine's state string. Unrecognized values map to [`RuntimeState::Unknown`].
    pub fn from_status(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "removing" => Self::Removing,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            _ => Self::Unknown,
        }
    }

    /// Returns `true` if the container holds a live process.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Restarting | Self::Paused)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Restarting => "restarting",
            Self::Removing => "removing",
            Self::Exited => "exited",
            Self::Dead => "dead",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The container engine operations used by the lifecycle manager.
pub trait EngineRuntime: Send + Sync {
    /// Pulls `image` so that a subsequent create can use it.
    fn pull_image(&self, image: &str) -> impl Future<Output = Result<()>> + Send;

    /// Creates (but does not start) a container and returns its runtime id.
    fn create_container(
        &self,
        config: &ContainerConfig,
    ) -> impl Future<Output = Result<ContainerID>> + Send;

    fn start_container(&self, id: &ContainerID) -> impl Future<Output = Result<()>> + Send;

    /// Stops the container named `name`, force-killing it once `grace` has elapsed.
    fn stop_container(
        &self,
        name: &str,
        grace: Duration,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Force-removes the container with the given name or id.
    fn remove_container(&self, name_or_id: &str) -> impl Future<Output = Result<()>> + Send;

    /// Lists all containers, including stopped ones.
    fn list_containers(&self) -> impl Future<Output = Result<Vec<ContainerSummary>>> + Send;
}
