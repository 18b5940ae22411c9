use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use dashmap::DashMap;

use super::error::{Error, Result};
use super::keyed_lock::KeyedAsyncLock;
use super::spec::{EngineSpec, GpuAllocation};
use super::state::{EngineHandle, EngineState, EngineSummary, StopOutcome};
use crate::container::{ContainerID, ContainerName};
use crate::runtime::{
    self, ContainerConfig, ContainerSummary, EngineRuntime, GpuRequest, RestartPolicy,
};

const TARGET: &str = "engine";

/// Label marking containers owned by this agent.
pub const LABEL_MANAGED_BY: &str = "io.mosalama.managed-by";
/// Label carrying the JSON-encoded [`EngineSpec`] a container was created from.
pub const LABEL_ENGINE_SPEC: &str = "io.mosalama.engine-spec";
const MANAGED_BY: &str = "mosalama-agent";

/// What `start_engine` does with a container that already carries the requested name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExistingContainerPolicy {
    /// Keep a container created from an equal spec (restarting it if needed); refuse otherwise.
    #[default]
    Reuse,
    /// Replace any container that is not already running the equal spec.
    Recreate,
}

impl FromStr for ExistingContainerPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reuse" => Ok(Self::Reuse),
            "recreate" => Ok(Self::Recreate),
            other => Err(format!("expected `reuse` or `recreate`, got `{other}`")),
        }
    }
}

/// Bounded exponential backoff for image pulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay after the given (1-based) failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    pub stop_grace: Duration,
    pub call_timeout: Duration,
    pub pull_timeout: Duration,
    pub retry: RetryPolicy,
    pub existing: ExistingContainerPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(10),
            call_timeout: Duration::from_secs(30),
            pull_timeout: Duration::from_secs(600),
            retry: RetryPolicy::default(),
            existing: ExistingContainerPolicy::default(),
        }
    }
}

enum Resolution {
    Reused(EngineHandle),
    Restart(ContainerID),
    Replace,
}

/// Drives engine containers through their lifecycle on top of an [`EngineRuntime`].
///
/// The runtime is the source of truth: every operation starts with a list query and reconciles
/// the handle cache against it. Operations on the same container name are serialized.
pub struct LifecycleManager<R> {
    runtime: R,
    config: ManagerConfig,
    handles: DashMap<ContainerName, EngineHandle>,
    locks: KeyedAsyncLock<ContainerName>,
}

impl<R: EngineRuntime> LifecycleManager<R> {
    pub fn new(runtime: R, config: ManagerConfig) -> Self {
        Self {
            runtime,
            config,
            handles: DashMap::new(),
            locks: KeyedAsyncLock::new(),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Cached handle for `name`, without asking the runtime.
    pub fn handle(&self, name: &str) -> Option<EngineHandle> {
        self.handles.get(name).map(|entry| entry.value().clone())
    }

    /// Ensures the engine described by `spec` is running and returns its handle.
    ///
    /// # Errors
    ///
    /// - [`Error::Reconcile`] if the runtime cannot be queried.
    /// - [`Error::ImagePull`] once pulling failed permanently or ran out of attempts.
    /// - [`Error::ContainerCreate`] on a create failure, or if a container with a different
    ///   configuration holds the name under [`ExistingContainerPolicy::Reuse`].
    /// - [`Error::ContainerStart`] if the created container does not start.
    pub async fn start_engine(&self, spec: &EngineSpec) -> Result<EngineHandle> {
        let name = spec.name();
        let _guard = self.locks.lock(name).await;

        let mut restart = None;
        if let Some(existing) = self.find(name).await? {
            match self.resolve_existing(spec, existing).await? {
                Resolution::Reused(handle) => return Ok(handle),
                Resolution::Restart(id) => restart = Some(id),
                Resolution::Replace => {}
            }
        }

        let mut handle = EngineHandle::requested(name.clone());
        self.store(&handle);
        let result = match restart {
            Some(id) => self.restart(spec, id, &mut handle).await,
            None => self.provision(spec, &mut handle).await,
        };
        match result {
            Ok(()) => {
                self.store(&handle);
                log::info!(
                    target: TARGET,
                    "Engine `{name}` is running ({})",
                    handle.id().map(ContainerID::as_str).unwrap_or_default()
                );
                Ok(handle)
            }
            Err(err) => {
                handle.fail();
                self.store(&handle);
                log::error!(target: TARGET, "Engine `{name}` failed to start: {err}");
                Err(err)
            }
        }
    }

    /// Stops the engine container named `name` without removing it.
    ///
    /// # Errors
    ///
    /// [`Error::Reconcile`] if the runtime cannot be queried, [`Error::ContainerStop`] if the
    /// stop call fails for any reason other than the container being gone or already stopped.
    pub async fn stop_engine(&self, name: &ContainerName) -> Result<StopOutcome> {
        let _guard = self.locks.lock(name).await;

        let existing = match self.find(name).await? {
            Some(existing) if existing.state.is_active() => existing,
            Some(existing) => {
                log::info!(
                    target: TARGET,
                    "Engine `{name}` is not running ({})",
                    existing.state
                );
                self.store(&EngineHandle::observed(
                    name.clone(),
                    existing.id,
                    EngineState::Stopped,
                ));
                return Ok(StopOutcome::AlreadyStopped);
            }
            None => {
                log::info!(target: TARGET, "Engine `{name}` has no container, nothing to stop");
                self.handles
                    .remove_if(name, |_, cached| cached.state() != EngineState::Failed);
                return Ok(StopOutcome::AlreadyStopped);
            }
        };

        let mut handle = EngineHandle::observed(name.clone(), existing.id, EngineState::Running);
        handle.transition(EngineState::Stopping)?;
        self.store(&handle);
        log::info!(
            target: TARGET,
            "Stopping engine `{name}` (grace period {:?})",
            self.config.stop_grace
        );

        let limit = self.config.stop_grace + self.config.call_timeout;
        let outcome = match bounded(
            limit,
            self.runtime.stop_container(name.as_str(), self.config.stop_grace),
        )
        .await
        {
            Ok(()) => StopOutcome::Stopped,
            Err(runtime::Error::NotFound(_) | runtime::Error::NotModified(_)) => {
                StopOutcome::AlreadyStopped
            }
            Err(source) => {
                handle.fail();
                self.store(&handle);
                return Err(Error::ContainerStop {
                    name: name.clone(),
                    source,
                });
            }
        };

        handle.transition(EngineState::Stopped)?;
        self.store(&handle);
        log::info!(target: TARGET, "Engine `{name}` stopped");
        Ok(outcome)
    }

    /// Lists the containers managed by this agent and refreshes the handle cache from them.
    ///
    /// # Errors
    ///
    /// [`Error::Reconcile`] if the runtime cannot be queried.
    pub async fn list_engines(&self) -> Result<Vec<EngineSummary>> {
        let containers = self.list().await?;

        let mut seen = HashSet::new();
        let mut engines = Vec::new();
        for container in containers {
            if container.label(LABEL_MANAGED_BY) != Some(MANAGED_BY) {
                continue;
            }
            let Some(name) = container
                .names
                .iter()
                .find_map(|name| ContainerName::new(name).ok())
            else {
                log::warn!(target: TARGET, "Managed container {} has no usable name", container.id);
                continue;
            };

            let state = EngineState::from_runtime(container.state);
            self.store(&EngineHandle::observed(
                name.clone(),
                container.id.clone(),
                state,
            ));
            seen.insert(name.clone());
            engines.push(EngineSummary {
                name,
                id: container.id,
                image: container.image,
                state,
                runtime_state: container.state,
            });
        }

        // A start in progress has no container before the create call returns.
        self.handles.retain(|name, handle| {
            seen.contains(name)
                || matches!(
                    handle.state(),
                    EngineState::Failed | EngineState::Requested | EngineState::Pulling
                )
        });

        engines.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(engines)
    }

    fn store(&self, handle: &EngineHandle) {
        self.handles.insert(handle.name().clone(), handle.clone());
    }

    async fn list(&self) -> Result<Vec<ContainerSummary>> {
        bounded(self.config.call_timeout, self.runtime.list_containers())
            .await
            .map_err(Error::Reconcile)
    }

    async fn find(&self, name: &ContainerName) -> Result<Option<ContainerSummary>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|c| c.has_name(name.as_str())))
    }

    async fn resolve_existing(
        &self,
        spec: &EngineSpec,
        existing: ContainerSummary,
    ) -> Result<Resolution> {
        let name = spec.name();
        let same_spec = labelled_spec(&existing).as_ref() == Some(spec);

        if same_spec && existing.state.is_active() {
            log::info!(target: TARGET, "Engine `{name}` is already running, reusing it");
            let handle = EngineHandle::observed(name.clone(), existing.id, EngineState::Running);
            self.store(&handle);
            return Ok(Resolution::Reused(handle));
        }

        match (self.config.existing, same_spec) {
            (ExistingContainerPolicy::Reuse, true) => {
                log::info!(
                    target: TARGET,
                    "Reusing existing engine container `{name}` ({})",
                    existing.state
                );
                Ok(Resolution::Restart(existing.id))
            }
            (ExistingContainerPolicy::Reuse, false) => Err(Error::ContainerCreate {
                name: name.clone(),
                source: runtime::Error::Conflict(format!(
                    "container `{name}` exists with a different configuration"
                )),
                cleanup: None,
            }),
            (ExistingContainerPolicy::Recreate, _) => {
                log::info!(target: TARGET, "Replacing existing container `{name}`");
                self.discard(name, &existing).await?;
                Ok(Resolution::Replace)
            }
        }
    }

    /// Stops (if needed) and removes a container standing in the way of a fresh create.
    async fn discard(&self, name: &ContainerName, existing: &ContainerSummary) -> Result<()> {
        let create_error = |source| Error::ContainerCreate {
            name: name.clone(),
            source,
            cleanup: None,
        };

        if existing.state.is_active() {
            match bounded(
                self.config.stop_grace + self.config.call_timeout,
                self.runtime
                    .stop_container(name.as_str(), self.config.stop_grace),
            )
            .await
            {
                Ok(()) | Err(runtime::Error::NotFound(_) | runtime::Error::NotModified(_)) => {}
                Err(source) => return Err(create_error(source)),
            }
        }
        match bounded(
            self.config.call_timeout,
            self.runtime.remove_container(existing.id.as_str()),
        )
        .await
        {
            Ok(()) | Err(runtime::Error::NotFound(_)) => Ok(()),
            Err(source) => Err(create_error(source)),
        }
    }

    /// Brings a stopped container created from `spec` back up. The image is pulled again so a
    /// removed image fails as [`Error::ImagePull`] rather than at start.
    async fn restart(
        &self,
        spec: &EngineSpec,
        id: ContainerID,
        handle: &mut EngineHandle,
    ) -> Result<()> {
        let name = spec.name();

        handle.transition(EngineState::Pulling)?;
        self.store(handle);
        self.pull_with_retry(spec.image()).await?;

        handle.set_id(id.clone());
        handle.transition(EngineState::Created)?;
        self.store(handle);
        log::debug!(target: TARGET, "Restarting container `{name}` ({id})");

        // The container predates this call, so a failed start leaves it in place.
        if let Err(source) = bounded(
            self.config.call_timeout,
            self.runtime.start_container(&id),
        )
        .await
        {
            return Err(Error::ContainerStart {
                name: name.clone(),
                id,
                source,
                cleanup: None,
            });
        }
        handle.transition(EngineState::Running)?;
        Ok(())
    }

    async fn provision(&self, spec: &EngineSpec, handle: &mut EngineHandle) -> Result<()> {
        let name = spec.name();

        handle.transition(EngineState::Pulling)?;
        self.store(handle);
        self.pull_with_retry(spec.image()).await?;

        let config = container_config(spec);
        let id = match bounded(
            self.config.call_timeout,
            self.runtime.create_container(&config),
        )
        .await
        {
            Ok(id) => id,
            Err(source) => {
                // On a conflict the name belongs to a container we did not create.
                let cleanup = match source {
                    runtime::Error::Conflict(_) => None,
                    _ => self.cleanup(name.as_str()).await,
                };
                return Err(Error::ContainerCreate {
                    name: name.clone(),
                    source,
                    cleanup,
                });
            }
        };
        handle.set_id(id.clone());
        handle.transition(EngineState::Created)?;
        self.store(handle);
        log::debug!(target: TARGET, "Created container `{name}` ({id})");

        if let Err(source) = bounded(
            self.config.call_timeout,
            self.runtime.start_container(&id),
        )
        .await
        {
            let cleanup = self.cleanup(id.as_str()).await;
            return Err(Error::ContainerStart {
                name: name.clone(),
                id,
                source,
                cleanup,
            });
        }
        handle.transition(EngineState::Running)?;
        Ok(())
    }

    async fn pull_with_retry(&self, image: &str) -> Result<()> {
        let policy = self.config.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match bounded(self.config.pull_timeout, self.runtime.pull_image(image)).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = policy.backoff(attempt);
                    log::warn!(
                        target: TARGET,
                        "Pulling `{image}` failed (attempt {attempt}/{max_attempts}), retrying in {delay:?}: {err}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(source) => {
                    return Err(Error::ImagePull {
                        image: image.to_owned(),
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }

    /// Best-effort force removal. Returns the failure unless the container was already gone.
    async fn cleanup(&self, name_or_id: &str) -> Option<runtime::Error> {
        match bounded(
            self.config.call_timeout,
            self.runtime.remove_container(name_or_id),
        )
        .await
        {
            Ok(()) => {
                log::debug!(target: TARGET, "Removed leftover container `{name_or_id}`");
                None
            }
            Err(err) if err.is_not_found() => None,
            Err(err) => {
                log::error!(
                    target: TARGET,
                    "Failed to remove leftover container `{name_or_id}`: {err}"
                );
                Some(err)
            }
        }
    }
}

/// Runs a runtime call under `limit`, on top of whatever deadline the runtime applies itself.
async fn bounded<T>(
    limit: Duration,
    fut: impl Future<Output = runtime::Result<T>>,
) -> runtime::Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or(Err(runtime::Error::Timeout(limit)))
}

fn labelled_spec(container: &ContainerSummary) -> Option<EngineSpec> {
    let raw = container.label(LABEL_ENGINE_SPEC)?;
    match serde_json::from_str(raw) {
        Ok(spec) => Some(spec),
        Err(err) => {
            log::debug!(
                target: TARGET,
                "Ignoring unreadable spec label on container {}: {err}",
                container.id
            );
            None
        }
    }
}

fn optional_limit(value: u64) -> Option<i64> {
    // Values above i64::MAX are rejected when the spec is built.
    (value > 0).then(|| i64::try_from(value).unwrap_or(i64::MAX))
}

/// Translates a spec into the runtime's native container description.
fn container_config(spec: &EngineSpec) -> ContainerConfig {
    let port_bindings = spec
        .ports()
        .iter()
        .map(|(container_port, host_port)| (container_port.to_string(), host_port.to_string()))
        .collect::<BTreeMap<_, _>>();

    let binds = spec
        .mounts()
        .iter()
        .map(|mount| {
            let mut bind = format!(
                "{}:{}",
                mount.host_path.display(),
                mount.container_path.display()
            );
            if mount.read_only {
                bind.push_str(":ro");
            }
            bind
        })
        .collect();

    let gpu = spec.limits().gpu.as_ref().map(|gpu| match gpu {
        GpuAllocation::All => GpuRequest {
            count: Some(-1),
            device_ids: Vec::new(),
        },
        GpuAllocation::Count(n) => GpuRequest {
            count: Some(i64::from(*n)),
            device_ids: Vec::new(),
        },
        GpuAllocation::Devices(ids) => GpuRequest {
            count: None,
            device_ids: ids.clone(),
        },
    });

    let mut labels = HashMap::from([(LABEL_MANAGED_BY.to_owned(), MANAGED_BY.to_owned())]);
    match serde_json::to_string(spec) {
        Ok(json) => {
            labels.insert(LABEL_ENGINE_SPEC.to_owned(), json);
        }
        Err(err) => log::warn!(target: TARGET, "Failed to encode spec label: {err}"),
    }

    ContainerConfig {
        name: spec.name().clone(),
        image: spec.image().to_owned(),
        cmd: spec.command().to_vec(),
        port_bindings,
        cpu_quota: optional_limit(spec.limits().cpu_quota),
        memory: optional_limit(spec.limits().memory_bytes),
        gpu,
        binds,
        restart_policy: RestartPolicy::UnlessStopped,
        labels,
    }
}
