use std::borrow::Cow;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{
    DeviceRequest, HostConfig, PortBinding, RestartPolicy as DockerRestartPolicy,
    RestartPolicyNameEnum,
};
use futures::TryStreamExt;

use super::{
    ContainerConfig, ContainerSummary, EngineRuntime, Error, GpuRequest, RestartPolicy, Result,
    RuntimeState,
};
use crate::container::ContainerID;

const TARGET: &str = "runtime";

/// [`EngineRuntime`] backed by the Docker Engine API.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
    call_timeout: Duration,
    pull_timeout: Duration,
}

impl DockerRuntime {
    /// Connects using the local defaults (`DOCKER_HOST` or the unix socket).
    ///
    /// No request is made; an unreachable daemon surfaces on the first call.
    pub fn connect(call_timeout: Duration, pull_timeout: Duration) -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|err| Error::Connect(Box::new(err)))?;
        log::debug!(target: TARGET, "Connected to docker via local defaults");
        Ok(Self {
            docker,
            call_timeout,
            pull_timeout,
        })
    }
}

async fn with_deadline<T>(
    limit: Duration,
    fut: impl Future<Output = std::result::Result<T, bollard::errors::Error>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res.map_err(Error::from),
        Err(_) => Err(Error::Timeout(limit)),
    }
}

/// Appends `:latest` when the reference carries neither a tag nor a digest, otherwise the engine
/// would pull every tag of the repository.
fn with_default_tag(image: &str) -> Cow<'_, str> {
    let last = image.rsplit('/').next().unwrap_or(image);
    if last.contains(':') || last.contains('@') {
        Cow::Borrowed(image)
    } else {
        Cow::Owned(format!("{image}:latest"))
    }
}

fn device_request(gpu: &GpuRequest) -> DeviceRequest {
    DeviceRequest {
        driver: Some("nvidia".to_owned()),
        count: gpu.count,
        device_ids: (!gpu.device_ids.is_empty()).then(|| gpu.device_ids.clone()),
        capabilities: Some(vec![vec!["gpu".to_owned()]]),
        ..Default::default()
    }
}

fn docker_config(config: &ContainerConfig) -> Config<String> {
    let port_bindings = config
        .port_bindings
        .iter()
        .map(|(container_port, host_port)| {
            (
                container_port.clone(),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(host_port.clone()),
                }]),
            )
        })
        .collect::<HashMap<_, _>>();
    let exposed_ports = config
        .port_bindings
        .keys()
        .map(|port| (port.clone(), HashMap::new()))
        .collect::<HashMap<_, _>>();

    let restart_policy = match config.restart_policy {
        RestartPolicy::No => RestartPolicyNameEnum::NO,
        RestartPolicy::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
    };

    let host_config = HostConfig {
        port_bindings: Some(port_bindings),
        binds: (!config.binds.is_empty()).then(|| config.binds.clone()),
        cpu_quota: config.cpu_quota,
        memory: config.memory,
        device_requests: config.gpu.as_ref().map(|gpu| vec![device_request(gpu)]),
        restart_policy: Some(DockerRestartPolicy {
            name: Some(restart_policy),
            maximum_retry_count: None,
        }),
        ..Default::default()
    };

    Config {
        image: Some(config.image.clone()),
        cmd: (!config.cmd.is_empty()).then(|| config.cmd.clone()),
        exposed_ports: Some(exposed_ports),
        labels: Some(config.labels.clone()),
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn summary_from_docker(raw: bollard::models::ContainerSummary) -> Option<ContainerSummary> {
    let raw_id = raw.id.unwrap_or_default();
    let id = match ContainerID::new(&raw_id) {
        Ok(id) => id,
        Err(err) => {
            log::warn!(target: TARGET, "Skipping container with unusable id: {err}");
            return None;
        }
    };
    let names = raw
        .names
        .unwrap_or_default()
        .into_iter()
        .map(|name| name.trim_start_matches('/').to_owned())
        .collect();

    Some(ContainerSummary {
        id,
        names,
        image: raw.image.unwrap_or_default(),
        state: raw
            .state
            .as_deref()
            .map_or(RuntimeState::Unknown, RuntimeState::from_status),
        labels: raw.labels.unwrap_or_default(),
    })
}

impl EngineRuntime for DockerRuntime {
    async fn pull_image(&self, image: &str) -> Result<()> {
        let reference = with_default_tag(image);
        log::info!(target: TARGET, "Pulling image `{reference}`");
        let options = Some(CreateImageOptions {
            from_image: reference.to_string(),
            ..Default::default()
        });

        let pull = async {
            let mut stream = self.docker.create_image(options, None, None);
            while let Some(info) = stream.try_next().await? {
                if let Some(error) = info.error {
                    return Err(bollard::errors::Error::DockerStreamError { error });
                }
                if let Some(status) = info.status {
                    log::debug!(
                        target: TARGET,
                        "{reference}: {status} {}",
                        info.progress.as_deref().unwrap_or_default()
                    );
                }
            }
            Ok(())
        };
        with_deadline(self.pull_timeout, pull).await
    }

    async fn create_container(&self, config: &ContainerConfig) -> Result<ContainerID> {
        let options = Some(CreateContainerOptions {
            name: config.name.to_string(),
            platform: None,
        });
        let response = with_deadline(
            self.call_timeout,
            self.docker
                .create_container(options, docker_config(config)),
        )
        .await?;
        for warning in &response.warnings {
            log::warn!(target: TARGET, "Creating `{}`: {warning}", config.name);
        }

        ContainerID::new(&response.id).map_err(|err| Error::InvalidResponse(err.to_string()))
    }

    async fn start_container(&self, id: &ContainerID) -> Result<()> {
        with_deadline(
            self.call_timeout,
            self.docker
                .start_container(id.as_str(), None::<StartContainerOptions<String>>),
        )
        .await
    }

    async fn stop_container(&self, name: &str, grace: Duration) -> Result<()> {
        let options = Some(StopContainerOptions {
            t: i64::try_from(grace.as_secs()).unwrap_or(i64::MAX),
        });
        with_deadline(
            grace + self.call_timeout,
            self.docker.stop_container(name, options),
        )
        .await
    }

    async fn remove_container(&self, name_or_id: &str) -> Result<()> {
        let options = Some(RemoveContainerOptions {
            force: true,
            ..Default::default()
        });
        with_deadline(
            self.call_timeout,
            self.docker.remove_container(name_or_id, options),
        )
        .await
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let options = Some(ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        });
        let containers =
            with_deadline(self.call_timeout, self.docker.list_containers(options)).await?;
        Ok(containers
            .into_iter()
            .filter_map(summary_from_docker)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerName;
    use std::collections::BTreeMap;

    fn config() -> ContainerConfig {
        ContainerConfig {
            name: ContainerName::new("c1").unwrap(),
            image: "img:latest".to_owned(),
            cmd: vec!["--model".to_owned(), "/models/m.bin".to_owned()],
            port_bindings: BTreeMap::from([("8000/tcp".to_owned(), "8000".to_owned())]),
            cpu_quota: Some(200_000),
            memory: Some(4_294_967_296),
            gpu: Some(GpuRequest {
                count: Some(-1),
                device_ids: Vec::new(),
            }),
            binds: vec!["/var/models:/models:ro".to_owned()],
            restart_policy: RestartPolicy::UnlessStopped,
            labels: HashMap::from([("io.mosalama.managed-by".to_owned(), "x".to_owned())]),
        }
    }

    #[test]
    fn test_with_default_tag() {
        assert_eq!(with_default_tag("img"), "img:latest");
        assert_eq!(with_default_tag("img:1.0"), "img:1.0");
        assert_eq!(
            with_default_tag("localhost:5000/team/img"),
            "localhost:5000/team/img:latest"
        );
        assert_eq!(
            with_default_tag("ghcr.io/engine/engine@sha256:abc"),
            "ghcr.io/engine/engine@sha256:abc"
        );
    }

    #[test]
    fn test_docker_config() {
        let config = docker_config(&config());
        assert_eq!(config.image.as_deref(), Some("img:latest"));
        assert_eq!(config.cmd.as_ref().map(Vec::len), Some(2));
        assert!(config.exposed_ports.unwrap().contains_key("8000/tcp"));

        let host = config.host_config.unwrap();
        assert_eq!(host.cpu_quota, Some(200_000));
        assert_eq!(host.memory, Some(4_294_967_296));
        assert_eq!(host.binds, Some(vec!["/var/models:/models:ro".to_owned()]));
        let binding = host.port_bindings.unwrap().remove("8000/tcp").flatten().unwrap();
        assert_eq!(binding[0].host_port.as_deref(), Some("8000"));
        assert_eq!(
            host.restart_policy.and_then(|p| p.name),
            Some(RestartPolicyNameEnum::UNLESS_STOPPED)
        );
        let devices = host.device_requests.unwrap();
        assert_eq!(devices[0].driver.as_deref(), Some("nvidia"));
        assert_eq!(devices[0].count, Some(-1));
        assert_eq!(devices[0].device_ids, None);
    }

    #[test]
    fn test_summary_from_docker() {
        let raw = bollard::models::ContainerSummary {
            id: Some("abc123".to_owned()),
            names: Some(vec!["/c1".to_owned()]),
            image: Some("img:latest".to_owned()),
            state: Some("exited".to_owned()),
            ..Default::default()
        };
        let summary = summary_from_docker(raw).unwrap();
        assert_eq!(summary.names, vec!["c1".to_owned()]);
        assert_eq!(summary.state, RuntimeState::Exited);
        assert!(summary.labels.is_empty());

        let missing_id = bollard::models::ContainerSummary::default();
        assert!(summary_from_docker(missing_id).is_none());
    }

    fn docker_tests_enabled() -> bool {
        std::env::var("MOSALAMA_DOCKER_TESTS").is_ok_and(|v| v == "1")
    }

    #[tokio::test]
    async fn test_docker_lifecycle() {
        if !docker_tests_enabled() {
            return;
        }
        let runtime =
            DockerRuntime::connect(Duration::from_secs(30), Duration::from_secs(300)).unwrap();
        let name = "mosalama_runtime_test";
        let _ = runtime.remove_container(name).await;

        runtime.pull_image("alpine").await.unwrap();
        let mut config = config();
        config.name = ContainerName::new(name).unwrap();
        config.image = "alpine:latest".to_owned();
        config.cmd = vec!["sleep".to_owned(), "60".to_owned()];
        config.gpu = None;
        config.binds.clear();
        config.port_bindings.clear();
        let id = runtime.create_container(&config).await.unwrap();
        runtime.start_container(&id).await.unwrap();

        let listed = runtime.list_containers().await.unwrap();
        let found = listed.iter().find(|c| c.has_name(name)).unwrap();
        assert_eq!(found.state, RuntimeState::Running);

        runtime
            .stop_container(name, Duration::from_secs(1))
            .await
            .unwrap();
        runtime.remove_container(name).await.unwrap();
        let err = runtime.remove_container(name).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
