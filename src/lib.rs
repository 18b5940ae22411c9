//! Mosalama agent: runs a model-serving engine container on a host and watches the host's
//! resources while it runs.
//!
//! The agent fetches the model artifact, starts the engine through the local Docker daemon,
//! samples CPU, memory, disk and GPU usage on a fixed interval and stops the engine again on
//! `SIGINT` or `SIGTERM`.

use std::sync::Arc;

use tokio::signal::unix::{Signal, SignalKind, signal};

pub mod artifact;
pub mod config;
pub mod container;
pub mod engine;
pub mod error;
pub mod fsutil;
pub mod logging;
pub mod monitor;
pub mod runtime;

use artifact::ArtifactStore;
use config::Config;
use container::ContainerName;
use engine::{EngineSpec, EngineState, LifecycleManager, StopOutcome};
use error::Error;
use monitor::{GpuProbe, HostCollector, LogSink, MonitorTask, ResourceMonitor};
use runtime::{DockerRuntime, EngineRuntime};

const TARGET: &str = "agent";

/// Resolves with the name of the first termination signal received.
async fn shutdown_signal(terminate: &mut Signal) -> Result<&'static str, Error> {
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT").map_err(Error::Signal),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

/// Starts the engine and reports whether shutdown has to stop it.
///
/// A container holding the name that this call refused to touch is left alone.
async fn start_engine<R: EngineRuntime>(manager: &LifecycleManager<R>, spec: &EngineSpec) -> bool {
    match manager.start_engine(spec).await {
        Ok(handle) => {
            log::info!(
                target: TARGET,
                "Engine `{}` is {}",
                handle.name(),
                handle.state()
            );
            true
        }
        Err(err) => {
            log::error!(target: TARGET, "Failed to start engine: {err}");
            // Only a failed start leaves a container of ours behind.
            matches!(err, engine::Error::ContainerStart { .. })
        }
    }
}

/// Whether a start interrupted by a signal got far enough to leave a container to stop.
fn interrupted_start_left_container<R: EngineRuntime>(
    manager: &LifecycleManager<R>,
    name: &ContainerName,
) -> bool {
    manager.handle(name.as_str()).is_some_and(|handle| {
        handle.id().is_some() && matches!(handle.state(), EngineState::Created | EngineState::Running)
    })
}

/// Runs the agent until it is signalled.
///
/// # Errors
///
/// Fails on invalid configuration, when logging cannot be installed, when the Docker daemon
/// cannot be reached or the model directory cannot be created. A failed artifact transfer or
/// engine start is logged and the agent keeps monitoring. A signal received while the model is
/// transferred or the engine is started cuts that work short.
pub async fn run() -> Result<(), Error> {
    let config = Config::from_env()?;
    let _logging = logging::init(config.log_format)?;
    log::debug!(target: TARGET, "Configuration: {config:?}");

    let mut terminate = signal(SignalKind::terminate()).map_err(Error::Signal)?;
    let shutdown = shutdown_signal(&mut terminate);
    tokio::pin!(shutdown);

    let runtime = DockerRuntime::connect(config.manager.call_timeout, config.manager.pull_timeout)?;
    let manager = LifecycleManager::new(runtime, config.manager.clone());
    let store = ArtifactStore::with_read_timeout(&config.model_dir, config.transfer_timeout)?;

    let collector = HostCollector::for_proc_root(&config.proc_root, &config.disk_path);
    let monitor = Arc::new(ResourceMonitor::new(collector, GpuProbe::init()));
    let monitor_task = MonitorTask::spawn(monitor, config.monitor_interval, LogSink);

    match manager.list_engines().await {
        Ok(engines) => {
            for engine in engines {
                log::info!(
                    target: TARGET,
                    "Found engine `{}` ({}) in state {}",
                    engine.name,
                    engine.image,
                    engine.state
                );
            }
        }
        Err(err) => log::warn!(target: TARGET, "Failed to list engines: {err}"),
    }

    let model_name = config.model_name();
    let spec = config
        .engine_spec(model_name.as_deref())
        .map_err(|err| log::error!(target: TARGET, "Invalid engine configuration: {err}"))
        .ok();

    let startup = async {
        if let (Some(url), Some(name)) = (&config.model_url, &model_name) {
            if let Err(err) = store.transfer(url, name).await {
                log::error!(target: TARGET, "Model transfer failed, starting engine anyway: {err}");
            }
        }
        match &spec {
            Some(spec) => start_engine(&manager, spec).await,
            None => false,
        }
    };

    let (stop_engine, signal) = tokio::select! {
        stop_engine = startup => (stop_engine, None),
        signal = &mut shutdown => {
            log::warn!(target: TARGET, "Interrupted during startup");
            let stop_engine = spec
                .as_ref()
                .is_some_and(|spec| interrupted_start_left_container(&manager, spec.name()));
            (stop_engine, Some(signal))
        }
    };
    let signal = match signal {
        Some(signal) => signal?,
        None => shutdown.await?,
    };
    log::info!(target: TARGET, "Received {signal}, shutting down");

    if let Some(name) = spec.as_ref().filter(|_| stop_engine).map(EngineSpec::name) {
        let deadline = config.manager.stop_grace + config.manager.call_timeout * 2;
        match tokio::time::timeout(deadline, manager.stop_engine(name)).await {
            Ok(Ok(StopOutcome::Stopped)) => log::info!(target: TARGET, "Engine `{name}` stopped"),
            Ok(Ok(StopOutcome::AlreadyStopped)) => {
                log::info!(target: TARGET, "Engine `{name}` was not running")
            }
            Ok(Err(err)) => log::error!(target: TARGET, "Failed to stop engine: {err}"),
            Err(_) => log::error!(target: TARGET, "Stopping engine `{name}` timed out after {deadline:?}"),
        }
    }

    if let Err(err) = monitor_task.shutdown().await {
        log::error!(target: TARGET, "Resource monitor task failed: {err}");
    }
    log::info!(target: TARGET, "Agent stopped");
    Ok(())
}
