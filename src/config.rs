//! Agent configuration from `MOSALAMA_*` environment variables.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::artifact::DEFAULT_READ_TIMEOUT;
use crate::engine::spec::{self, ContainerPort, EngineSpec, EngineSpecBuilder, GpuAllocation};
use crate::engine::{ExistingContainerPolicy, ManagerConfig, ResourceLimits, RetryPolicy};
use crate::logging::LogFormat;

pub const MODEL_DIR: &str = "MOSALAMA_MODEL_DIR";
pub const MODEL_URL: &str = "MOSALAMA_MODEL_URL";
pub const MODEL_NAME: &str = "MOSALAMA_MODEL_NAME";
pub const MODEL_MOUNT: &str = "MOSALAMA_MODEL_MOUNT";
pub const MODEL_MOUNT_RW: &str = "MOSALAMA_MODEL_MOUNT_RW";
pub const ENGINE_IMAGE: &str = "MOSALAMA_ENGINE_IMAGE";
pub const ENGINE_NAME: &str = "MOSALAMA_ENGINE_NAME";
pub const ENGINE_PORTS: &str = "MOSALAMA_ENGINE_PORTS";
pub const ENGINE_CPU_QUOTA: &str = "MOSALAMA_ENGINE_CPU_QUOTA";
pub const ENGINE_MEMORY_BYTES: &str = "MOSALAMA_ENGINE_MEMORY_BYTES";
pub const ENGINE_GPUS: &str = "MOSALAMA_ENGINE_GPUS";
pub const ENGINE_ARGS: &str = "MOSALAMA_ENGINE_ARGS";
pub const EXISTING_CONTAINER: &str = "MOSALAMA_EXISTING_CONTAINER";
pub const PULL_ATTEMPTS: &str = "MOSALAMA_PULL_ATTEMPTS";
pub const STOP_GRACE_SECS: &str = "MOSALAMA_STOP_GRACE_SECS";
pub const RUNTIME_TIMEOUT_SECS: &str = "MOSALAMA_RUNTIME_TIMEOUT_SECS";
pub const PULL_TIMEOUT_SECS: &str = "MOSALAMA_PULL_TIMEOUT_SECS";
pub const TRANSFER_TIMEOUT_SECS: &str = "MOSALAMA_TRANSFER_TIMEOUT_SECS";
pub const MONITOR_INTERVAL_SECS: &str = "MOSALAMA_MONITOR_INTERVAL_SECS";
pub const PROC_ROOT: &str = "MOSALAMA_PROC_ROOT";
pub const DISK_PATH: &str = "MOSALAMA_DISK_PATH";
pub const LOG_FORMAT: &str = "MOSALAMA_LOG_FORMAT";

const DEFAULT_MODEL_DIR: &str = "/var/mosalamaagent/models";
const DEFAULT_MODEL_MOUNT: &str = "/models";
const DEFAULT_ENGINE_IMAGE: &str = "ghcr.io/engine/engine:latest";
const DEFAULT_ENGINE_NAME: &str = "mosalama_engine_container";
const DEFAULT_ENGINE_PORTS: &str = "8000/tcp=8000";
const DEFAULT_CPU_QUOTA: u64 = 200_000;
const DEFAULT_MEMORY_BYTES: u64 = 4 * 1024 * 1024 * 1024;
const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid value `{value}` for `{key}`: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

fn invalid(key: &'static str, value: &str, reason: impl Display) -> Error {
    Error::Invalid {
        key,
        value: value.to_owned(),
        reason: reason.to_string(),
    }
}

/// Variable lookup that treats blank values as unset.
struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            Some(value) => value.parse().map_err(|err| invalid(key, &value, err)),
            None => Ok(default),
        }
    }

    fn with<T>(
        &self,
        key: &'static str,
        default: T,
        parse: impl FnOnce(&str) -> std::result::Result<T, String>,
    ) -> Result<T> {
        match self.get(key) {
            Some(value) => parse(&value).map_err(|reason| invalid(key, &value, reason)),
            None => Ok(default),
        }
    }

    fn secs(&self, key: &'static str, default: u64, allow_zero: bool) -> Result<Duration> {
        let secs = self.parse(key, default)?;
        if secs == 0 && !allow_zero {
            return Err(invalid(key, "0", "must be greater than zero"));
        }
        Ok(Duration::from_secs(secs))
    }
}

fn parse_bool(value: &str) -> std::result::Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err("expected `true` or `false`".to_owned()),
    }
}

/// Parses `8000/tcp=8000,9000=19000` into container port and host port pairs.
fn parse_ports(value: &str) -> std::result::Result<Vec<(ContainerPort, u16)>, String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (container, host) = entry
                .split_once('=')
                .ok_or_else(|| format!("`{entry}` is not `<port>[/<proto>]=<host port>`"))?;
            let container = container
                .trim()
                .parse::<ContainerPort>()
                .map_err(|err| err.to_string())?;
            let host = host
                .trim()
                .parse::<u16>()
                .map_err(|err| format!("host port of `{entry}`: {err}"))?;
            Ok((container, host))
        })
        .collect()
}

fn parse_gpus(value: &str) -> std::result::Result<GpuAllocation, String> {
    if value.eq_ignore_ascii_case("all") {
        return Ok(GpuAllocation::All);
    }
    if let Ok(count) = value.parse::<u32>() {
        if count == 0 {
            return Err("GPU count must be greater than zero".to_owned());
        }
        return Ok(GpuAllocation::Count(count));
    }
    let ids: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
        .collect();
    if ids.is_empty() {
        return Err("expected `all`, a count or device ids".to_owned());
    }
    Ok(GpuAllocation::Devices(ids))
}

fn parse_url(value: &str) -> std::result::Result<String, String> {
    let url = reqwest::Url::parse(value).map_err(|err| err.to_string())?;
    match url.scheme() {
        "http" | "https" => Ok(value.to_owned()),
        other => Err(format!("unsupported scheme `{other}`")),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub model_dir: PathBuf,
    pub model_url: Option<String>,
    pub model_name: Option<String>,
    pub model_mount: PathBuf,
    pub model_mount_rw: bool,
    /// How long a model transfer may go without receiving data.
    pub transfer_timeout: Duration,
    pub engine_image: String,
    pub engine_name: String,
    pub engine_ports: Vec<(ContainerPort, u16)>,
    pub engine_args: Vec<String>,
    pub limits: ResourceLimits,
    pub manager: ManagerConfig,
    pub monitor_interval: Duration,
    pub proc_root: PathBuf,
    pub disk_path: PathBuf,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// [`Error::Invalid`] names the first variable that could not be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = Vars(lookup);

        let model_dir = vars
            .get(MODEL_DIR)
            .map_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR), PathBuf::from);
        let model_mount = vars
            .get(MODEL_MOUNT)
            .map_or_else(|| PathBuf::from(DEFAULT_MODEL_MOUNT), PathBuf::from);
        if !model_mount.is_absolute() {
            return Err(invalid(
                MODEL_MOUNT,
                &model_mount.to_string_lossy(),
                "must be an absolute path",
            ));
        }

        let ports_value = vars
            .get(ENGINE_PORTS)
            .unwrap_or_else(|| DEFAULT_ENGINE_PORTS.to_owned());
        let engine_ports =
            parse_ports(&ports_value).map_err(|reason| invalid(ENGINE_PORTS, &ports_value, reason))?;

        let limits = ResourceLimits {
            cpu_quota: vars.parse(ENGINE_CPU_QUOTA, DEFAULT_CPU_QUOTA)?,
            memory_bytes: vars.parse(ENGINE_MEMORY_BYTES, DEFAULT_MEMORY_BYTES)?,
            gpu: vars.with(ENGINE_GPUS, None, |value| parse_gpus(value).map(Some))?,
        };

        let defaults = ManagerConfig::default();
        let max_attempts: u32 = vars.parse(PULL_ATTEMPTS, defaults.retry.max_attempts)?;
        if max_attempts == 0 {
            return Err(invalid(PULL_ATTEMPTS, "0", "must be at least 1"));
        }
        let manager = ManagerConfig {
            stop_grace: vars.secs(STOP_GRACE_SECS, defaults.stop_grace.as_secs(), true)?,
            call_timeout: vars.secs(
                RUNTIME_TIMEOUT_SECS,
                defaults.call_timeout.as_secs(),
                false,
            )?,
            pull_timeout: vars.secs(PULL_TIMEOUT_SECS, defaults.pull_timeout.as_secs(), false)?,
            retry: RetryPolicy {
                max_attempts,
                ..defaults.retry
            },
            existing: vars.parse(EXISTING_CONTAINER, ExistingContainerPolicy::default())?,
        };

        let disk_path = vars
            .get(DISK_PATH)
            .map_or_else(|| model_dir.clone(), PathBuf::from);

        Ok(Self {
            model_url: vars.with(MODEL_URL, None, |value| parse_url(value).map(Some))?,
            model_name: vars.get(MODEL_NAME),
            model_mount,
            model_mount_rw: vars.with(MODEL_MOUNT_RW, false, parse_bool)?,
            transfer_timeout: vars.secs(
                TRANSFER_TIMEOUT_SECS,
                DEFAULT_READ_TIMEOUT.as_secs(),
                false,
            )?,
            engine_image: vars
                .get(ENGINE_IMAGE)
                .unwrap_or_else(|| DEFAULT_ENGINE_IMAGE.to_owned()),
            engine_name: vars
                .get(ENGINE_NAME)
                .unwrap_or_else(|| DEFAULT_ENGINE_NAME.to_owned()),
            engine_ports,
            engine_args: vars
                .get(ENGINE_ARGS)
                .map(|args| args.split_whitespace().map(str::to_owned).collect())
                .unwrap_or_default(),
            limits,
            manager,
            monitor_interval: vars.secs(
                MONITOR_INTERVAL_SECS,
                DEFAULT_MONITOR_INTERVAL.as_secs(),
                false,
            )?,
            proc_root: vars
                .get(PROC_ROOT)
                .map_or_else(|| PathBuf::from("/proc"), PathBuf::from),
            disk_path,
            log_format: vars.parse(LOG_FORMAT, LogFormat::default())?,
            model_dir,
        })
    }

    /// The artifact name: `MOSALAMA_MODEL_NAME`, or else the last path segment of the URL.
    pub fn model_name(&self) -> Option<String> {
        if let Some(name) = &self.model_name {
            return Some(name.clone());
        }
        let url = reqwest::Url::parse(self.model_url.as_deref()?).ok()?;
        url.path_segments()?
            .rev()
            .find(|segment| !segment.is_empty())
            .map(str::to_owned)
    }

    /// The engine container for the configured model.
    ///
    /// The command starts with `--model <mount>/<name>` when a model name is known, followed by
    /// `MOSALAMA_ENGINE_ARGS`. The model directory is bind-mounted at the model mount.
    pub fn engine_spec(&self, model_name: Option<&str>) -> spec::Result<EngineSpec> {
        let mut builder = EngineSpecBuilder::new(&self.engine_image, &self.engine_name);
        if let Some(name) = model_name {
            builder
                .add_arg("--model")
                .add_arg(self.model_mount.join(name).to_string_lossy());
        }
        for arg in &self.engine_args {
            builder.add_arg(arg);
        }
        for (container_port, host_port) in &self.engine_ports {
            builder.add_port(*container_port, *host_port);
        }
        builder
            .set_limits(self.limits.clone())
            .add_mount(&self.model_dir, &self.model_mount, !self.model_mount_rw);
        builder.build()
    }
}
