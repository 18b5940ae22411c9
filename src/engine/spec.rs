//! Engine specifications and their validating builder.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::container::{self, ContainerName};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("image reference must not be empty")]
    EmptyImage,
    #[error("invalid image reference `{0}`")]
    InvalidImage(String),
    #[error(transparent)]
    Name(#[from] container::Error),
    #[error("invalid container port `{0}`")]
    InvalidPort(String),
    #[error("duplicate port binding for `{0}`")]
    DuplicatePort(ContainerPort),
    #[error("host port for `{0}` must not be 0")]
    ZeroHostPort(ContainerPort),
    #[error("{field} of {value} exceeds the supported maximum")]
    LimitOutOfRange { field: &'static str, value: u64 },
    #[error("invalid gpu allocation: {0}")]
    InvalidGpu(&'static str),
    #[error("mount path `{0}` must be absolute")]
    RelativeMountPath(PathBuf),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Sctp => "sctp",
        }
    }
}

/// A port inside the container, written `port/proto` (`8000/tcp`).
///
/// A bare port number defaults to TCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerPort {
    pub port: u16,
    pub protocol: Protocol,
}

impl ContainerPort {
    pub fn tcp(port: u16) -> Self {
        Self {
            port,
            protocol: Protocol::Tcp,
        }
    }
}

impl fmt::Display for ContainerPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.protocol.as_str())
    }
}

impl FromStr for ContainerPort {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidPort(s.to_owned());
        let (port, protocol) = match s.split_once('/') {
            Some((port, proto)) => {
                let protocol = match proto {
                    "tcp" => Protocol::Tcp,
                    "udp" => Protocol::Udp,
                    "sctp" => Protocol::Sctp,
                    _ => return Err(invalid()),
                };
                (port, protocol)
            }
            None => (s, Protocol::Tcp),
        };
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        if port == 0 {
            return Err(invalid());
        }

        Ok(Self { port, protocol })
    }
}

impl TryFrom<String> for ContainerPort {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ContainerPort> for String {
    fn from(value: ContainerPort) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpuAllocation {
    All,
    Count(u32),
    Devices(Vec<String>),
}

/// Resource ceilings applied to the engine container. Zero means "no limit".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Microseconds of CPU time per 100ms scheduling period.
    pub cpu_quota: u64,
    pub memory_bytes: u64,
    pub gpu: Option<GpuAllocation>,
}

impl ResourceLimits {
    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("cpu quota", self.cpu_quota),
            ("memory limit", self.memory_bytes),
        ] {
            if i64::try_from(value).is_err() {
                return Err(Error::LimitOutOfRange { field, value });
            }
        }
        match &self.gpu {
            Some(GpuAllocation::Count(0)) => Err(Error::InvalidGpu("count must be positive")),
            Some(GpuAllocation::Devices(ids)) if ids.is_empty() => {
                Err(Error::InvalidGpu("device list must not be empty"))
            }
            Some(GpuAllocation::Devices(ids)) if ids.iter().any(|id| id.trim().is_empty()) => {
                Err(Error::InvalidGpu("device id must not be empty"))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    pub host_path: PathBuf,
    pub container_path: PathBuf,
    pub read_only: bool,
}

/// Everything needed to run one inference engine container.
///
/// Built and validated through [`EngineSpecBuilder`]. The spec is stamped onto the container as a
/// JSON label, so two specs are "the same engine" exactly when they compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSpec {
    image: String,
    name: ContainerName,
    command: Vec<String>,
    ports: BTreeMap<ContainerPort, u16>,
    limits: ResourceLimits,
    mounts: Vec<BindMount>,
}

impl EngineSpec {
    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn name(&self) -> &ContainerName {
        &self.name
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn ports(&self) -> &BTreeMap<ContainerPort, u16> {
        &self.ports
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn mounts(&self) -> &[BindMount] {
        &self.mounts
    }
}

/// Builder for [`EngineSpec`]; all validation happens in [`EngineSpecBuilder::build`].
///
/// # Examples
///
/// ```
/// # use mosalama_agent::engine::{ContainerPort, EngineSpecBuilder, ResourceLimits};
/// let mut builder = EngineSpecBuilder::new("img:latest", "c1");
/// builder
///     .add_port(ContainerPort::tcp(8000), 8000)
///     .set_limits(ResourceLimits {
///         cpu_quota: 200_000,
///         memory_bytes: 4 << 30,
///         gpu: None,
///     });
/// let spec = builder.build().unwrap();
/// assert_eq!(spec.name().as_str(), "c1");
/// ```
#[derive(Debug, Clone, Default)]
pub struct EngineSpecBuilder {
    image: String,
    name: String,
    command: Vec<String>,
    ports: Vec<(ContainerPort, u16)>,
    limits: ResourceLimits,
    mounts: Vec<BindMount>,
}

impl EngineSpecBuilder {
    pub fn new(image: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn set_command<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn add_arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.command.push(arg.into());
        self
    }

    pub fn add_port(&mut self, container_port: ContainerPort, host_port: u16) -> &mut Self {
        self.ports.push((container_port, host_port));
        self
    }

    pub fn set_limits(&mut self, limits: ResourceLimits) -> &mut Self {
        self.limits = limits;
        self
    }

    pub fn add_mount(
        &mut self,
        host_path: impl Into<PathBuf>,
        container_path: impl Into<PathBuf>,
        read_only: bool,
    ) -> &mut Self {
        self.mounts.push(BindMount {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only,
        });
        self
    }

    /// Validates the collected settings.
    ///
    /// # Errors
    ///
    /// Fails on an empty or whitespace-containing image, an invalid container name, duplicate
    /// container ports, host port 0, limits above `i64::MAX`, an empty GPU allocation or a
    /// relative mount path.
    pub fn build(self) -> Result<EngineSpec> {
        let image = self.image.trim();
        if image.is_empty() {
            return Err(Error::EmptyImage);
        }
        if image.chars().any(char::is_whitespace) {
            return Err(Error::InvalidImage(image.to_owned()));
        }
        let name = ContainerName::new(&self.name)?;

        let mut ports = BTreeMap::new();
        for (container_port, host_port) in self.ports {
            if host_port == 0 {
                return Err(Error::ZeroHostPort(container_port));
            }
            if ports.insert(container_port, host_port).is_some() {
                return Err(Error::DuplicatePort(container_port));
            }
        }

        self.limits.validate()?;

        for mount in &self.mounts {
            for path in [&mount.host_path, &mount.container_path] {
                if !path.is_absolute() {
                    return Err(Error::RelativeMountPath(path.clone()));
                }
            }
        }

        Ok(EngineSpec {
            image: image.to_owned(),
            name,
            command: self.command,
            ports,
            limits: self.limits,
            mounts: self.mounts,
        })
    }
}
