use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

mod error;
mod utils;

pub use error::{Error, Result};

/// The maximum allowed length for a [`ContainerName`] or [`ContainerID`].
const MAX_LEN: usize = 255;

/// A validated, host-unique container name.
///
/// Names follow the container engine grammar `[a-zA-Z0-9][a-zA-Z0-9_.-]*`. The name is the
/// identity key of an engine: lookups and stops target the name, never the runtime id, so an
/// engine started by an earlier process can still be addressed.
///
/// # Examples
///
/// ```
/// # use mosalama_agent::container::ContainerName;
/// let name = ContainerName::new("mosalama_engine_container").unwrap();
/// assert_eq!(name.as_ref(), "mosalama_engine_container");
/// assert!(ContainerName::new("-leading-dash").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerName(Arc<str>);

impl ContainerName {
    /// Creates a new `ContainerName` from the given raw name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidContainerName`] if the name is empty, longer than 255 bytes or
    /// contains characters outside of the engine's name grammar.
    pub fn new(src: impl AsRef<str>) -> Result<Self> {
        let src = src.as_ref();
        if src.is_empty() || src.len() > MAX_LEN || !utils::is_valid_name(src.as_bytes()) {
            return Err(Error::InvalidContainerName(src.to_owned()));
        }

        Ok(Self(src.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ContainerName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ContainerName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContainerName {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ContainerName {
    type Error = Error;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ContainerName> for String {
    fn from(value: ContainerName) -> Self {
        value.0.as_ref().to_owned()
    }
}

/// An opaque identifier assigned by the container runtime on create.
///
/// # Examples
///
/// ```
/// # use mosalama_agent::container::ContainerID;
/// let id = ContainerID::new("4f2a9c").unwrap();
/// assert_eq!(id.to_string(), "4f2a9c");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(into = "String")]
pub struct ContainerID(Arc<str>);

impl ContainerID {
    /// Creates a new `ContainerID` from the given raw id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidContainerID`] if the id is empty, longer than 255 bytes or not
    /// alphanumeric.
    pub fn new(src: impl AsRef<str>) -> Result<Self> {
        let src = src.as_ref();
        if src.is_empty() || src.len() > MAX_LEN || !utils::is_alpha_numeric(src.as_bytes()) {
            return Err(Error::InvalidContainerID(src.to_owned()));
        }

        Ok(Self(src.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ContainerID {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<ContainerID> for String {
    fn from(value: ContainerID) -> Self {
        value.0.as_ref().to_owned()
    }
}
