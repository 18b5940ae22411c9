use crate::container::{ContainerID, ContainerName};
use crate::runtime;

use super::state::InvalidTransition;

/// Failure of a lifecycle operation.
///
/// Create and start failures carry the outcome of the best-effort cleanup that followed them:
/// `cleanup` is `Some` only if removing the leftover container failed as well.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to pull image `{image}` after {attempts} attempt(s): {source}")]
    ImagePull {
        image: String,
        attempts: u32,
        #[source]
        source: runtime::Error,
    },
    #[error("failed to create container `{name}`: {source}{}", cleanup_note(.cleanup))]
    ContainerCreate {
        name: ContainerName,
        #[source]
        source: runtime::Error,
        cleanup: Option<runtime::Error>,
    },
    #[error("failed to start container `{name}` ({id}): {source}{}", cleanup_note(.cleanup))]
    ContainerStart {
        name: ContainerName,
        id: ContainerID,
        #[source]
        source: runtime::Error,
        cleanup: Option<runtime::Error>,
    },
    #[error("failed to stop container `{name}`: {source}")]
    ContainerStop {
        name: ContainerName,
        #[source]
        source: runtime::Error,
    },
    #[error("failed to query container runtime: {0}")]
    Reconcile(#[source] runtime::Error),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

fn cleanup_note(cleanup: &Option<runtime::Error>) -> String {
    match cleanup {
        Some(err) => format!(" (cleanup also failed: {err})"),
        None => String::new(),
    }
}

impl Error {
    /// The secondary error of a failed cleanup, if any.
    pub fn cleanup_error(&self) -> Option<&runtime::Error> {
        match self {
            Error::ContainerCreate { cleanup, .. } | Error::ContainerStart { cleanup, .. } => {
                cleanup.as_ref()
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_note_in_message() {
        let err = Error::ContainerStart {
            name: ContainerName::new("c1").unwrap(),
            id: ContainerID::new("abc").unwrap(),
            source: runtime::Error::Conflict("port is already allocated".to_owned()),
            cleanup: Some(runtime::Error::Unauthorized("denied".to_owned())),
        };
        assert_eq!(
            err.to_string(),
            "failed to start container `c1` (abc): conflict: port is already allocated \
             (cleanup also failed: access denied: denied)"
        );
        assert!(err.cleanup_error().is_some());

        let err = Error::ContainerCreate {
            name: ContainerName::new("c1").unwrap(),
            source: runtime::Error::Conflict("name in use".to_owned()),
            cleanup: None,
        };
        assert_eq!(
            err.to_string(),
            "failed to create container `c1`: conflict: name in use"
        );
        assert!(err.cleanup_error().is_none());
    }
}
