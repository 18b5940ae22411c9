use std::time::Duration;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Classified failure of a single container runtime call.
///
/// Callers branch on the variant, never on the message: absence ([`Error::NotFound`]) and
/// no-op answers ([`Error::NotModified`]) are expected outcomes for some operations, while
/// [`Error::Timeout`], [`Error::Transport`], [`Error::Stream`] and 5xx [`Error::Server`]
/// answers are transient.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to connect to container runtime: {0}")]
    Connect(#[source] BoxError),
    #[error("no such object: {0}")]
    NotFound(String),
    #[error("access denied: {0}")]
    Unauthorized(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not modified: {0}")]
    NotModified(String),
    #[error("runtime responded with status {status}: {message}")]
    Server { status: u16, message: String },
    #[error("runtime stream reported an error: {0}")]
    Stream(String),
    #[error("runtime call did not complete within {0:?}")]
    Timeout(Duration),
    #[error("invalid runtime response: {0}")]
    InvalidResponse(String),
    #[error("runtime transport error: {0}")]
    Transport(#[source] BoxError),
}

impl Error {
    /// Returns `true` if repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout(_) | Error::Transport(_) | Error::Stream(_) => true,
            Error::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<bollard::errors::Error> for Error {
    fn from(err: bollard::errors::Error) -> Self {
        use bollard::errors::Error as Bollard;

        match err {
            Bollard::DockerResponseServerError {
                status_code,
                message,
            } => match status_code {
                304 => Error::NotModified(message),
                401 | 403 => Error::Unauthorized(message),
                404 => Error::NotFound(message),
                409 => Error::Conflict(message),
                status => Error::Server { status, message },
            },
            Bollard::DockerStreamError { error } => Error::Stream(error),
            other => Error::Transport(Box::new(other)),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(status_code: u16) -> Error {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message: format!("status {status_code}"),
        }
        .into()
    }

    #[test]
    fn test_classify_server_errors() {
        assert!(matches!(server_error(304), Error::NotModified(_)));
        assert!(matches!(server_error(401), Error::Unauthorized(_)));
        assert!(matches!(server_error(403), Error::Unauthorized(_)));
        assert!(matches!(server_error(404), Error::NotFound(_)));
        assert!(matches!(server_error(409), Error::Conflict(_)));
        assert!(matches!(
            server_error(500),
            Error::Server { status: 500, .. }
        ));
    }

    #[test]
    fn test_retryable() {
        assert!(server_error(500).is_retryable());
        assert!(server_error(503).is_retryable());
        assert!(!server_error(400).is_retryable());
        assert!(!server_error(404).is_retryable());
        assert!(!server_error(401).is_retryable());
        assert!(Error::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(Error::Stream("connection reset".to_owned()).is_retryable());
        assert!(Error::Transport("boom".into()).is_retryable());
    }
}
