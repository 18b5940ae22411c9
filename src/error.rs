/// Errors that stop the agent.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(#[from] crate::config::Error),
    #[error("failed to initialize logging: {0}")]
    Logging(#[from] log::SetLoggerError),
    #[error("container runtime unavailable: {0}")]
    Runtime(#[from] crate::runtime::Error),
    #[error("artifact store unavailable: {0}")]
    Artifact(#[from] crate::artifact::Error),
    #[error("failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),
}

/// Turns a `Result` into an `Option`, logging the error.
pub trait ResultOkLogExt<T, E> {
    fn ok_log(self) -> Option<T>;
}

impl<T, E> ResultOkLogExt<T, E> for std::result::Result<T, E>
where
    E: std::error::Error,
{
    fn ok_log(self) -> Option<T> {
        match self {
            Ok(ok) => Some(ok),
            Err(err) => {
                log::error!(target: "agent", "{err}");
                None
            }
        }
    }
}
