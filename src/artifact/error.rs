use std::path::PathBuf;

/// Why a transfer failed.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("server responded with status {0}")]
    Status(reqwest::StatusCode),
    #[error("no data received for {0:?}")]
    Stalled(std::time::Duration),
    #[error("failed to write `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid artifact name `{0}`")]
    InvalidName(String),
    #[error("failed to transfer `{url}`: {source}")]
    Transfer {
        url: String,
        #[source]
        source: TransferError,
    },
    #[error("artifact `{0}` not found")]
    NotFound(String),
    #[error("artifact store I/O error at `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
