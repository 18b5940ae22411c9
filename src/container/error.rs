#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid container name: `{0}`")]
    InvalidContainerName(String),
    #[error("invalid container id: `{0}`")]
    InvalidContainerID(String),
}
pub type Result<T> = std::result::Result<T, Error>;
