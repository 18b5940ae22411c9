//! Local store of model artifacts.
//!
//! Artifacts are plain files directly inside the store root. Transfers write to a hidden
//! temporary file in the same directory and rename it onto the final name only once the whole
//! payload is on disk, so a name is either absent or complete.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

mod error;

pub use error::{Error, Result, TransferError};

use crate::error::ResultOkLogExt;
use crate::fsutil;

const TARGET: &str = "artifact_store";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Longest wait for the response head or the next body chunk.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);
const PROGRESS_STEP: u64 = 64 * 1024 * 1024;

/// A named artifact and where it lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub path: PathBuf,
    pub present: bool,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    client: reqwest::Client,
    read_timeout: Duration,
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidName(name.to_owned()))
    }
}

impl ArtifactStore {
    /// Opens the store at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        Self::with_read_timeout(root, DEFAULT_READ_TIMEOUT)
    }

    /// Like [`ArtifactStore::new`], failing transfers whose server goes quiet for `read_timeout`.
    pub fn with_read_timeout(root: impl Into<PathBuf>, read_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(read_timeout)
            .build()
            .map_err(Error::Client)?;
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| Error::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            root,
            client,
            read_timeout,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the artifact `name` is (or would be) stored.
    pub fn path_of(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    /// Downloads `url` into the store as `name`, replacing an existing artifact of that name.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidName`] for a name that is not a plain file name, [`Error::Transfer`] if
    /// the request fails, the server answers with a non-success status, stalls for longer than
    /// the read timeout or writing fails. No partial file is left behind.
    pub async fn transfer(&self, url: &str, name: &str) -> Result<Artifact> {
        let path = self.path_of(name)?;
        let transfer_error = |source| Error::Transfer {
            url: url.to_owned(),
            source,
        };

        log::info!(target: TARGET, "Transferring `{url}` to `{}`", path.display());
        let stalled = || transfer_error(TransferError::Stalled(self.read_timeout));
        let response = tokio::time::timeout(self.read_timeout, self.client.get(url).send())
            .await
            .map_err(|_| stalled())?
            .map_err(|err| transfer_error(TransferError::Request(err)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(transfer_error(TransferError::Status(status)));
        }
        let expected = response.content_length();

        let io_error = |source| {
            transfer_error(TransferError::Io {
                path: path.clone(),
                source,
            })
        };

        // Deleted on drop unless persisted.
        let partial = tempfile::Builder::new()
            .prefix(&format!(".{name}."))
            .suffix(".partial")
            .tempfile_in(&self.root)
            .map_err(io_error)?;
        let mut file = tokio::fs::File::from_std(partial.as_file().try_clone().map_err(io_error)?);

        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        let mut next_report = PROGRESS_STEP;
        while let Some(chunk) = tokio::time::timeout(self.read_timeout, stream.next())
            .await
            .map_err(|_| stalled())?
        {
            let chunk = chunk.map_err(|err| transfer_error(TransferError::Request(err)))?;
            file.write_all(&chunk).await.map_err(io_error)?;
            written += chunk.len() as u64;
            if written >= next_report {
                match expected {
                    Some(total) => log::debug!(target: TARGET, "`{name}`: {written}/{total} bytes"),
                    None => log::debug!(target: TARGET, "`{name}`: {written} bytes"),
                }
                next_report = written + PROGRESS_STEP;
            }
        }
        file.flush().await.map_err(io_error)?;
        file.sync_all().await.map_err(io_error)?;
        drop(file);

        partial
            .persist(&path)
            .map_err(|err| io_error(err.error))?;
        fsutil::sync_dir(&self.root).ok_log();

        log::info!(target: TARGET, "Artifact `{name}` stored ({written} bytes)");
        Ok(Artifact {
            name: name.to_owned(),
            path,
            present: true,
        })
    }

    /// Names of all stored artifacts, sorted. In-flight transfers are not listed.
    pub async fn list(&self) -> Result<Vec<String>> {
        let io_error = |source| Error::Io {
            path: self.root.clone(),
            source,
        };
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(io_error)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            if !entry.file_type().await.map_err(io_error)?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    pub async fn get(&self, name: &str) -> Result<Artifact> {
        let path = self.path_of(name)?;
        let present = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata.is_file(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
            Err(source) => return Err(Error::Io { path, source }),
        };
        Ok(Artifact {
            name: name.to_owned(),
            path,
            present,
        })
    }

    /// # Errors
    ///
    /// [`Error::NotFound`] if no artifact with that name exists.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_of(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                log::info!(target: TARGET, "Deleted artifact `{name}`");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(name.to_owned()))
            }
            Err(source) => Err(Error::Io { path, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn serve(body: &'static [u8], status: u16) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/m.bin"))
            .respond_with(ResponseTemplate::new(status).set_body_bytes(body))
            .mount(&server)
            .await;
        server
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_transfer_list_delete() {
        let server = serve(b"weights", 200).await;
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("models")).unwrap();
        assert!(store.list().await.unwrap().is_empty());

        let artifact = store
            .transfer(&format!("{}/m.bin", server.uri()), "m.bin")
            .await
            .unwrap();
        assert!(artifact.present);
        assert_eq!(artifact.path, store.root().join("m.bin"));
        assert_eq!(std::fs::read(&artifact.path).unwrap(), b"weights");
        assert_eq!(store.list().await.unwrap(), ["m.bin"]);
        assert!(store.get("m.bin").await.unwrap().present);

        store.delete("m.bin").await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
        assert!(!store.get("m.bin").await.unwrap().present);
        assert!(store.delete("m.bin").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_transfer_replaces_existing() {
        let server = serve(b"new", 200).await;
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        std::fs::write(dir.path().join("m.bin"), b"old").unwrap();

        store
            .transfer(&format!("{}/m.bin", server.uri()), "m.bin")
            .await
            .unwrap();
        assert_eq!(std::fs::read(dir.path().join("m.bin")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_transfer_error_status_leaves_nothing() {
        let server = serve(b"missing", 404).await;
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();

        let err = store
            .transfer(&format!("{}/m.bin", server.uri()), "m.bin")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transfer {
                source: TransferError::Status(status),
                ..
            } if status == reqwest::StatusCode::NOT_FOUND
        ));
        assert!(dir_entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_transfer_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();

        let err = store
            .transfer("http://127.0.0.1:9/m.bin", "m.bin")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transfer {
                source: TransferError::Request(_),
                ..
            }
        ));
        assert!(dir_entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_transfer_stalled_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/m.bin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"late".as_slice())
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::with_read_timeout(dir.path(), Duration::from_millis(200)).unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            store.transfer(&format!("{}/m.bin", server.uri()), "m.bin"),
        )
        .await
        .expect("transfer should give up on its own");
        assert!(matches!(
            result,
            Err(Error::Transfer {
                source: TransferError::Stalled(_) | TransferError::Request(_),
                ..
            })
        ));
        assert!(dir_entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_list_skips_hidden_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        std::fs::write(dir.path().join("b.bin"), b"b").unwrap();
        std::fs::write(dir.path().join("a.bin"), b"a").unwrap();
        std::fs::write(dir.path().join(".m.bin.123.partial"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        assert_eq!(store.list().await.unwrap(), ["a.bin", "b.bin"]);
    }

    #[tokio::test]
    async fn test_invalid_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        for name in ["", ".", "..", ".hidden", "a/b", "../m.bin"] {
            assert!(
                matches!(store.path_of(name), Err(Error::InvalidName(_))),
                "{name}"
            );
            assert!(matches!(
                store.delete(name).await,
                Err(Error::InvalidName(_))
            ));
        }
        assert!(matches!(
            store.transfer("http://127.0.0.1:9/x", "a/b").await,
            Err(Error::InvalidName(_))
        ));
    }
}
