use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

/// A file under a known path could not be opened.
#[derive(Debug, thiserror::Error)]
#[error("cannot open `{path}`: {source}")]
pub struct FileOpenError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl FileOpenError {
    fn at(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Opens `path` for buffered reading. The monitor keeps these readers open across samples.
///
/// ```no_run
/// # use mosalama_agent::fsutil;
/// let stat = fsutil::open_file_reader("/proc/stat")?;
/// # Ok::<(), fsutil::FileOpenError>(())
/// ```
pub fn open_file_reader(path: impl AsRef<Path>) -> Result<BufReader<File>, FileOpenError> {
    let path = path.as_ref();
    File::open(path)
        .map(BufReader::new)
        .map_err(FileOpenError::at(path))
}

/// Flushes directory entries (creations, renames) of `dir` to disk.
pub fn sync_dir(dir: impl AsRef<Path>) -> Result<(), FileOpenError> {
    let dir = dir.as_ref();
    File::open(dir)
        .and_then(|handle| handle.sync_all())
        .map_err(FileOpenError::at(dir))
}
