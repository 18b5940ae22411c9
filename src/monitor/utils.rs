use std::io::{BufRead, Seek, SeekFrom};

/// Applies `reader` to the file and rewinds it, so procfs files can stay open across samples.
///
/// Returns `Ok(None)` if the file is `None`.
pub(super) fn read_and_rewind<T, R>(
    file: Option<&mut R>,
    reader: impl FnOnce(&mut R) -> std::io::Result<T>,
) -> std::io::Result<Option<T>>
where
    R: BufRead + Seek,
{
    let Some(f) = file else {
        return Ok(None);
    };
    let result = reader(f);
    // Rewind even after a parse error so the next sample starts at the top.
    f.seek(SeekFrom::Start(0))?;
    result.map(Some)
}
