use std::ffi::CString;
use std::io;
use std::mem::MaybeUninit;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use super::sample::{UsageStat, ratio_percent};

/// Usage of the filesystem holding `path`.
pub fn disk_usage(path: &Path) -> io::Result<UsageStat> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();

    // SAFETY: `c_path` is NUL-terminated and `stat` points to writable memory of the right size.
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: statvfs returned 0, so it initialized the struct.
    let stat = unsafe { stat.assume_init() };

    // Field widths differ between platforms.
    #[allow(clippy::unnecessary_cast)]
    let usage = usage_from_blocks(
        stat.f_blocks as u64,
        stat.f_bfree as u64,
        stat.f_bavail as u64,
        stat.f_frsize as u64,
    );
    Ok(usage)
}

/// Used space excludes all free blocks; the percentage is taken against the space available to
/// unprivileged users, matching what `df` reports.
fn usage_from_blocks(blocks: u64, bfree: u64, bavail: u64, frsize: u64) -> UsageStat {
    let total = blocks.saturating_mul(frsize);
    let used = blocks.saturating_sub(bfree).saturating_mul(frsize);
    let avail = bavail.saturating_mul(frsize);
    UsageStat {
        total,
        used,
        percent: ratio_percent(used, used.saturating_add(avail)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_from_blocks() {
        // 100 blocks, 40 free of which 30 available to users.
        let usage = usage_from_blocks(100, 40, 30, 4096);
        assert_eq!(usage.total, 100 * 4096);
        assert_eq!(usage.used, 60 * 4096);
        assert_eq!(usage.percent, 60.0 / 90.0 * 100.0);

        let empty = usage_from_blocks(0, 0, 0, 4096);
        assert_eq!(empty.percent, 0.0);
    }

    #[test]
    fn test_disk_usage_of_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let usage = disk_usage(dir.path()).unwrap();
        assert!(usage.total > 0);
        assert!((0.0..=100.0).contains(&usage.percent));
    }

    #[test]
    fn test_disk_usage_missing_path() {
        let err = disk_usage(Path::new("/definitely/does/not/exist")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
