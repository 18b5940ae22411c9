use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use super::disk::disk_usage;
use super::error::{Error, Metric, Result};
use super::sample::UsageStat;
use super::stats::{CpuTimes, KeyValueStat, MemInfo, SingleLineStat};
use super::utils;
use crate::error::ResultOkLogExt;
use crate::fsutil;

/// Reads host-wide statistics from procfs and the filesystem.
///
/// The procfs files are opened once and rewound after every read. All reads block; callers in
/// async code run them on the blocking pool.
#[derive(Debug)]
pub struct HostCollector {
    stat_file: Option<BufReader<File>>,
    meminfo_file: Option<BufReader<File>>,
    disk_path: Option<PathBuf>,
}

impl HostCollector {
    pub fn builder() -> HostCollectorBuilder {
        HostCollectorBuilder::default()
    }

    /// Collector over `<proc_root>/stat`, `<proc_root>/meminfo` and the filesystem of
    /// `disk_path`.
    pub fn for_proc_root(proc_root: &Path, disk_path: &Path) -> Self {
        let mut builder = Self::builder();
        builder
            .set_stat_file(proc_root.join("stat"))
            .set_meminfo_file(proc_root.join("meminfo"))
            .set_disk_path(disk_path);
        builder.build()
    }

    pub fn read_cpu_times(&mut self) -> Result<CpuTimes> {
        utils::read_and_rewind(self.stat_file.as_mut(), CpuTimes::from_reader)
            .map_err(|source| Error::Read {
                metric: Metric::Cpu,
                source,
            })?
            .ok_or(Error::Unavailable {
                metric: Metric::Cpu,
            })
    }

    pub fn read_memory(&mut self) -> Result<UsageStat> {
        let info = utils::read_and_rewind(self.meminfo_file.as_mut(), MemInfo::from_reader)
            .map_err(|source| Error::Read {
                metric: Metric::Memory,
                source,
            })?
            .ok_or(Error::Unavailable {
                metric: Metric::Memory,
            })?;
        Ok(info.usage())
    }

    pub fn read_disk(&self) -> Result<UsageStat> {
        let path = self.disk_path.as_deref().ok_or(Error::Unavailable {
            metric: Metric::Disk,
        })?;
        disk_usage(path).map_err(|source| Error::Read {
            metric: Metric::Disk,
            source,
        })
    }
}

#[derive(Debug, Default)]
pub struct HostCollectorBuilder {
    stat_file: Option<BufReader<File>>,
    meminfo_file: Option<BufReader<File>>,
    disk_path: Option<PathBuf>,
}

impl HostCollectorBuilder {
    /// Opens the `/proc/stat`-formatted file at `path`; failures are logged and leave the CPU
    /// metric unavailable.
    pub fn set_stat_file(&mut self, path: impl AsRef<Path>) -> &mut Self {
        self.stat_file = fsutil::open_file_reader(path).ok_log();
        self
    }

    /// Opens the `/proc/meminfo`-formatted file at `path`; failures are logged and leave the
    /// memory metric unavailable.
    pub fn set_meminfo_file(&mut self, path: impl AsRef<Path>) -> &mut Self {
        self.meminfo_file = fsutil::open_file_reader(path).ok_log();
        self
    }

    pub fn set_disk_path(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.disk_path = Some(path.into());
        self
    }

    pub fn build(self) -> HostCollector {
        HostCollector {
            stat_file: self.stat_file,
            meminfo_file: self.meminfo_file,
            disk_path: self.disk_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_collector_reads_and_rewinds() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "stat", "cpu  10 0 10 80 0 0 0 0\nintr 1\n");
        write_file(
            dir.path(),
            "meminfo",
            "MemTotal: 1000 kB\nMemAvailable: 250 kB\n",
        );

        let mut collector = HostCollector::for_proc_root(dir.path(), dir.path());
        let first = collector.read_cpu_times().unwrap();
        let second = collector.read_cpu_times().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.idle, 80);

        let memory = collector.read_memory().unwrap();
        assert_eq!(memory.percent, 75.0);
        assert_eq!(collector.read_memory().unwrap(), memory);

        let disk = collector.read_disk().unwrap();
        assert!(disk.total > 0);
    }

    #[test]
    fn test_collector_rereads_updated_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "stat", "cpu 1 0 1 8\n");
        let mut builder = HostCollector::builder();
        builder.set_stat_file(&path);
        let mut collector = builder.build();
        assert_eq!(collector.read_cpu_times().unwrap().user, 1);

        write_file(dir.path(), "stat", "cpu 5 0 1 8\n");
        assert_eq!(collector.read_cpu_times().unwrap().user, 5);
    }

    #[test]
    fn test_collector_missing_sources() {
        let dir = tempfile::tempdir().unwrap();
        let mut collector = HostCollector::for_proc_root(&dir.path().join("nope"), dir.path());
        assert!(matches!(
            collector.read_cpu_times(),
            Err(Error::Unavailable {
                metric: Metric::Cpu
            })
        ));
        assert!(matches!(
            collector.read_memory(),
            Err(Error::Unavailable {
                metric: Metric::Memory
            })
        ));
        assert!(collector.read_disk().is_ok());

        let collector = HostCollector::builder().build();
        assert!(matches!(
            collector.read_disk(),
            Err(Error::Unavailable {
                metric: Metric::Disk
            })
        ));
    }

    #[test]
    fn test_collector_malformed_content() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "stat", "garbage\n");
        let mut collector = HostCollector::for_proc_root(dir.path(), dir.path());
        assert!(matches!(
            collector.read_cpu_times(),
            Err(Error::Read {
                metric: Metric::Cpu,
                ..
            })
        ));
    }
}
