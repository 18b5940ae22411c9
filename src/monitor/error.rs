use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Cpu,
    Memory,
    Disk,
    Gpu,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Metric::Cpu => "cpu",
            Metric::Memory => "memory",
            Metric::Disk => "disk",
            Metric::Gpu => "gpu",
        })
    }
}

/// Failure to sample one metric.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{metric} statistics source is not available")]
    Unavailable { metric: Metric },
    #[error("failed to read {metric} statistics: {source}")]
    Read {
        metric: Metric,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to query gpu utilization: {0}")]
    Gpu(#[source] nvml_wrapper::error::NvmlError),
    #[error("sampling task failed: {0}")]
    Join(#[source] tokio::task::JoinError),
}

impl Error {
    /// The metric this error belongs to, if it is specific to one.
    pub fn metric(&self) -> Option<Metric> {
        match self {
            Error::Unavailable { metric } | Error::Read { metric, .. } => Some(*metric),
            Error::Gpu(_) => Some(Metric::Gpu),
            Error::Join(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
