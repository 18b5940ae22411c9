//! Periodic host resource sampling.
//!
//! [`ResourceMonitor`] reads CPU and memory from procfs, disk usage through `statvfs` and GPU
//! utilization through NVML. Each metric is sampled independently: one failing source leaves
//! its field empty and the rest of the sample intact.

mod collector;
mod disk;
mod error;
mod gpu;
mod sample;
mod sink;
pub mod stats;
mod task;
mod utils;

pub use collector::{HostCollector, HostCollectorBuilder};
pub use disk::disk_usage;
pub use error::{Error, Metric, Result};
pub use gpu::GpuProbe;
pub use sample::{ResourceSample, UsageStat};
pub use sink::{FnSink, LogSink, SampleSink};
pub use task::{DEFAULT_CPU_WINDOW, MonitorTask, ResourceMonitor};
