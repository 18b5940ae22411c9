use serde::Serialize;

/// Total and used amount of a resource, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UsageStat {
    pub total: u64,
    pub used: u64,
    /// In [0, 100].
    pub percent: f64,
}

impl UsageStat {
    /// Usage with `percent = used / total`. A zero total yields 0%.
    pub fn new(total: u64, used: u64) -> Self {
        Self {
            total,
            used,
            percent: ratio_percent(used, total),
        }
    }
}

/// One resource reading of the host.
///
/// A metric that failed to sample is `None` (or an empty GPU list) instead of failing the whole
/// sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSample {
    /// Unix seconds.
    pub timestamp: u64,
    pub cpu_percent: Option<f64>,
    pub memory: Option<UsageStat>,
    pub disk: Option<UsageStat>,
    /// Utilization per GPU, in device index order.
    pub gpu_percent: Vec<f64>,
}

impl ResourceSample {
    pub(crate) fn empty(timestamp: u64) -> Self {
        Self {
            timestamp,
            cpu_percent: None,
            memory: None,
            disk: None,
            gpu_percent: Vec::new(),
        }
    }
}

pub(crate) fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

pub(crate) fn ratio_percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    clamp_percent(part as f64 / whole as f64 * 100.0)
}
