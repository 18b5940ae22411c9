use std::fmt;

use nvml_wrapper::Nvml;
use nvml_wrapper::error::NvmlError;

use super::error::{Error, Result};
use super::sample::clamp_percent;

const TARGET: &str = "resource_monitor";

/// GPU utilization through NVML, initialized once.
///
/// Hosts without the NVIDIA driver get a disabled probe that reports no devices.
pub struct GpuProbe {
    nvml: Option<Nvml>,
}

impl GpuProbe {
    pub fn init() -> Self {
        match init_nvml() {
            Ok(nvml) => {
                log::info!(target: TARGET, "NVML initialized, GPU metrics enabled");
                Self { nvml: Some(nvml) }
            }
            Err(err) => {
                log::info!(target: TARGET, "GPU metrics disabled: {err}");
                Self::disabled()
            }
        }
    }

    pub fn disabled() -> Self {
        Self { nvml: None }
    }

    pub fn is_available(&self) -> bool {
        self.nvml.is_some()
    }

    /// Utilization per device in index order; empty when NVML is unavailable.
    ///
    /// A device that cannot be queried is logged and left out. Only failing to count the
    /// devices is an error.
    pub fn utilization(&self) -> Result<Vec<f64>> {
        let Some(nvml) = &self.nvml else {
            return Ok(Vec::new());
        };
        let count = nvml.device_count().map_err(Error::Gpu)?;
        Ok(per_device(count, |index| {
            let rates = nvml.device_by_index(index)?.utilization_rates()?;
            Ok::<_, NvmlError>(rates.gpu)
        }))
    }
}

fn per_device<E: fmt::Display>(
    count: u32,
    mut read: impl FnMut(u32) -> std::result::Result<u32, E>,
) -> Vec<f64> {
    (0..count)
        .filter_map(|index| match read(index) {
            Ok(percent) => Some(clamp_percent(f64::from(percent))),
            Err(err) => {
                log::warn!(target: TARGET, "Failed to read utilization of GPU {index}: {err}");
                None
            }
        })
        .collect()
}

fn init_nvml() -> std::result::Result<Nvml, NvmlError> {
    match Nvml::init() {
        Ok(nvml) => Ok(nvml),
        Err(_) => Nvml::builder()
            .lib_path(std::ffi::OsStr::new("libnvidia-ml.so.1"))
            .init(),
    }
}

impl fmt::Debug for GpuProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuProbe")
            .field("available", &self.is_available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_probe_reports_no_devices() {
        let probe = GpuProbe::disabled();
        assert!(!probe.is_available());
        assert_eq!(probe.utilization().unwrap(), Vec::<f64>::new());
    }

    #[test]
    fn test_failing_device_keeps_the_others() {
        let readings = per_device(3, |index| match index {
            1 => Err("device lost"),
            _ => Ok(40 + index),
        });
        assert_eq!(readings, [40.0, 42.0]);
    }

    #[test]
    fn test_device_readings_are_clamped() {
        let readings = per_device(1, |_| Ok::<_, String>(250));
        assert_eq!(readings, [100.0]);
    }
}
