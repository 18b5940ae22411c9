use std::collections::HashMap;
use std::sync::LazyLock;

use super::KeyValueStat;
use crate::monitor::sample::UsageStat;

/// Selected fields of `/proc/meminfo`, in kB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemInfo {
    pub total: u64,
    pub free: u64,
    /// Absent on kernels older than 3.14.
    pub available: Option<u64>,
    pub buffers: u64,
    pub cached: u64,
}

static MEMINFO_HANDLERS: LazyLock<HashMap<&'static str, fn(&mut MemInfo, u64)>> =
    LazyLock::new(|| {
        let mut map = HashMap::new();
        map.insert("MemTotal", MemInfo::set_total as fn(&mut MemInfo, u64));
        map.insert("MemFree", MemInfo::set_free as fn(&mut MemInfo, u64));
        map.insert("MemAvailable", MemInfo::set_available as fn(&mut MemInfo, u64));
        map.insert("Buffers", MemInfo::set_buffers as fn(&mut MemInfo, u64));
        map.insert("Cached", MemInfo::set_cached as fn(&mut MemInfo, u64));
        map
    });

impl MemInfo {
    fn set_total(&mut self, total: u64) {
        self.total = total;
    }

    fn set_free(&mut self, free: u64) {
        self.free = free;
    }

    fn set_available(&mut self, available: u64) {
        self.available = Some(available);
    }

    fn set_buffers(&mut self, buffers: u64) {
        self.buffers = buffers;
    }

    fn set_cached(&mut self, cached: u64) {
        self.cached = cached;
    }

    /// Memory usage in bytes. Used is `total - available`, or `total - free - buffers - cached`
    /// when the kernel does not report `MemAvailable`.
    pub fn usage(&self) -> UsageStat {
        let used = match self.available {
            Some(available) => self.total.saturating_sub(available),
            None => self
                .total
                .saturating_sub(self.free)
                .saturating_sub(self.buffers)
                .saturating_sub(self.cached),
        };
        UsageStat::new(
            self.total.saturating_mul(1024),
            used.saturating_mul(1024),
        )
    }
}

impl KeyValueStat for MemInfo {
    const ALLOW_DUPLICATE_KEYS: bool = false;

    fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
        &MEMINFO_HANDLERS
    }
}
