use std::io::BufRead;

use super::{SingleLineStat, StatParseError};
use crate::monitor::sample::clamp_percent;

/// Aggregate CPU times from the first (`cpu`) line of `/proc/stat`, in clock ticks.
///
/// Guest time is already accounted in `user` and `nice` and is not read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

const REQUIRED_FIELDS: usize = 4;

impl CpuTimes {
    pub fn total(&self) -> u64 {
        [
            self.user,
            self.nice,
            self.system,
            self.idle,
            self.iowait,
            self.irq,
            self.softirq,
            self.steal,
        ]
        .iter()
        .fold(0u64, |acc, v| acc.saturating_add(*v))
    }

    pub fn idle_total(&self) -> u64 {
        self.idle.saturating_add(self.iowait)
    }

    /// Share of non-idle time between `earlier` and `self`, in percent.
    ///
    /// Returns 0 if no time passed or the counters went backwards.
    pub fn busy_percent_since(&self, earlier: &CpuTimes) -> f64 {
        let total = self.total().saturating_sub(earlier.total());
        if total == 0 {
            return 0.0;
        }
        let idle = self.idle_total().saturating_sub(earlier.idle_total());
        let busy = total.saturating_sub(idle);
        clamp_percent(busy as f64 / total as f64 * 100.0)
    }
}

impl SingleLineStat for CpuTimes {
    fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Self> {
        let mut line = String::new();
        buf.read_line(&mut line)?;

        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("cpu") => {}
            other => {
                return Err(StatParseError::UnexpectedKey {
                    expected: "cpu",
                    found: other.unwrap_or_default().to_owned(),
                    line: 1,
                }
                .into());
            }
        }

        let mut values = [0u64; 8];
        let mut found = 0;
        for (slot, raw) in values.iter_mut().zip(parts) {
            *slot = raw
                .parse::<u64>()
                .map_err(|source| StatParseError::InvalidValue {
                    value: raw.to_owned(),
                    line: 1,
                    source,
                })?;
            found += 1;
        }
        if found < REQUIRED_FIELDS {
            return Err(StatParseError::MissingValues {
                expected: REQUIRED_FIELDS,
                found,
                line: 1,
            }
            .into());
        }

        let [user, nice, system, idle, iowait, irq, softirq, steal] = values;
        Ok(Self {
            user,
            nice,
            system,
            idle,
            iowait,
            irq,
            softirq,
            steal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::stats::extract_stat_parse_error;

    #[test]
    fn test_parse_cpu_times() {
        let data = "cpu  4705 356 584 3699 23 23 0 0 0 0\ncpu0 1393280 32966 572056 13343292 6130 0 17875 0 23933 0\n";
        let times = CpuTimes::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(
            times,
            CpuTimes {
                user: 4705,
                nice: 356,
                system: 584,
                idle: 3699,
                iowait: 23,
                irq: 23,
                softirq: 0,
                steal: 0,
            }
        );
        assert_eq!(times.total(), 9390);
        assert_eq!(times.idle_total(), 3722);
    }

    #[test]
    fn test_parse_cpu_times_old_kernel() {
        let data = "cpu 10 0 5 85\n";
        let times = CpuTimes::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(times.idle, 85);
        assert_eq!(times.iowait, 0);
    }

    #[test]
    fn test_parse_cpu_times_wrong_line() {
        let data = "cpu0 1 2 3 4\n";
        let err = CpuTimes::from_reader(&mut data.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        assert!(matches!(
            extract_stat_parse_error(&err),
            StatParseError::UnexpectedKey { found, .. } if found == "cpu0"
        ));

        let err = CpuTimes::from_reader(&mut "".as_bytes()).unwrap_err();
        assert!(matches!(
            extract_stat_parse_error(&err),
            StatParseError::UnexpectedKey { .. }
        ));
    }

    #[test]
    fn test_parse_cpu_times_invalid_values() {
        let err = CpuTimes::from_reader(&mut "cpu 1 2 x 4\n".as_bytes()).unwrap_err();
        assert!(matches!(
            extract_stat_parse_error(&err),
            StatParseError::InvalidValue { value, .. } if value == "x"
        ));

        let err = CpuTimes::from_reader(&mut "cpu 1 2\n".as_bytes()).unwrap_err();
        assert!(matches!(
            extract_stat_parse_error(&err),
            StatParseError::MissingValues { found: 2, .. }
        ));
    }

    #[test]
    fn test_busy_percent() {
        let before = CpuTimes {
            user: 100,
            idle: 100,
            ..Default::default()
        };
        let after = CpuTimes {
            user: 175,
            idle: 125,
            ..Default::default()
        };
        assert_eq!(after.busy_percent_since(&before), 75.0);
        assert_eq!(before.busy_percent_since(&before), 0.0);
        // Counter reset after a wrap or reboot.
        assert_eq!(before.busy_percent_since(&after), 0.0);
    }
}
