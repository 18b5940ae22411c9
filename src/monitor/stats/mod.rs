mod cpu;
mod error;
mod memory;
mod parser;

pub use cpu::CpuTimes;
pub use error::StatParseError;
pub use memory::MemInfo;
pub use parser::{KeyValueStat, SingleLineStat};

#[cfg(test)]
pub(crate) use error::extract_stat_parse_error;
