//! Parsing traits for procfs statistics files.
//!
//! - [`KeyValueStat`]: one `key value [unit]` pair per line, as in `/proc/meminfo`.
//! - [`SingleLineStat`]: a value read from the first line of a file, as in the aggregate `cpu`
//!   line of `/proc/stat`.
//!
//! # Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use std::sync::LazyLock;
//! use mosalama_agent::monitor::stats::KeyValueStat;
//!
//! #[derive(Default)]
//! struct Swap {
//!     total: u64,
//!     free: u64,
//! }
//!
//! static HANDLERS: LazyLock<HashMap<&'static str, fn(&mut Swap, u64)>> = LazyLock::new(|| {
//!     let mut map = HashMap::new();
//!     map.insert("SwapTotal", (|s: &mut Swap, v: u64| s.total = v) as fn(&mut Swap, u64));
//!     map.insert("SwapFree", (|s: &mut Swap, v: u64| s.free = v) as fn(&mut Swap, u64));
//!     map
//! });
//!
//! impl KeyValueStat for Swap {
//!     const ALLOW_DUPLICATE_KEYS: bool = false;
//!
//!     fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
//!         &HANDLERS
//!     }
//! }
//!
//! let swap = Swap::from_reader(&mut "SwapTotal: 8 kB\nSwapFree: 2 kB\n".as_bytes()).unwrap();
//! assert_eq!((swap.total, swap.free), (8, 2));
//! ```

use std::collections::{HashMap, HashSet};
use std::io::BufRead;

use super::StatParseError;

/// A trait for parsing files with one whitespace-separated `key value` pair per line.
///
/// A trailing `:` on the key is ignored, as are any tokens after the value (such as the `kB`
/// unit in `/proc/meminfo`).
pub trait KeyValueStat: Default
where
    Self: 'static,
{
    /// If `false`, a key seen twice is an error and parsing stops early once every known key
    /// has been seen.
    const ALLOW_DUPLICATE_KEYS: bool;

    /// Known keys (without trailing `:`) and the setters applying their values.
    fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)>;

    /// Parses the whole buffer.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` if reading fails, or a [`StatParseError`] wrapped in `io::Error`
    /// if a known key carries a non-numeric value or repeats.
    fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Self> {
        let mut stat = Self::default();
        let handlers = Self::field_handlers();
        let field_count = handlers.len();
        let mut seen_keys = HashSet::with_capacity(field_count);

        let mut line = String::new();
        let mut lineno = 0;
        while buf.read_line(&mut line)? != 0 {
            lineno += 1;
            Self::parse_line(&mut stat, &line, lineno, handlers, &mut seen_keys)?;
            if !Self::ALLOW_DUPLICATE_KEYS && seen_keys.len() == field_count {
                break;
            }
            line.clear();
        }

        Ok(stat)
    }

    /// Parses a single line and applies the value if the key is known.
    fn parse_line(
        stat: &mut Self,
        line: &str,
        lineno: usize,
        handlers: &HashMap<&'static str, fn(&mut Self, u64)>,
        seen_keys: &mut HashSet<&'static str>,
    ) -> std::io::Result<()> {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
            return Ok(());
        };
        let key = key.strip_suffix(':').unwrap_or(key);

        let Some((k, handler)) = handlers.get_key_value(key) else {
            return Self::on_unknown_key(key, val, lineno);
        };
        let parsed = val
            .parse::<u64>()
            .map_err(|source| StatParseError::InvalidKeyValue {
                key: key.to_string(),
                value: val.to_string(),
                line: lineno,
                source,
            })?;
        if !Self::ALLOW_DUPLICATE_KEYS && !seen_keys.insert(*k) {
            return Err(StatParseError::DuplicateField {
                field: key.to_string(),
                line: lineno,
            }
            .into());
        }
        handler(stat, parsed);
        Ok(())
    }

    /// Called for keys missing from [`field_handlers`](Self::field_handlers). Ignores them by
    /// default.
    #[inline]
    fn on_unknown_key(_key: &str, _val: &str, _lineno: usize) -> std::io::Result<()> {
        Ok(())
    }
}

/// A trait for statistics read from the first line of a file.
pub trait SingleLineStat: Sized + Default {
    fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Self>;
}
