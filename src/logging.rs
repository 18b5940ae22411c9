//! Logger setup on top of `env_logger`.
//!
//! The filter defaults to `info` and follows `RUST_LOG` when set.

use std::io::Write;
use std::str::FromStr;

use env_logger::{Builder, Env, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// `env_logger`'s default human readable lines.
    #[default]
    Text,
    /// One JSON object per line with `timestamp`, `level`, `target` and `message`.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("expected `text` or `json`, got `{other}`")),
        }
    }
}

fn builder(format: LogFormat) -> Builder {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    builder.target(Target::Stdout);
    if format == LogFormat::Json {
        builder.format(|buf, record| {
            let line = serde_json::json!({
                "timestamp": buf.timestamp_millis().to_string(),
                "level": record.level().as_str(),
                "target": record.target(),
                "message": record.args().to_string(),
            });
            writeln!(buf, "{line}")
        });
    }
    builder
}

/// Flushes the global logger when dropped.
#[must_use = "dropping the guard flushes the logger"]
#[derive(Debug)]
pub struct LoggingGuard(());

impl Drop for LoggingGuard {
    fn drop(&mut self) {
        log::logger().flush();
    }
}

/// Installs the global logger.
///
/// # Errors
///
/// Fails if a logger has already been installed.
pub fn init(format: LogFormat) -> Result<LoggingGuard, log::SetLoggerError> {
    let logger = builder(format).build();
    let max_level = logger.filter();
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(max_level);
    Ok(LoggingGuard(()))
}
