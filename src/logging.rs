//! Logging setup
//!
//! The library only emits `tracing` events. Binaries call [`init_logging`]
//! once to install a formatting subscriber; `RUST_LOG` overrides the level
//! passed in.

use std::fmt;
use std::str::FromStr;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::{ModbusError, ModbusResult};

/// Log levels accepted on the command line and in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ModbusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(ModbusError::configuration(format!("Unknown log level '{}'", other))),
        }
    }
}

/// Install the global fmt subscriber
///
/// Fails if a global subscriber is already set.
pub fn init_logging(level: LogLevel) -> ModbusResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| ModbusError::internal(format!("Failed to initialise logging: {}", e)))?;

    info!("Logging initialised at level {}", level);
    Ok(())
}

/// Log a raw frame as uppercase hex
pub fn log_packet(protocol: &str, direction: &str, data: &[u8]) {
    info!("[MODBUS-{}] {} {}", protocol, direction, hex::encode_upper(data));
}
