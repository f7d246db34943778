//! # Edge Modbus Error Handling
//!
//! Errors are split along the lines that matter to a poller:
//!
//! - **Configuration errors** are detected while descriptors are built or
//!   encoded and are fatal for the operation that caused them.
//! - **Connection errors** are raised when a session opens its transport and
//!   are fatal for that session start.
//! - **Transport errors** (`Io`, `Timeout`, `Frame`, `CrcMismatch`) happen on a
//!   single send; the polling loop logs them and carries on with its next cycle.
//! - **Exceptions** are reported by the slave itself and never retried.
//!
//! ```rust
//! use edge_modbus::ModbusError;
//!
//! let err = ModbusError::configuration("StartAddress must be at least 5 characters");
//! assert!(err.is_configuration_error());
//! assert!(!err.is_recoverable());
//! ```

use thiserror::Error;

/// Result type alias used throughout the crate
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Error conditions surfaced by the codec, transports and sessions
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModbusError {
    /// I/O related errors (socket or serial line)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Connection establishment or loss
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// The transport gave up waiting for a send or a reply
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Function code outside the supported set
    #[error("Invalid function code: {code}")]
    InvalidFunction { code: u8 },

    /// Address range that cannot be expressed on the wire
    #[error("Invalid address: start={start}, count={count}")]
    InvalidAddress { start: u32, count: u16 },

    /// Value that cannot be encoded for the requested entity
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// RTU checksum failure
    #[error("CRC validation failed: expected={expected:04X}, actual={actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    /// Exception response returned by the slave
    #[error("Modbus exception: function={function:02X}, code={code:02X} ({message})")]
    Exception { function: u8, code: u8, message: String },

    /// Malformed or truncated frame
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Invalid operation or slave configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Internal errors such as a poisoned lock
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ModbusError {
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection { message: message.into() }
    }

    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn invalid_function(code: u8) -> Self {
        Self::InvalidFunction { code }
    }

    pub fn invalid_address(start: u32, count: u16) -> Self {
        Self::InvalidAddress { start, count }
    }

    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData { message: message.into() }
    }

    pub fn crc_mismatch(expected: u16, actual: u16) -> Self {
        Self::CrcMismatch { expected, actual }
    }

    /// Create a Modbus exception error
    ///
    /// Standard exception codes are mapped to their names from the
    /// Modbus application protocol; anything else is reported as unknown.
    pub fn exception(function: u8, code: u8) -> Self {
        let message = match crate::protocol::ModbusException::from_u8(code) {
            Some(exception) => exception.name().to_string(),
            None => "Unknown Exception".to_string(),
        };

        Self::Exception {
            function,
            code,
            message,
        }
    }

    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame { message: message.into() }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Check if a later attempt of the same request might succeed
    ///
    /// Polling loops do not retry within a cycle, but a recoverable error on
    /// one cycle says nothing about the next one.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io { .. } => true,
            Self::Connection { .. } => true,
            Self::Timeout { .. } => true,
            Self::Frame { .. } => true,
            Self::CrcMismatch { .. } => true,
            // Acknowledge, Busy
            Self::Exception { code, .. } => matches!(code, 0x05 | 0x06),
            _ => false,
        }
    }

    /// Check if the error belongs to the underlying medium
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Connection { .. } | Self::Timeout { .. }
        )
    }

    /// Check if the error is a Modbus protocol issue
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidFunction { .. }
                | Self::Exception { .. }
                | Self::Frame { .. }
                | Self::CrcMismatch { .. }
        )
    }

    /// Check if the error was caused by the supplied configuration
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::InvalidAddress { .. } | Self::InvalidData { .. }
        )
    }
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

/// Tokio's elapsed error carries no duration, callers that know it should
/// build `ModbusError::timeout` themselves.
impl From<tokio::time::error::Elapsed> for ModbusError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::timeout("Operation timeout", 0)
    }
}

impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration(format!("JSON error: {}", err))
    }
}

impl From<serde_yaml::Error> for ModbusError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::configuration(format!("YAML error: {}", err))
    }
}
