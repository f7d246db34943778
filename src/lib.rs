//! # Edge Modbus - Modbus TCP/RTU Poller
//!
//! A Modbus master that cyclically reads coils, discrete inputs, holding
//! registers and input registers from slave devices, turns the responses into
//! labelled display values and batches them for an external publisher. One-shot
//! writes to coils and holding registers are supported as well.
//!
//! ## Features
//!
//! - **Concurrent polling**: one tokio task per read operation, all sharing a
//!   single serialised connection per slave
//! - **TCP and RTU**: MBAP framing over TCP, CRC-16 framing over serial lines
//! - **Grouped output**: values grouped by correlation id and source second
//! - **Graceful degradation**: timeouts, exception responses and malformed
//!   frames cost one cycle, never the loop
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Used for |
//! |------|----------|----------|
//! | 0x01 | Read Coils | `0xxxx` reads |
//! | 0x02 | Read Discrete Inputs | `1xxxx` reads |
//! | 0x03 | Read Holding Registers | `4xxxx` reads |
//! | 0x04 | Read Input Registers | `3xxxx` reads |
//! | 0x05 | Write Single Coil | `0xxxx` writes |
//! | 0x06 | Write Single Register | `4xxxx` writes |
//! | 0x10 | Write Multiple Registers | `4xxxx` float writes |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edge_modbus::{ModuleConfig, SessionManager, collect_out_message};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> edge_modbus::ModbusResult<()> {
//!     let config = ModuleConfig::from_file("config.json")?;
//!     let mut manager = SessionManager::from_config(&config)?;
//!     manager.start_all().await;
//!
//!     tokio::time::sleep(Duration::from_secs(5)).await;
//!     if let Some(message) = collect_out_message(&manager.outputs()) {
//!         println!("{}", serde_json::to_string(&message)?);
//!     }
//!
//!     manager.release_all().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐      ┌─────────────────┐
//! │ SessionManager  │─────►│    Publisher    │
//! └─────────────────┘      └─────────────────┘
//!          │                        ▲
//! ┌─────────────────┐      ┌─────────────────┐
//! │ ModbusSlave-    │─────►│ OutputAggregator│
//! │ Session (tasks) │      └─────────────────┘
//! └─────────────────┘
//!          │
//! ┌─────────────────┐      ┌─────────────────┐
//! │   Frame Codec   │◄────►│   Transport     │
//! │ (encode/decode) │      │   (TCP / RTU)   │
//! └─────────────────┘      └─────────────────┘
//! ```

/// Error types and result handling
pub mod error;

/// Function codes, exception codes and entity types
pub mod protocol;

/// Read and write operation descriptors
pub mod operation;

/// Request encoding and response classification
pub mod codec;

/// Transport capability with TCP and RTU implementations
pub mod transport;

/// Batching of decoded values
pub mod aggregator;

/// Per-slave polling engine
pub mod session;

/// Multi-slave session management and write routing
pub mod manager;

/// Publish envelope and periodic publisher
pub mod publisher;

/// Module and slave configuration
pub mod config;

/// Tracing subscriber setup
pub mod logging;

/// Poll statistics and formatting helpers
pub mod utils;

pub use aggregator::{DecodedValue, OutputAggregator, OutputBatch, OutputGroup};
pub use codec::DecodeOutcome;
pub use config::{ModbusSlaveConfig, ModuleConfig};
pub use error::{ModbusError, ModbusResult};
pub use logging::{init_logging, LogLevel};
pub use manager::SessionManager;
pub use operation::{ReadOperation, ReadOperationConfig, WriteOperation};
pub use protocol::{EntityType, ModbusException, ModbusFunction};
pub use publisher::{collect_out_message, spawn_publisher, OutMessage};
pub use session::ModbusSlaveSession;
pub use transport::{ModbusTransport, RtuTransport, TcpTransport, TransportStats};
pub use utils::{OperationTimer, PollStatistics};

/// Default per-request timeout (1 second)
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Default gap enforced before each TCP request
pub const DEFAULT_TCP_SILENT_INTERVAL_MS: u64 = 100;

/// Default polling interval of a read operation
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 1000;

/// Default publish interval of the module
pub const DEFAULT_PUBLISH_INTERVAL_MS: u64 = 2000;

/// Correlation id used when an operation does not set one
pub const DEFAULT_CORRELATION_ID: &str = "DefaultCorrelationId";

/// chrono format of source and publish timestamps
pub const SOURCE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Maximum number of coils that can be read in a single request
pub const MAX_COILS_PER_REQUEST: u16 = 2000;

/// Maximum number of registers that can be read in a single request
pub const MAX_REGISTERS_PER_REQUEST: u16 = 125;

/// Maximum Modbus TCP frame size (MBAP header + PDU)
pub const MAX_TCP_FRAME_SIZE: usize = 260;

/// Maximum Modbus RTU frame size
pub const MAX_RTU_FRAME_SIZE: usize = 256;

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Edge Modbus v{} - Modbus TCP/RTU poller", VERSION)
}
