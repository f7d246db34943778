//! # Operation Descriptors
//!
//! A read operation describes one coil or register range that a session polls
//! on a fixed interval. A write operation describes a single one-shot write.
//!
//! Both are built from configuration entries whose `StartAddress` carries the
//! entity type in its first character and a 1-based offset in the rest:
//!
//! | Address  | Entity           | Read function |
//! |----------|------------------|---------------|
//! | `00001`  | Coil             | 0x01          |
//! | `10001`  | Input Status     | 0x02          |
//! | `30001`  | Input Register   | 0x04          |
//! | `400001` | Holding Register | 0x03          |
//!
//! ```rust
//! use edge_modbus::operation::{ReadOperation, ReadOperationConfig};
//!
//! let config = ReadOperationConfig::new("400001", 2, "Pressure");
//! let op = ReadOperation::from_config("op1", &config, 1)?;
//!
//! assert_eq!(op.address(), 0);
//! assert_eq!(op.function_code(), 0x03);
//! assert_eq!(op.address_label(1), "400002");
//! # Ok::<(), edge_modbus::ModbusError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{read_function_code, EntityType, UnitId, UNSUPPORTED_FUNCTION};

/// Shortest accepted start address string
pub const MIN_START_ADDRESS_LEN: usize = 5;

/// Highest 1-based offset an address string may carry
const MAX_ADDRESS_SUFFIX: u32 = 65536;

fn default_polling_interval() -> u64 {
    crate::DEFAULT_POLLING_INTERVAL_MS
}

fn default_correlation_id() -> String {
    crate::DEFAULT_CORRELATION_ID.to_string()
}

/// Entity character and zero-based offset parsed from a start address string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusAddress {
    entity: char,
    address: u16,
    source_len: usize,
}

impl ModbusAddress {
    /// Parse a start address such as `"400001"`
    ///
    /// The entity character is not checked here; use [`Self::entity_type`]
    /// or [`Self::function_code`] to find out whether it is supported.
    pub fn parse(start_address: &str) -> ModbusResult<Self> {
        if start_address.len() < MIN_START_ADDRESS_LEN {
            return Err(ModbusError::configuration(format!(
                "StartAddress '{}' must be at least {} characters",
                start_address, MIN_START_ADDRESS_LEN
            )));
        }

        let mut chars = start_address.chars();
        let entity = chars.next().ok_or_else(|| {
            ModbusError::configuration("StartAddress must not be empty")
        })?;
        let suffix = chars.as_str();

        let offset: u32 = suffix.parse().map_err(|_| {
            ModbusError::configuration(format!(
                "StartAddress '{}' has a non-numeric offset '{}'",
                start_address, suffix
            ))
        })?;

        if offset == 0 || offset > MAX_ADDRESS_SUFFIX {
            return Err(ModbusError::configuration(format!(
                "StartAddress '{}' offset must be in 1..={}",
                start_address, MAX_ADDRESS_SUFFIX
            )));
        }

        Ok(Self {
            entity,
            address: (offset - 1) as u16,
            source_len: start_address.len(),
        })
    }

    pub fn entity(&self) -> char {
        self.entity
    }

    /// Zero-based wire address
    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn entity_type(&self) -> Option<EntityType> {
        EntityType::from_char(self.entity)
    }

    /// Read function code for this entity, `0` when the entity is unknown
    pub fn function_code(&self) -> u8 {
        read_function_code(self.entity)
    }

    /// Display label for the element `index` positions past the start
    ///
    /// The 1-based number is zero-padded to four digits for 5-character
    /// address strings and five digits for 6-character ones. Other widths
    /// produce an empty label.
    pub fn label(&self, index: u32) -> String {
        let number = self.address as u32 + index + 1;
        match self.source_len {
            5 => format!("{}{:04}", self.entity, number),
            6 => format!("{}{:05}", self.entity, number),
            _ => String::new(),
        }
    }
}

/// Read operation as it appears in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReadOperationConfig {
    /// Overrides the slave-level unit id
    #[serde(default)]
    pub unit_id: Option<UnitId>,
    pub start_address: String,
    pub count: u16,
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,
    pub display_name: String,
    #[serde(default = "default_correlation_id")]
    pub correlation_id: String,
}

impl ReadOperationConfig {
    pub fn new(start_address: &str, count: u16, display_name: &str) -> Self {
        Self {
            unit_id: None,
            start_address: start_address.to_string(),
            count,
            polling_interval: default_polling_interval(),
            display_name: display_name.to_string(),
            correlation_id: default_correlation_id(),
        }
    }

    pub fn with_polling_interval(mut self, polling_interval_ms: u64) -> Self {
        self.polling_interval = polling_interval_ms;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: &str) -> Self {
        self.correlation_id = correlation_id.to_string();
        self
    }

    pub fn with_unit_id(mut self, unit_id: UnitId) -> Self {
        self.unit_id = Some(unit_id);
        self
    }
}

/// Validated read descriptor plus the buffers its polling loop owns
#[derive(Debug, Clone)]
pub struct ReadOperation {
    id: String,
    unit_id: UnitId,
    start_address: String,
    count: u16,
    polling_interval: Duration,
    display_name: String,
    correlation_id: String,
    location: ModbusAddress,
    request: Vec<u8>,
    response: Option<Vec<u8>>,
}

impl ReadOperation {
    /// Build and validate a descriptor
    ///
    /// Rejects short or non-numeric addresses, unknown entity types, counts
    /// outside the per-request limit and a zero polling interval.
    pub fn from_config(
        id: &str,
        config: &ReadOperationConfig,
        default_unit_id: UnitId,
    ) -> ModbusResult<Self> {
        let location = ModbusAddress::parse(&config.start_address)?;

        let entity_type = location.entity_type().ok_or_else(|| {
            ModbusError::configuration(format!(
                "Operation '{}': unsupported entity type '{}' in StartAddress '{}'",
                id,
                location.entity(),
                config.start_address
            ))
        })?;

        let max_count = entity_type.max_read_count();
        if config.count == 0 || config.count > max_count {
            return Err(ModbusError::configuration(format!(
                "Operation '{}': Count {} must be in 1..={}",
                id, config.count, max_count
            )));
        }

        if location.address() as u32 + config.count as u32 > MAX_ADDRESS_SUFFIX {
            return Err(ModbusError::invalid_address(
                location.address() as u32,
                config.count,
            ));
        }

        if config.polling_interval == 0 {
            return Err(ModbusError::configuration(format!(
                "Operation '{}': PollingInterval must be at least 1ms",
                id
            )));
        }

        Ok(Self {
            id: id.to_string(),
            unit_id: config.unit_id.unwrap_or(default_unit_id),
            start_address: config.start_address.clone(),
            count: config.count,
            polling_interval: Duration::from_millis(config.polling_interval),
            display_name: config.display_name.clone(),
            correlation_id: config.correlation_id.clone(),
            location,
            request: Vec::new(),
            response: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    pub fn start_address(&self) -> &str {
        &self.start_address
    }

    pub fn count(&self) -> u16 {
        self.count
    }

    pub fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn entity(&self) -> char {
        self.location.entity()
    }

    pub fn address(&self) -> u16 {
        self.location.address()
    }

    pub fn function_code(&self) -> u8 {
        self.location.function_code()
    }

    pub fn address_label(&self, index: u32) -> String {
        self.location.label(index)
    }

    /// Encoded request frame, empty until the session encodes it
    pub fn request(&self) -> &[u8] {
        &self.request
    }

    pub fn request_len(&self) -> usize {
        self.request.len()
    }

    pub fn is_encoded(&self) -> bool {
        !self.request.is_empty()
    }

    pub(crate) fn set_request(&mut self, frame: Vec<u8>) {
        self.request = frame;
    }

    /// Response from the most recent poll, if one arrived
    pub fn response(&self) -> Option<&[u8]> {
        self.response.as_deref()
    }

    pub(crate) fn set_response(&mut self, frame: Vec<u8>) {
        self.response = Some(frame);
    }

    pub(crate) fn clear_response(&mut self) {
        self.response = None;
    }
}

/// One-shot write command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WriteOperation {
    /// Hardware id of the slave this write is routed to
    pub hw_id: String,
    #[serde(default)]
    pub unit_id: Option<UnitId>,
    pub start_address: String,
    pub value: f32,
    /// Encode `value` as an IEEE 754 float across two registers
    #[serde(default)]
    pub is_float: bool,
}

impl WriteOperation {
    pub fn new(hw_id: &str, start_address: &str, value: f32) -> Self {
        Self {
            hw_id: hw_id.to_string(),
            unit_id: None,
            start_address: start_address.to_string(),
            value,
            is_float: false,
        }
    }

    pub fn with_float(mut self, is_float: bool) -> Self {
        self.is_float = is_float;
        self
    }

    pub fn with_unit_id(mut self, unit_id: UnitId) -> Self {
        self.unit_id = Some(unit_id);
        self
    }

    pub fn location(&self) -> ModbusResult<ModbusAddress> {
        ModbusAddress::parse(&self.start_address)
    }

    /// Same entity-based rule as reads; `0` for unknown entities
    pub fn function_code(&self) -> ModbusResult<u8> {
        Ok(self.location()?.function_code())
    }

    pub fn validate(&self) -> ModbusResult<()> {
        if self.hw_id.is_empty() {
            return Err(ModbusError::configuration("Write operation HwId must not be empty"));
        }
        let location = self.location()?;
        if location.function_code() == UNSUPPORTED_FUNCTION {
            return Err(ModbusError::configuration(format!(
                "Write operation has unsupported entity type '{}'",
                location.entity()
            )));
        }
        Ok(())
    }
}
