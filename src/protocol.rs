/// Modbus protocol definitions
///
/// Function codes, exception codes and the four addressable entity types.
/// Entity types follow the classic 0x/1x/3x/4x reference convention where the
/// leading digit of an address string selects the object class.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ModbusError, ModbusResult};

/// Modbus slave/unit identifier
pub type UnitId = u8;

/// Offset added to the request function code in an exception response
pub const EXCEPTION_OFFSET: u8 = 0x80;

/// Sentinel function code for entity types that cannot be read
pub const UNSUPPORTED_FUNCTION: u8 = 0x00;

/// Modbus function codes used by the poller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModbusFunction {
    /// Read Coils (0x01)
    ReadCoils = 0x01,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs = 0x02,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04)
    ReadInputRegisters = 0x04,
    /// Write Single Coil (0x05)
    WriteSingleCoil = 0x05,
    /// Write Single Register (0x06)
    WriteSingleRegister = 0x06,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = 0x10,
}

impl ModbusFunction {
    pub fn from_u8(value: u8) -> ModbusResult<Self> {
        match value {
            0x01 => Ok(ModbusFunction::ReadCoils),
            0x02 => Ok(ModbusFunction::ReadDiscreteInputs),
            0x03 => Ok(ModbusFunction::ReadHoldingRegisters),
            0x04 => Ok(ModbusFunction::ReadInputRegisters),
            0x05 => Ok(ModbusFunction::WriteSingleCoil),
            0x06 => Ok(ModbusFunction::WriteSingleRegister),
            0x10 => Ok(ModbusFunction::WriteMultipleRegisters),
            _ => Err(ModbusError::invalid_function(value)),
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn is_read_function(self) -> bool {
        matches!(
            self,
            ModbusFunction::ReadCoils
                | ModbusFunction::ReadDiscreteInputs
                | ModbusFunction::ReadHoldingRegisters
                | ModbusFunction::ReadInputRegisters
        )
    }

    /// Check if responses to this function carry packed bits
    pub fn is_bit_function(self) -> bool {
        matches!(
            self,
            ModbusFunction::ReadCoils | ModbusFunction::ReadDiscreteInputs
        )
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModbusFunction::ReadCoils => "Read Coils",
            ModbusFunction::ReadDiscreteInputs => "Read Discrete Inputs",
            ModbusFunction::ReadHoldingRegisters => "Read Holding Registers",
            ModbusFunction::ReadInputRegisters => "Read Input Registers",
            ModbusFunction::WriteSingleCoil => "Write Single Coil",
            ModbusFunction::WriteSingleRegister => "Write Single Register",
            ModbusFunction::WriteMultipleRegisters => "Write Multiple Registers",
        };
        write!(f, "{} (0x{:02X})", name, *self as u8)
    }
}

/// Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModbusException {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetDeviceFailedToRespond = 0x0B,
}

impl ModbusException {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ModbusException::IllegalFunction),
            0x02 => Some(ModbusException::IllegalDataAddress),
            0x03 => Some(ModbusException::IllegalDataValue),
            0x04 => Some(ModbusException::ServerDeviceFailure),
            0x05 => Some(ModbusException::Acknowledge),
            0x06 => Some(ModbusException::ServerDeviceBusy),
            0x08 => Some(ModbusException::MemoryParityError),
            0x0A => Some(ModbusException::GatewayPathUnavailable),
            0x0B => Some(ModbusException::GatewayTargetDeviceFailedToRespond),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Short name as used in the Modbus application protocol
    pub fn name(self) -> &'static str {
        match self {
            ModbusException::IllegalFunction => "Illegal Function",
            ModbusException::IllegalDataAddress => "Illegal Data Address",
            ModbusException::IllegalDataValue => "Illegal Data Value",
            ModbusException::ServerDeviceFailure => "Slave Device Failure",
            ModbusException::Acknowledge => "Acknowledge",
            ModbusException::ServerDeviceBusy => "Slave Device Busy",
            ModbusException::MemoryParityError => "Memory Parity Error",
            ModbusException::GatewayPathUnavailable => "Gateway Path Unavailable",
            ModbusException::GatewayTargetDeviceFailedToRespond => {
                "Gateway Target Device Failed to Respond"
            }
        }
    }
}

impl fmt::Display for ModbusException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus Exception 0x{:02X}: {}", self.to_u8(), self.name())
    }
}

/// Addressable Modbus object class, selected by the first character of an
/// address string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    /// `0xxxx` - read/write bits
    CoilStatus,
    /// `1xxxx` - read-only bits
    InputStatus,
    /// `3xxxx` - read-only 16-bit words
    InputRegister,
    /// `4xxxx` - read/write 16-bit words
    HoldingRegister,
}

impl EntityType {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '0' => Some(EntityType::CoilStatus),
            '1' => Some(EntityType::InputStatus),
            '3' => Some(EntityType::InputRegister),
            '4' => Some(EntityType::HoldingRegister),
            _ => None,
        }
    }

    /// The only function code used to poll this entity type
    pub fn read_function(self) -> ModbusFunction {
        match self {
            EntityType::CoilStatus => ModbusFunction::ReadCoils,
            EntityType::InputStatus => ModbusFunction::ReadDiscreteInputs,
            EntityType::InputRegister => ModbusFunction::ReadInputRegisters,
            EntityType::HoldingRegister => ModbusFunction::ReadHoldingRegisters,
        }
    }

    /// Maximum count a single read of this entity may request
    pub fn max_read_count(self) -> u16 {
        match self {
            EntityType::CoilStatus | EntityType::InputStatus => crate::MAX_COILS_PER_REQUEST,
            EntityType::InputRegister | EntityType::HoldingRegister => {
                crate::MAX_REGISTERS_PER_REQUEST
            }
        }
    }
}

/// Map an entity character to its read function code, or
/// [`UNSUPPORTED_FUNCTION`] when the character names no readable entity
pub fn read_function_code(entity: char) -> u8 {
    EntityType::from_char(entity)
        .map(|e| e.read_function().to_u8())
        .unwrap_or(UNSUPPORTED_FUNCTION)
}

/// Register helpers for multi-word values
pub mod data_utils {
    use byteorder::{BigEndian, ByteOrder};

    /// Encode an f32 as two big-endian registers (IEEE 754)
    pub fn f32_to_registers(value: f32) -> [u16; 2] {
        let mut buf = [0u8; 4];
        BigEndian::write_f32(&mut buf, value);
        [BigEndian::read_u16(&buf[0..2]), BigEndian::read_u16(&buf[2..4])]
    }

    /// Convert register values to bytes (big-endian)
    pub fn registers_to_bytes(registers: &[u16]) -> Vec<u8> {
        let mut bytes = vec![0u8; registers.len() * 2];
        BigEndian::write_u16_into(registers, &mut bytes);
        bytes
    }
}
