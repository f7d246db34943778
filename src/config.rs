//! # Configuration
//!
//! Module and slave configuration, loaded from JSON or YAML. Keys use
//! PascalCase:
//!
//! ```json
//! {
//!   "PublishInterval": 2000,
//!   "SlaveConfigs": {
//!     "Slave01": {
//!       "HwId": "PowerMeter-0a:01:01:01:01:01",
//!       "SlaveConnection": "192.168.0.1",
//!       "UnitId": 1,
//!       "Operations": {
//!         "Op01": { "PollingInterval": 1000, "StartAddress": "400001", "Count": 2, "DisplayName": "Voltage" }
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! A `SlaveConnection` that parses as an IP address selects Modbus TCP;
//! anything else is taken as a serial device path and selects Modbus RTU.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use crate::error::{ModbusError, ModbusResult};
use crate::operation::{ReadOperation, ReadOperationConfig, WriteOperation};
use crate::protocol::UnitId;
use crate::transport::{ModbusTransport, RtuTransport, TcpTransport};

fn default_publish_interval() -> u64 {
    crate::DEFAULT_PUBLISH_INTERVAL_MS
}

fn default_unit_id() -> UnitId {
    1
}

fn default_tcp_port() -> u16 {
    crate::DEFAULT_TCP_PORT
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_parity() -> String {
    "None".to_string()
}

fn default_timeout() -> u64 {
    crate::DEFAULT_TIMEOUT_MS
}

/// Top-level module configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModuleConfig {
    /// Milliseconds between two publish attempts
    #[serde(default = "default_publish_interval")]
    pub publish_interval: u64,
    #[serde(default)]
    pub slave_configs: BTreeMap<String, ModbusSlaveConfig>,
}

impl ModuleConfig {
    pub fn from_json_str(json: &str) -> ModbusResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> ModbusResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; `.yaml`/`.yml` are read as YAML, everything else as JSON
    pub fn from_file<P: AsRef<Path>>(path: P) -> ModbusResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ModbusError::configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            _ => Self::from_json_str(&content),
        }
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval)
    }

    /// Check every slave and every operation
    pub fn validate(&self) -> ModbusResult<()> {
        if self.publish_interval == 0 {
            return Err(ModbusError::configuration("PublishInterval must be at least 1ms"));
        }
        for (name, slave) in &self.slave_configs {
            slave.validate().map_err(|e| {
                ModbusError::configuration(format!("Slave '{}': {}", name, e))
            })?;
        }
        Ok(())
    }
}

/// Physical connection selected by `SlaveConnection`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionKind {
    Tcp(SocketAddr),
    Rtu(String),
}

/// One slave device and the operations polled on it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModbusSlaveConfig {
    pub hw_id: String,
    #[serde(default = "default_unit_id")]
    pub unit_id: UnitId,
    /// IP address or serial device path
    pub slave_connection: String,
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default = "default_parity")]
    pub parity: String,
    /// Silent interval in milliseconds; the transport default applies when absent
    #[serde(default)]
    pub silent_interval: Option<u64>,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub packet_logging: bool,
    #[serde(default)]
    pub operations: BTreeMap<String, ReadOperationConfig>,
    #[serde(default)]
    pub writes: BTreeMap<String, WriteOperation>,
}

impl ModbusSlaveConfig {
    pub fn new(hw_id: &str, slave_connection: &str) -> Self {
        Self {
            hw_id: hw_id.to_string(),
            unit_id: default_unit_id(),
            slave_connection: slave_connection.to_string(),
            tcp_port: default_tcp_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: default_parity(),
            silent_interval: None,
            timeout: default_timeout(),
            packet_logging: false,
            operations: BTreeMap::new(),
            writes: BTreeMap::new(),
        }
    }

    pub fn with_operation(mut self, id: &str, operation: ReadOperationConfig) -> Self {
        self.operations.insert(id.to_string(), operation);
        self
    }

    pub fn with_write(mut self, id: &str, write: WriteOperation) -> Self {
        self.writes.insert(id.to_string(), write);
        self
    }

    pub fn connection_kind(&self) -> ConnectionKind {
        match self.slave_connection.parse::<IpAddr>() {
            Ok(ip) => ConnectionKind::Tcp(SocketAddr::new(ip, self.tcp_port)),
            Err(_) => ConnectionKind::Rtu(self.slave_connection.clone()),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// Build every read descriptor, in operation id order
    pub fn read_operations(&self) -> ModbusResult<Vec<ReadOperation>> {
        self.operations
            .iter()
            .map(|(id, op)| ReadOperation::from_config(id, op, self.unit_id))
            .collect()
    }

    pub fn validate(&self) -> ModbusResult<()> {
        if self.hw_id.is_empty() {
            return Err(ModbusError::configuration("HwId must not be empty"));
        }
        if self.slave_connection.is_empty() {
            return Err(ModbusError::configuration("SlaveConnection must not be empty"));
        }
        if self.timeout == 0 {
            return Err(ModbusError::configuration("Timeout must be at least 1ms"));
        }
        if let ConnectionKind::Rtu(_) = self.connection_kind() {
            self.serial_settings()?;
        }
        self.read_operations()?;
        for (id, write) in &self.writes {
            write.validate().map_err(|e| {
                ModbusError::configuration(format!("Write '{}': {}", id, e))
            })?;
        }
        Ok(())
    }

    fn serial_settings(
        &self,
    ) -> ModbusResult<(tokio_serial::DataBits, tokio_serial::StopBits, tokio_serial::Parity)> {
        let data_bits = match self.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            8 => tokio_serial::DataBits::Eight,
            other => {
                return Err(ModbusError::configuration(format!("Unsupported DataBits {}", other)))
            }
        };
        let stop_bits = match self.stop_bits {
            1 => tokio_serial::StopBits::One,
            2 => tokio_serial::StopBits::Two,
            other => {
                return Err(ModbusError::configuration(format!("Unsupported StopBits {}", other)))
            }
        };
        let parity = match self.parity.to_ascii_lowercase().as_str() {
            "none" => tokio_serial::Parity::None,
            "odd" => tokio_serial::Parity::Odd,
            "even" => tokio_serial::Parity::Even,
            _ => {
                return Err(ModbusError::configuration(format!(
                    "Unsupported Parity '{}'",
                    self.parity
                )))
            }
        };
        Ok((data_bits, stop_bits, parity))
    }

    /// Create the transport `SlaveConnection` selects, not yet connected
    pub fn build_transport(&self) -> ModbusResult<Box<dyn ModbusTransport>> {
        match self.connection_kind() {
            ConnectionKind::Tcp(address) => {
                let mut transport = TcpTransport::new(address, self.timeout())
                    .with_packet_logging(self.packet_logging);
                if let Some(ms) = self.silent_interval {
                    transport = transport.with_silent_interval(Duration::from_millis(ms));
                }
                Ok(Box::new(transport))
            }
            ConnectionKind::Rtu(port) => {
                let (data_bits, stop_bits, parity) = self.serial_settings()?;
                let mut transport = RtuTransport::new_with_config(
                    &port,
                    self.baud_rate,
                    data_bits,
                    stop_bits,
                    parity,
                    self.timeout(),
                )
                .with_packet_logging(self.packet_logging);
                if let Some(ms) = self.silent_interval {
                    transport = transport.with_silent_interval(Duration::from_millis(ms));
                }
                Ok(Box::new(transport))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"{
        "PublishInterval": 5000,
        "SlaveConfigs": {
            "Slave01": {
                "HwId": "PowerMeter-01",
                "SlaveConnection": "192.168.0.10",
                "UnitId": 3,
                "Operations": {
                    "Op01": { "PollingInterval": 500, "StartAddress": "400001", "Count": 2, "DisplayName": "Voltage", "CorrelationId": "MessageType1" },
                    "Op02": { "StartAddress": "00001", "Count": 8, "DisplayName": "Relays" }
                },
                "Writes": {
                    "W1": { "HwId": "PowerMeter-01", "StartAddress": "40010", "Value": 7 }
                }
            },
            "Slave02": {
                "HwId": "Boiler-02",
                "SlaveConnection": "/dev/ttyS0",
                "BaudRate": 19200,
                "Parity": "Even",
                "SilentInterval": 25,
                "Operations": {
                    "Op01": { "StartAddress": "30001", "Count": 1, "DisplayName": "Temperature" }
                }
            }
        }
    }"#;

    #[test]
    fn test_load_json() {
        let config = ModuleConfig::from_json_str(JSON).unwrap();
        assert_eq!(config.publish_interval(), Duration::from_millis(5000));

        let tcp = &config.slave_configs["Slave01"];
        assert_eq!(
            tcp.connection_kind(),
            ConnectionKind::Tcp("192.168.0.10:502".parse().unwrap())
        );
        let ops = tcp.read_operations().unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].id(), "Op01");
        assert_eq!(ops[0].unit_id(), 3);
        assert_eq!(ops[0].correlation_id(), "MessageType1");
        assert_eq!(ops[1].polling_interval(), Duration::from_millis(1000));
        assert_eq!(tcp.writes["W1"].value, 7.0);

        let rtu = &config.slave_configs["Slave02"];
        assert_eq!(rtu.connection_kind(), ConnectionKind::Rtu("/dev/ttyS0".to_string()));
        assert_eq!(rtu.unit_id, 1);
        assert_eq!(rtu.timeout(), Duration::from_millis(1000));
    }

    #[test]
    fn test_load_yaml() {
        let yaml = r#"
SlaveConfigs:
  Slave01:
    HwId: Meter
    SlaveConnection: "10.0.0.5"
    TcpPort: 5020
    Operations:
      Op01:
        StartAddress: "40001"
        Count: 4
        DisplayName: Power
"#;
        let config = ModuleConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.publish_interval, 2000);
        assert_eq!(
            config.slave_configs["Slave01"].connection_kind(),
            ConnectionKind::Tcp("10.0.0.5:5020".parse().unwrap())
        );
    }

    #[test]
    fn test_invalid_operation_is_rejected() {
        let json = r#"{"SlaveConfigs": {"S": {"HwId": "x", "SlaveConnection": "127.0.0.1",
            "Operations": {"Bad": {"StartAddress": "20001", "Count": 1, "DisplayName": "d"}}}}}"#;
        let err = ModuleConfig::from_json_str(json).unwrap_err();
        assert!(err.is_configuration_error());
        assert!(err.to_string().contains("Slave 'S'"));

        assert!(ModuleConfig::from_json_str("{not json").is_err());
    }

    #[test]
    fn test_serial_settings_validation() {
        let mut slave = ModbusSlaveConfig::new("hw", "/dev/ttyUSB0");
        assert!(slave.validate().is_ok());

        slave.parity = "Mark".to_string();
        assert!(slave.validate().is_err());

        slave.parity = "odd".to_string();
        slave.stop_bits = 3;
        assert!(slave.validate().is_err());
    }

    #[test]
    fn test_build_transport_selects_medium() {
        let tcp = ModbusSlaveConfig::new("hw", "127.0.0.1").build_transport().unwrap();
        assert_eq!(tcp.body_offset(), 7);
        assert_eq!(tcp.silent_interval(), Duration::from_millis(crate::DEFAULT_TCP_SILENT_INTERVAL_MS));

        let mut rtu = ModbusSlaveConfig::new("hw", "/dev/ttyUSB0");
        rtu.silent_interval = Some(30);
        let rtu = rtu.build_transport().unwrap();
        assert_eq!(rtu.body_offset(), 1);
        assert_eq!(rtu.silent_interval(), Duration::from_millis(30));
        assert!(!rtu.is_connected());
    }

    #[test]
    fn test_from_file_by_extension() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("edge_modbus_config_{}.json", std::process::id()));
        std::fs::write(&path, JSON).unwrap();
        let config = ModuleConfig::from_file(&path).unwrap();
        assert_eq!(config.slave_configs.len(), 2);
        std::fs::remove_file(&path).unwrap();

        assert!(ModuleConfig::from_file(dir.join("does-not-exist.json")).is_err());
    }
}
