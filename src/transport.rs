//! # Modbus Transport Layer
//!
//! A session never looks at the physical medium. It only needs something that
//! can connect, wrap a PDU in the medium's framing, exchange one frame for
//! another and say where the function code sits in a response. That is the
//! [`ModbusTransport`] capability.
//!
//! ## Supported Transports
//!
//! ### Modbus TCP (`TcpTransport`)
//! - MBAP header with an incrementing transaction id
//! - Reconnects on the next send after a failed exchange
//! - Body offset 7 (6 byte MBAP header + unit id)
//!
//! ### Modbus RTU (`RtuTransport`)
//! - Serial line (RS-232, RS-485) via `tokio-serial`
//! - CRC-16 appended little-endian and validated on every response
//! - Silent interval of 3.5 character times derived from the baud rate
//! - Body offset 1 (unit id)
//!
//! ## Transport Statistics
//!
//! ```rust
//! use edge_modbus::transport::{ModbusTransport, RtuTransport};
//!
//! let transport = RtuTransport::new("/dev/ttyUSB0", 9600);
//! let stats = transport.get_stats();
//! assert_eq!(stats.requests_sent, 0);
//! assert!(!transport.is_connected());
//! ```

use async_trait::async_trait;
use crc::{Crc, CRC_16_MODBUS};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_serial::{ClearBuffer, SerialPort};
use tracing::{debug, info};

use crate::error::{ModbusError, ModbusResult};
use crate::logging::log_packet;
use crate::protocol::UnitId;

/// Modbus TCP Application Protocol header size
const MBAP_HEADER_SIZE: usize = 6;

/// Offset of the function code in a TCP frame
pub const TCP_BODY_OFFSET: usize = MBAP_HEADER_SIZE + 1;

/// Offset of the function code in an RTU frame
pub const RTU_BODY_OFFSET: usize = 1;

/// Fixed RTU frame gap used above 19200 baud
const RTU_MIN_FRAME_GAP_US: u64 = 1750;

/// CRC calculator for RTU
const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Medium-specific half of a Modbus exchange
///
/// Implementations must be `Send + Sync` so a session can share one transport
/// between its polling tasks behind a lock. Calls are never concurrent; the
/// session serialises them.
#[async_trait]
pub trait ModbusTransport: Send + Sync {
    /// Open the underlying connection
    ///
    /// Fails with `ModbusError::Connection` when the device cannot be reached.
    async fn connect(&mut self) -> ModbusResult<()>;

    /// Send one encoded frame and return the raw response frame
    ///
    /// Honours the silent interval before transmitting and enforces the
    /// transport's own timeout so a caller is never blocked indefinitely.
    async fn send(&mut self, request: &[u8]) -> ModbusResult<Vec<u8>>;

    /// Wrap a PDU (function code + data) in this medium's framing
    fn encode_frame(&mut self, unit_id: UnitId, pdu: &[u8]) -> Vec<u8>;

    /// Index of the function code in frames produced or returned by this transport
    fn body_offset(&self) -> usize;

    /// Minimum quiet time between two requests on the same connection
    fn silent_interval(&self) -> Duration;

    fn is_connected(&self) -> bool;

    async fn close(&mut self) -> ModbusResult<()>;

    fn get_stats(&self) -> TransportStats;
}

#[async_trait]
impl<T: ModbusTransport + ?Sized> ModbusTransport for Box<T> {
    async fn connect(&mut self) -> ModbusResult<()> {
        (**self).connect().await
    }

    async fn send(&mut self, request: &[u8]) -> ModbusResult<Vec<u8>> {
        (**self).send(request).await
    }

    fn encode_frame(&mut self, unit_id: UnitId, pdu: &[u8]) -> Vec<u8> {
        (**self).encode_frame(unit_id, pdu)
    }

    fn body_offset(&self) -> usize {
        (**self).body_offset()
    }

    fn silent_interval(&self) -> Duration {
        (**self).silent_interval()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        (**self).close().await
    }

    fn get_stats(&self) -> TransportStats {
        (**self).get_stats()
    }
}

/// Transport layer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl TransportStats {
    fn record_request(&mut self, frame: &[u8]) {
        self.requests_sent += 1;
        self.bytes_sent += frame.len() as u64;
    }

    fn record_response(&mut self, frame: &[u8]) {
        self.responses_received += 1;
        self.bytes_received += frame.len() as u64;
    }

    fn record_error(&mut self, error: &ModbusError) {
        self.errors += 1;
        if matches!(error, ModbusError::Timeout { .. }) {
            self.timeouts += 1;
        }
    }
}

/// Calculate CRC for RTU frame
pub fn calculate_crc(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// Check the trailing little-endian CRC of an RTU frame
pub fn check_crc(frame: &[u8]) -> ModbusResult<()> {
    if frame.len() < 4 {
        return Err(ModbusError::frame("RTU frame too short"));
    }

    let data_len = frame.len() - 2;
    let received = u16::from_le_bytes([frame[data_len], frame[data_len + 1]]);
    let calculated = calculate_crc(&frame[..data_len]);

    if received != calculated {
        return Err(ModbusError::crc_mismatch(calculated, received));
    }
    Ok(())
}

/// 3.5 character times at 11 bits per character, fixed at 1750µs above 19200 baud
pub fn rtu_frame_gap(baud_rate: u32) -> Duration {
    if baud_rate == 0 || baud_rate > 19200 {
        return Duration::from_micros(RTU_MIN_FRAME_GAP_US);
    }
    let char_time_us = 11_000_000 / baud_rate as u64;
    Duration::from_micros(char_time_us * 35 / 10)
}

/// Modbus TCP transport implementation
pub struct TcpTransport {
    stream: Option<TcpStream>,
    address: SocketAddr,
    timeout: Duration,
    silent_interval: Duration,
    transaction_id: u16,
    stats: TransportStats,
    packet_logging: bool,
}

impl TcpTransport {
    /// Create a TCP transport; nothing is opened until `connect`
    pub fn new(address: SocketAddr, timeout: Duration) -> Self {
        Self {
            stream: None,
            address,
            timeout,
            silent_interval: Duration::from_millis(crate::DEFAULT_TCP_SILENT_INTERVAL_MS),
            transaction_id: 0,
            stats: TransportStats::default(),
            packet_logging: false,
        }
    }

    pub fn with_silent_interval(mut self, silent_interval: Duration) -> Self {
        self.silent_interval = silent_interval;
        self
    }

    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        if self.transaction_id == 0 {
            self.transaction_id = 1;
        }
        self.transaction_id
    }

    async fn exchange(stream: &mut TcpStream, frame: &[u8], limit: Duration) -> ModbusResult<Vec<u8>> {
        let limit_ms = limit.as_millis() as u64;

        match timeout(limit, stream.write_all(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(ModbusError::io(format!("Failed to send TCP frame: {}", e))),
            Err(_) => return Err(ModbusError::timeout("send request", limit_ms)),
        }

        // MBAP header + unit id
        let mut header = [0u8; TCP_BODY_OFFSET];
        match timeout(limit, stream.read_exact(&mut header)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(ModbusError::io(format!("Failed to read MBAP header: {}", e))),
            Err(_) => return Err(ModbusError::timeout("read response header", limit_ms)),
        }

        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        if length < 2 || MBAP_HEADER_SIZE + length > crate::MAX_TCP_FRAME_SIZE {
            return Err(ModbusError::frame(format!("Invalid MBAP length field: {}", length)));
        }

        let mut response = vec![0u8; MBAP_HEADER_SIZE + length];
        response[..TCP_BODY_OFFSET].copy_from_slice(&header);

        match timeout(limit, stream.read_exact(&mut response[TCP_BODY_OFFSET..])).await {
            Ok(Ok(_)) => Ok(response),
            Ok(Err(e)) => Err(ModbusError::io(format!("Failed to read response body: {}", e))),
            Err(_) => Err(ModbusError::timeout("read response data", limit_ms)),
        }
    }
}

#[async_trait]
impl ModbusTransport for TcpTransport {
    async fn connect(&mut self) -> ModbusResult<()> {
        let stream = match timeout(self.timeout, TcpStream::connect(self.address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ModbusError::connection(format!(
                    "Failed to connect to {}: {}",
                    self.address, e
                )))
            }
            Err(_) => {
                return Err(ModbusError::connection(format!(
                    "Timed out connecting to {}",
                    self.address
                )))
            }
        };

        info!("Connected to Modbus TCP slave at {}", self.address);
        self.stream = Some(stream);
        Ok(())
    }

    async fn send(&mut self, request: &[u8]) -> ModbusResult<Vec<u8>> {
        if self.stream.is_none() {
            debug!("Reconnecting to {}", self.address);
            if let Err(e) = self.connect().await {
                self.stats.record_error(&e);
                return Err(e);
            }
        }

        tokio::time::sleep(self.silent_interval).await;

        self.stats.record_request(request);
        if self.packet_logging {
            log_packet("TCP", "send", request);
        }

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ModbusError::connection("TCP stream not connected"))?;

        match Self::exchange(stream, request, self.timeout).await {
            Ok(response) => {
                self.stats.record_response(&response);
                if self.packet_logging {
                    log_packet("TCP", "receive", &response);
                }
                Ok(response)
            }
            Err(e) => {
                self.stats.record_error(&e);
                // The stream may be out of step with the slave now
                self.stream = None;
                Err(e)
            }
        }
    }

    fn encode_frame(&mut self, unit_id: UnitId, pdu: &[u8]) -> Vec<u8> {
        let transaction_id = self.next_transaction_id();
        let protocol_id = 0u16;
        let length = (pdu.len() + 1) as u16;

        let mut frame = Vec::with_capacity(TCP_BODY_OFFSET + pdu.len());
        frame.extend_from_slice(&transaction_id.to_be_bytes());
        frame.extend_from_slice(&protocol_id.to_be_bytes());
        frame.extend_from_slice(&length.to_be_bytes());
        frame.push(unit_id);
        frame.extend_from_slice(pdu);
        frame
    }

    fn body_offset(&self) -> usize {
        TCP_BODY_OFFSET
    }

    fn silent_interval(&self) -> Duration {
        self.silent_interval
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            info!("Closed Modbus TCP connection to {}", self.address);
        }
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

/// Modbus RTU transport implementation
pub struct RtuTransport {
    port: Option<tokio_serial::SerialStream>,
    port_name: String,
    baud_rate: u32,
    data_bits: tokio_serial::DataBits,
    stop_bits: tokio_serial::StopBits,
    parity: tokio_serial::Parity,
    timeout: Duration,
    /// Inter-frame gap derived from the baud rate
    frame_gap: Duration,
    silent_interval: Duration,
    stats: TransportStats,
    packet_logging: bool,
    /// A failed exchange may still be answered late
    stale: bool,
}

impl RtuTransport {
    /// 8N1 with a one second timeout
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self::new_with_config(
            port,
            baud_rate,
            tokio_serial::DataBits::Eight,
            tokio_serial::StopBits::One,
            tokio_serial::Parity::None,
            Duration::from_millis(crate::DEFAULT_TIMEOUT_MS),
        )
    }

    pub fn new_with_config(
        port: &str,
        baud_rate: u32,
        data_bits: tokio_serial::DataBits,
        stop_bits: tokio_serial::StopBits,
        parity: tokio_serial::Parity,
        timeout: Duration,
    ) -> Self {
        let frame_gap = rtu_frame_gap(baud_rate);

        Self {
            port: None,
            port_name: port.to_string(),
            baud_rate,
            data_bits,
            stop_bits,
            parity,
            timeout,
            frame_gap,
            silent_interval: frame_gap,
            stats: TransportStats::default(),
            packet_logging: false,
            stale: false,
        }
    }

    /// Override the derived frame gap as the silent interval
    pub fn with_silent_interval(mut self, silent_interval: Duration) -> Self {
        self.silent_interval = silent_interval;
        self
    }

    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    async fn read_frame(
        port: &mut tokio_serial::SerialStream,
        frame_gap: Duration,
    ) -> ModbusResult<Vec<u8>> {
        let mut frame = Vec::new();
        let mut buffer = [0u8; 1];

        // A silent gap after at least one byte ends the frame
        loop {
            match timeout(frame_gap, port.read_exact(&mut buffer)).await {
                Ok(Ok(_)) => {
                    frame.push(buffer[0]);
                    if frame.len() > crate::MAX_RTU_FRAME_SIZE {
                        return Err(ModbusError::frame("RTU frame too large"));
                    }
                }
                Ok(Err(e)) => return Err(ModbusError::io(format!("Serial read error: {}", e))),
                Err(_) => {
                    if !frame.is_empty() {
                        break;
                    }
                }
            }
        }

        Ok(frame)
    }

    fn clear_input(port: &tokio_serial::SerialStream) {
        if let Err(e) = SerialPort::clear(port, ClearBuffer::Input) {
            debug!("Clearing serial input failed: {}", e);
        }
    }

    /// Drop replies to abandoned requests
    ///
    /// Frames are discarded until the line stays quiet for twice the timeout.
    async fn drain_stale(
        port: &mut tokio_serial::SerialStream,
        limit: Duration,
        frame_gap: Duration,
    ) {
        Self::clear_input(port);
        while let Ok(Ok(frame)) = timeout(limit * 2, Self::read_frame(port, frame_gap)).await {
            debug!("Discarded late RTU frame: {}", hex::encode_upper(&frame));
        }
    }

    async fn exchange(
        port: &mut tokio_serial::SerialStream,
        frame: &[u8],
        limit: Duration,
        frame_gap: Duration,
    ) -> ModbusResult<Vec<u8>> {
        let limit_ms = limit.as_millis() as u64;

        Self::clear_input(port);
        match timeout(limit, port.write_all(frame)).await {
            Ok(Ok(())) => {
                let _ = timeout(limit, port.flush()).await;
            }
            Ok(Err(e)) => return Err(ModbusError::io(format!("Failed to send RTU frame: {}", e))),
            Err(_) => return Err(ModbusError::timeout("send request", limit_ms)),
        }

        let response = match timeout(limit, Self::read_frame(port, frame_gap)).await {
            Ok(result) => result?,
            Err(_) => return Err(ModbusError::timeout("read response", limit_ms)),
        };

        check_crc(&response)?;

        let (Some(&unit), Some(&expected)) = (response.first(), frame.first()) else {
            return Err(ModbusError::frame("Empty RTU frame"));
        };
        if unit != expected {
            return Err(ModbusError::frame(format!(
                "Response from unit {}, expected {}",
                unit, expected
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl ModbusTransport for RtuTransport {
    async fn connect(&mut self) -> ModbusResult<()> {
        let builder = tokio_serial::new(&self.port_name, self.baud_rate)
            .data_bits(self.data_bits)
            .stop_bits(self.stop_bits)
            .parity(self.parity)
            .timeout(self.timeout);

        let port = tokio_serial::SerialStream::open(&builder).map_err(|e| {
            ModbusError::connection(format!(
                "Failed to open serial port {}: {}",
                self.port_name, e
            ))
        })?;

        info!(
            "Opened serial port {} at {} baud (frame gap {:?})",
            self.port_name, self.baud_rate, self.frame_gap
        );
        self.port = Some(port);
        Ok(())
    }

    async fn send(&mut self, request: &[u8]) -> ModbusResult<Vec<u8>> {
        if self.port.is_none() {
            if let Err(e) = self.connect().await {
                self.stats.record_error(&e);
                return Err(e);
            }
        }

        tokio::time::sleep(self.silent_interval).await;

        self.stats.record_request(request);
        if self.packet_logging {
            log_packet("RTU", "send", request);
        }

        let port = self
            .port
            .as_mut()
            .ok_or_else(|| ModbusError::connection("Serial port not connected"))?;

        if self.stale {
            Self::drain_stale(port, self.timeout, self.frame_gap).await;
            self.stale = false;
        }

        match Self::exchange(port, request, self.timeout, self.frame_gap).await {
            Ok(response) => {
                self.stats.record_response(&response);
                if self.packet_logging {
                    log_packet("RTU", "receive", &response);
                }
                Ok(response)
            }
            Err(e) => {
                self.stats.record_error(&e);
                if matches!(e, ModbusError::Io { .. }) {
                    // Reopened on the next send
                    self.port = None;
                } else {
                    self.stale = true;
                }
                Err(e)
            }
        }
    }

    fn encode_frame(&mut self, unit_id: UnitId, pdu: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(pdu.len() + 3);
        frame.push(unit_id);
        frame.extend_from_slice(pdu);

        let crc = calculate_crc(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    fn body_offset(&self) -> usize {
        RTU_BODY_OFFSET
    }

    fn silent_interval(&self) -> Duration {
        self.silent_interval
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        if self.port.take().is_some() {
            info!("Closed serial port {}", self.port_name);
        }
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_crc_calculation() {
        let frame = [0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B];
        assert_eq!(calculate_crc(&frame[..6]), 0x0BC4);
        assert!(check_crc(&frame).is_ok());

        let corrupted = [0x01, 0x03, 0x00, 0x00, 0x00, 0x03, 0xC4, 0x0B];
        assert!(matches!(
            check_crc(&corrupted),
            Err(ModbusError::CrcMismatch { .. })
        ));
        assert!(check_crc(&[0x01, 0x03]).is_err());
    }

    #[test]
    fn test_rtu_frame_gap() {
        // 11 bits at 9600 baud is 1145µs per char
        assert_eq!(rtu_frame_gap(9600), Duration::from_micros(4007));
        assert_eq!(rtu_frame_gap(38400), Duration::from_micros(1750));
        assert_eq!(rtu_frame_gap(115200), Duration::from_micros(1750));
    }

    #[test]
    fn test_rtu_encode_frame() {
        let mut transport = RtuTransport::new("/dev/null", 9600);
        let frame = transport.encode_frame(0x01, &[0x03, 0x00, 0x00, 0x00, 0x02]);
        assert_eq!(frame, vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]);
        assert_eq!(transport.body_offset(), 1);
        assert_eq!(transport.silent_interval(), rtu_frame_gap(9600));

        let transport = transport.with_silent_interval(Duration::from_millis(20));
        assert_eq!(transport.silent_interval(), Duration::from_millis(20));
    }

    #[test]
    fn test_tcp_encode_frame_increments_transaction_id() {
        let mut transport = TcpTransport::new("127.0.0.1:502".parse().unwrap(), Duration::from_secs(1));
        let first = transport.encode_frame(0x11, &[0x04, 0x00, 0x08, 0x00, 0x01]);
        let second = transport.encode_frame(0x11, &[0x04, 0x00, 0x08, 0x00, 0x01]);

        assert_eq!(
            first,
            vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x11, 0x04, 0x00, 0x08, 0x00, 0x01]
        );
        assert_eq!(&second[..2], &[0x00, 0x02]);
        assert_eq!(first[TCP_BODY_OFFSET], 0x04);
    }

    #[tokio::test]
    async fn test_tcp_exchange_with_local_slave() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let slave = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 12];
            socket.read_exact(&mut request).await.unwrap();

            // Echo the transaction id, answer two registers
            let mut response = vec![request[0], request[1], 0x00, 0x00, 0x00, 0x07, request[6]];
            response.extend_from_slice(&[0x03, 0x04, 0x00, 0x0A, 0x01, 0x02]);
            socket.write_all(&response).await.unwrap();
        });

        let mut transport = TcpTransport::new(address, Duration::from_secs(1))
            .with_silent_interval(Duration::from_millis(1));
        transport.connect().await.unwrap();
        assert!(transport.is_connected());

        let request = transport.encode_frame(0x01, &[0x03, 0x00, 0x00, 0x00, 0x02]);
        let response = transport.send(&request).await.unwrap();
        assert_eq!(&response[TCP_BODY_OFFSET..], &[0x03, 0x04, 0x00, 0x0A, 0x01, 0x02]);

        let stats = transport.get_stats();
        assert_eq!(stats.requests_sent, 1);
        assert_eq!(stats.responses_received, 1);
        assert_eq!(stats.bytes_received, 13);

        transport.close().await.unwrap();
        assert!(!transport.is_connected());
        slave.await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_connect_failure_is_connection_error() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let mut transport = TcpTransport::new(address, Duration::from_millis(500));
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, ModbusError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_boxed_transport_delegates() {
        let mut transport: Box<dyn ModbusTransport> =
            Box::new(RtuTransport::new("/dev/null", 19200));
        assert_eq!(transport.body_offset(), RTU_BODY_OFFSET);
        let frame = transport.encode_frame(0x02, &[0x01, 0x00, 0x00, 0x00, 0x08]);
        assert!(check_crc(&frame).is_ok());
        assert!(transport.close().await.is_ok());
    }

    fn rtu_frame(unit_id: UnitId, pdu: &[u8]) -> Vec<u8> {
        RtuTransport::new("/dev/null", 9600).encode_frame(unit_id, pdu)
    }

    #[cfg(unix)]
    fn pty_transport() -> (RtuTransport, tokio_serial::SerialStream) {
        let (master, slave) = tokio_serial::SerialStream::pair().unwrap();
        let mut transport = RtuTransport::new("pty", 9600).with_silent_interval(Duration::ZERO);
        transport.timeout = Duration::from_millis(100);
        transport.port = Some(master);
        (transport, slave)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rtu_late_reply_is_discarded() {
        let (mut transport, mut slave) = pty_transport();
        let first = transport.encode_frame(0x01, &[0x03, 0x00, 0x00, 0x00, 0x01]);
        let second = transport.encode_frame(0x01, &[0x03, 0x00, 0x10, 0x00, 0x01]);

        let slave_task = tokio::spawn(async move {
            let mut request = [0u8; 8];
            slave.read_exact(&mut request).await.unwrap();
            // Answers after the master gave up
            tokio::time::sleep(Duration::from_millis(200)).await;
            slave.write_all(&rtu_frame(0x01, &[0x03, 0x02, 0xAA, 0xAA])).await.unwrap();

            slave.read_exact(&mut request).await.unwrap();
            slave.write_all(&rtu_frame(0x01, &[0x03, 0x02, 0x00, 0x07])).await.unwrap();
            request.to_vec()
        });

        let err = transport.send(&first).await.unwrap_err();
        assert!(matches!(err, ModbusError::Timeout { .. }));

        let response = transport.send(&second).await.unwrap();
        assert_eq!(response, rtu_frame(0x01, &[0x03, 0x02, 0x00, 0x07]));
        assert_eq!(slave_task.await.unwrap(), second);

        let stats = transport.get_stats();
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.responses_received, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rtu_rejects_reply_from_other_unit() {
        let (mut transport, mut slave) = pty_transport();
        let request = transport.encode_frame(0x01, &[0x03, 0x00, 0x00, 0x00, 0x01]);

        let slave_task = tokio::spawn(async move {
            let mut received = [0u8; 8];
            slave.read_exact(&mut received).await.unwrap();
            slave.write_all(&rtu_frame(0x02, &[0x03, 0x02, 0x00, 0x07])).await.unwrap();
        });

        let err = transport.send(&request).await.unwrap_err();
        assert!(matches!(err, ModbusError::Frame { .. }));
        assert!(transport.is_connected());
        slave_task.await.unwrap();
    }
}
