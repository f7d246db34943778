//! # Frame Codec
//!
//! Turns operation descriptors into request frames and classifies response
//! frames. Framing (MBAP header, CRC) is delegated to the transport; the codec
//! only builds PDUs and reads the bytes after the transport's body offset.
//!
//! Response classification compares the function code byte of the request
//! and the response:
//!
//! | Response byte       | Outcome                          |
//! |---------------------|----------------------------------|
//! | same as request     | [`DecodeOutcome::Values`]        |
//! | request + 0x80      | [`DecodeOutcome::Exception`]     |
//! | anything else       | [`DecodeOutcome::NoMatch`]       |
//!
//! Register values are rendered as five-digit zero-padded decimals and coil
//! or input bits as `"0"`/`"1"`.

use crate::aggregator::DecodedValue;
use crate::error::{ModbusError, ModbusResult};
use crate::operation::{ReadOperation, WriteOperation};
use crate::protocol::{
    data_utils, EntityType, ModbusFunction, UnitId, EXCEPTION_OFFSET, UNSUPPORTED_FUNCTION,
};
use crate::transport::ModbusTransport;

/// Value written to a coil to switch it on
const COIL_ON: u16 = 0xFF00;
const COIL_OFF: u16 = 0x0000;

/// Classification of one response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// Normal reply; empty when the function code carries no readable data
    Values(Vec<DecodedValue>),
    /// The slave answered with an exception response
    Exception { function: u8, code: u8 },
    /// Unrelated or truncated response
    NoMatch,
}

/// Read request PDU: function code, start address, quantity
pub fn read_pdu(function_code: u8, address: u16, count: u16) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(5);
    pdu.push(function_code);
    pdu.extend_from_slice(&address.to_be_bytes());
    pdu.extend_from_slice(&count.to_be_bytes());
    pdu
}

/// Encode the read request of `op` and store it in the descriptor
pub fn encode_read<T>(op: &mut ReadOperation, transport: &mut T) -> ModbusResult<()>
where
    T: ModbusTransport + ?Sized,
{
    let function_code = op.function_code();
    if function_code == UNSUPPORTED_FUNCTION {
        return Err(ModbusError::configuration(format!(
            "Operation '{}': entity '{}' has no read function",
            op.id(),
            op.entity()
        )));
    }

    let pdu = read_pdu(function_code, op.address(), op.count());
    let frame = transport.encode_frame(op.unit_id(), &pdu);
    op.set_request(frame);
    Ok(())
}

/// Build the write PDU for `op` carrying `value`
///
/// - coil: Write Single Coil, on for any non-zero value
/// - holding register: Write Single Register, `value` must be an integer in
///   `0..=65535`
/// - holding register with `is_float`: Write Multiple Registers, two
///   registers holding the big-endian IEEE 754 bits of `value`
pub fn write_pdu(op: &WriteOperation, value: f32) -> ModbusResult<Vec<u8>> {
    let location = op.location()?;
    let address = location.address();

    let mut pdu = Vec::with_capacity(10);
    match location.entity_type() {
        Some(EntityType::CoilStatus) => {
            let state = if value != 0.0 { COIL_ON } else { COIL_OFF };
            pdu.push(ModbusFunction::WriteSingleCoil.to_u8());
            pdu.extend_from_slice(&address.to_be_bytes());
            pdu.extend_from_slice(&state.to_be_bytes());
        }
        Some(EntityType::HoldingRegister) if op.is_float => {
            let registers = data_utils::f32_to_registers(value);
            let data = data_utils::registers_to_bytes(&registers);
            pdu.push(ModbusFunction::WriteMultipleRegisters.to_u8());
            pdu.extend_from_slice(&address.to_be_bytes());
            pdu.extend_from_slice(&(registers.len() as u16).to_be_bytes());
            pdu.push(data.len() as u8);
            pdu.extend_from_slice(&data);
        }
        Some(EntityType::HoldingRegister) => {
            if !value.is_finite() || value.fract() != 0.0 || value < 0.0 || value > u16::MAX as f32 {
                return Err(ModbusError::invalid_data(format!(
                    "Value {} for {} is not a 16-bit unsigned integer",
                    value, op.start_address
                )));
            }
            pdu.push(ModbusFunction::WriteSingleRegister.to_u8());
            pdu.extend_from_slice(&address.to_be_bytes());
            pdu.extend_from_slice(&(value as u16).to_be_bytes());
        }
        _ => {
            return Err(ModbusError::configuration(format!(
                "StartAddress '{}' is not writable",
                op.start_address
            )))
        }
    }

    Ok(pdu)
}

/// Encode a complete write frame for `unit_id`
pub fn encode_write<T>(
    op: &WriteOperation,
    unit_id: UnitId,
    value: f32,
    transport: &mut T,
) -> ModbusResult<Vec<u8>>
where
    T: ModbusTransport + ?Sized,
{
    let pdu = write_pdu(op, value)?;
    Ok(transport.encode_frame(unit_id, &pdu))
}

/// Classify `response` against `request` and decode any values
///
/// `body_offset` is the index of the function code in both frames. Never
/// panics on short input; a response too short for the byte count it
/// announces is reported as [`DecodeOutcome::NoMatch`].
pub fn decode(
    op: &ReadOperation,
    request: &[u8],
    response: &[u8],
    body_offset: usize,
) -> DecodeOutcome {
    let (Some(&requested), Some(&received)) = (request.get(body_offset), response.get(body_offset))
    else {
        return DecodeOutcome::NoMatch;
    };

    if requested == received {
        return decode_values(op, response, body_offset);
    }

    if requested as u16 + EXCEPTION_OFFSET as u16 == received as u16 {
        return match response.get(body_offset + 1) {
            Some(&code) => DecodeOutcome::Exception {
                function: requested,
                code,
            },
            None => DecodeOutcome::NoMatch,
        };
    }

    DecodeOutcome::NoMatch
}

fn decode_values(op: &ReadOperation, response: &[u8], offset: usize) -> DecodeOutcome {
    let function = response[offset];
    let Some(&byte_count) = response.get(offset + 1) else {
        return DecodeOutcome::NoMatch;
    };
    let byte_count = byte_count as usize;
    let data = &response[offset + 2..];

    let values = match ModbusFunction::from_u8(function) {
        Ok(f) if f.is_bit_function() => {
            let count = (byte_count * 8).min(op.count() as usize);
            if data.len() < (count + 7) / 8 {
                return DecodeOutcome::NoMatch;
            }
            (0..count)
                .map(|i| {
                    let bit = (data[i / 8] >> (i % 8)) & 0b1;
                    DecodedValue::new(op.display_name(), op.address_label(i as u32), bit.to_string())
                })
                .collect()
        }
        Ok(f) if f.is_read_function() => {
            // Words are taken at every even offset below the byte count
            let needed = (byte_count + 1) / 2 * 2;
            if data.len() < needed {
                return DecodeOutcome::NoMatch;
            }
            (0..byte_count)
                .step_by(2)
                .map(|i| {
                    let word = data[i] as u16 * 0x100 + data[i + 1] as u16;
                    DecodedValue::new(
                        op.display_name(),
                        op.address_label((i / 2) as u32),
                        format!("{:05}", word),
                    )
                })
                .collect()
        }
        _ => Vec::new(),
    };

    DecodeOutcome::Values(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::ReadOperationConfig;
    use crate::transport::{RtuTransport, TcpTransport, TCP_BODY_OFFSET};
    use std::time::Duration;

    fn op(start_address: &str, count: u16) -> ReadOperation {
        let config = ReadOperationConfig::new(start_address, count, "Meter");
        ReadOperation::from_config("op", &config, 1).unwrap()
    }

    /// Request/response in the `[unit, pdu...]` layout, body offset 1
    fn request_for(op: &ReadOperation) -> Vec<u8> {
        let mut frame = vec![op.unit_id()];
        frame.extend(read_pdu(op.function_code(), op.address(), op.count()));
        frame
    }

    fn labels(outcome: &DecodeOutcome) -> Vec<String> {
        match outcome {
            DecodeOutcome::Values(values) => values.iter().map(|v| v.address_label.clone()).collect(),
            other => panic!("expected values, got {:?}", other),
        }
    }

    fn texts(outcome: &DecodeOutcome) -> Vec<String> {
        match outcome {
            DecodeOutcome::Values(values) => values.iter().map(|v| v.value_text.clone()).collect(),
            other => panic!("expected values, got {:?}", other),
        }
    }

    #[test]
    fn test_holding_registers_six_digit_address() {
        let op = op("400001", 2);
        let request = request_for(&op);
        let response = [0x01, 0x03, 0x04, 0x00, 0x2A, 0x30, 0x39];

        let outcome = decode(&op, &request, &response, 1);
        assert_eq!(labels(&outcome), vec!["400001", "400002"]);
        assert_eq!(texts(&outcome), vec!["00042", "12345"]);
    }

    #[test]
    fn test_coils_capped_at_count() {
        let op = op("00001", 3);
        let request = request_for(&op);
        let response = [0x01, 0x01, 0x01, 0b1111_1101];

        let outcome = decode(&op, &request, &response, 1);
        assert_eq!(labels(&outcome), vec!["00001", "00002", "00003"]);
        assert_eq!(texts(&outcome), vec!["1", "0", "1"]);
    }

    #[test]
    fn test_bits_span_multiple_bytes() {
        let op = op("10017", 10);
        let request = request_for(&op);
        let response = [0x01, 0x02, 0x02, 0x80, 0x02];

        let outcome = decode(&op, &request, &response, 1);
        assert_eq!(labels(&outcome).first().unwrap(), "10017");
        assert_eq!(labels(&outcome).last().unwrap(), "10026");
        assert_eq!(
            texts(&outcome),
            vec!["0", "0", "0", "0", "0", "0", "0", "1", "0", "1"]
        );
    }

    #[test]
    fn test_register_words_follow_byte_count_not_count() {
        // Slave reports more bytes than were requested
        let op = op("30001", 1);
        let request = request_for(&op);
        let response = [0x01, 0x04, 0x04, 0x00, 0x01, 0xFF, 0xFF];

        let outcome = decode(&op, &request, &response, 1);
        assert_eq!(labels(&outcome), vec!["30001", "30002"]);
        assert_eq!(texts(&outcome), vec!["00001", "65535"]);
    }

    #[test]
    fn test_exception_response() {
        let op = op("400001", 2);
        let request = request_for(&op);
        let response = [0x01, 0x83, 0x02];

        assert_eq!(
            decode(&op, &request, &response, 1),
            DecodeOutcome::Exception {
                function: 0x03,
                code: 0x02
            }
        );
    }

    #[test]
    fn test_mismatch_and_truncation() {
        let op = op("400001", 2);
        let request = request_for(&op);

        assert_eq!(decode(&op, &request, &[0x01, 0x04, 0x02, 0x00, 0x01], 1), DecodeOutcome::NoMatch);
        assert_eq!(decode(&op, &request, &[], 1), DecodeOutcome::NoMatch);
        assert_eq!(decode(&op, &request, &[0x01, 0x03], 1), DecodeOutcome::NoMatch);
        assert_eq!(decode(&op, &request, &[0x01, 0x03, 0x04, 0x00, 0x01], 1), DecodeOutcome::NoMatch);
        assert_eq!(decode(&op, &request, &[0x01, 0x83], 1), DecodeOutcome::NoMatch);
        assert_eq!(decode(&op, &[], &[0x01, 0x03, 0x00], 1), DecodeOutcome::NoMatch);

        let coils = self::op("00001", 16);
        let request = request_for(&coils);
        assert_eq!(decode(&coils, &request, &[0x01, 0x01, 0x02, 0xFF], 1), DecodeOutcome::NoMatch);
    }

    #[test]
    fn test_odd_register_byte_count() {
        let op = op("40001", 2);
        let request = request_for(&op);
        let response = [0x01, 0x03, 0x03, 0x00, 0x07, 0x01, 0x00];

        let outcome = decode(&op, &request, &response, 1);
        assert_eq!(texts(&outcome), vec!["00007", "00256"]);
    }

    #[test]
    fn test_encode_read_uses_transport_framing() {
        let mut transport = TcpTransport::new("127.0.0.1:502".parse().unwrap(), Duration::from_secs(1));
        let mut op = op("400010", 4);
        encode_read(&mut op, &mut transport).unwrap();

        let request = op.request();
        assert_eq!(op.request_len(), 12);
        assert_eq!(&request[TCP_BODY_OFFSET..], &[0x03, 0x00, 0x09, 0x00, 0x04]);

        let response = [0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x63];
        let outcome = decode(&op, request, &response, TCP_BODY_OFFSET);
        assert_eq!(labels(&outcome), vec!["400010"]);
        assert_eq!(texts(&outcome), vec!["00099"]);
    }

    #[test]
    fn test_write_coil() {
        let on = WriteOperation::new("hw", "00005", 1.0);
        assert_eq!(write_pdu(&on, 1.0).unwrap(), vec![0x05, 0x00, 0x04, 0xFF, 0x00]);
        assert_eq!(write_pdu(&on, 0.0).unwrap(), vec![0x05, 0x00, 0x04, 0x00, 0x00]);
    }

    #[test]
    fn test_write_single_register() {
        let op = WriteOperation::new("hw", "40002", 0.0);
        assert_eq!(write_pdu(&op, 4660.0).unwrap(), vec![0x06, 0x00, 0x01, 0x12, 0x34]);
        assert!(write_pdu(&op, 1.5).is_err());
        assert!(write_pdu(&op, -1.0).is_err());
        assert!(write_pdu(&op, 65536.0).is_err());
    }

    #[test]
    fn test_write_float_register_pair() {
        let op = WriteOperation::new("hw", "400001", 0.0).with_float(true);
        assert_eq!(
            write_pdu(&op, 1.0).unwrap(),
            vec![0x10, 0x00, 0x00, 0x00, 0x02, 0x04, 0x3F, 0x80, 0x00, 0x00]
        );
    }

    #[test]
    fn test_write_rejects_read_only_entities() {
        for address in ["10001", "30001", "90001"] {
            let op = WriteOperation::new("hw", address, 1.0);
            assert!(write_pdu(&op, 1.0).unwrap_err().is_configuration_error());
        }
    }

    #[test]
    fn test_encode_write_rtu_frame() {
        let mut transport = RtuTransport::new("/dev/null", 9600);
        let op = WriteOperation::new("hw", "00001", 1.0);
        let frame = encode_write(&op, 0x11, 1.0, &mut transport).unwrap();
        assert_eq!(&frame[..6], &[0x11, 0x05, 0x00, 0x00, 0xFF, 0x00]);
        assert!(crate::transport::check_crc(&frame).is_ok());
    }
}
