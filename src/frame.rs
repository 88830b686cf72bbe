use tokio_util::bytes::BytesMut;

/// Largest PDU the MBAP length field can describe (length 254 minus the unit id octet).
pub const MAX_PDU_LENGTH: usize = 253;
pub const MAX_READ_BITS: u16 = 2000;
pub const MAX_READ_WORDS: u16 = 125;
pub const MAX_WRITE_BITS: u16 = 1968;
pub const MAX_WRITE_WORDS: u16 = 123;
pub const COIL_ON: u16 = 0xFF00;
pub const COIL_OFF: u16 = 0x0000;

pub mod function {
    pub const READ_COILS: u8 = 0x01;
    pub const READ_DISCRETE_INPUTS: u8 = 0x02;
    pub const READ_HOLDING_REGISTERS: u8 = 0x03;
    pub const READ_INPUT_REGISTERS: u8 = 0x04;
    pub const WRITE_SINGLE_COIL: u8 = 0x05;
    pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
    pub const WRITE_MULTIPLE_COILS: u8 = 0x0F;
    pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
    pub const EXCEPTION_BIT: u8 = 0x80;
}
use function::*;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame ends before the PDU is complete")]
    Truncated,
    #[error("protocol identifier {0:#06x} is not Modbus/TCP")]
    BadProtocol(u16),
    #[error("MBAP length {0} is outside the legal 2..=254 range")]
    BadLength(u16),
    #[error("function code {0:#04x} is not supported")]
    UnknownFunction(u8),
    #[error("PDU carries {actual} data bytes where its layout calls for {expected}")]
    ByteCountMismatch { expected: usize, actual: usize },
    #[error("coil value {0:#06x} is neither 0x0000 nor 0xFF00")]
    InvalidCoilValue(u16),
    #[error("quantity {quantity} is outside the legal 1..={maximum} range")]
    QuantityOutOfRange { quantity: u16, maximum: u16 },
}

impl FrameError {
    /// The exception code a server reports for this fault on a fully-framed PDU.
    pub fn exception_code(&self) -> ExceptionCode {
        match self {
            FrameError::UnknownFunction(_) => ExceptionCode::IllegalFunction,
            _ => ExceptionCode::IllegalDataValue,
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    num_derive::FromPrimitive,
    num_derive::ToPrimitive,
    strum::Display,
)]
#[strum(serialize_all = "title_case")]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 1,
    IllegalDataAddress = 2,
    IllegalDataValue = 3,
    ServerDeviceFailure = 4,
    Acknowledge = 5,
    ServerDeviceBusy = 6,
    GatewayPathUnavailable = 10,
    GatewayTargetFailedToRespond = 11,
}

impl ExceptionCode {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Human description for an arbitrary wire code, including ones we have no name for.
    pub fn describe(code: u8) -> String {
        match <Self as num_traits::FromPrimitive>::from_u8(code) {
            Some(known) => format!("{known} ({code})"),
            None => format!("exception {code}"),
        }
    }
}

impl From<ExceptionCode> for u8 {
    fn from(code: ExceptionCode) -> u8 {
        code as u8
    }
}

/// The seven-octet Modbus Application Protocol header.
///
/// The protocol identifier is not stored: it is written as zero and any other
/// received value is a framing fault. The wire length field counts the unit id
/// octet plus the PDU, so `pdu_length` maps to `length - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub pdu_length: u16,
}

impl MbapHeader {
    pub const SIZE: usize = 7;

    pub fn decode(buffer: &[u8; Self::SIZE]) -> Result<MbapHeader, FrameError> {
        let transaction_id = u16::from_be_bytes([buffer[0], buffer[1]]);
        let protocol_id = u16::from_be_bytes([buffer[2], buffer[3]]);
        if protocol_id != 0 {
            return Err(FrameError::BadProtocol(protocol_id));
        }
        let length = u16::from_be_bytes([buffer[4], buffer[5]]);
        if !(2..=254).contains(&length) {
            return Err(FrameError::BadLength(length));
        }
        Ok(MbapHeader {
            transaction_id,
            unit_id: buffer[6],
            pdu_length: length - 1,
        })
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.extend(self.transaction_id.to_be_bytes());
        dst.extend([0, 0]);
        dst.extend((self.pdu_length + 1).to_be_bytes());
        dst.extend([self.unit_id]);
    }
}

/// Which side of the exchange a PDU body should be interpreted as. Function
/// code 0x01 names both a `ReadCoilsRequest` and a `ReadCoilsResponse`; only
/// the decoder's role disambiguates. Exception responses carry the role in
/// their function octet (bit 7) and decode the same either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Request,
    Response,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    ReadCoilsRequest { address: u16, quantity: u16 },
    ReadCoilsResponse { coils: Vec<bool> },
    ReadDiscreteInputsRequest { address: u16, quantity: u16 },
    ReadDiscreteInputsResponse { inputs: Vec<bool> },
    ReadHoldingRegistersRequest { address: u16, quantity: u16 },
    ReadHoldingRegistersResponse { values: Vec<u16> },
    ReadInputRegistersRequest { address: u16, quantity: u16 },
    ReadInputRegistersResponse { values: Vec<u16> },
    WriteSingleCoilRequest { address: u16, value: bool },
    WriteSingleCoilResponse { address: u16, value: bool },
    WriteSingleRegisterRequest { address: u16, value: u16 },
    WriteSingleRegisterResponse { address: u16, value: u16 },
    WriteMultipleCoilsRequest { address: u16, coils: Vec<bool> },
    WriteMultipleCoilsResponse { address: u16, quantity: u16 },
    WriteMultipleRegistersRequest { address: u16, values: Vec<u16> },
    WriteMultipleRegistersResponse { address: u16, quantity: u16 },
    Exception { function: u8, code: u8 },
}

impl Pdu {
    /// The function octet this PDU carries on the wire.
    pub fn function_code(&self) -> u8 {
        match self {
            Pdu::ReadCoilsRequest { .. } | Pdu::ReadCoilsResponse { .. } => READ_COILS,
            Pdu::ReadDiscreteInputsRequest { .. } | Pdu::ReadDiscreteInputsResponse { .. } => {
                READ_DISCRETE_INPUTS
            }
            Pdu::ReadHoldingRegistersRequest { .. } | Pdu::ReadHoldingRegistersResponse { .. } => {
                READ_HOLDING_REGISTERS
            }
            Pdu::ReadInputRegistersRequest { .. } | Pdu::ReadInputRegistersResponse { .. } => {
                READ_INPUT_REGISTERS
            }
            Pdu::WriteSingleCoilRequest { .. } | Pdu::WriteSingleCoilResponse { .. } => {
                WRITE_SINGLE_COIL
            }
            Pdu::WriteSingleRegisterRequest { .. } | Pdu::WriteSingleRegisterResponse { .. } => {
                WRITE_SINGLE_REGISTER
            }
            Pdu::WriteMultipleCoilsRequest { .. } | Pdu::WriteMultipleCoilsResponse { .. } => {
                WRITE_MULTIPLE_COILS
            }
            Pdu::WriteMultipleRegistersRequest { .. }
            | Pdu::WriteMultipleRegistersResponse { .. } => WRITE_MULTIPLE_REGISTERS,
            Pdu::Exception { function, .. } => function | EXCEPTION_BIT,
        }
    }

    pub fn encoded_length(&self) -> usize {
        match self {
            Pdu::ReadCoilsRequest { .. }
            | Pdu::ReadDiscreteInputsRequest { .. }
            | Pdu::ReadHoldingRegistersRequest { .. }
            | Pdu::ReadInputRegistersRequest { .. }
            | Pdu::WriteSingleCoilRequest { .. }
            | Pdu::WriteSingleCoilResponse { .. }
            | Pdu::WriteSingleRegisterRequest { .. }
            | Pdu::WriteSingleRegisterResponse { .. }
            | Pdu::WriteMultipleCoilsResponse { .. }
            | Pdu::WriteMultipleRegistersResponse { .. } => 5,
            Pdu::ReadCoilsResponse { coils: bits } | Pdu::ReadDiscreteInputsResponse { inputs: bits } => {
                2 + bits.len().div_ceil(8)
            }
            Pdu::ReadHoldingRegistersResponse { values }
            | Pdu::ReadInputRegistersResponse { values } => 2 + values.len() * 2,
            Pdu::WriteMultipleCoilsRequest { coils, .. } => 6 + coils.len().div_ceil(8),
            Pdu::WriteMultipleRegistersRequest { values, .. } => 6 + values.len() * 2,
            Pdu::Exception { .. } => 2,
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.extend([self.function_code()]);
        match self {
            Pdu::ReadCoilsRequest { address, quantity }
            | Pdu::ReadDiscreteInputsRequest { address, quantity }
            | Pdu::ReadHoldingRegistersRequest { address, quantity }
            | Pdu::ReadInputRegistersRequest { address, quantity } => {
                dst.extend(address.to_be_bytes());
                dst.extend(quantity.to_be_bytes());
            }
            Pdu::ReadCoilsResponse { coils: bits } | Pdu::ReadDiscreteInputsResponse { inputs: bits } => {
                let packed = pack_bits(bits);
                dst.extend([packed.len() as u8]);
                dst.extend(packed);
            }
            Pdu::ReadHoldingRegistersResponse { values }
            | Pdu::ReadInputRegistersResponse { values } => {
                dst.extend([(values.len() * 2) as u8]);
                for value in values {
                    dst.extend(value.to_be_bytes());
                }
            }
            Pdu::WriteSingleCoilRequest { address, value }
            | Pdu::WriteSingleCoilResponse { address, value } => {
                dst.extend(address.to_be_bytes());
                dst.extend(if *value { COIL_ON } else { COIL_OFF }.to_be_bytes());
            }
            Pdu::WriteSingleRegisterRequest { address, value }
            | Pdu::WriteSingleRegisterResponse { address, value } => {
                dst.extend(address.to_be_bytes());
                dst.extend(value.to_be_bytes());
            }
            Pdu::WriteMultipleCoilsRequest { address, coils } => {
                let packed = pack_bits(coils);
                dst.extend(address.to_be_bytes());
                dst.extend((coils.len() as u16).to_be_bytes());
                dst.extend([packed.len() as u8]);
                dst.extend(packed);
            }
            Pdu::WriteMultipleCoilsResponse { address, quantity }
            | Pdu::WriteMultipleRegistersResponse { address, quantity } => {
                dst.extend(address.to_be_bytes());
                dst.extend(quantity.to_be_bytes());
            }
            Pdu::WriteMultipleRegistersRequest { address, values } => {
                dst.extend(address.to_be_bytes());
                dst.extend((values.len() as u16).to_be_bytes());
                dst.extend([(values.len() * 2) as u8]);
                for value in values {
                    dst.extend(value.to_be_bytes());
                }
            }
            Pdu::Exception { function: _, code } => {
                dst.extend([*code]);
            }
        }
    }

    pub fn decode(body: &[u8], role: Role) -> Result<Pdu, FrameError> {
        let Some((&fc, data)) = body.split_first() else {
            return Err(FrameError::Truncated);
        };
        if fc & EXCEPTION_BIT != 0 {
            let &[code] = data else {
                return Err(length_fault(1, data.len()));
            };
            return Ok(Pdu::Exception {
                function: fc & !EXCEPTION_BIT,
                code,
            });
        }
        match (fc, role) {
            (READ_COILS, Role::Request) => {
                let (address, quantity) = address_quantity(data)?;
                check_quantity(quantity, MAX_READ_BITS)?;
                Ok(Pdu::ReadCoilsRequest { address, quantity })
            }
            (READ_COILS, Role::Response) => Ok(Pdu::ReadCoilsResponse {
                coils: bit_payload(data)?,
            }),
            (READ_DISCRETE_INPUTS, Role::Request) => {
                let (address, quantity) = address_quantity(data)?;
                check_quantity(quantity, MAX_READ_BITS)?;
                Ok(Pdu::ReadDiscreteInputsRequest { address, quantity })
            }
            (READ_DISCRETE_INPUTS, Role::Response) => Ok(Pdu::ReadDiscreteInputsResponse {
                inputs: bit_payload(data)?,
            }),
            (READ_HOLDING_REGISTERS, Role::Request) => {
                let (address, quantity) = address_quantity(data)?;
                check_quantity(quantity, MAX_READ_WORDS)?;
                Ok(Pdu::ReadHoldingRegistersRequest { address, quantity })
            }
            (READ_HOLDING_REGISTERS, Role::Response) => Ok(Pdu::ReadHoldingRegistersResponse {
                values: word_payload(data)?,
            }),
            (READ_INPUT_REGISTERS, Role::Request) => {
                let (address, quantity) = address_quantity(data)?;
                check_quantity(quantity, MAX_READ_WORDS)?;
                Ok(Pdu::ReadInputRegistersRequest { address, quantity })
            }
            (READ_INPUT_REGISTERS, Role::Response) => Ok(Pdu::ReadInputRegistersResponse {
                values: word_payload(data)?,
            }),
            (WRITE_SINGLE_COIL, role) => {
                let (address, raw) = address_quantity(data)?;
                let value = match raw {
                    COIL_ON => true,
                    COIL_OFF => false,
                    other => return Err(FrameError::InvalidCoilValue(other)),
                };
                Ok(match role {
                    Role::Request => Pdu::WriteSingleCoilRequest { address, value },
                    Role::Response => Pdu::WriteSingleCoilResponse { address, value },
                })
            }
            (WRITE_SINGLE_REGISTER, role) => {
                let (address, value) = address_quantity(data)?;
                Ok(match role {
                    Role::Request => Pdu::WriteSingleRegisterRequest { address, value },
                    Role::Response => Pdu::WriteSingleRegisterResponse { address, value },
                })
            }
            (WRITE_MULTIPLE_COILS, Role::Request) => {
                let (address, quantity, payload) = counted_payload(data)?;
                check_quantity(quantity, MAX_WRITE_BITS)?;
                let expected = usize::from(quantity).div_ceil(8);
                if payload.len() != expected {
                    return Err(FrameError::ByteCountMismatch {
                        expected,
                        actual: payload.len(),
                    });
                }
                Ok(Pdu::WriteMultipleCoilsRequest {
                    address,
                    coils: unpack_bits(payload, quantity),
                })
            }
            (WRITE_MULTIPLE_COILS, Role::Response) => {
                let (address, quantity) = address_quantity(data)?;
                check_quantity(quantity, MAX_WRITE_BITS)?;
                Ok(Pdu::WriteMultipleCoilsResponse { address, quantity })
            }
            (WRITE_MULTIPLE_REGISTERS, Role::Request) => {
                let (address, quantity, payload) = counted_payload(data)?;
                check_quantity(quantity, MAX_WRITE_WORDS)?;
                let expected = usize::from(quantity) * 2;
                if payload.len() != expected {
                    return Err(FrameError::ByteCountMismatch {
                        expected,
                        actual: payload.len(),
                    });
                }
                Ok(Pdu::WriteMultipleRegistersRequest {
                    address,
                    values: words(payload),
                })
            }
            (WRITE_MULTIPLE_REGISTERS, Role::Response) => {
                let (address, quantity) = address_quantity(data)?;
                check_quantity(quantity, MAX_WRITE_WORDS)?;
                Ok(Pdu::WriteMultipleRegistersResponse { address, quantity })
            }
            (other, _) => Err(FrameError::UnknownFunction(other)),
        }
    }
}

/// Pack a bit sequence LSB-first: bit `i` lands in octet `i / 8` at position
/// `i % 8`. Trailing positions of the final octet stay zero.
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

/// Inverse of [`pack_bits`]. The caller supplies `count` because the wire
/// only carries whole octets; excess bits of the final octet are discarded.
pub fn unpack_bits(bytes: &[u8], count: u16) -> Vec<bool> {
    (0..usize::from(count))
        .map(|i| bytes[i / 8] & (1 << (i % 8)) != 0)
        .collect()
}

fn length_fault(expected: usize, actual: usize) -> FrameError {
    if actual < expected {
        FrameError::Truncated
    } else {
        FrameError::ByteCountMismatch { expected, actual }
    }
}

fn address_quantity(data: &[u8]) -> Result<(u16, u16), FrameError> {
    let [a1, a2, b1, b2] = data else {
        return Err(length_fault(4, data.len()));
    };
    Ok((
        u16::from_be_bytes([*a1, *a2]),
        u16::from_be_bytes([*b1, *b2]),
    ))
}

fn check_quantity(quantity: u16, maximum: u16) -> Result<(), FrameError> {
    if quantity == 0 || quantity > maximum {
        return Err(FrameError::QuantityOutOfRange { quantity, maximum });
    }
    Ok(())
}

/// Splits `address, quantity, byte_count, payload[byte_count]` off a
/// write-multiple request body, checking the declared byte count against the
/// bytes actually framed.
fn counted_payload(data: &[u8]) -> Result<(u16, u16, &[u8]), FrameError> {
    let Some(([a1, a2, q1, q2, byte_count], payload)) = data.split_first_chunk::<5>() else {
        return Err(FrameError::Truncated);
    };
    if payload.len() != usize::from(*byte_count) {
        return Err(length_fault(usize::from(*byte_count), payload.len()));
    }
    Ok((
        u16::from_be_bytes([*a1, *a2]),
        u16::from_be_bytes([*q1, *q2]),
        payload,
    ))
}

fn bit_payload(data: &[u8]) -> Result<Vec<bool>, FrameError> {
    let Some((&byte_count, payload)) = data.split_first() else {
        return Err(FrameError::Truncated);
    };
    if payload.len() != usize::from(byte_count) {
        return Err(length_fault(usize::from(byte_count), payload.len()));
    }
    Ok(unpack_bits(payload, (payload.len() * 8) as u16))
}

fn word_payload(data: &[u8]) -> Result<Vec<u16>, FrameError> {
    let Some((&byte_count, payload)) = data.split_first() else {
        return Err(FrameError::Truncated);
    };
    if payload.len() != usize::from(byte_count) {
        return Err(length_fault(usize::from(byte_count), payload.len()));
    }
    if byte_count % 2 != 0 {
        return Err(FrameError::ByteCountMismatch {
            expected: usize::from(byte_count) + 1,
            actual: usize::from(byte_count),
        });
    }
    Ok(words(payload))
}

fn words(payload: &[u8]) -> Vec<u16> {
    payload
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(pdu: Pdu, role: Role) {
        let mut buffer = BytesMut::new();
        pdu.encode(&mut buffer);
        assert_eq!(buffer.len(), pdu.encoded_length());
        assert_eq!(Pdu::decode(&buffer, role), Ok(pdu));
    }

    #[test]
    fn request_roundtrips() {
        roundtrip(Pdu::ReadCoilsRequest { address: 19, quantity: 37 }, Role::Request);
        roundtrip(Pdu::ReadDiscreteInputsRequest { address: 0, quantity: 2000 }, Role::Request);
        roundtrip(Pdu::ReadHoldingRegistersRequest { address: 107, quantity: 125 }, Role::Request);
        roundtrip(Pdu::ReadInputRegistersRequest { address: 8, quantity: 1 }, Role::Request);
        roundtrip(Pdu::WriteSingleCoilRequest { address: 172, value: true }, Role::Request);
        roundtrip(Pdu::WriteSingleCoilRequest { address: 172, value: false }, Role::Request);
        roundtrip(Pdu::WriteSingleRegisterRequest { address: 1, value: 0xABCD }, Role::Request);
        roundtrip(
            Pdu::WriteMultipleCoilsRequest {
                address: 19,
                coils: vec![true, false, true, true, false, false, true, true, true, false],
            },
            Role::Request,
        );
        roundtrip(
            Pdu::WriteMultipleRegistersRequest { address: 1, values: vec![0x000A, 0x0102] },
            Role::Request,
        );
    }

    #[test]
    fn response_roundtrips() {
        roundtrip(
            Pdu::ReadCoilsResponse { coils: vec![true, false, false, true, false, false, false, false] },
            Role::Response,
        );
        roundtrip(
            Pdu::ReadHoldingRegistersResponse { values: vec![100, 200, 300, 400, 500] },
            Role::Response,
        );
        roundtrip(Pdu::ReadInputRegistersResponse { values: vec![0xFFFF] }, Role::Response);
        roundtrip(Pdu::WriteSingleCoilResponse { address: 3, value: true }, Role::Response);
        roundtrip(Pdu::WriteSingleRegisterResponse { address: 3, value: 17 }, Role::Response);
        roundtrip(Pdu::WriteMultipleCoilsResponse { address: 0, quantity: 10 }, Role::Response);
        roundtrip(Pdu::WriteMultipleRegistersResponse { address: 2, quantity: 2 }, Role::Response);
        roundtrip(Pdu::Exception { function: READ_HOLDING_REGISTERS, code: 2 }, Role::Response);
    }

    #[test]
    fn single_coil_bit_packs_into_lsb() {
        let mut buffer = BytesMut::new();
        Pdu::ReadCoilsResponse { coils: vec![true] }.encode(&mut buffer);
        assert_eq!(&buffer[..], &[0x01, 0x01, 0x01]);
    }

    #[test]
    fn read_bits_response_reports_all_framed_bits() {
        // The wire carries no quantity; a lone 0x01 octet means eight bits.
        let decoded = Pdu::decode(&[0x01, 0x01, 0x01], Role::Response).unwrap();
        assert_eq!(
            decoded,
            Pdu::ReadCoilsResponse {
                coils: vec![true, false, false, false, false, false, false, false]
            }
        );
    }

    #[test]
    fn exception_decodes_in_both_roles() {
        for role in [Role::Request, Role::Response] {
            assert_eq!(
                Pdu::decode(&[0x83, 0x02], role),
                Ok(Pdu::Exception { function: READ_HOLDING_REGISTERS, code: 2 }),
            );
        }
    }

    #[test]
    fn exception_reencodes_with_high_bit() {
        let mut buffer = BytesMut::new();
        Pdu::Exception { function: WRITE_SINGLE_COIL, code: 3 }.encode(&mut buffer);
        assert_eq!(&buffer[..], &[0x85, 0x03]);
    }

    #[test]
    fn quantity_limits() {
        let template = |quantity: u16| {
            let mut body = vec![0x01, 0x00, 0x00];
            body.extend(quantity.to_be_bytes());
            body
        };
        assert!(Pdu::decode(&template(2000), Role::Request).is_ok());
        assert_eq!(
            Pdu::decode(&template(2001), Role::Request),
            Err(FrameError::QuantityOutOfRange { quantity: 2001, maximum: 2000 }),
        );
        assert_eq!(
            Pdu::decode(&template(0), Role::Request),
            Err(FrameError::QuantityOutOfRange { quantity: 0, maximum: 2000 }),
        );
        assert_eq!(
            Pdu::decode(&[0x03, 0x00, 0x00, 0x00, 126], Role::Request),
            Err(FrameError::QuantityOutOfRange { quantity: 126, maximum: 125 }),
        );
    }

    #[test]
    fn write_multiple_coils_limits() {
        let request = |quantity: u16| {
            let mut body = vec![0x0F, 0x00, 0x00];
            body.extend(quantity.to_be_bytes());
            let byte_count = usize::from(quantity).div_ceil(8);
            body.push(byte_count as u8);
            body.extend(std::iter::repeat_n(0u8, byte_count));
            body
        };
        // 1968 coils is exactly 246 payload octets.
        assert_eq!(request(1968).len(), 6 + 246);
        assert!(Pdu::decode(&request(1968), Role::Request).is_ok());
        assert_eq!(
            Pdu::decode(&request(1969), Role::Request),
            Err(FrameError::QuantityOutOfRange { quantity: 1969, maximum: 1968 }),
        );
    }

    #[test]
    fn write_multiple_byte_count_must_match_quantity() {
        // 10 coils declared, but byte count says 3 octets.
        let body = [0x0F, 0x00, 0x00, 0x00, 0x0A, 0x03, 0x00, 0x00, 0x00];
        assert_eq!(
            Pdu::decode(&body, Role::Request),
            Err(FrameError::ByteCountMismatch { expected: 2, actual: 3 }),
        );
        // 2 registers declared, byte count 3.
        let body = [0x10, 0x00, 0x00, 0x00, 0x02, 0x03, 0x00, 0x00, 0x00];
        assert_eq!(
            Pdu::decode(&body, Role::Request),
            Err(FrameError::ByteCountMismatch { expected: 4, actual: 3 }),
        );
    }

    #[test]
    fn invalid_coil_value_is_rejected() {
        assert_eq!(
            Pdu::decode(&[0x05, 0x00, 0x00, 0x00, 0x01], Role::Request),
            Err(FrameError::InvalidCoilValue(0x0001)),
        );
    }

    #[test]
    fn truncated_and_oversized_bodies() {
        assert_eq!(Pdu::decode(&[], Role::Request), Err(FrameError::Truncated));
        assert_eq!(Pdu::decode(&[0x03, 0x00], Role::Request), Err(FrameError::Truncated));
        assert_eq!(
            Pdu::decode(&[0x03, 0x00, 0x00, 0x00, 0x01, 0xFF], Role::Request),
            Err(FrameError::ByteCountMismatch { expected: 4, actual: 5 }),
        );
    }

    #[test]
    fn unknown_function_code() {
        assert_eq!(
            Pdu::decode(&[0x2B, 0x0E, 0x01, 0x00], Role::Request),
            Err(FrameError::UnknownFunction(0x2B)),
        );
    }

    #[test]
    fn header_roundtrip_and_faults() {
        let header = MbapHeader { transaction_id: 0x0102, unit_id: 0x11, pdu_length: 5 };
        let mut buffer = BytesMut::new();
        header.encode(&mut buffer);
        assert_eq!(&buffer[..], &[0x01, 0x02, 0x00, 0x00, 0x00, 0x06, 0x11]);
        assert_eq!(MbapHeader::decode(&buffer[..].try_into().unwrap()), Ok(header));

        assert_eq!(
            MbapHeader::decode(&[0, 1, 0, 7, 0, 6, 1]),
            Err(FrameError::BadProtocol(7)),
        );
        assert_eq!(
            MbapHeader::decode(&[0, 1, 0, 0, 0, 1, 1]),
            Err(FrameError::BadLength(1)),
        );
        assert_eq!(
            MbapHeader::decode(&[0, 1, 0, 0, 0x01, 0x00, 1]),
            Err(FrameError::BadLength(256)),
        );
    }

    #[test]
    fn largest_register_read_response() {
        let pdu = Pdu::ReadHoldingRegistersResponse { values: vec![0xA5A5; 125] };
        // 252 payload octets plus function code and byte count.
        assert_eq!(pdu.encoded_length(), 254 - 2);
        let mut buffer = BytesMut::new();
        pdu.encode(&mut buffer);
        assert_eq!(buffer[1], 250);
        assert_eq!(Pdu::decode(&buffer, Role::Response), Ok(pdu));
    }
}
