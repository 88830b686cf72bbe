use crate::frame::{FrameError, MAX_PDU_LENGTH, MbapHeader, Pdu, Role};
use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("could not move bytes over the transport")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// A complete MBAP frame whose PDU bytes have not been interpreted yet.
///
/// The framer only needs the header to delimit the stream; deciding whether
/// the PDU is a request or a response (and whether it is well-formed at all)
/// is the receiver's call, made later via [`RawFrame::decode_pdu`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub header: MbapHeader,
    pub pdu: BytesMut,
}

impl RawFrame {
    pub fn decode_pdu(&self, role: Role) -> Result<Frame, FrameError> {
        Ok(Frame {
            transaction_id: self.header.transaction_id,
            unit_id: self.header.unit_id,
            pdu: Pdu::decode(&self.pdu, role)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub pdu: Pdu,
}

/// Splits a TCP byte stream into complete MBAP frames and serializes outbound
/// ones. Partial input yields `Ok(None)` and leaves the buffer untouched, so
/// fragmentation across reads is invisible to the owner. Header faults are
/// hard errors: once the length field cannot be trusted there is no way to
/// resynchronize the stream, and the connection must close.
pub struct FrameCodec {}

impl Decoder for FrameCodec {
    type Item = RawFrame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RawFrame>, CodecError> {
        let Some(header_bytes) = src.first_chunk::<{ MbapHeader::SIZE }>() else {
            src.reserve(MbapHeader::SIZE - src.len());
            return Ok(None);
        };
        let header = MbapHeader::decode(header_bytes)?;
        let total = MbapHeader::SIZE + usize::from(header.pdu_length);
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        src.advance(MbapHeader::SIZE);
        let pdu = src.split_to(usize::from(header.pdu_length));
        trace!(
            message = "assembled a frame",
            transaction = header.transaction_id,
            unit = header.unit_id,
            pdu_length = header.pdu_length,
        );
        Ok(Some(RawFrame { header, pdu }))
    }
}

impl Encoder<&Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: &Frame, dst: &mut BytesMut) -> Result<(), CodecError> {
        let pdu_length = frame.pdu.encoded_length();
        if pdu_length > MAX_PDU_LENGTH {
            let length = u16::try_from(pdu_length + 1).unwrap_or(u16::MAX);
            return Err(CodecError::Frame(FrameError::BadLength(length)));
        }
        let header = MbapHeader {
            transaction_id: frame.transaction_id,
            unit_id: frame.unit_id,
            pdu_length: pdu_length as u16,
        };
        dst.reserve(MbapHeader::SIZE + pdu_length);
        header.encode(dst);
        frame.pdu.encode(dst);
        trace!(message = "sending encoded", buffer = ?dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_to_bytes(frame: &Frame) -> BytesMut {
        let mut buffer = BytesMut::new();
        FrameCodec {}.encode(frame, &mut buffer).unwrap();
        buffer
    }

    #[test]
    fn assembles_regardless_of_fragmentation() {
        let wire = encode_to_bytes(&Frame {
            transaction_id: 1,
            unit_id: 1,
            pdu: Pdu::ReadHoldingRegistersRequest { address: 0, quantity: 5 },
        });
        assert_eq!(
            &wire[..],
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x05],
        );

        let mut codec = FrameCodec {};
        let mut stream = BytesMut::new();
        for (i, byte) in wire.iter().enumerate() {
            let produced = codec.decode(&mut stream).unwrap();
            assert_eq!(produced, None, "frame appeared after {i} bytes");
            stream.extend([*byte]);
        }
        let frame = codec.decode(&mut stream).unwrap().unwrap();
        assert_eq!(frame.header.transaction_id, 1);
        assert_eq!(frame.header.unit_id, 1);
        assert_eq!(&frame.pdu[..], &wire[7..]);
        assert!(stream.is_empty());
        // No new bytes: decoding again is a no-op.
        assert_eq!(codec.decode(&mut stream).unwrap(), None);
    }

    #[test]
    fn trailing_bytes_stay_queued() {
        let mut wire = encode_to_bytes(&Frame {
            transaction_id: 7,
            unit_id: 1,
            pdu: Pdu::ReadCoilsRequest { address: 0, quantity: 1 },
        });
        wire.extend(encode_to_bytes(&Frame {
            transaction_id: 8,
            unit_id: 1,
            pdu: Pdu::ReadCoilsRequest { address: 4, quantity: 2 },
        }));
        let mut codec = FrameCodec {};
        let first = codec.decode(&mut wire).unwrap().unwrap();
        assert_eq!(first.header.transaction_id, 7);
        let second = codec.decode(&mut wire).unwrap().unwrap();
        assert_eq!(second.header.transaction_id, 8);
        assert!(wire.is_empty());
    }

    #[test]
    fn nonzero_protocol_id_is_fatal() {
        let mut stream = BytesMut::from(&[0x00, 0x01, 0x00, 0x01, 0x00, 0x06, 0x01][..]);
        let result = FrameCodec {}.decode(&mut stream);
        assert!(matches!(result, Err(CodecError::Frame(FrameError::BadProtocol(1)))));
    }

    #[test]
    fn out_of_range_length_is_fatal() {
        let mut stream = BytesMut::from(&[0x00, 0x01, 0x00, 0x00, 0x01, 0x00, 0x01][..]);
        let result = FrameCodec {}.decode(&mut stream);
        assert!(matches!(result, Err(CodecError::Frame(FrameError::BadLength(256)))));
    }

    #[test]
    fn decoded_pdu_resolves_by_role() {
        let wire = encode_to_bytes(&Frame {
            transaction_id: 2,
            unit_id: 9,
            pdu: Pdu::ReadCoilsRequest { address: 1, quantity: 3 },
        });
        let mut stream = BytesMut::from(&wire[..]);
        let raw = FrameCodec {}.decode(&mut stream).unwrap().unwrap();
        let frame = raw.decode_pdu(Role::Request).unwrap();
        assert_eq!(frame.pdu, Pdu::ReadCoilsRequest { address: 1, quantity: 3 });
        assert_eq!(frame.unit_id, 9);
    }

    #[test]
    fn oversized_pdu_is_refused_at_encode() {
        let frame = Frame {
            transaction_id: 1,
            unit_id: 1,
            // Not constructible through a conforming decode; 130 registers
            // would need a 262-octet PDU.
            pdu: Pdu::ReadHoldingRegistersResponse { values: vec![0; 130] },
        };
        let mut buffer = BytesMut::new();
        let result = FrameCodec {}.encode(&frame, &mut buffer);
        assert!(matches!(result, Err(CodecError::Frame(FrameError::BadLength(_)))));
        assert!(buffer.is_empty());
    }
}
