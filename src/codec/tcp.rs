// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use byteorder::{BigEndian, ByteOrder as _};
use bytes::{BufMut as _, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, ProtocolError};
use crate::frame::UnitId;

use super::{u16_len, MAX_PDU_SIZE};

/// MBAP header: transaction id, protocol id, length and unit id.
pub(crate) const HEADER_LEN: usize = 7;

/// Port of a _Modbus_ TCP server unless configured otherwise.
pub const DEFAULT_PORT: u16 = 502;

const PROTOCOL_ID: u16 = 0x0000;

// Only one request is in flight per connection.
const TRANSACTION_ID: u16 = 0x0000;

const MAX_FRAME_LEN: usize = HEADER_LEN + MAX_PDU_SIZE;

/// Framing of MBAP responses.
///
/// Waits for the header, then for the number of bytes the length field
/// announces. Yields the complete ADU including the header.
#[derive(Debug, Default)]
pub(crate) struct ClientCodec;

pub(crate) fn encode_adu(buf: &mut BytesMut, unit_id: UnitId, pdu: &[u8]) {
    buf.reserve(HEADER_LEN + pdu.len());
    buf.put_u16(TRANSACTION_ID);
    buf.put_u16(PROTOCOL_ID);
    // len = bytes of PDU + one byte (unit ID)
    buf.put_u16(u16_len(pdu.len() + 1));
    buf.put_u8(unit_id);
    buf.put_slice(pdu);
}

impl Decoder for ClientCodec {
    type Item = Bytes;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, Error> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let protocol_id = BigEndian::read_u16(&buf[2..4]);
        if protocol_id != PROTOCOL_ID {
            return Err(ProtocolError::InvalidHeader("protocol id is not 0").into());
        }

        // len = bytes of PDU + one byte (unit ID)
        let len = usize::from(BigEndian::read_u16(&buf[4..6]));
        if len == 0 {
            return Err(ProtocolError::InvalidHeader("length is 0").into());
        }
        let frame_len = HEADER_LEN + len - 1;
        if frame_len > MAX_FRAME_LEN {
            return Err(ProtocolError::InvalidHeader("length exceeds maximum frame size").into());
        }

        if buf.len() < frame_len {
            buf.reserve(frame_len - buf.len());
            return Ok(None);
        }
        Ok(Some(buf.split_to(frame_len).freeze()))
    }
}

impl Encoder<Bytes> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: Bytes, buf: &mut BytesMut) -> Result<(), Error> {
        buf.extend_from_slice(&adu);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_header_fragment() {
        let mut codec = ClientCodec;
        let mut buf = BytesMut::from(&[0x00, 0x11, 0x00, 0x00, 0x00, 0x00][..]);
        let res = codec.decode(&mut buf).unwrap();
        assert!(res.is_none());
        assert_eq!(buf.len(), 6);
    }

    #[test]
    fn decode_partly_received_message() {
        let mut codec = ClientCodec;
        let mut buf = BytesMut::from(
            &[
                0x00, // transaction id HI
                0x00, // transaction id LO
                0x00, // protocol id HI
                0x00, // protocol id LO
                0x00, // length HI
                0x07, // length LO
                0x01, // unit id
                0x03, // function code
                0x04, // byte count
                0x00, //
            ][..],
        );
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 10);

        buf.extend_from_slice(&[0x01, 0x00, 0x02]);
        let adu = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(adu.len(), 13);
        assert_eq!(&adu[7..], &[0x03, 0x04, 0x00, 0x01, 0x00, 0x02]);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_exception_message() {
        let mut codec = ClientCodec;
        let mut buf = BytesMut::from(
            &[
                0x00, 0x00, // transaction id
                0x00, 0x00, // protocol id
                0x00, 0x03, // length
                0x66, // unit id
                0x82, // exception = 0x80 + 0x02
                0x03, //
                0x00, // trailing byte of the next frame
            ][..],
        );
        let adu = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&adu[6..], &[0x66, 0x82, 0x03]);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn decode_with_invalid_protocol_id() {
        let mut codec = ClientCodec;
        let mut buf = BytesMut::from(&[0x00, 0x00, 0x33, 0x12, 0x00, 0x03, 0x01, 0x82, 0x03][..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::InvalidHeader(_))
        ));
    }

    #[test]
    fn decode_with_invalid_length() {
        let mut codec = ClientCodec;
        let mut buf = BytesMut::from(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01][..]);
        assert!(codec.decode(&mut buf).is_err());

        let mut buf = BytesMut::from(&[0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01][..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn encode_read_request() {
        let mut buf = BytesMut::new();
        encode_adu(&mut buf, 0x01, &[0x03, 0x00, 0x00, 0x00, 0x0A]);
        assert_eq!(
            buf,
            Bytes::from_static(&[
                0x00, 0x00, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x0A
            ])
        );
    }
}
