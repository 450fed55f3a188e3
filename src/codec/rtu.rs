// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use byteorder::{BigEndian, ByteOrder as _};
use bytes::{BufMut as _, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, ProtocolError};
use crate::frame::UnitId;

/// Bytes in front of the PDU: the unit id.
pub(crate) const HEADER_LEN: usize = 1;

const CRC_LEN: usize = 2;

// unit id + function + crc
const MIN_ADU_LEN: usize = HEADER_LEN + 1 + CRC_LEN;

/// Framing of serial line responses.
///
/// Frames are delimited by their content: a read response announces its
/// byte count in the third byte, write echoes and exceptions have a fixed
/// length. The CRC is verified and stripped from the yielded frame.
#[derive(Debug, Default)]
pub(crate) struct ClientCodec;

fn get_response_payload_len(buf: &BytesMut) -> Result<Option<usize>, ProtocolError> {
    if buf.len() < 2 {
        // incomplete frame
        return Ok(None);
    }
    let len = match buf[1] {
        0x01..=0x04 => {
            if buf.len() > 2 {
                Some(1 + usize::from(buf[2]))
            } else {
                // incomplete frame
                None
            }
        }
        0x05 | 0x06 => Some(4),
        0x81..=0x86 => Some(1),
        fn_code => {
            return Err(ProtocolError::UnsupportedFunction(fn_code));
        }
    };
    Ok(len)
}

pub(crate) fn calc_crc(data: &[u8]) -> u16 {
    let mut crc = 0xFFFF;
    for x in data {
        crc ^= u16::from(*x);
        for _ in 0..8 {
            let crc_odd = (crc & 0x0001) != 0;
            crc >>= 1;
            if crc_odd {
                crc ^= 0xA001;
            }
        }
    }
    crc << 8 | crc >> 8
}

/// CRC16 as appended to serial frames.
///
/// The returned value has its bytes swapped, so writing it big-endian puts
/// the low byte of the checksum first as required on the wire.
pub fn crc16(data: &[u8]) -> Result<u16, Error> {
    if data.is_empty() {
        return Err(Error::InvalidArgument("no data to checksum"));
    }
    Ok(calc_crc(data))
}

pub(crate) fn encode_adu(buf: &mut BytesMut, unit_id: UnitId, pdu: &[u8]) {
    let start = buf.len();
    buf.reserve(pdu.len() + 3);
    buf.put_u8(unit_id);
    buf.put_slice(pdu);
    let crc = calc_crc(&buf[start..]);
    buf.put_u16(crc);
}

impl Decoder for ClientCodec {
    type Item = Bytes;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, Error> {
        let Some(payload_len) = get_response_payload_len(buf)?
            .filter(|payload_len| buf.len() >= MIN_ADU_LEN + payload_len)
        else {
            // incomplete frame
            return Ok(None);
        };
        let adu = buf.split_to(HEADER_LEN + 1 + payload_len);
        let crc = BigEndian::read_u16(&buf.split_to(CRC_LEN));
        let expected_crc = calc_crc(&adu);
        if expected_crc != crc {
            return Err(ProtocolError::CrcMismatch {
                expected: expected_crc,
                actual: crc,
            }
            .into());
        }
        Ok(Some(adu.freeze()))
    }
}

impl Encoder<Bytes> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: Bytes, buf: &mut BytesMut) -> Result<(), Error> {
        buf.extend_from_slice(&adu);
        Ok(())
    }
}
