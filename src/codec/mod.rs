// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Request encoding and response decoding for both transports.
//!
//! Everything in here is pure: functions take bytes or configuration and
//! return bytes or decoded fields without touching any I/O.

use byteorder::{BigEndian, ByteOrder as _};
use bytes::{BufMut as _, Bytes, BytesMut};

use crate::{
    config::ReadOperation,
    error::{Error, ProtocolError},
    frame::{Address, Coil, FieldKey, FieldValue, Fields, FunctionCode, TransportKind, UnitId, Word},
};

pub(crate) mod rtu;
pub(crate) mod tcp;

pub use self::rtu::crc16;

/// Maximum request/response PDU size.
///
/// As defined by the spec for both RTU and TCP.
pub const MAX_PDU_SIZE: usize = 253;

/// Upper bound for the quantity of a single coil/discrete input read.
pub const MAX_BITS_PER_READ: u16 = 2000;

/// Upper bound for the quantity of a single register read.
pub const MAX_REGISTERS_PER_READ: u16 = 125;

#[allow(clippy::cast_possible_truncation)]
fn u16_len(len: usize) -> u16 {
    // This type conversion should always be safe, because the
    // possible values are limited by the protocol.
    debug_assert!(len <= u16::MAX.into());
    len as u16
}

/// Converts a 1-based configured address into a 0-based protocol address.
fn protocol_address(address: Address) -> Address {
    address.saturating_sub(1)
}

fn bool_to_coil(state: bool) -> u16 {
    if state {
        0xFF00
    } else {
        0x0000
    }
}

fn decode_packed_coils(bytes: &[u8], count: usize) -> Vec<Coil> {
    let mut res = Vec::with_capacity(count);
    for i in 0..count {
        res.push((bytes[i / 8] >> (i % 8)) & 0b1 > 0);
    }
    res
}

fn encode_adu(kind: TransportKind, unit_id: UnitId, pdu: &[u8]) -> Bytes {
    let mut buf = BytesMut::new();
    match kind {
        TransportKind::Tcp => tcp::encode_adu(&mut buf, unit_id, pdu),
        TransportKind::Serial => rtu::encode_adu(&mut buf, unit_id, pdu),
    }
    buf.freeze()
}

/// Builds the complete request frame for a configured read.
///
/// TCP frames are 12 bytes long (MBAP header + PDU), serial frames
/// 8 bytes (unit id + PDU + CRC).
#[must_use]
pub fn encode_read(operation: &ReadOperation, kind: TransportKind) -> Bytes {
    let mut pdu = BytesMut::with_capacity(5);
    pdu.put_u8(operation.function.value());
    pdu.put_u16(protocol_address(operation.start_address));
    pdu.put_u16(operation.quantity);
    encode_adu(kind, operation.unit_id, &pdu)
}

/// Builds the complete request frame for a single coil or register write.
///
/// `address` is 1-based. For coils every non-zero `value` switches the coil on.
pub fn encode_write(
    unit_id: UnitId,
    function: FunctionCode,
    address: Address,
    value: Word,
    kind: TransportKind,
) -> Result<Bytes, Error> {
    if !function.is_write() {
        return Err(Error::InvalidArgument("not a write function code"));
    }
    if address == 0 {
        return Err(Error::InvalidArgument("addresses are 1-based"));
    }
    let mut pdu = BytesMut::with_capacity(5);
    pdu.put_u8(function.value());
    pdu.put_u16(protocol_address(address));
    match function {
        FunctionCode::WriteSingleCoil => pdu.put_u16(bool_to_coil(value != 0)),
        _ => pdu.put_u16(value),
    }
    Ok(encode_adu(kind, unit_id, &pdu))
}

/// Decodes the data of a read response into keyed fields.
///
/// `adu` is the whole response frame as delivered by the transport. Bit reads
/// yield at most `operation.quantity` fields, because the last data byte may
/// be padded.
pub fn decode_response(
    adu: &[u8],
    operation: &ReadOperation,
    kind: TransportKind,
) -> Result<Fields, ProtocolError> {
    let offset = kind.pdu_offset();
    let pdu = adu.get(offset..).unwrap_or_default();
    if pdu.len() < 2 {
        return Err(ProtocolError::Truncated {
            expected: offset + 2,
            actual: adu.len(),
        });
    }
    let fn_code = pdu[0];
    let function = FunctionCode::new(fn_code)
        .filter(|function| function.is_read())
        .ok_or(ProtocolError::UnsupportedFunction(fn_code))?;
    if function != operation.function {
        return Err(ProtocolError::FunctionCodeMismatch {
            request: operation.function.value(),
            response: fn_code,
        });
    }
    let byte_count = usize::from(pdu[1]);
    let data = pdu
        .get(2..2 + byte_count)
        .ok_or(ProtocolError::Truncated {
            expected: offset + 2 + byte_count,
            actual: adu.len(),
        })?;

    let first = u32::from(operation.start_address);
    let fields = if function.is_bit_read() {
        let count = (byte_count * 8).min(usize::from(operation.quantity));
        decode_packed_coils(data, count)
            .into_iter()
            .zip(first..)
            .map(|(bit, address)| (FieldKey::new(function, address), FieldValue::Bit(bit)))
            .collect()
    } else {
        data.chunks_exact(2)
            .map(BigEndian::read_u16)
            .zip(first..)
            .map(|(word, address)| {
                (
                    FieldKey::new(function, address),
                    FieldValue::Register(word),
                )
            })
            .collect()
    };
    Ok(fields)
}
