// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Protocol level types shared by the codecs, the transports and the poller.

use std::{
    collections::BTreeMap,
    error,
    fmt::{self, Display},
};

use chrono::{DateTime, Local};

use crate::config::DeviceId;

/// A Modbus protocol address is represented by 16 bit from `0` to `65535`.
///
/// This *protocol address* uses 0-based indexing, while the addresses found in
/// the gateway configuration and in write commands use 1-based indexing.
pub type Address = u16;

/// A Coil represents a single bit.
///
/// - `true` is equivalent to `ON`, `1` and `0xFF00`.
/// - `false` is equivalent to `OFF`, `0` and `0x0000`.
pub type Coil = bool;

/// Modbus uses 16 bit for its data items.
///
/// Transmitted using a big-endian representation.
pub type Word = u16;

/// Number of items to process.
pub type Quantity = u16;

/// Sub-address of a device behind a serial line or a TCP/RTU gateway.
pub type UnitId = u8;

/// The function codes understood by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    /// 01 (0x01) Read Coils.
    ReadCoils,

    /// 02 (0x02) Read Discrete Inputs
    ReadDiscreteInputs,

    /// 03 (0x03) Read Holding Registers
    ReadHoldingRegisters,

    /// 04 (0x04) Read Input Registers
    ReadInputRegisters,

    /// 05 (0x05) Write Single Coil
    WriteSingleCoil,

    /// 06 (0x06) Write Single Register
    WriteSingleRegister,
}

impl FunctionCode {
    /// Create a new [`FunctionCode`] with `value`.
    ///
    /// Returns `None` for every code the gateway does not implement.
    #[must_use]
    pub const fn new(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::ReadCoils),
            0x02 => Some(Self::ReadDiscreteInputs),
            0x03 => Some(Self::ReadHoldingRegisters),
            0x04 => Some(Self::ReadInputRegisters),
            0x05 => Some(Self::WriteSingleCoil),
            0x06 => Some(Self::WriteSingleRegister),
            _ => None,
        }
    }

    /// Gets the [`u8`] value of the current [`FunctionCode`].
    #[must_use]
    pub const fn value(self) -> u8 {
        match self {
            Self::ReadCoils => 0x01,
            Self::ReadDiscreteInputs => 0x02,
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
            Self::WriteSingleCoil => 0x05,
            Self::WriteSingleRegister => 0x06,
        }
    }

    #[must_use]
    pub const fn is_read(self) -> bool {
        matches!(
            self,
            Self::ReadCoils
                | Self::ReadDiscreteInputs
                | Self::ReadHoldingRegisters
                | Self::ReadInputRegisters
        )
    }

    #[must_use]
    pub const fn is_write(self) -> bool {
        !self.is_read()
    }

    /// Reads that return packed bits rather than registers.
    #[must_use]
    pub const fn is_bit_read(self) -> bool {
        matches!(self, Self::ReadCoils | Self::ReadDiscreteInputs)
    }

    /// Leading digit of the conventional data-model numbering
    /// (0xxxx coils, 1xxxx discrete inputs, 3xxxx input registers,
    /// 4xxxx holding registers).
    ///
    /// Only meaningful for reads.
    #[must_use]
    pub const fn family_digit(self) -> u8 {
        match self {
            Self::ReadCoils | Self::WriteSingleCoil => 0,
            Self::ReadDiscreteInputs => 1,
            Self::ReadInputRegisters => 3,
            Self::ReadHoldingRegisters | Self::WriteSingleRegister => 4,
        }
    }
}

impl Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value().fmt(f)
    }
}

/// A server (slave) exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    /// 0x01
    IllegalFunction,
    /// 0x02
    IllegalDataAddress,
    /// 0x03
    IllegalDataValue,
    /// 0x04
    ServerDeviceFailure,
    /// 0x05
    Acknowledge,
    /// 0x06
    ServerDeviceBusy,
    /// 0x08
    MemoryParityError,
    /// 0x0A
    GatewayPathUnavailable,
    /// 0x0B
    GatewayTargetDevice,
    /// None of the above.
    Custom(u8),
}

impl From<ExceptionCode> for u8 {
    fn from(from: ExceptionCode) -> Self {
        use crate::frame::ExceptionCode::*;
        match from {
            IllegalFunction => 0x01,
            IllegalDataAddress => 0x02,
            IllegalDataValue => 0x03,
            ServerDeviceFailure => 0x04,
            Acknowledge => 0x05,
            ServerDeviceBusy => 0x06,
            MemoryParityError => 0x08,
            GatewayPathUnavailable => 0x0A,
            GatewayTargetDevice => 0x0B,
            Custom(code) => code,
        }
    }
}

impl ExceptionCode {
    /// Create a new [`ExceptionCode`] with `value`.
    #[must_use]
    pub const fn new(value: u8) -> Self {
        use crate::frame::ExceptionCode::*;

        match value {
            0x01 => IllegalFunction,
            0x02 => IllegalDataAddress,
            0x03 => IllegalDataValue,
            0x04 => ServerDeviceFailure,
            0x05 => Acknowledge,
            0x06 => ServerDeviceBusy,
            0x08 => MemoryParityError,
            0x0A => GatewayPathUnavailable,
            0x0B => GatewayTargetDevice,
            other => Custom(other),
        }
    }

    pub(crate) fn description(&self) -> &str {
        use crate::frame::ExceptionCode::*;

        match *self {
            IllegalFunction => "Illegal function",
            IllegalDataAddress => "Illegal data address",
            IllegalDataValue => "Illegal data value",
            ServerDeviceFailure => "Server device failure",
            Acknowledge => "Acknowledge",
            ServerDeviceBusy => "Server device busy",
            MemoryParityError => "Memory parity error",
            GatewayPathUnavailable => "Gateway path unavailable",
            GatewayTargetDevice => "Gateway target device failed to respond",
            Custom(_) => "Custom",
        }
    }
}

impl Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.description(), u8::from(*self))
    }
}

impl error::Error for ExceptionCode {}

/// The envelope a request is wrapped into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// MBAP header + PDU.
    Tcp,
    /// Unit id + PDU + CRC16.
    Serial,
}

impl TransportKind {
    /// Position of the function code within an ADU.
    #[must_use]
    pub const fn pdu_offset(self) -> usize {
        match self {
            Self::Tcp => crate::codec::tcp::HEADER_LEN,
            Self::Serial => crate::codec::rtu::HEADER_LEN,
        }
    }
}

impl Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Serial => f.write_str("serial"),
        }
    }
}

/// Key of a decoded field: data family digit plus 1-based address.
///
/// Displayed as the digit followed by at least four address digits,
/// e.g. `40001` for the first holding register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldKey {
    pub family: u8,
    pub address: u32,
}

impl FieldKey {
    #[must_use]
    pub const fn new(function: FunctionCode, address: u32) -> Self {
        Self {
            family: function.family_digit(),
            address,
        }
    }
}

impl Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}{:04}", self.family, self.address)
    }
}

/// A single decoded point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue {
    Bit(Coil),
    Register(Word),
}

impl Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bit(bit) => write!(f, "{}", u8::from(*bit)),
            Self::Register(word) => write!(f, "{word:05}"),
        }
    }
}

/// The fields of a single response, in address order.
pub type Fields = Vec<(FieldKey, FieldValue)>;

/// Everything one poll pass read from one server.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    pub timestamp: DateTime<Local>,
    pub device_id: DeviceId,
    pub device_type: String,
    pub fields: BTreeMap<FieldKey, FieldValue>,
}

impl DecodedRecord {
    #[must_use]
    pub fn new(device_id: DeviceId, device_type: String) -> Self {
        Self {
            timestamp: Local::now(),
            device_id,
            device_type,
            fields: BTreeMap::new(),
        }
    }

    pub fn extend(&mut self, fields: Fields) {
        self.fields.extend(fields);
    }
}
