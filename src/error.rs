// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types.

use std::io;

use thiserror::Error;

/// Protocol or transport errors.
///
/// Devices answering with a _Modbus_ exception are not reported here,
/// see [`crate::Result`].
#[derive(Debug, Error)]
pub enum Error {
    /// The received bytes could not be framed or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Connecting, sending or receiving failed.
    #[error(transparent)]
    Transport(#[from] io::Error),

    /// A caller supplied an unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

/// Malformed frames and unexpected responses.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Fewer bytes than the frame declares.
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// The function code is not one the gateway implements.
    #[error("unsupported function code: 0x{0:02X}")]
    UnsupportedFunction(u8),

    /// The response does not echo the function code of the request.
    #[error("function code mismatch: request 0x{request:02X}, response 0x{response:02X}")]
    FunctionCodeMismatch { request: u8, response: u8 },

    /// The checksum of an RTU frame is wrong.
    #[error("CRC is not correct: 0x{actual:04X} instead of 0x{expected:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    /// An MBAP header that cannot belong to a _Modbus_ response.
    #[error("invalid MBAP header: {0}")]
    InvalidHeader(&'static str),
}

/// Rejected configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("did not find expected {0} configuration")]
    MissingField(&'static str),

    #[error("invalid {field}: {value} ({reason})")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, value: impl ToString, reason: &'static str) -> Self {
        Self::InvalidField {
            field,
            value: value.to_string(),
            reason,
        }
    }
}
