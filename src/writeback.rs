// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Forwarding write commands from the message bus to a server.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::{
    sync::{Mutex, MutexGuard},
    time::Instant,
};

use crate::{
    config::{Options, Scalar},
    error::{ConfigError, Error},
    frame::{Address, ExceptionCode, FunctionCode, UnitId, Word},
    message::{Message, PROPERTY_DEVICE_KEY, PROPERTY_MAC_ADDRESS, PROPERTY_SOURCE, SOURCE_MAPPING},
    registry::Registry,
};

/// Rejected inbound message.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("not a write command: {0}")]
    NotACommand(&'static str),

    #[error("malformed write command: {0}")]
    Json(#[from] serde_json::Error),

    #[error("write command lacks {0}")]
    MissingField(&'static str),

    #[error("invalid {field} in write command: {value} ({reason})")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
}

impl From<ConfigError> for CommandError {
    fn from(from: ConfigError) -> Self {
        match from {
            ConfigError::Json(err) => Self::Json(err),
            ConfigError::MissingField(field) => Self::MissingField(field),
            ConfigError::InvalidField {
                field,
                value,
                reason,
            } => Self::InvalidField {
                field,
                value,
                reason,
            },
        }
    }
}

/// Failed write-back.
#[derive(Debug, Error)]
pub enum WriteBackError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("no server configured for device {0}")]
    UnknownDevice(String),

    #[error("server connection still busy after {0:?}")]
    LockTimeout(Duration),

    #[error(transparent)]
    Exchange(#[from] Error),

    #[error("server replied with exception: {0}")]
    Exception(ExceptionCode),
}

/// A single coil or register write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteCommand {
    pub unit_id: UnitId,
    pub function: FunctionCode,
    /// 1-based.
    pub address: Address,
    /// Any non-zero value switches a coil on.
    pub value: Word,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCommand {
    function_code: Option<Scalar>,
    starting_address: Option<Scalar>,
    value: Option<Scalar>,
    uid: Option<Scalar>,
}

fn required(value: Option<Scalar>, field: &'static str) -> Result<Scalar, CommandError> {
    value.ok_or(CommandError::MissingField(field))
}

impl WriteCommand {
    /// Parses and validates the JSON content of a write command.
    pub fn from_json(content: &[u8]) -> Result<Self, CommandError> {
        let raw: RawCommand = serde_json::from_slice(content)?;
        let fn_code: u8 = required(raw.function_code, "functionCode")?.to_uint("functionCode")?;
        let function = FunctionCode::new(fn_code)
            .filter(|function| function.is_write())
            .ok_or(CommandError::InvalidField {
                field: "functionCode",
                value: fn_code.to_string(),
                reason: "only 5 and 6 can be written",
            })?;
        let address: Address =
            required(raw.starting_address, "startingAddress")?.to_uint("startingAddress")?;
        if address == 0 {
            return Err(CommandError::InvalidField {
                field: "startingAddress",
                value: address.to_string(),
                reason: "addresses are 1-based",
            });
        }
        let value = required(raw.value, "value")?.to_uint("value")?;
        let unit_id = required(raw.uid, "uid")?.to_uint("uid")?;
        Ok(Self {
            unit_id,
            function,
            address,
            value,
        })
    }
}

/// Checks whether `message` is a write command and returns the addressed
/// device together with the command content.
pub fn route(message: &Message) -> Result<(&str, &[u8]), CommandError> {
    if message.property(PROPERTY_SOURCE) != Some(SOURCE_MAPPING) {
        return Err(CommandError::NotACommand("source is not mapping"));
    }
    if message.property(PROPERTY_DEVICE_KEY).is_some() {
        return Err(CommandError::NotACommand("addressed to a device key"));
    }
    let device_id = message
        .property(PROPERTY_MAC_ADDRESS)
        .ok_or(CommandError::NotACommand("no target macAddress"))?;
    Ok((device_id, &message.content))
}

async fn lock_registry<'a>(
    registry: &'a Mutex<Registry>,
    options: &Options,
) -> Result<MutexGuard<'a, Registry>, WriteBackError> {
    let started = Instant::now();
    loop {
        if let Ok(guard) = registry.try_lock() {
            return Ok(guard);
        }
        if started.elapsed() >= options.write_lock_timeout {
            return Err(WriteBackError::LockTimeout(options.write_lock_timeout));
        }
        tokio::time::sleep(options.write_retry_interval).await;
    }
}

/// Sends `command` to the server of `device_id`.
///
/// Waits for the poll loop to release the connection. No retries once the
/// request has been sent.
pub async fn write_back(
    registry: &Mutex<Registry>,
    device_id: &str,
    command: WriteCommand,
    options: &Options,
) -> Result<(), WriteBackError> {
    let mut registry = lock_registry(registry, options).await?;
    let session = registry
        .find_mut(device_id)
        .ok_or_else(|| WriteBackError::UnknownDevice(device_id.to_owned()))?;
    log::info!(
        "Writing {} to address {} (function {}, unit {}) of {}",
        command.value,
        command.address,
        command.function,
        command.unit_id,
        session.device_id()
    );
    let WriteCommand {
        unit_id,
        function,
        address,
        value,
    } = command;
    session
        .write(unit_id, function, address, value, options.io_timeout)
        .await?
        .map_err(WriteBackError::Exception)
}

/// Routes, parses and forwards an inbound message.
pub async fn handle_message(
    registry: &Mutex<Registry>,
    message: &Message,
    options: &Options,
) -> Result<(), WriteBackError> {
    let (device_id, content) = route(message)?;
    let command = WriteCommand::from_json(content)?;
    write_back(registry, device_id, command, options).await
}
