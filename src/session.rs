// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A configured server together with its connection and poll counter.

use std::{io, time::Duration};

use bytes::Bytes;

use crate::{
    codec,
    config::{DeviceId, ServerConfig},
    error::Error,
    frame::{Address, DecodedRecord, FunctionCode, UnitId, Word},
    transport::Transport,
    Result,
};

/// Connection state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No open transport. The next exchange connects.
    Disconnected,
    Connected,
    /// Shut down for good.
    Closed,
}

#[derive(Debug)]
pub struct Session {
    config: ServerConfig,
    transport: Option<Transport>,
    elapsed: Duration,
    closed: bool,
}

impl Session {
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            transport: None,
            elapsed: Duration::ZERO,
            closed: false,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub fn device_id(&self) -> &DeviceId {
        &self.config.device_id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        if self.closed {
            SessionState::Closed
        } else if self.transport.is_some() {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        }
    }

    /// Advances the poll counter by one tick.
    ///
    /// Returns `true` and restarts the counter once the poll interval is
    /// reached.
    pub fn advance(&mut self, tick: Duration) -> bool {
        if self.closed {
            return false;
        }
        self.elapsed += tick;
        if self.elapsed < self.config.interval {
            return false;
        }
        self.elapsed = Duration::ZERO;
        true
    }

    /// Runs all read operations in order and collects their fields.
    ///
    /// The pass is aborted on the first failure, including exception
    /// replies. Any failure drops the connection.
    pub async fn poll(&mut self, timeout: Duration) -> Result<DecodedRecord> {
        let mut record =
            DecodedRecord::new(self.config.device_id.clone(), self.config.device_type.clone());
        let kind = self.config.endpoint.kind();
        for index in 0..self.config.operations.len() {
            let request = self.config.operations[index].request().clone();
            let response = match self.exchange(&request, timeout).await? {
                Ok(response) => response,
                Err(exception) => return Ok(Err(exception)),
            };
            match codec::decode_response(&response, &self.config.operations[index], kind) {
                Ok(fields) => record.extend(fields),
                Err(err) => {
                    self.disconnect().await;
                    return Err(err.into());
                }
            }
        }
        Ok(Ok(record))
    }

    /// Writes a single coil or register. `address` is 1-based.
    pub async fn write(
        &mut self,
        unit_id: UnitId,
        function: FunctionCode,
        address: Address,
        value: Word,
        timeout: Duration,
    ) -> Result<()> {
        let request =
            codec::encode_write(unit_id, function, address, value, self.config.endpoint.kind())?;
        let response = self.exchange(&request, timeout).await?;
        Ok(response.map(|_| ()))
    }

    async fn exchange(&mut self, request: &Bytes, timeout: Duration) -> Result<Bytes> {
        if self.closed {
            return Err(Error::Transport(io::Error::new(
                io::ErrorKind::NotConnected,
                "session has been closed",
            )));
        }
        let mut transport = match self.transport.take() {
            Some(transport) => transport,
            None => Transport::connect(&self.config, timeout).await?,
        };
        let res = transport.exchange(request, timeout).await;
        if matches!(res, Ok(Ok(_))) {
            self.transport = Some(transport);
        } else {
            log::debug!("Dropping connection to {}", self.config.endpoint);
            transport.close().await;
        }
        res
    }

    async fn disconnect(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
    }

    /// Closes the connection. The session cannot be used afterwards.
    pub async fn close(&mut self) {
        self.closed = true;
        self.disconnect().await;
    }
}
