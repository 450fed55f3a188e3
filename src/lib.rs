// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A polling [Modbus](https://en.wikipedia.org/wiki/Modbus) gateway module
//! based on [tokio](https://tokio.rs).
//!
//! The gateway periodically reads coils and registers from a set of
//! _Modbus_ TCP and RTU servers and publishes the values as messages.
//! Write commands received as messages are forwarded to the addressed
//! server.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use modbus_gateway::{Gateway, Message, Options};
//!
//! let config = std::fs::read_to_string("gateway.json").unwrap();
//! let publisher = Arc::new(|message: Message| println!("{message:?}"));
//! let mut gateway = Gateway::from_json(&config, publisher, Options::default()).unwrap();
//! gateway.start().unwrap();
//! // ...
//! gateway.destroy();
//! ```

#![warn(rust_2018_idioms)]
#![warn(unsafe_code)]

pub mod codec;
pub mod config;
mod error;
pub mod frame;
pub mod gateway;
pub mod message;
pub mod registry;
pub mod scheduler;
pub mod session;
mod transport;
pub mod writeback;

pub use self::{
    config::{parse_config, DeviceId, Endpoint, Options, ReadOperation, ServerConfig},
    error::{ConfigError, Error, ProtocolError},
    frame::{DecodedRecord, ExceptionCode, FieldKey, FieldValue, FunctionCode, TransportKind},
    gateway::{Gateway, StartupError},
    message::{Message, Publish},
    registry::Registry,
    scheduler::Scheduler,
    session::{Session, SessionState},
    writeback::{CommandError, WriteBackError, WriteCommand},
};

/// Specialized [`std::result::Result`] type for exchanges with a server.
///
/// The outer result reports transport and protocol failures, the inner
/// result exceptions the server replied with.
pub type Result<T> = std::result::Result<std::result::Result<T, ExceptionCode>, Error>;
