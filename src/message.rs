// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Messages exchanged with the host's message bus.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::frame::DecodedRecord;

pub const PROPERTY_SOURCE: &str = "source";
pub const PROPERTY_MAC_ADDRESS: &str = "macAddress";
pub const PROPERTY_DEVICE_KEY: &str = "deviceKey";
pub const PROPERTY_DESTINATION: &str = "destination";

/// Value of [`PROPERTY_SOURCE`] on every published message.
pub const SOURCE_MODBUS: &str = "modbus";

/// Value of [`PROPERTY_SOURCE`] on inbound write commands.
pub const SOURCE_MAPPING: &str = "mapping";

const DESTINATION_SQLITE: &str = "sqlite";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A bus message: string properties plus opaque content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub properties: BTreeMap<String, String>,
    pub content: Vec<u8>,
}

impl Message {
    #[must_use]
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        Self {
            properties: BTreeMap::new(),
            content: content.into(),
        }
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Outbound side of the message bus.
pub trait Publish: Send + Sync {
    fn publish(&self, message: Message);
}

impl<F> Publish for F
where
    F: Fn(Message) + Send + Sync,
{
    fn publish(&self, message: Message) {
        self(message);
    }
}

fn timestamp(record: &DecodedRecord) -> String {
    record.timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// The message carrying all fields of one poll pass.
#[must_use]
pub fn record_message(record: &DecodedRecord) -> Message {
    let mut content = Map::new();
    content.insert("DataTimestamp".into(), timestamp(record).into());
    content.insert("mac_address".into(), record.device_id.as_str().into());
    content.insert("device_type".into(), record.device_type.as_str().into());
    for (key, value) in &record.fields {
        content.insert(format!("address_{key}"), value.to_string().into());
    }
    Message::new(Value::Object(content).to_string())
        .with_property(PROPERTY_SOURCE, SOURCE_MODBUS)
        .with_property(PROPERTY_MAC_ADDRESS, record.device_id.as_str())
}

/// The message asking the local store to persist one poll pass.
///
/// Returns `None` for a record without fields.
#[must_use]
pub fn persistence_message(record: &DecodedRecord) -> Option<Message> {
    if record.fields.is_empty() {
        return None;
    }
    let timestamp = timestamp(record);
    let rows: Vec<_> = record
        .fields
        .iter()
        .map(|(key, value)| format!("('{value}', '{key}', '{}', '{timestamp}')", record.device_id))
        .collect();
    let sql = format!(
        "INSERT INTO modbus_values (value, address, mac_address, timestamp) VALUES {};",
        rows.join(", ")
    );
    let message = Message::new(json!({ "sql": sql }).to_string())
        .with_property(PROPERTY_SOURCE, SOURCE_MODBUS)
        .with_property(PROPERTY_MAC_ADDRESS, record.device_id.as_str())
        .with_property(PROPERTY_DESTINATION, DESTINATION_SQLITE);
    Some(message)
}
