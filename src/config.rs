// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway configuration.
//!
//! The configuration is a JSON array of server descriptors. Numeric values
//! may be given as JSON numbers or as numeric strings.

use std::{
    fmt,
    net::{Ipv4Addr, SocketAddrV4},
    str::FromStr,
    time::Duration,
};

use bytes::Bytes;
use serde::Deserialize;
use tokio_serial::{DataBits, FlowControl, Parity, StopBits};

use crate::{
    codec::{self, tcp::DEFAULT_PORT, MAX_BITS_PER_READ, MAX_REGISTERS_PER_READ},
    error::ConfigError,
    frame::{Address, FunctionCode, Quantity, TransportKind, UnitId},
};

const DEFAULT_BAUD_RATE: u32 = 9600;

/// Identifier of a device, e.g. `AA:BB:CC:00:11:22`.
///
/// Always upper case. Only used as a routing key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Surrounding whitespace is ignored, letters are upper-cased.
    pub(crate) fn normalize(s: &str) -> String {
        s.trim().to_ascii_uppercase()
    }
}

impl FromStr for DeviceId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = Self::normalize(s);
        let groups: Vec<_> = normalized.split(':').collect();
        let valid = groups.len() == 6
            && groups
                .iter()
                .all(|group| group.len() == 2 && group.chars().all(|c| c.is_ascii_hexdigit()));
        if !valid {
            return Err(ConfigError::invalid(
                "macAddress",
                s,
                "expected six colon separated hex bytes",
            ));
        }
        Ok(Self(normalized))
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Line parameters of a serial endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub path: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
}

/// Where a server is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(SocketAddrV4),
    Serial(SerialSettings),
}

impl Endpoint {
    #[must_use]
    pub const fn kind(&self) -> TransportKind {
        match self {
            Self::Tcp(_) => TransportKind::Tcp,
            Self::Serial(_) => TransportKind::Serial,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "{addr}"),
            Self::Serial(settings) => f.write_str(&settings.path),
        }
    }
}

/// A single read request issued on every poll pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOperation {
    pub unit_id: UnitId,
    pub function: FunctionCode,
    /// 1-based.
    pub start_address: Address,
    pub quantity: Quantity,
    request: Bytes,
}

impl ReadOperation {
    /// Validates the operation and prepares its request frame for `kind`.
    pub fn new(
        unit_id: UnitId,
        function: FunctionCode,
        start_address: Address,
        quantity: Quantity,
        kind: TransportKind,
    ) -> Result<Self, ConfigError> {
        if !function.is_read() {
            return Err(ConfigError::invalid(
                "functionCode",
                function,
                "only reads (1-4) can be polled",
            ));
        }
        if start_address == 0 {
            return Err(ConfigError::invalid(
                "startingAddress",
                start_address,
                "addresses are 1-based",
            ));
        }
        let max_quantity = if function.is_bit_read() {
            MAX_BITS_PER_READ
        } else {
            MAX_REGISTERS_PER_READ
        };
        if quantity == 0 || quantity > max_quantity {
            return Err(ConfigError::invalid(
                "length",
                quantity,
                "quantity exceeds the limits of a single request",
            ));
        }
        if u32::from(start_address) - 1 + u32::from(quantity) > 0x1_0000 {
            return Err(ConfigError::invalid(
                "length",
                quantity,
                "range exceeds the address space",
            ));
        }
        let mut operation = Self {
            unit_id,
            function,
            start_address,
            quantity,
            request: Bytes::new(),
        };
        operation.request = codec::encode_read(&operation, kind);
        Ok(operation)
    }

    /// The precomputed request frame.
    #[must_use]
    pub fn request(&self) -> &Bytes {
        &self.request
    }
}

/// One configured _Modbus_ server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub endpoint: Endpoint,
    pub device_id: DeviceId,
    pub device_type: String,
    pub interval: Duration,
    /// Also emit a message for the local store.
    pub persist: bool,
    pub operations: Vec<ReadOperation>,
}

/// Timing of the poll loop and of write-backs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Period of the scheduler tick.
    pub tick: Duration,
    /// Bound for connecting and for each request/response exchange.
    pub io_timeout: Duration,
    /// Pause between attempts to acquire the registry for a write-back.
    pub write_retry_interval: Duration,
    /// Give up acquiring the registry for a write-back after this long.
    pub write_lock_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            io_timeout: Duration::from_secs(3),
            write_retry_interval: Duration::from_millis(100),
            write_lock_timeout: Duration::from_secs(5),
        }
    }
}

/// A loosely typed JSON value as found in configuration files and
/// write commands.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum Scalar {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl Scalar {
    fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(number) => number.as_u64(),
            Self::Text(text) => text.trim().parse().ok(),
            Self::Bool(_) => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(flag) => Some(*flag),
            Self::Number(_) => self.as_u64().and_then(|n| match n {
                0 => Some(false),
                1 => Some(true),
                _ => None,
            }),
            Self::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
        }
    }

    fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.trim()),
            _ => None,
        }
    }

    /// Converts into an unsigned integer type, naming `field` on failure.
    pub(crate) fn to_uint<T>(&self, field: &'static str) -> Result<T, ConfigError>
    where
        T: TryFrom<u64>,
    {
        let value = self
            .as_u64()
            .ok_or_else(|| ConfigError::invalid(field, self, "not an unsigned number"))?;
        T::try_from(value).map_err(|_| ConfigError::invalid(field, self, "out of range"))
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(flag) => flag.fmt(f),
            Self::Number(number) => number.fmt(f),
            Self::Text(text) => write!(f, "{text:?}"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServer {
    server_connection_string: Option<String>,
    mac_address: Option<String>,
    interval: Option<Scalar>,
    device_type: Option<String>,
    operations: Option<Vec<RawOperation>>,
    port: Option<Scalar>,
    baud_rate: Option<Scalar>,
    data_bits: Option<Scalar>,
    stop_bits: Option<Scalar>,
    parity: Option<Scalar>,
    flow_control: Option<Scalar>,
    sqlite_enabled: Option<Scalar>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOperation {
    unit_id: Option<Scalar>,
    function_code: Option<Scalar>,
    starting_address: Option<Scalar>,
    length: Option<Scalar>,
}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T, ConfigError> {
    value.ok_or(ConfigError::MissingField(field))
}

/// Parses and validates a complete configuration.
///
/// Fails as a whole on the first invalid server or operation.
pub fn parse_config(json: &str) -> Result<Vec<ServerConfig>, ConfigError> {
    let raw: Vec<RawServer> = serde_json::from_str(json)?;
    let servers = raw
        .into_iter()
        .map(ServerConfig::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    log::debug!("Loaded configuration of {} server(s)", servers.len());
    Ok(servers)
}

impl TryFrom<RawServer> for ServerConfig {
    type Error = ConfigError;

    fn try_from(raw: RawServer) -> Result<Self, Self::Error> {
        let connection = required(raw.server_connection_string, "serverConnectionString")?;
        let device_id: DeviceId = required(raw.mac_address, "macAddress")?.parse()?;
        let interval: u64 = required(raw.interval, "interval")?.to_uint("interval")?;
        if interval == 0 {
            return Err(ConfigError::invalid("interval", interval, "must be positive"));
        }
        let device_type = required(raw.device_type, "deviceType")?;
        let raw_operations = required(raw.operations, "operations")?;

        let endpoint = if let Ok(ip) = connection.trim().parse::<Ipv4Addr>() {
            let port = raw
                .port
                .map(|port| port.to_uint("port"))
                .transpose()?
                .unwrap_or(DEFAULT_PORT);
            Endpoint::Tcp(SocketAddrV4::new(ip, port))
        } else {
            Endpoint::Serial(SerialSettings {
                path: serial_path(connection.trim())?,
                baud_rate: raw
                    .baud_rate
                    .map(|baud_rate| baud_rate.to_uint("baudRate"))
                    .transpose()?
                    .unwrap_or(DEFAULT_BAUD_RATE),
                data_bits: raw.data_bits.map(data_bits).transpose()?.unwrap_or(DataBits::Eight),
                stop_bits: raw.stop_bits.map(stop_bits).transpose()?.unwrap_or(StopBits::One),
                parity: raw.parity.map(parity).transpose()?.unwrap_or(Parity::None),
                flow_control: raw
                    .flow_control
                    .map(flow_control)
                    .transpose()?
                    .unwrap_or(FlowControl::None),
            })
        };

        let persist = raw
            .sqlite_enabled
            .map(|flag| {
                flag.as_bool()
                    .ok_or_else(|| ConfigError::invalid("sqliteEnabled", &flag, "not a boolean"))
            })
            .transpose()?
            .unwrap_or(false);

        let kind = endpoint.kind();
        let operations = raw_operations
            .into_iter()
            .map(|raw| read_operation(raw, kind))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            endpoint,
            device_id,
            device_type,
            interval: Duration::from_millis(interval),
            persist,
            operations,
        })
    }
}

fn read_operation(raw: RawOperation, kind: TransportKind) -> Result<ReadOperation, ConfigError> {
    let unit_id = required(raw.unit_id, "unitId")?.to_uint("unitId")?;
    let fn_code: u8 = required(raw.function_code, "functionCode")?.to_uint("functionCode")?;
    let function = FunctionCode::new(fn_code)
        .filter(|function| function.is_read())
        .ok_or_else(|| ConfigError::invalid("functionCode", fn_code, "only reads (1-4) can be polled"))?;
    let start_address = required(raw.starting_address, "startingAddress")?.to_uint("startingAddress")?;
    let quantity = required(raw.length, "length")?.to_uint("length")?;
    ReadOperation::new(unit_id, function, start_address, quantity, kind)
}

/// Resolves a configured serial port name to the device path of the
/// current platform.
fn serial_path(connection: &str) -> Result<String, ConfigError> {
    if connection.starts_with("/dev/") && connection.len() > "/dev/".len() {
        return Ok(connection.to_owned());
    }
    let number = connection
        .strip_prefix("COM")
        .and_then(|n| n.parse::<u32>().ok())
        .filter(|n| *n >= 1)
        .ok_or_else(|| {
            ConfigError::invalid(
                "serverConnectionString",
                connection,
                "expected an IPv4 address or a serial port",
            )
        })?;
    Ok(com_port_path(number))
}

#[cfg(unix)]
fn com_port_path(number: u32) -> String {
    format!("/dev/ttyS{}", number - 1)
}

#[cfg(windows)]
fn com_port_path(number: u32) -> String {
    if number < 10 {
        format!("COM{number}")
    } else {
        format!(r"\\.\COM{number}")
    }
}

fn data_bits(scalar: Scalar) -> Result<DataBits, ConfigError> {
    match scalar.to_uint::<u8>("dataBits")? {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        other => Err(ConfigError::invalid("dataBits", other, "expected 5 to 8")),
    }
}

fn stop_bits(scalar: Scalar) -> Result<StopBits, ConfigError> {
    match scalar.to_uint::<u8>("stopBits")? {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        other => Err(ConfigError::invalid("stopBits", other, "expected 1 or 2")),
    }
}

fn parity(scalar: Scalar) -> Result<Parity, ConfigError> {
    let name = match (scalar.as_u64(), scalar.as_text()) {
        (Some(0), _) => "none",
        (Some(1), _) => "odd",
        (Some(2), _) => "even",
        (None, Some(text)) => text,
        _ => "",
    };
    match name.to_ascii_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(ConfigError::invalid("parity", &scalar, "expected none, odd or even")),
    }
}

fn flow_control(scalar: Scalar) -> Result<FlowControl, ConfigError> {
    let name = match (scalar.as_u64(), scalar.as_text()) {
        (Some(0), _) => "none",
        (Some(1), _) => "software",
        (Some(2), _) => "hardware",
        (None, Some(text)) => text,
        _ => "",
    };
    match name.to_ascii_lowercase().as_str() {
        "none" => Ok(FlowControl::None),
        "software" => Ok(FlowControl::Software),
        "hardware" => Ok(FlowControl::Hardware),
        _ => Err(ConfigError::invalid(
            "flowControl",
            &scalar,
            "expected none, software or hardware",
        )),
    }
}
