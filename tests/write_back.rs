// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Write commands forwarded through a running gateway.
//!
//! These are plain tests, because the gateway owns its runtime and must be
//! driven from outside of any async context.

#[allow(unused)]
mod server;

use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use modbus_gateway::{ExceptionCode, Gateway, Message, Options, WriteBackError};

use crate::server::{device, server_config, FakeServer};

const DEVICE: &str = "0A:0B:0C:0D:0E:0F";

fn write_command(mac_address: &str, content: &str) -> Message {
    Message::new(content)
        .with_property("source", "mapping")
        .with_property("macAddress", mac_address)
}

fn gateway(server: &FakeServer, interval_ms: u64) -> anyhow::Result<(Gateway, Arc<Mutex<Vec<Message>>>)> {
    let operations = r#"[{ "unitId": 1, "functionCode": 3, "startingAddress": 1, "length": 1 }]"#;
    let config = format!(
        "[{}]",
        server_config(server.port, DEVICE, interval_ms, false, operations)
    );
    let published = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&published);
    let publisher = Arc::new(move |message: Message| sink.lock().unwrap().push(message));
    let options = Options {
        tick: Duration::from_millis(50),
        io_timeout: Duration::from_secs(2),
        ..Default::default()
    };
    let gateway = Gateway::from_json(&config, publisher, options)?;
    Ok((gateway, published))
}

#[test]
fn write_single_register() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let server = FakeServer::spawn(device(vec![0; 4], vec![false; 4]))?;
    let (gateway, _) = gateway(&server, 60_000)?;

    let message = write_command(
        "0a:0b:0c:0d:0e:0f",
        r#"{"functionCode": 6, "startingAddress": 1, "value": 100, "uid": 1}"#,
    );
    gateway.receive(&message)?;

    assert_eq!(
        server.requests(),
        vec![vec![0x00, 0x00, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x00, 0x00, 0x00, 0x64]]
    );
    gateway.destroy();
    Ok(())
}

#[test]
fn write_single_coil() -> anyhow::Result<()> {
    let server = FakeServer::spawn(device(vec![0; 4], vec![false; 4]))?;
    let (gateway, _) = gateway(&server, 60_000)?;

    gateway.receive(&write_command(
        DEVICE,
        r#"{"functionCode": "5", "startingAddress": "4", "value": "7", "uid": "2"}"#,
    ))?;
    gateway.receive(&write_command(
        DEVICE,
        r#"{"functionCode": 5, "startingAddress": 4, "value": 0, "uid": 2}"#,
    ))?;

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(&requests[0][6..], &[0x02, 0x05, 0x00, 0x03, 0xFF, 0x00]);
    assert_eq!(&requests[1][6..], &[0x02, 0x05, 0x00, 0x03, 0x00, 0x00]);
    // Both writes share one connection.
    assert_eq!(server.connections(), 1);
    Ok(())
}

#[test]
fn write_rejected_by_server() -> anyhow::Result<()> {
    let server = FakeServer::spawn(device(vec![0; 4], vec![]))?;
    let (gateway, _) = gateway(&server, 60_000)?;

    let err = gateway
        .receive(&write_command(
            DEVICE,
            r#"{"functionCode": 6, "startingAddress": 100, "value": 1, "uid": 1}"#,
        ))
        .unwrap_err();
    assert!(matches!(
        err,
        WriteBackError::Exception(ExceptionCode::IllegalDataAddress)
    ));

    // The next write reconnects.
    gateway.receive(&write_command(
        DEVICE,
        r#"{"functionCode": 6, "startingAddress": 1, "value": 1, "uid": 1}"#,
    ))?;
    assert_eq!(server.requests().len(), 2);
    assert_eq!(server.connections(), 2);
    Ok(())
}

#[test]
fn invalid_commands_cause_no_traffic() -> anyhow::Result<()> {
    let server = FakeServer::spawn(device(vec![0; 4], vec![]))?;
    let (gateway, _) = gateway(&server, 60_000)?;

    for content in [
        r#"{"functionCode": 3, "startingAddress": 1, "value": 1, "uid": 1}"#,
        r#"{"functionCode": 6, "startingAddress": 0, "value": 1, "uid": 1}"#,
        r#"{"functionCode": 6, "value": 1, "uid": 1}"#,
        r#"{"functionCode": 6, "startingAddress": 1, "value": 70000, "uid": 1}"#,
    ] {
        let err = gateway.receive(&write_command(DEVICE, content)).unwrap_err();
        assert!(matches!(err, WriteBackError::Command(_)), "{content}");
    }

    let err = gateway
        .receive(&write_command(
            "0A:0B:0C:0D:0E:10",
            r#"{"functionCode": 6, "startingAddress": 1, "value": 1, "uid": 1}"#,
        ))
        .unwrap_err();
    assert!(matches!(err, WriteBackError::UnknownDevice(_)));

    let foreign = write_command(DEVICE, "{}").with_property("deviceKey", "key");
    assert!(matches!(
        gateway.receive(&foreign),
        Err(WriteBackError::Command(_))
    ));

    assert!(server.requests().is_empty());
    Ok(())
}

#[test]
fn write_while_polling() -> anyhow::Result<()> {
    let server = FakeServer::spawn(device(vec![5; 4], vec![]))?;
    let (mut gateway, published) = gateway(&server, 50)?;
    gateway.start()?;

    for value in 1..=5 {
        let content = format!(
            r#"{{"functionCode": 6, "startingAddress": 2, "value": {value}, "uid": 1}}"#
        );
        gateway.receive(&write_command(DEVICE, &content))?;
        thread::sleep(Duration::from_millis(60));
    }
    gateway.destroy();

    let requests = server.requests();
    let writes: Vec<_> = requests.iter().filter(|request| request[7] == 0x06).collect();
    assert_eq!(writes.len(), 5);
    for (value, write) in (1u8..).zip(writes) {
        assert_eq!(&write[7..], &[0x06, 0x00, 0x01, 0x00, value]);
    }
    // Every read got its own complete response.
    let reads = requests.iter().filter(|request| request[7] == 0x03).count();
    assert!(reads > 0);
    assert_eq!(published.lock().unwrap().len(), reads);
    Ok(())
}
