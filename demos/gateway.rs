// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs the gateway with the configuration file given as first argument
//! and prints every published message.
//!
//! Write commands are read from stdin, one per line, in the form
//! `<mac address> <json>`, e.g.
//! `AA:BB:CC:00:11:22 {"functionCode":6,"startingAddress":1,"value":100,"uid":1}`.
//! An empty line stops the gateway.

use std::{io::BufRead as _, sync::Arc};

use modbus_gateway::{Gateway, Message, Options};

fn print_message(message: Message) {
    let properties: Vec<_> = message
        .properties
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    println!(
        "[{}] {}",
        properties.join(", "),
        String::from_utf8_lossy(&message.content)
    );
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("Usage: gateway <config.json>");
        std::process::exit(1);
    };
    let config = std::fs::read_to_string(path)?;

    let mut gateway = Gateway::from_json(&config, Arc::new(print_message), Options::default())?;
    gateway.start()?;

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        let Some((mac_address, content)) = line.split_once(' ') else {
            eprintln!("Expected `<mac address> <json>`");
            continue;
        };
        let message = Message::new(content)
            .with_property("source", "mapping")
            .with_property("macAddress", mac_address);
        if let Err(err) = gateway.receive(&message) {
            eprintln!("{err}");
        }
    }

    gateway.destroy();
    Ok(())
}
