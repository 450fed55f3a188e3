// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A minimal blocking _Modbus_ TCP server for driving the gateway in tests.

use std::{
    io::{self, Read as _, Write as _},
    net::{TcpListener, TcpStream},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
};

pub struct FakeServer {
    pub port: u16,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
    connections: Arc<AtomicUsize>,
}

impl FakeServer {
    /// Serves connections one after another until the test process exits.
    ///
    /// `handler` maps the unit id and request PDU to the response PDU.
    pub fn spawn<F>(handler: F) -> anyhow::Result<Self>
    where
        F: Fn(u8, &[u8]) -> Vec<u8> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        {
            let requests = Arc::clone(&requests);
            let connections = Arc::clone(&connections);
            thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(stream) = stream else {
                        break;
                    };
                    connections.fetch_add(1, Ordering::SeqCst);
                    // Ends when the client hangs up.
                    let _ = serve(stream, &handler, &requests);
                }
            });
        }
        Ok(Self {
            port,
            requests,
            connections,
        })
    }

    /// All request ADUs received so far.
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

fn serve<F>(mut stream: TcpStream, handler: &F, requests: &Mutex<Vec<Vec<u8>>>) -> io::Result<()>
where
    F: Fn(u8, &[u8]) -> Vec<u8>,
{
    loop {
        let mut header = [0; 7];
        stream.read_exact(&mut header)?;
        let len = usize::from(u16::from_be_bytes([header[4], header[5]]));
        let mut pdu = vec![0; len.saturating_sub(1)];
        stream.read_exact(&mut pdu)?;

        let mut request = header.to_vec();
        request.extend_from_slice(&pdu);
        requests.lock().unwrap().push(request);

        let unit_id = header[6];
        let response_pdu = handler(unit_id, &pdu);
        let mut response = header[..4].to_vec();
        response.extend_from_slice(&(response_pdu.len() as u16 + 1).to_be_bytes());
        response.push(unit_id);
        response.extend_from_slice(&response_pdu);
        stream.write_all(&response)?;
    }
}

fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0; (bits.len() + 7) / 8];
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

/// A device with fixed coils and registers.
///
/// Reads out of range and writes beyond the configured points are answered
/// with an "illegal data address" exception, unknown functions with an
/// "illegal function" exception. Writes are echoed without changing state.
pub fn device(registers: Vec<u16>, coils: Vec<bool>) -> impl Fn(u8, &[u8]) -> Vec<u8> + Send + 'static {
    move |_unit_id: u8, pdu: &[u8]| -> Vec<u8> {
        let fn_code = pdu[0];
        let address = usize::from(u16::from_be_bytes([pdu[1], pdu[2]]));
        let quantity = usize::from(u16::from_be_bytes([pdu[3], pdu[4]]));
        let illegal_address = vec![fn_code | 0x80, 0x02];
        match fn_code {
            0x01 | 0x02 => match coils.get(address..address + quantity) {
                Some(bits) => {
                    let data = pack_bits(bits);
                    let mut response = vec![fn_code, data.len() as u8];
                    response.extend_from_slice(&data);
                    response
                }
                None => illegal_address,
            },
            0x03 | 0x04 => match registers.get(address..address + quantity) {
                Some(words) => {
                    let mut response = vec![fn_code, (words.len() * 2) as u8];
                    for word in words {
                        response.extend_from_slice(&word.to_be_bytes());
                    }
                    response
                }
                None => illegal_address,
            },
            0x05 if address < coils.len() => pdu.to_vec(),
            0x06 if address < registers.len() => pdu.to_vec(),
            0x05 | 0x06 => illegal_address,
            _ => vec![fn_code | 0x80, 0x01],
        }
    }
}

/// A port on which nobody accepts connections.
pub fn unused_port() -> anyhow::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Configuration of a server on the local host.
pub fn server_config(
    port: u16,
    mac_address: &str,
    interval_ms: u64,
    sqlite_enabled: bool,
    operations: &str,
) -> String {
    format!(
        r#"{{
            "serverConnectionString": "127.0.0.1",
            "port": {port},
            "macAddress": "{mac_address}",
            "interval": "{interval_ms}",
            "deviceType": "test-device",
            "sqliteEnabled": {sqlite_enabled},
            "operations": {operations}
        }}"#
    )
}
