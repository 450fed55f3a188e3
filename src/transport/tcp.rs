// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{io, net::SocketAddrV4, time::Duration};

use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use crate::codec::tcp::ClientCodec;

/// Establishes a TCP connection within `timeout`.
pub(crate) async fn connect(
    socket_addr: SocketAddrV4,
    timeout: Duration,
) -> io::Result<Framed<TcpStream, ClientCodec>> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(socket_addr))
        .await
        .map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connecting to {socket_addr} timed out"),
            )
        })??;
    stream.set_nodelay(true)?;
    Ok(Framed::new(stream, ClientCodec))
}
