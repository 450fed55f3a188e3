// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Request/response exchange over a TCP socket or a serial port.

use std::{fmt, io, time::Duration};

use bytes::Bytes;
use futures_util::{SinkExt as _, StreamExt as _};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt as _},
    net::TcpStream,
};
use tokio_serial::SerialStream;
use tokio_util::codec::{Decoder, Encoder, Framed};

use crate::{
    codec,
    config::{Endpoint, ServerConfig},
    error::{Error, ProtocolError},
    frame::{ExceptionCode, TransportKind},
    Result,
};

pub(crate) mod rtu;
pub(crate) mod tcp;

/// An open connection to a single server.
pub(crate) enum Transport {
    Tcp(Framed<TcpStream, codec::tcp::ClientCodec>),
    Serial(Framed<SerialStream, codec::rtu::ClientCodec>),
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(framed) => f
                .debug_tuple("Tcp")
                .field(&framed.get_ref().peer_addr().ok())
                .finish(),
            Self::Serial(_) => f.write_str("Serial"),
        }
    }
}

impl Transport {
    /// Opens the endpoint of `config`.
    ///
    /// Never retries. Callers reconnect on their next attempt.
    pub(crate) async fn connect(config: &ServerConfig, timeout: Duration) -> io::Result<Self> {
        let transport = match &config.endpoint {
            Endpoint::Tcp(socket_addr) => Self::Tcp(tcp::connect(*socket_addr, timeout).await?),
            Endpoint::Serial(settings) => Self::Serial(rtu::open(settings)?),
        };
        log::info!("Connected to {} ({})", config.endpoint, config.device_id);
        Ok(transport)
    }

    #[must_use]
    pub(crate) const fn kind(&self) -> TransportKind {
        match self {
            Self::Tcp(_) => TransportKind::Tcp,
            Self::Serial(_) => TransportKind::Serial,
        }
    }

    /// Sends `request` and waits for one complete response frame.
    pub(crate) async fn exchange(&mut self, request: &Bytes, timeout: Duration) -> Result<Bytes> {
        let kind = self.kind();
        match self {
            Self::Tcp(framed) => exchange(framed, request, kind, timeout).await,
            Self::Serial(framed) => exchange(framed, request, kind, timeout).await,
        }
    }

    pub(crate) async fn close(self) {
        let res = match self {
            Self::Tcp(framed) => framed.into_inner().shutdown().await,
            Self::Serial(framed) => framed.into_inner().shutdown().await,
        };
        if let Err(err) = res {
            log::debug!("Failed to shut down transport: {err}");
        }
    }
}

async fn send_and_receive<T, C>(framed: &mut Framed<T, C>, request: &Bytes) -> std::result::Result<Bytes, Error>
where
    T: AsyncRead + AsyncWrite + Unpin,
    C: Decoder<Item = Bytes, Error = Error> + Encoder<Bytes, Error = Error>,
{
    framed.send(request.clone()).await?;
    framed
        .next()
        .await
        .unwrap_or_else(|| Err(io::Error::from(io::ErrorKind::BrokenPipe).into()))
}

/// Exchanges one request/response pair on any framed byte stream.
pub(crate) async fn exchange<T, C>(
    framed: &mut Framed<T, C>,
    request: &Bytes,
    kind: TransportKind,
    timeout: Duration,
) -> Result<Bytes>
where
    T: AsyncRead + AsyncWrite + Unpin,
    C: Decoder<Item = Bytes, Error = Error> + Encoder<Bytes, Error = Error>,
{
    // Stale bytes of a previous exchange must not leak into this one.
    framed.read_buffer_mut().clear();

    log::debug!("Sending request {:02X?}", &request[..]);
    let response = tokio::time::timeout(timeout, send_and_receive(framed, request))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no response within timeout"))??;
    log::debug!("Received response {:02X?}", &response[..]);

    classify(request, response, kind.pdu_offset())
}

/// Splits a response into a regular reply and an exception reply.
///
/// Both the unit id and the function code must echo the request.
fn classify(request: &[u8], response: Bytes, pdu_offset: usize) -> Result<Bytes> {
    let (Some(&request_fn), Some(&response_fn)) = (request.get(pdu_offset), response.get(pdu_offset))
    else {
        return Err(ProtocolError::Truncated {
            expected: pdu_offset + 1,
            actual: response.len(),
        }
        .into());
    };
    let unit_id = pdu_offset - 1;
    if request[unit_id] != response[unit_id] {
        return Err(ProtocolError::InvalidHeader("unit id does not match the request").into());
    }
    if response_fn == request_fn {
        return Ok(Ok(response));
    }
    if response_fn == request_fn | 0x80 {
        let code = response.get(pdu_offset + 1).copied().ok_or(ProtocolError::Truncated {
            expected: pdu_offset + 2,
            actual: response.len(),
        })?;
        return Ok(Err(ExceptionCode::new(code)));
    }
    Err(ProtocolError::FunctionCodeMismatch {
        request: request_fn,
        response: response_fn,
    }
    .into())
}
