// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::io;

use tokio_serial::SerialStream;
use tokio_util::codec::Framed;

use crate::{codec::rtu::ClientCodec, config::SerialSettings};

/// Opens and configures a serial port.
pub(crate) fn open(settings: &SerialSettings) -> io::Result<Framed<SerialStream, ClientCodec>> {
    let builder = tokio_serial::new(settings.path.as_str(), settings.baud_rate)
        .data_bits(settings.data_bits)
        .stop_bits(settings.stop_bits)
        .parity(settings.parity)
        .flow_control(settings.flow_control);
    let port = SerialStream::open(&builder)?;
    Ok(Framed::new(port, ClientCodec))
}
