// SPDX-FileCopyrightText: Copyright (c) 2017-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTU master connectors.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::{client::Network, codec::rtu::RtuFramer};

/// Attaches a new RTU master to a serial byte transport.
#[must_use]
pub fn attach<T>(transport: T) -> Network
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    Network::new(RtuFramer::new(transport))
}

/// Attaches a new RTU master to a preconfigured framer, e.g. with local
/// echo handling or a non-default inter-frame timeout.
#[must_use]
pub fn attach_framer<T>(framer: RtuFramer<T>) -> Network
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    Network::new(framer)
}

/// Opens a serial port and attaches a new RTU master to it.
#[cfg(feature = "rtu-serial")]
pub fn open(path: &str, baud_rate: u32) -> std::io::Result<Network> {
    let port = tokio_serial::SerialStream::open(&tokio_serial::new(path, baud_rate))
        .map_err(std::io::Error::other)?;
    Ok(attach(port))
}
