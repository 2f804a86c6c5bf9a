// SPDX-FileCopyrightText: Copyright (c) 2017-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! TCP master connectors.

use std::{io, net::SocketAddr};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

use crate::{client::Network, codec::tcp::TcpFramer};

/// Connects to a Modbus TCP server.
pub async fn connect(socket_addr: SocketAddr) -> io::Result<Network> {
    let stream = TcpStream::connect(socket_addr).await?;
    Ok(attach(stream))
}

/// Attaches a new master to an established connection.
#[must_use]
pub fn attach<T>(transport: T) -> Network
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    Network::new(TcpFramer::new(transport))
}
