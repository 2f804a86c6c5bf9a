// SPDX-FileCopyrightText: Copyright (c) 2017-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport framers: per-transport message boundaries on top of the
//! shared frame reader.

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio_util::sync::CancellationToken;

use crate::{
    error::Error,
    frame::{Adu, ExpectedRespLenSpec},
};

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "tcp")]
pub mod tcp;

/// Transport-specific framing below the transaction engine.
///
/// A transaction writes `[addr, fn]` and the request data through
/// [`msg_writer`](Self::msg_writer), transmits with [`send`](Self::send)
/// and collects the matched response with [`receive`](Self::receive).
#[async_trait]
pub trait Framer: Send {
    /// Short transport tag used in trace output.
    fn name(&self) -> &'static str;

    /// Resets the transmit buffer and returns it for writing the next
    /// request.
    fn msg_writer(&mut self) -> &mut BytesMut;

    /// Finalizes the buffered request, arms reception and writes the frame
    /// to the transport. Returns the ADU as it was sent.
    async fn send(&mut self) -> Result<Adu, Error>;

    /// Waits for the response frame. The returned ADU carries the bytes
    /// collected so far even when the result is an error, so the engine
    /// can trace and diagnose partial receptions.
    async fn receive(
        &mut self,
        cancel: &CancellationToken,
        timeout: Duration,
        len_spec: Option<&ExpectedRespLenSpec>,
    ) -> (Adu, Result<(), Error>);
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn u16_len(len: usize) -> u16 {
    // This type conversion should always be safe, because either
    // the caller is responsible to pass a valid usize or the
    // possible values are limited by the protocol.
    debug_assert!(len <= u16::MAX.into());
    len as u16
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn u8_len(len: usize) -> u8 {
    // This type conversion should always be safe, because either
    // the caller is responsible to pass a valid usize or the
    // possible values are limited by the protocol.
    debug_assert!(len <= u8::MAX.into());
    len as u8
}
