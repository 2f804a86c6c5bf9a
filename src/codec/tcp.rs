// SPDX-FileCopyrightText: Copyright (c) 2017-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MBAP framing for Modbus TCP.

use std::time::Duration;

use async_trait::async_trait;
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};
use tokio::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, MsgContext},
    frame::{Adu, ExpectedRespLenSpec},
    reader::{FrameInterceptor, FrameReader, FrameStatus, ReadTimeouts, ReceptionOptions},
};

use super::{u16_len, Framer};

// Size of the MBAP header without and with the unit id byte.
const HEADER_LEN: usize = 6;
const MBAP_HEADER_LEN: usize = HEADER_LEN + 1;

const MAX_PDU_LEN: usize = 253;
const MAX_ADU_LEN: usize = MBAP_HEADER_LEN + MAX_PDU_LEN;

const PROTOCOL_ID: u16 = 0x0000;

enum FrameCheck {
    Matched,
    /// Stale or keepalive frame; re-enable reception and wait for the next
    /// one.
    Skip,
}

/// Framer for Modbus TCP:
/// `txn_id(2) | proto_id(2) | length(2) | unit(1) | pdu`.
pub struct TcpFramer<T> {
    writer: WriteHalf<T>,
    reader: FrameReader,
    tx: BytesMut,
    transaction_id: u16,
}

impl<T> TcpFramer<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    #[must_use]
    pub fn new(transport: T) -> Self {
        let (rd, wr) = io::split(transport);
        Self {
            writer: wr,
            reader: FrameReader::new(rd),
            tx: BytesMut::with_capacity(MAX_ADU_LEN),
            transaction_id: 0,
        }
    }

    fn interceptor() -> FrameInterceptor {
        Box::new(|msg, _new| {
            if msg.len() < HEADER_LEN {
                return FrameStatus::Incomplete;
            }
            let length = usize::from(BigEndian::read_u16(&msg[4..6]));
            if msg.len() >= HEADER_LEN + length {
                FrameStatus::CompleteSkipTimeout
            } else {
                FrameStatus::Incomplete
            }
        })
    }

    fn check_frame(
        &self,
        adu: &Adu,
        len_spec: Option<&ExpectedRespLenSpec>,
    ) -> Result<FrameCheck, Error> {
        let buf = &adu.bytes;
        let n = buf.len();
        if n < MBAP_HEADER_LEN {
            return Err(Error::invalid_len(
                MsgContext::Adu,
                n,
                vec![MBAP_HEADER_LEN + 1],
            ));
        }
        if BigEndian::read_u16(&buf[2..4]) != PROTOCOL_ID {
            return Err(Error::WrongProtocolId);
        }
        let length = usize::from(BigEndian::read_u16(&buf[4..6]));
        if n != HEADER_LEN + length {
            return Err(Error::invalid_len(MsgContext::Adu, n, vec![HEADER_LEN + length]));
        }
        if length == 1 {
            // unit id without a PDU, keepalive-like
            log::debug!("skipping empty frame");
            return Ok(FrameCheck::Skip);
        }
        if let Some(spec) = len_spec {
            spec.check(&buf[MBAP_HEADER_LEN..])?;
        }
        let txn_id = BigEndian::read_u16(&buf[0..2]);
        if txn_id < self.transaction_id {
            log::debug!(
                "discarding stale response (transaction id {txn_id} < {})",
                self.transaction_id
            );
            return Ok(FrameCheck::Skip);
        }
        if txn_id != self.transaction_id {
            return Err(Error::TransactionIdMismatch);
        }
        Ok(FrameCheck::Matched)
    }
}

#[async_trait]
impl<T> Framer for TcpFramer<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn msg_writer(&mut self) -> &mut BytesMut {
        self.tx.clear();
        self.tx.reserve(MAX_ADU_LEN);
        // header is filled in on send
        self.tx.put_bytes(0, HEADER_LEN);
        &mut self.tx
    }

    async fn send(&mut self) -> Result<Adu, Error> {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        BigEndian::write_u16(&mut self.tx[0..2], self.transaction_id);
        let length = u16_len(self.tx.len() - HEADER_LEN);
        BigEndian::write_u16(&mut self.tx[4..6], length);

        let frame = self.tx.split().freeze();
        let adu = Adu {
            bytes: frame.clone(),
            pdu_start: MBAP_HEADER_LEN,
            pdu_end: 0,
        };

        self.reader.start_reception(
            ReceptionOptions::new().with_frame_interceptor(Self::interceptor()),
        )?;
        if let Err(err) = self.writer.write_all(&frame).await {
            self.reader.cancel_reception();
            return Err(err.into());
        }
        Ok(adu)
    }

    async fn receive(
        &mut self,
        cancel: &CancellationToken,
        timeout: Duration,
        len_spec: Option<&ExpectedRespLenSpec>,
    ) -> (Adu, Result<(), Error>) {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.duration_since(Instant::now());
            if remaining.is_zero() {
                return (
                    Adu {
                        pdu_start: MBAP_HEADER_LEN,
                        ..Adu::default()
                    },
                    Err(Error::Timeout),
                );
            }
            let timeouts = ReadTimeouts::new(remaining).with_inter_byte(remaining);
            let (bytes, result) = self.reader.read_frame(cancel, timeouts).await;
            let adu = Adu {
                bytes,
                pdu_start: MBAP_HEADER_LEN,
                pdu_end: 0,
            };
            if let Err(err) = result {
                return (adu, Err(err));
            }
            match self.check_frame(&adu, len_spec) {
                Ok(FrameCheck::Matched) => return (adu, Ok(())),
                Ok(FrameCheck::Skip) => {
                    if let Err(err) = self.reader.start_reception(
                        ReceptionOptions::new().with_frame_interceptor(Self::interceptor()),
                    ) {
                        return (adu, Err(err));
                    }
                }
                Err(err) => return (adu, Err(err)),
            }
        }
    }
}
