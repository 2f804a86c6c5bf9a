// SPDX-FileCopyrightText: Copyright (c) 2017-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTU framing: CRC-16 checked frames delimited by line silence.

use std::env;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use tokio::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, MsgContext},
    frame::{Adu, ExpectedRespLenSpec},
    reader::{FrameInterceptor, FrameReader, FrameStatus, ForwardSink, ReadTimeouts, ReceptionOptions},
};

use super::Framer;

// [Modbus over Serial Line Specification and Implementation Guide V1.02](http://modbus.org/docs/Modbus_over_serial_line_V1_02.pdf), page 13
// "The maximum size of a Modbus RTU frame is 256 bytes."
const MAX_FRAME_LEN: usize = 256;

/// Line-silence budget granted while a response frame still fails its
/// checks, on top of the inter-byte baseline.
pub const DEFAULT_INTERFRAME_TIMEOUT: Duration = Duration::from_millis(50);

/// Running CRC-16 over the reversed IBM polynomial `0xA001`, initial value
/// `0xFFFF`, no final XOR. Serialized low byte first; feeding a frame
/// including its trailing checksum leaves a zero residue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc16 {
    state: u16,
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

impl Crc16 {
    #[must_use]
    pub fn new() -> Self {
        Self { state: 0xFFFF }
    }

    pub fn reset(&mut self) {
        self.state = 0xFFFF;
    }

    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.state ^= u16::from(byte);
            for _ in 0..8 {
                let odd = self.state & 0x0001 != 0;
                self.state >>= 1;
                if odd {
                    self.state ^= 0xA001;
                }
            }
        }
    }

    #[must_use]
    pub fn value(&self) -> u16 {
        self.state
    }
}

/// One-shot CRC-16 of `data`.
#[must_use]
pub fn checksum(data: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update(data);
    crc.value()
}

/// Tells whether `err` suggests that a response was cut off by a too short
/// inter-frame timeout, i.e. the remaining bytes might still have arrived
/// if reception had waited a little longer.
#[must_use]
pub fn maybe_truncated(err: &Error) -> bool {
    match err {
        Error::InvalidLen(e) => !e.too_long(),
        _ => false,
    }
}

/// Invoked after every failed reception. Returning a duration replaces the
/// inter-frame timeout used by subsequent receptions; see
/// [`maybe_truncated`].
pub type OnReceiveError = Box<dyn FnMut(&Error) -> Option<Duration> + Send>;

#[derive(Debug, Default)]
struct RxCheck {
    crc: Crc16,
    len_spec: Option<ExpectedRespLenSpec>,
}

/// Framer for Modbus RTU: `addr | fn | data | crc_lo | crc_hi`.
pub struct RtuFramer<T> {
    writer: WriteHalf<T>,
    reader: FrameReader,
    tx: BytesMut,
    rx_check: Arc<Mutex<RxCheck>>,
    local_echo: bool,
    interframe_timeout: Duration,
    on_receive_error: Option<OnReceiveError>,
}

impl<T> RtuFramer<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    #[must_use]
    pub fn new(transport: T) -> Self {
        let (rd, wr) = io::split(transport);
        Self {
            writer: wr,
            reader: FrameReader::new(rd),
            tx: BytesMut::with_capacity(MAX_FRAME_LEN),
            rx_check: Arc::new(Mutex::new(RxCheck::default())),
            local_echo: false,
            interframe_timeout: DEFAULT_INTERFRAME_TIMEOUT,
            on_receive_error: None,
        }
    }

    /// Expect the request frame to be echoed back before the response,
    /// e.g. on a two wire bus with a simple RS-485 adapter.
    #[must_use]
    pub fn with_local_echo(mut self, enabled: bool) -> Self {
        self.local_echo = enabled;
        self
    }

    #[must_use]
    pub fn with_interframe_timeout(mut self, timeout: Duration) -> Self {
        self.interframe_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_on_receive_error(mut self, hook: OnReceiveError) -> Self {
        self.on_receive_error = Some(hook);
        self
    }

    /// Diverts bytes received between transactions into `sink`, e.g. for a
    /// bus sniffer.
    pub fn set_forward(&mut self, sink: ForwardSink) {
        self.reader.set_forward(sink);
    }

    #[must_use]
    pub fn interframe_timeout(&self) -> Duration {
        self.interframe_timeout
    }

    fn interceptor(&self) -> FrameInterceptor {
        let rx_check = Arc::clone(&self.rx_check);
        Box::new(move |msg, new| {
            let mut rx = rx_check.lock().unwrap();
            rx.crc.update(new);
            if rx.crc.value() != 0 {
                return FrameStatus::Incomplete;
            }
            if msg.len() < 4 {
                return FrameStatus::Incomplete;
            }
            let pdu = &msg[1..msg.len() - 2];
            let len_ok = match &rx.len_spec {
                Some(spec) => spec.check(pdu).is_ok(),
                None => true,
            };
            if len_ok {
                FrameStatus::Complete
            } else {
                FrameStatus::Incomplete
            }
        })
    }

    fn check_frame(
        &self,
        adu: &Adu,
        len_spec: Option<&ExpectedRespLenSpec>,
    ) -> Result<(), Error> {
        let n = adu.bytes.len();
        if n < 4 {
            return Err(Error::invalid_len(MsgContext::Adu, n, vec![4]));
        }
        if let Some(spec) = len_spec {
            spec.check(&adu.bytes[1..n - 2])?;
        }
        // The inter-byte deadline may have fired before the interceptor
        // re-approved the accumulated bytes.
        if self.rx_check.lock().unwrap().crc.value() != 0 {
            return Err(Error::Crc);
        }
        Ok(())
    }
}

fn local_echo_forced_by_env() -> bool {
    static FORCED: OnceLock<bool> = OnceLock::new();
    *FORCED.get_or_init(|| env::var("MODBUS_RTU_LOCAL_ECHO").is_ok_and(|v| v == "1"))
}

#[async_trait]
impl<T> Framer for RtuFramer<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    fn name(&self) -> &'static str {
        "rtu"
    }

    fn msg_writer(&mut self) -> &mut BytesMut {
        self.tx.clear();
        self.tx.reserve(MAX_FRAME_LEN);
        &mut self.tx
    }

    async fn send(&mut self) -> Result<Adu, Error> {
        let crc = checksum(&self.tx);
        self.tx.put_u8(crc as u8);
        self.tx.put_u8((crc >> 8) as u8);
        let frame = self.tx.split().freeze();
        let adu = Adu {
            bytes: frame.clone(),
            pdu_start: 1,
            pdu_end: -2,
        };

        let mut opts = ReceptionOptions::new().with_frame_interceptor(self.interceptor());
        if self.local_echo || local_echo_forced_by_env() {
            opts = opts.with_local_echo(frame.clone());
        }
        self.reader.start_reception(opts)?;

        let result = async {
            self.writer.write_all(&frame).await?;
            // serial transports drain their TX queue on flush
            self.writer.flush().await
        }
        .await;
        if let Err(err) = result {
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
        {
            let mut rx = self.rx_check.lock().unwrap();
            rx.crc.reset();
            rx.len_spec = len_spec.cloned();
        }
        let timeouts =
            ReadTimeouts::new(timeout).with_ext_inter_byte(self.interframe_timeout);
        let (bytes, result) = self.reader.read_frame(cancel, timeouts).await;
        let adu = Adu {
            bytes,
            pdu_start: 1,
            pdu_end: -2,
        };
        let result = result.and_then(|()| self.check_frame(&adu, len_spec));
        if let Err(err) = &result {
            if let Some(hook) = &mut self.on_receive_error {
                if let Some(widened) = hook(err) {
                    log::debug!(
                        "widening inter-frame timeout to {:?} after receive error: {err}",
                        widened
                    );
                    self.interframe_timeout = widened;
                }
            }
        }
        (adu, result)
    }
}
