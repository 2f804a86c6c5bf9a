// SPDX-FileCopyrightText: Copyright (c) 2017-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stream-to-frame reception machinery shared by the RTU and TCP framers.
//!
//! A producer task reads raw bytes from the transport and hands them over
//! one chunk at a time; the consuming task drives the reception state
//! machine through [`FrameReader::start_reception`] and
//! [`FrameReader::read_frame`]. A frame interceptor inspects the
//! accumulated bytes after every chunk and can declare the frame complete
//! before any timer expires.
//!
//! The producer stays paused while a chunk is unconsumed, so at most one
//! chunk is ever in flight and cancellation takes effect at a chunk
//! boundary.

use std::io;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use smallvec::SmallVec;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Inter-byte timeout baseline, roughly 3.5 character times at 19200 baud
/// and above.
pub const INTER_BYTE_TIMEOUT: Duration = Duration::from_micros(1750);

const INTERNAL_BUF_SIZE: usize = 512;

/// Completion verdict of a frame interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// More bytes are required.
    Incomplete,
    /// The frame is structurally complete. Reception still settles through
    /// one more inter-byte window, so trailing bytes can revoke the
    /// verdict before the frame is returned.
    Complete,
    /// The frame is complete and unambiguously delimited; return it without
    /// waiting for line silence.
    CompleteSkipTimeout,
}

/// Inspects `(msg, new)`: the frame bytes accumulated so far and the part
/// of them that was just appended. Invoked once per received chunk.
pub type FrameInterceptor = Box<dyn FnMut(&[u8], &[u8]) -> FrameStatus + Send>;

/// Sink for bytes received outside of a reception window.
pub type ForwardSink = Box<dyn FnMut(&[u8]) + Send>;

/// Per-reception options.
#[derive(Default)]
pub struct ReceptionOptions {
    echo: Option<Bytes>,
    interceptor: Option<FrameInterceptor>,
}

impl ReceptionOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Expect the transport to echo `frame` back before the actual
    /// response. The echo is verified and stripped from the result.
    #[must_use]
    pub fn with_local_echo(mut self, frame: Bytes) -> Self {
        self.echo = Some(frame);
        self
    }

    #[must_use]
    pub fn with_frame_interceptor(mut self, interceptor: FrameInterceptor) -> Self {
        self.interceptor = Some(interceptor);
        self
    }
}

/// Timeouts applied by [`FrameReader::read_frame`].
#[derive(Debug, Clone, Copy)]
pub struct ReadTimeouts {
    /// Bounds the whole call.
    pub initial: Duration,
    /// Armed after every chunk; a zero value returns the frame as soon as
    /// the first chunk arrived.
    pub inter_byte: Duration,
    /// Extra line-silence budget granted while the interceptor keeps
    /// reporting [`FrameStatus::Incomplete`].
    pub ext_inter_byte: Duration,
}

impl ReadTimeouts {
    #[must_use]
    pub fn new(initial: Duration) -> Self {
        Self {
            initial,
            inter_byte: INTER_BYTE_TIMEOUT,
            ext_inter_byte: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_inter_byte(mut self, inter_byte: Duration) -> Self {
        self.inter_byte = inter_byte;
        self
    }

    #[must_use]
    pub fn with_ext_inter_byte(mut self, ext_inter_byte: Duration) -> Self {
        self.ext_inter_byte = ext_inter_byte;
        self
    }
}

enum Chunk {
    Data(Bytes),
    Eof,
    Err(io::Error),
}

#[derive(Debug)]
enum Term {
    Eof,
    Io(io::ErrorKind, String),
}

impl Term {
    fn to_error(&self) -> Error {
        match self {
            Term::Eof => Error::EndOfStream,
            Term::Io(kind, msg) => Error::Io(io::Error::new(*kind, msg.clone())),
        }
    }
}

/// Converts a continuous byte stream into one frame at a time.
pub struct FrameReader {
    data_rx: mpsc::Receiver<Chunk>,
    ack_tx: mpsc::Sender<()>,
    dest: BytesMut,
    receiving: bool,
    echo: Option<Bytes>,
    interceptor: Option<FrameInterceptor>,
    forward: Option<ForwardSink>,
    term: Option<Term>,
}

impl FrameReader {
    /// Spawns the producer task reading from `transport`.
    pub fn new<R>(transport: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let (data_tx, data_rx) = mpsc::channel(1);
        let (ack_tx, ack_rx) = mpsc::channel(1);
        tokio::spawn(produce(transport, data_tx, ack_rx));
        Self {
            data_rx,
            ack_tx,
            dest: BytesMut::with_capacity(INTERNAL_BUF_SIZE),
            receiving: false,
            echo: None,
            interceptor: None,
            forward: None,
            term: None,
        }
    }

    /// Diverts bytes received outside a reception window into `sink`
    /// instead of discarding them.
    pub fn set_forward(&mut self, sink: ForwardSink) {
        self.forward = Some(sink);
    }

    /// Resets the destination buffer and admits new bytes. Returns the
    /// latched error if the transport has terminated.
    pub fn start_reception(&mut self, opts: ReceptionOptions) -> Result<(), Error> {
        self.drain_pending();
        if let Some(term) = &self.term {
            return Err(term.to_error());
        }
        self.dest.clear();
        self.echo = opts.echo;
        self.interceptor = opts.interceptor;
        self.receiving = true;
        Ok(())
    }

    /// Discards the current reception. Buffered bytes go to the forward
    /// sink, if one is set.
    pub fn cancel_reception(&mut self) {
        if self.receiving && !self.dest.is_empty() {
            let buf = self.dest.split();
            if let Some(forward) = &mut self.forward {
                forward(&buf);
            }
        }
        self.reset();
    }

    /// Waits for a complete frame. Returns the bytes collected so far even
    /// when the second element is an error, so callers can diagnose and
    /// trace partial receptions.
    pub async fn read_frame(
        &mut self,
        cancel: &CancellationToken,
        timeouts: ReadTimeouts,
    ) -> (Bytes, Result<(), Error>) {
        if !self.receiving {
            let err = match &self.term {
                Some(term) => term.to_error(),
                None => Error::Io(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "no reception in progress",
                )),
            };
            return (Bytes::new(), Err(err));
        }

        let deadline = Instant::now() + timeouts.initial;
        let nto_max = if timeouts.inter_byte.is_zero() {
            0
        } else {
            timeouts
                .ext_inter_byte
                .as_micros()
                .div_ceil(timeouts.inter_byte.as_micros()) as usize
        };
        let mut nto = 0;
        let mut skip = 0;
        let mut status = FrameStatus::Incomplete;
        let mut inter_byte_deadline = Instant::now() + Duration::from_secs(86_400 * 365 * 30);

        loop {
            tokio::select! {
                chunk = self.data_rx.recv() => {
                    let data = match chunk {
                        None | Some(Chunk::Eof) => {
                            self.term.get_or_insert(Term::Eof);
                            return (self.take_frame(skip), Err(Error::EndOfStream));
                        }
                        Some(Chunk::Err(err)) => {
                            self.term = Some(Term::Io(err.kind(), err.to_string()));
                            return (self.take_frame(skip), Err(Error::Io(err)));
                        }
                        Some(Chunk::Data(data)) => data,
                    };
                    let prev_len = self.dest.len();
                    self.dest.extend_from_slice(&data);
                    let _ = self.ack_tx.try_send(());

                    if let Some(echo) = self.echo.clone() {
                        if self.dest.len() < echo.len() {
                            continue;
                        }
                        if self.dest[..echo.len()] != echo[..] {
                            return (self.take_frame(0), Err(Error::EchoMismatch));
                        }
                        skip = echo.len();
                        self.echo = None;
                        if self.dest.len() == skip {
                            continue;
                        }
                        // the whole tail past the echo is new
                        status = self.intercept(skip, skip);
                    } else {
                        status = self.intercept(skip, prev_len.max(skip));
                    }

                    match status {
                        FrameStatus::CompleteSkipTimeout => {
                            return (self.take_frame(skip), Ok(()));
                        }
                        FrameStatus::Complete | FrameStatus::Incomplete => {
                            if timeouts.inter_byte.is_zero() {
                                return (self.take_frame(skip), Ok(()));
                            }
                            nto = 0;
                            inter_byte_deadline = Instant::now() + timeouts.inter_byte;
                        }
                    }
                }
                () = sleep_until(inter_byte_deadline) => {
                    if status == FrameStatus::Complete {
                        return (self.take_frame(skip), Ok(()));
                    }
                    if self.dest.len() > skip && nto < nto_max {
                        nto += 1;
                        inter_byte_deadline = Instant::now() + timeouts.inter_byte;
                    } else {
                        // possibly incomplete; the framer validates
                        return (self.take_frame(skip), Ok(()));
                    }
                }
                () = sleep_until(deadline) => {
                    if self.echo.is_some() {
                        let err = if self.dest.is_empty() {
                            Error::Timeout
                        } else {
                            Error::InvalidEchoLen
                        };
                        return (self.take_frame(0), Err(err));
                    }
                    if status == FrameStatus::Complete {
                        return (self.take_frame(skip), Ok(()));
                    }
                    return (self.take_frame(skip), Err(Error::Timeout));
                }
                () = cancel.cancelled() => {
                    return (self.take_frame(skip), Err(Error::Canceled));
                }
            }
        }
    }

    fn intercept(&mut self, skip: usize, new_start: usize) -> FrameStatus {
        match &mut self.interceptor {
            Some(interceptor) => interceptor(&self.dest[skip..], &self.dest[new_start..]),
            None => FrameStatus::Incomplete,
        }
    }

    fn take_frame(&mut self, skip: usize) -> Bytes {
        let frame = self.dest.split().freeze();
        self.reset();
        frame.slice(skip..)
    }

    fn reset(&mut self) {
        self.receiving = false;
        self.echo = None;
        self.interceptor = None;
        self.dest.clear();
    }

    /// Consumes (and forwards) anything that arrived while idle.
    fn drain_pending(&mut self) {
        let mut dropped: SmallVec<[u8; 64]> = SmallVec::new();
        while let Ok(chunk) = self.data_rx.try_recv() {
            match chunk {
                Chunk::Data(data) => {
                    match &mut self.forward {
                        Some(forward) => forward(&data),
                        None => dropped.extend_from_slice(&data),
                    }
                    let _ = self.ack_tx.try_send(());
                }
                Chunk::Eof => self.term = Some(Term::Eof),
                Chunk::Err(err) => self.term = Some(Term::Io(err.kind(), err.to_string())),
            }
        }
        if !dropped.is_empty() {
            log::warn!("dropped {} stale byte(s): {:02X?}", dropped.len(), &dropped[..]);
        }
    }
}

async fn produce<R>(mut transport: R, data_tx: mpsc::Sender<Chunk>, mut ack_rx: mpsc::Receiver<()>)
where
    R: AsyncRead + Send + Unpin,
{
    let mut buf = vec![0u8; INTERNAL_BUF_SIZE];
    loop {
        let chunk = tokio::select! {
            res = transport.read(&mut buf) => match res {
                Ok(0) => Chunk::Eof,
                Ok(n) => Chunk::Data(Bytes::copy_from_slice(&buf[..n])),
                Err(err) => Chunk::Err(err),
            },
            () = data_tx.closed() => return,
        };
        let terminal = !matches!(chunk, Chunk::Data(_));
        if data_tx.send(chunk).await.is_err() {
            return;
        }
        if terminal {
            return;
        }
        // stay paused until the consumer has taken the chunk
        if ack_rx.recv().await.is_none() {
            return;
        }
    }
}
