// SPDX-FileCopyrightText: Copyright (c) 2017-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The transaction engine: request encoding, response matching, retries
//! and the per-request policy knobs.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    codec::Framer,
    error::{Error, MismatchError, MsgContext},
    frame::{Exception, ExpectedRespLenSpec, FunctionCode, MsgHdr, VariableRespLenSpec, ERROR_MASK},
    slave::{Slave, SlaveId},
    stats::RequestStats,
};

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "tcp")]
pub mod tcp;

// Unit address, function code and data must fit an RTU frame next to the
// two CRC bytes.
const MAX_REQ_LEN: usize = 254;

/// Writes the data part of a request PDU, i.e. everything after the
/// function code.
pub trait Request: Send + Sync {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), Error>;
}

/// Parses the data part of a response PDU, i.e. everything after the
/// function code.
pub trait Response: Send {
    fn decode(&mut self, data: &[u8]) -> Result<(), Error>;

    /// Preferred response length spec. Adopted by the engine unless the
    /// caller overrides it per request.
    fn expected_len_spec(&self) -> Option<ExpectedRespLenSpec> {
        None
    }
}

/// Examines an error and the number of retries already performed, and
/// decides whether the request shall be retried.
pub type RetryFunc = Arc<dyn Fn(&Error, usize) -> bool + Send + Sync>;

/// Human-readable protocol trace sink; receives one line per transmitted
/// or received frame.
pub type TraceFunc = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default)]
struct LongTurnaroundLimit {
    min_elapsed_since_prev: Duration,
    min_duration: Duration,
}

/// Per-request policy options. Engine defaults apply for everything that
/// is not set explicitly.
#[derive(Default, Clone)]
pub struct RequestOptions {
    cancel: Option<CancellationToken>,
    timeout: Option<Duration>,
    timeout_incr: Duration,
    wait_full: Duration,
    n_retries_on_timeout: usize,
    n_retries_on_invalid_reply: usize,
    retry_delay: Duration,
    retry_func: Option<RetryFunc>,
    expected_len_spec: Option<ExpectedRespLenSpec>,
    trace: Option<TraceFunc>,
    long_turnaround: LongTurnaroundLimit,
}

impl RequestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Carries cancellation into the reception path.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Expect a fixed response PDU size, allowing the reception to return
    /// as early as possible.
    #[must_use]
    pub fn expected_resp_len(mut self, len: usize) -> Self {
        self.expected_len_spec = Some(ExpectedRespLenSpec::Fixed(vec![len]));
        self
    }

    /// Expect one of several response PDU sizes. A zero after the first
    /// entry admits any length.
    #[must_use]
    pub fn expected_resp_lengths(mut self, lengths: Vec<usize>) -> Self {
        self.expected_len_spec = Some(ExpectedRespLenSpec::Fixed(lengths));
        self
    }

    /// Describe a variable-length response layout.
    #[must_use]
    pub fn variable_resp_len(mut self, spec: VariableRespLenSpec) -> Self {
        self.expected_len_spec = Some(ExpectedRespLenSpec::Variable(spec));
        self
    }

    /// Overrides the engine's default response timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sleep until `duration` has passed since the request went out,
    /// regardless of how fast the reply came. Used to honor bus guard
    /// times.
    #[must_use]
    pub fn wait_full(mut self, duration: Duration) -> Self {
        self.wait_full = duration;
        self
    }

    /// Retry up to `n` times on timeout, growing the timeout by `incr`
    /// with every attempt.
    #[must_use]
    pub fn retry_on_timeout(mut self, n: usize, incr: Duration) -> Self {
        self.n_retries_on_timeout = n;
        self.timeout_incr = incr;
        self
    }

    /// Retry up to `n` times on corrupted or non-matching replies,
    /// sleeping `delay` before each attempt.
    #[must_use]
    pub fn retry_on_invalid_reply(mut self, n: usize, delay: Duration) -> Self {
        self.n_retries_on_invalid_reply = n;
        self.retry_delay = delay;
        self
    }

    /// Custom retry predicate, consulted before the two builtin policies.
    #[must_use]
    pub fn with_retry_func(mut self, retry: RetryFunc) -> Self {
        self.retry_func = Some(retry);
        self
    }

    /// Per-request trace sink.
    #[must_use]
    pub fn with_trace_func(mut self, trace: TraceFunc) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Rejects a request that is initiated less than `min_elapsed` after a
    /// previous one showed a turnaround time of at least `min_duration`.
    /// Keeps devices on a slow link from delaying requests to others.
    #[must_use]
    pub fn limit_long_turnaround(mut self, min_elapsed: Duration, min_duration: Duration) -> Self {
        self.long_turnaround.min_elapsed_since_prev = min_elapsed;
        self.long_turnaround.min_duration = min_duration;
        self
    }
}

struct ResolvedOptions {
    cancel: CancellationToken,
    timeout: Duration,
    timeout_incr: Duration,
    wait_full: Duration,
    n_retries_on_timeout: usize,
    n_retries_on_invalid_reply: usize,
    retry_delay: Duration,
    retry_func: Option<RetryFunc>,
    expected_len_spec: Option<ExpectedRespLenSpec>,
    trace: Option<TraceFunc>,
    long_turnaround: LongTurnaroundLimit,
}

impl ResolvedOptions {
    async fn can_retry(&mut self, err: &Error, n_retries: usize) -> bool {
        if let Some(retry) = &self.retry_func {
            if retry(err, n_retries) {
                return true;
            }
        }
        if matches!(err, Error::Timeout) {
            if n_retries < self.n_retries_on_timeout {
                self.timeout += self.timeout_incr;
                return true;
            }
        } else if n_retries < self.n_retries_on_invalid_reply && err.is_msg_invalid() {
            if !self.retry_delay.is_zero() {
                sleep(self.retry_delay).await;
            }
            return true;
        }
        false
    }
}

#[derive(Debug, Default)]
struct LongTurnaroundTracker {
    t_prev: Option<Instant>,
    addr: SlaveId,
    rejected_other_addrs: bool,
}

impl LongTurnaroundTracker {
    fn record(&mut self, t_prev: Instant, addr: SlaveId) {
        self.t_prev = Some(t_prev);
        self.addr = addr;
        self.rejected_other_addrs = false;
    }

    fn allowed(&mut self, addr: SlaveId, min_elapsed: Duration) -> bool {
        if let Some(t_prev) = self.t_prev {
            if t_prev.elapsed() < min_elapsed {
                if addr != self.addr {
                    self.rejected_other_addrs = true;
                }
                return false;
            }
        }
        if self.addr == addr && self.rejected_other_addrs {
            // one more rejection, so the other addresses get a turn first
            self.addr = 0;
            return false;
        }
        true
    }
}

/// Transaction-oriented view of a request/response network.
#[async_trait]
pub trait Bus: Send {
    async fn request(
        &mut self,
        slave: SlaveId,
        fn_code: FunctionCode,
        req: Option<&dyn Request>,
        resp: Option<&mut dyn Response>,
        opts: &RequestOptions,
    ) -> Result<(), Error>;
}

/// The transaction engine. Serializes requests over one framer and applies
/// the timeout, retry and admission policies.
pub struct Network {
    framer: Box<dyn Framer>,
    /// Default timeout waiting for a response.
    pub response_timeout: Duration,
    /// Bus silence inserted after a broadcast request.
    pub turnaround_delay: Duration,
    /// Default trace sink; per-request options take precedence.
    pub trace: Option<TraceFunc>,
    long_turnaround: LongTurnaroundTracker,
    stats: RequestStats,
}

impl Network {
    #[must_use]
    pub fn new(framer: impl Framer + 'static) -> Self {
        Self {
            framer: Box::new(framer),
            response_timeout: Duration::from_millis(1000),
            turnaround_delay: Duration::from_millis(4),
            trace: None,
            long_turnaround: LongTurnaroundTracker::default(),
            stats: RequestStats::default(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> &RequestStats {
        &self.stats
    }

    /// Issues one transaction: encode, send, receive, validate, classify,
    /// retry. With `slave` zero the request is broadcast and no response is
    /// awaited.
    pub async fn request(
        &mut self,
        slave: SlaveId,
        fn_code: FunctionCode,
        req: Option<&dyn Request>,
        resp: Option<&mut dyn Response>,
        opts: &RequestOptions,
    ) -> Result<(), Error> {
        let result = self.transact(slave, fn_code, req, resp, opts).await;
        self.stats.update(&result);
        result
    }

    async fn transact(
        &mut self,
        slave: SlaveId,
        fn_code: FunctionCode,
        req: Option<&dyn Request>,
        mut resp: Option<&mut dyn Response>,
        opts: &RequestOptions,
    ) -> Result<(), Error> {
        let mut rqo = ResolvedOptions {
            cancel: opts.cancel.clone().unwrap_or_default(),
            timeout: opts.timeout.unwrap_or(self.response_timeout),
            timeout_incr: opts.timeout_incr,
            wait_full: opts.wait_full,
            n_retries_on_timeout: opts.n_retries_on_timeout,
            n_retries_on_invalid_reply: opts.n_retries_on_invalid_reply,
            retry_delay: opts.retry_delay,
            retry_func: opts.retry_func.clone(),
            expected_len_spec: opts
                .expected_len_spec
                .clone()
                .or_else(|| resp.as_ref().and_then(|r| r.expected_len_spec())),
            trace: opts.trace.clone().or_else(|| self.trace.clone()),
            long_turnaround: opts.long_turnaround,
        };

        let min_elapsed = rqo.long_turnaround.min_elapsed_since_prev;
        if !min_elapsed.is_zero() && !self.long_turnaround.allowed(slave, min_elapsed) {
            return Err(Error::Rejected);
        }

        let mut n_retries = 0;
        let mut t0 = None;
        let result = loop {
            let buf = self.framer.msg_writer();
            let base = buf.len();
            buf.put_u8(slave);
            buf.put_u8(fn_code);
            if let Some(req) = req {
                if let Err(err) = req.encode(buf) {
                    break Err(err);
                }
            }
            if buf.len() - base > MAX_REQ_LEN {
                break Err(Error::MaxReqLenExceeded);
            }

            let sent = match self.framer.send().await {
                Ok(adu) => adu,
                Err(err) => break Err(err),
            };
            if let Some(trace) = &rqo.trace {
                trace(&format!(
                    "<- {} [{}] {}",
                    self.framer.name(),
                    sent.bytes.len(),
                    hex_bytes(&sent.bytes)
                ));
            }
            if !Slave(slave).expects_response() {
                // broadcast: only keep the bus silent for the turnaround
                sleep(self.turnaround_delay).await;
                break Ok(());
            }

            let attempt_t0 = Instant::now();
            t0 = Some(attempt_t0);
            let (adu, mut outcome) = self
                .framer
                .receive(&rqo.cancel, rqo.timeout, rqo.expected_len_spec.as_ref())
                .await;
            let t_resp = Instant::now();
            let resp_delayed = !rqo.long_turnaround.min_duration.is_zero()
                && t_resp.duration_since(attempt_t0) >= rqo.long_turnaround.min_duration;

            let hdr = adu
                .addr_pdu()
                .filter(|(_, pdu)| !pdu.is_empty())
                .map(|(addr, pdu)| (addr, pdu[0]));
            if let Some((resp_addr, resp_fn)) = hdr {
                let want = MsgHdr {
                    addr: slave,
                    fn_code,
                };
                let have = MsgHdr {
                    addr: resp_addr,
                    fn_code: resp_fn,
                };
                if !want.matches_addr(have) || !want.matches_fn(have) {
                    let inner = outcome.err();
                    outcome = Err(Error::Mismatch(MismatchError::new(want, have, inner)));
                } else if outcome.is_err() && adu.bytes == sent.bytes {
                    // only a loopback of the request was heard
                    outcome = Err(Error::UnexpectedEcho);
                }
            }
            if let Some(trace) = &rqo.trace {
                let line = format!(
                    "-> {} [{}] {}",
                    self.framer.name(),
                    adu.bytes.len(),
                    hex_bytes(&adu.bytes)
                );
                match &outcome {
                    Ok(()) => trace(&line),
                    Err(err) => trace(&format!("{line} error: {err}")),
                }
            }

            if let Err(err) = outcome {
                if matches!(err, Error::Canceled) {
                    break Err(err);
                }
                if resp_delayed && matches!(err, Error::Timeout) {
                    self.long_turnaround.record(t_resp, slave);
                }
                if rqo.can_retry(&err, n_retries).await {
                    n_retries += 1;
                    continue;
                }
                break Err(err);
            }

            let Some((_, pdu)) = adu.addr_pdu() else {
                break Err(Error::invalid_len(MsgContext::Adu, adu.bytes.len(), vec![4]));
            };
            if let Some(spec) = &rqo.expected_len_spec {
                if let Err(err) = spec.check(pdu) {
                    if adu.bytes == sent.bytes {
                        break Err(Error::UnexpectedEcho);
                    }
                    break Err(err);
                }
            }
            if pdu[0] == ERROR_MASK | fn_code {
                if pdu.len() != 2 {
                    break Err(Error::invalid_len(MsgContext::Pdu, pdu.len(), vec![2]));
                }
                let exception = Exception::new(pdu[1]);
                if resp_delayed
                    && matches!(
                        exception,
                        Exception::GatewayPathUnavailable
                            | Exception::GatewayTargetFailedToRespond
                    )
                {
                    self.long_turnaround.record(t_resp, slave);
                }
                let err = Error::Exception(exception);
                if rqo.can_retry(&err, n_retries).await {
                    n_retries += 1;
                    continue;
                }
                break Err(err);
            }
            break match &mut resp {
                Some(resp) => resp.decode(&pdu[1..]),
                None => Ok(()),
            };
        };

        if let Some(t0) = t0 {
            if !rqo.wait_full.is_zero() {
                let until = t0 + rqo.wait_full;
                if until > Instant::now() {
                    sleep_until(until).await;
                }
            }
        }
        result
    }
}

#[async_trait]
impl Bus for Network {
    async fn request(
        &mut self,
        slave: SlaveId,
        fn_code: FunctionCode,
        req: Option<&dyn Request>,
        resp: Option<&mut dyn Response>,
        opts: &RequestOptions,
    ) -> Result<(), Error> {
        Network::request(self, slave, fn_code, req, resp, opts).await
    }
}

fn hex_bytes(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            s.push(' ');
        }
        let _ = write!(s, "{byte:02x}");
    }
    s
}
