// SPDX-FileCopyrightText: Copyright (c) 2017-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types.

use std::{fmt, io};

use thiserror::Error;

use crate::frame::{Exception, MsgHdr};

/// Message part an [`InvalidLenError`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgContext {
    /// The whole framed message.
    Adu,
    /// Function code plus data.
    Pdu,
    /// The data part of a PDU.
    Data,
}

impl fmt::Display for MsgContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MsgContext::Adu => "ADU",
            MsgContext::Pdu => "PDU",
            MsgContext::Data => "data part",
        };
        f.write_str(s)
    }
}

/// A message, PDU or data part had an unexpected length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidLenError {
    pub context: MsgContext,
    pub have: usize,
    pub want: Vec<usize>,
}

impl InvalidLenError {
    /// There is exactly one acceptable length, and the message exceeds it.
    #[must_use]
    pub fn too_long(&self) -> bool {
        self.want.len() == 1 && self.have > self.want[0]
    }

    /// There is exactly one acceptable length, and the message falls short
    /// of it. Transports use this as a hint that a frame may have been
    /// truncated by a too short inter-frame timeout.
    #[must_use]
    pub fn too_short(&self) -> bool {
        self.want.len() == 1 && self.have < self.want[0]
    }
}

impl fmt::Display for InvalidLenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.too_long() {
            return write!(
                f,
                "{} too long (have {}, want {})",
                self.context, self.have, self.want[0]
            );
        }
        if self.too_short() {
            return write!(
                f,
                "{} too short (have {}, want {})",
                self.context, self.have, self.want[0]
            );
        }
        write!(
            f,
            "invalid {} length (have {}, want {:?})",
            self.context, self.have, self.want
        )
    }
}

impl std::error::Error for InvalidLenError {}

/// The response header does not belong to the request that was sent.
#[derive(Debug, Error)]
pub struct MismatchError {
    pub req: MsgHdr,
    pub resp: MsgHdr,
    #[source]
    pub source: Option<Box<Error>>,
}

impl MismatchError {
    #[must_use]
    pub fn new(req: MsgHdr, resp: MsgHdr, source: Option<Error>) -> Self {
        Self {
            req,
            resp,
            source: source.map(Box::new),
        }
    }
}

impl fmt::Display for MismatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = if self.req.addr != self.resp.addr {
            "addr"
        } else {
            "fn code"
        };
        write!(
            f,
            "{what} mismatch (expected: {}, got: {})",
            self.req, self.resp
        )
    }
}

/// Error type covering transport, framing, protocol and policy failures.
#[derive(Debug, Error)]
pub enum Error {
    /// No (complete) response arrived in time.
    #[error("timeout")]
    Timeout,

    /// The checksum of a received frame did not verify.
    #[error("CRC error")]
    Crc,

    /// The transport echoed something different from the request frame.
    #[error("local echo mismatch")]
    EchoMismatch,

    /// Only the local echo of the request was received.
    #[error("unexpected echo")]
    UnexpectedEcho,

    /// The local echo was shorter than the request frame.
    #[error("invalid local echo length")]
    InvalidEchoLen,

    /// The encoded request exceeds the maximum request length.
    #[error("max request length exceeded")]
    MaxReqLenExceeded,

    #[error(transparent)]
    InvalidLen(#[from] InvalidLenError),

    #[error(transparent)]
    Mismatch(#[from] MismatchError),

    /// The server replied with an exception response.
    #[error(transparent)]
    Exception(#[from] Exception),

    /// An MBAP header carried a protocol identifier other than zero.
    #[error("wrong protocol ID")]
    WrongProtocolId,

    /// An MBAP response carried a transaction ID from the future.
    #[error("transaction ID mismatch")]
    TransactionIdMismatch,

    /// Rejected by long-turnaround admission control before touching the
    /// wire.
    #[error("request rejected")]
    Rejected,

    /// The request was canceled.
    #[error("canceled")]
    Canceled,

    /// The byte transport has terminated.
    #[error("end of stream")]
    EndOfStream,

    /// A response decoder rejected the payload.
    #[error("{0}")]
    Decode(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn invalid_len(context: MsgContext, have: usize, want: Vec<usize>) -> Self {
        Self::InvalidLen(InvalidLenError {
            context,
            have,
            want,
        })
    }

    /// Tells whether the error describes a corrupted or non-matching reply,
    /// as opposed to a missing one. These errors are subject to the
    /// invalid-reply retry policy.
    #[must_use]
    pub fn is_msg_invalid(&self) -> bool {
        matches!(
            self,
            Self::InvalidLen(_) | Self::Mismatch(_) | Self::InvalidEchoLen | Self::Crc
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_len_display() {
        let err = Error::invalid_len(MsgContext::Pdu, 3, vec![5]);
        assert_eq!(format!("{err}"), "PDU too short (have 3, want 5)");

        let err = Error::invalid_len(MsgContext::Pdu, 7, vec![5]);
        assert_eq!(format!("{err}"), "PDU too long (have 7, want 5)");

        let err = Error::invalid_len(MsgContext::Adu, 3, vec![5, 7]);
        assert_eq!(format!("{err}"), "invalid ADU length (have 3, want [5, 7])");
    }

    #[test]
    fn mismatch_display() {
        let req = MsgHdr {
            addr: 0x01,
            fn_code: 0x03,
        };
        let resp = MsgHdr {
            addr: 0x01,
            fn_code: 0x83,
        };
        let err = MismatchError::new(req, resp, None);
        assert_eq!(
            format!("{err}"),
            "fn code mismatch (expected: 01 03, got: 01 83)"
        );

        let resp = MsgHdr {
            addr: 0x02,
            fn_code: 0x03,
        };
        let err = MismatchError::new(req, resp, None);
        assert_eq!(
            format!("{err}"),
            "addr mismatch (expected: 01 03, got: 02 03)"
        );
    }

    #[test]
    fn msg_invalid_classification() {
        assert!(Error::Crc.is_msg_invalid());
        assert!(Error::InvalidEchoLen.is_msg_invalid());
        assert!(Error::invalid_len(MsgContext::Pdu, 1, vec![2]).is_msg_invalid());
        let req = MsgHdr {
            addr: 1,
            fn_code: 3,
        };
        let resp = MsgHdr {
            addr: 2,
            fn_code: 3,
        };
        assert!(Error::Mismatch(MismatchError::new(req, resp, None)).is_msg_invalid());

        assert!(!Error::Timeout.is_msg_invalid());
        assert!(!Error::UnexpectedEcho.is_msg_invalid());
        assert!(!Error::EchoMismatch.is_msg_invalid());
        assert!(!Error::Rejected.is_msg_invalid());
        assert!(!Error::Exception(Exception::DeviceBusy).is_msg_invalid());
    }
}
