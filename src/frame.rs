// SPDX-FileCopyrightText: Copyright (c) 2017-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Frame and PDU level types shared by all transports.

use std::fmt;

use bytes::Bytes;

use crate::{
    error::{Error, MsgContext},
    slave::SlaveId,
};

/// Set in the function code of a response PDU that carries an exception.
pub const ERROR_MASK: u8 = 0x80;

/// A Modbus function code is represented by an unsigned 8 bit integer.
pub type FunctionCode = u8;

/// An application data unit: the raw frame bytes plus the offsets that
/// locate the PDU inside them.
///
/// `pdu_start` indexes the first PDU byte; `pdu_end` is a non-positive
/// offset from the end of the frame to the end of the PDU (`-2` skips an
/// RTU CRC trailer, `0` means the PDU extends to the end). The unit address
/// occupies the byte right before `pdu_start`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Adu {
    pub bytes: Bytes,
    pub pdu_start: usize,
    pub pdu_end: isize,
}

impl Adu {
    /// Returns the unit address and the PDU, or `None` if the frame is too
    /// small to contain them.
    #[must_use]
    pub fn addr_pdu(&self) -> Option<(SlaveId, &[u8])> {
        if self.pdu_start == 0 {
            return None;
        }
        let end = self.bytes.len() as isize + self.pdu_end;
        if end < self.pdu_start as isize {
            return None;
        }
        let addr = self.bytes[self.pdu_start - 1];
        Some((addr, &self.bytes[self.pdu_start..end as usize]))
    }
}

/// Address and function code of a request or response, used for matching
/// them against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHdr {
    pub addr: u8,
    pub fn_code: u8,
}

impl MsgHdr {
    #[must_use]
    pub fn matches_addr(self, other: MsgHdr) -> bool {
        self.addr == other.addr
    }

    /// A response function code matches either verbatim or with the error
    /// mask set.
    #[must_use]
    pub fn matches_fn(self, other: MsgHdr) -> bool {
        self.fn_code == other.fn_code || (ERROR_MASK | self.fn_code) == other.fn_code
    }
}

impl fmt::Display for MsgHdr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x} {:02x}", self.addr, self.fn_code)
    }
}

/// A server exception reported inside a response PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    DeviceFailure,
    Acknowledge,
    DeviceBusy,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetFailedToRespond,
    /// A code outside the defined set, including the reserved values.
    Other(u8),
}

impl Exception {
    #[must_use]
    pub fn new(code: u8) -> Self {
        use Exception::*;

        match code {
            0x01 => IllegalFunction,
            0x02 => IllegalDataAddress,
            0x03 => IllegalDataValue,
            0x04 => DeviceFailure,
            0x05 => Acknowledge,
            0x06 => DeviceBusy,
            0x08 => MemoryParityError,
            0x0A => GatewayPathUnavailable,
            0x0B => GatewayTargetFailedToRespond,
            code => Other(code),
        }
    }

    #[must_use]
    pub fn code(self) -> u8 {
        use Exception::*;

        match self {
            IllegalFunction => 0x01,
            IllegalDataAddress => 0x02,
            IllegalDataValue => 0x03,
            DeviceFailure => 0x04,
            Acknowledge => 0x05,
            DeviceBusy => 0x06,
            MemoryParityError => 0x08,
            GatewayPathUnavailable => 0x0A,
            GatewayTargetFailedToRespond => 0x0B,
            Other(code) => code,
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Exception::*;

        match self {
            IllegalFunction => f.write_str("illegal function"),
            IllegalDataAddress => f.write_str("illegal data address"),
            IllegalDataValue => f.write_str("illegal data value"),
            DeviceFailure => f.write_str("device failure"),
            Acknowledge => f.write_str("acknowledge"),
            DeviceBusy => f.write_str("device busy"),
            MemoryParityError => f.write_str("memory parity error"),
            GatewayPathUnavailable => f.write_str("gateway path unavailable"),
            GatewayTargetFailedToRespond => {
                f.write_str("gateway target device failed to respond")
            }
            Other(code) => write!(f, "unknown exception 0x{code:02X}"),
        }
    }
}

impl std::error::Error for Exception {}

/// Describes which response PDU sizes are acceptable, enabling the
/// reception machinery to return as early as possible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedRespLenSpec {
    /// A set of valid PDU lengths. A zero after the first entry admits any
    /// length.
    Fixed(Vec<usize>),
    /// A TLV-style walk for variable-length responses.
    Variable(VariableRespLenSpec),
}

impl ExpectedRespLenSpec {
    /// Checks a PDU (function code included) against the spec. Exception
    /// responses are always accepted; they are diagnosed separately.
    pub fn check(&self, pdu: &[u8]) -> Result<(), Error> {
        let n = pdu.len();
        if n == 2 && pdu[0] & ERROR_MASK != 0 {
            return Ok(());
        }
        match self {
            Self::Fixed(valid) => {
                let mut max = 0;
                for (i, &len) in valid.iter().enumerate() {
                    if i > 0 && len == 0 {
                        return Ok(());
                    }
                    if len == n {
                        return Ok(());
                    }
                    max = max.max(len);
                }
                if n > max {
                    Err(Error::invalid_len(MsgContext::Pdu, n, vec![max]))
                } else {
                    Err(Error::invalid_len(MsgContext::Pdu, n, valid.clone()))
                }
            }
            Self::Variable(spec) => {
                let (expected, ok) = spec.matches(pdu);
                if ok {
                    Ok(())
                } else {
                    Err(Error::invalid_len(MsgContext::Data, n, vec![expected]))
                }
            }
        }
    }
}

/// Layout of a variable-length response: an optional prefix, an item count
/// taken from a fixed value or from a byte within the PDU, per-item length
/// bytes, and a tail.
///
/// All indices are relative to the start of the PDU (function code at
/// index 0).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VariableRespLenSpec {
    pub prefix_len: usize,
    /// Fixed number of items; zero means the count is read from the PDU.
    pub num_items_fixed: usize,
    /// Index of the item count byte, used if `num_items_fixed` is zero.
    pub num_items_index: usize,
    /// Offset of an item's length byte, relative to the item start.
    pub item_len_index: usize,
    /// Fixed bytes following each item's variable part.
    pub item_tail_len: usize,
    pub tail_len: usize,
}

impl VariableRespLenSpec {
    /// Walks the layout as far as `pdu` allows. Returns the minimum number
    /// of bytes needed to proceed (or the total expected size once it is
    /// known) and whether `pdu` is exactly one complete response.
    #[must_use]
    pub fn matches(&self, pdu: &[u8]) -> (usize, bool) {
        let n = pdu.len();
        let mut nx = 0;
        let mut num_items = self.num_items_fixed;
        if num_items == 0 {
            nx += self.num_items_index + 1;
            if n < nx {
                return (nx, false);
            }
            num_items = usize::from(pdu[nx - 1]);
        }
        nx += self.prefix_len;
        if n < nx {
            return (nx, false);
        }
        for _ in 0..num_items {
            nx += self.item_len_index + 1;
            if n < nx {
                return (nx, false);
            }
            nx += usize::from(pdu[nx - 1]) + self.item_tail_len;
        }
        nx += self.tail_len;
        (nx, n == nx)
    }
}
