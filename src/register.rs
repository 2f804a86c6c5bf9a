// SPDX-FileCopyrightText: Copyright (c) 2017-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed access to holding and input registers. Words travel big-endian.

use bytes::{BufMut, BytesMut};

use crate::{
    client::{Request, RequestOptions, Response},
    codec::{u16_len, u8_len},
    device::Device,
    error::{Error, MsgContext},
    frame::ExpectedRespLenSpec,
};

const FN_READ_HOLDING_REGISTERS: u8 = 0x03;
const FN_READ_INPUT_REGISTERS: u8 = 0x04;
const FN_WRITE_SINGLE_REGISTER: u8 = 0x06;
const FN_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

struct ReadRegsReq {
    start: u16,
    quantity: u16,
}

impl Request for ReadRegsReq {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), Error> {
        buf.put_u16(self.start);
        buf.put_u16(self.quantity);
        Ok(())
    }
}

struct ReadRegsResp<'a> {
    out: &'a mut [u16],
}

impl Response for ReadRegsResp<'_> {
    fn decode(&mut self, data: &[u8]) -> Result<(), Error> {
        let want = 1 + 2 * self.out.len();
        if data.is_empty() {
            return Err(Error::invalid_len(MsgContext::Data, 0, vec![want]));
        }
        let byte_count = usize::from(data[0]);
        let payload = &data[1..];
        if byte_count != payload.len() {
            return Err(Error::Decode(
                "byte count field and data length inconsistent",
            ));
        }
        if payload.len() != 2 * self.out.len() {
            return Err(Error::invalid_len(
                MsgContext::Data,
                data.len(),
                vec![want],
            ));
        }
        for (word, chunk) in self.out.iter_mut().zip(payload.chunks_exact(2)) {
            *word = u16::from_be_bytes([chunk[0], chunk[1]]);
        }
        Ok(())
    }

    fn expected_len_spec(&self) -> Option<ExpectedRespLenSpec> {
        // fn code, byte count, payload
        Some(ExpectedRespLenSpec::Fixed(vec![2 + 2 * self.out.len()]))
    }
}

struct WriteRegsReq<'a> {
    start: u16,
    words: &'a [u16],
}

impl Request for WriteRegsReq<'_> {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), Error> {
        buf.put_u16(self.start);
        buf.put_u16(u16_len(self.words.len()));
        buf.put_u8(u8_len(2 * self.words.len()));
        for word in self.words {
            buf.put_u16(*word);
        }
        Ok(())
    }
}

/// Expects the echoed `(start, quantity)` or `(addr, value)` word pair.
struct EchoResp {
    first: u16,
    second: u16,
}

impl Response for EchoResp {
    fn decode(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.len() != 4 {
            return Err(Error::invalid_len(MsgContext::Data, data.len(), vec![4]));
        }
        let first = u16::from_be_bytes([data[0], data[1]]);
        let second = u16::from_be_bytes([data[2], data[3]]);
        if first != self.first || second != self.second {
            return Err(Error::Decode("write response does not echo the request"));
        }
        Ok(())
    }

    fn expected_len_spec(&self) -> Option<ExpectedRespLenSpec> {
        Some(ExpectedRespLenSpec::Fixed(vec![5]))
    }
}

struct WriteSingleRegReq {
    addr: u16,
    value: u16,
}

impl Request for WriteSingleRegReq {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), Error> {
        buf.put_u16(self.addr);
        buf.put_u16(self.value);
        Ok(())
    }
}

impl Device<'_> {
    /// Read `out.len()` holding registers starting at `start` (0x03).
    pub async fn read_holding_registers(
        &mut self,
        start: u16,
        out: &mut [u16],
        opts: &RequestOptions,
    ) -> Result<(), Error> {
        let req = ReadRegsReq {
            start,
            quantity: u16_len(out.len()),
        };
        let mut resp = ReadRegsResp { out };
        self.request(
            FN_READ_HOLDING_REGISTERS,
            Some(&req),
            Some(&mut resp),
            opts,
        )
        .await
    }

    /// Read `out.len()` input registers starting at `start` (0x04).
    pub async fn read_input_registers(
        &mut self,
        start: u16,
        out: &mut [u16],
        opts: &RequestOptions,
    ) -> Result<(), Error> {
        let req = ReadRegsReq {
            start,
            quantity: u16_len(out.len()),
        };
        let mut resp = ReadRegsResp { out };
        self.request(FN_READ_INPUT_REGISTERS, Some(&req), Some(&mut resp), opts)
            .await
    }

    /// Write a single holding register (0x06).
    pub async fn write_single_register(
        &mut self,
        addr: u16,
        value: u16,
        opts: &RequestOptions,
    ) -> Result<(), Error> {
        let req = WriteSingleRegReq { addr, value };
        let mut resp = EchoResp {
            first: addr,
            second: value,
        };
        self.request(FN_WRITE_SINGLE_REGISTER, Some(&req), Some(&mut resp), opts)
            .await
    }

    /// Write multiple holding registers (0x10).
    pub async fn write_multiple_registers(
        &mut self,
        start: u16,
        words: &[u16],
        opts: &RequestOptions,
    ) -> Result<(), Error> {
        let req = WriteRegsReq { start, words };
        let mut resp = EchoResp {
            first: start,
            second: u16_len(words.len()),
        };
        self.request(
            FN_WRITE_MULTIPLE_REGISTERS,
            Some(&req),
            Some(&mut resp),
            opts,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_read_request() {
        let req = ReadRegsReq {
            start: 0x006B,
            quantity: 3,
        };
        let mut buf = BytesMut::new();
        req.encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0x00, 0x6B, 0x00, 0x03]);
    }

    #[test]
    fn encode_write_request() {
        let req = WriteRegsReq {
            start: 0x0001,
            words: &[0x000A, 0x0102],
        };
        let mut buf = BytesMut::new();
        req.encode(&mut buf).unwrap();
        assert_eq!(
            &buf[..],
            &[0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]
        );
    }

    #[test]
    fn decode_read_response() {
        let mut out = [0u16; 3];
        let mut resp = ReadRegsResp { out: &mut out };
        resp.decode(&[0x06, 0x02, 0x2B, 0x00, 0x00, 0x00, 0x64])
            .unwrap();
        assert_eq!(out, [0x022B, 0x0000, 0x0064]);
    }

    #[test]
    fn decode_read_response_rejects_bad_lengths() {
        let mut out = [0u16; 2];
        let mut resp = ReadRegsResp { out: &mut out };
        // byte count does not match the payload
        assert!(matches!(
            resp.decode(&[0x04, 0x00, 0x01]),
            Err(Error::Decode(_))
        ));
        // payload does not match the expected register count
        let mut resp = ReadRegsResp { out: &mut out };
        assert!(matches!(
            resp.decode(&[0x02, 0x00, 0x01]),
            Err(Error::InvalidLen(_))
        ));
    }

    #[test]
    fn read_response_len_spec() {
        let mut out = [0u16; 3];
        let resp = ReadRegsResp { out: &mut out };
        assert_eq!(
            resp.expected_len_spec(),
            Some(ExpectedRespLenSpec::Fixed(vec![8]))
        );
    }

    #[test]
    fn decode_write_echo() {
        let mut resp = EchoResp {
            first: 0x0001,
            second: 0x0002,
        };
        resp.decode(&[0x00, 0x01, 0x00, 0x02]).unwrap();
        assert!(matches!(
            resp.decode(&[0x00, 0x01, 0x00, 0x03]),
            Err(Error::Decode(_))
        ));
        assert!(matches!(
            resp.decode(&[0x00, 0x01]),
            Err(Error::InvalidLen(_))
        ));
    }
}
