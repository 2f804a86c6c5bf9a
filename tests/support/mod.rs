// SPDX-FileCopyrightText: Copyright (c) 2017-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Helpers shared by the transaction tests.

#![allow(dead_code)]

use bytes::{BufMut, BytesMut};
use modbus_master::client::{Request, Response};
use modbus_master::Error;

/// Request writing a fixed data part.
pub struct RawReq(pub Vec<u8>);

impl Request for RawReq {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), Error> {
        buf.put_slice(&self.0);
        Ok(())
    }
}

/// Response recording the decoded data part.
#[derive(Default)]
pub struct RawResp {
    pub data: Vec<u8>,
    pub decode_calls: usize,
}

impl Response for RawResp {
    fn decode(&mut self, data: &[u8]) -> Result<(), Error> {
        self.decode_calls += 1;
        self.data = data.to_vec();
        Ok(())
    }
}

/// Builds an RTU frame: `addr | pdu | crc_lo | crc_hi`.
#[cfg(feature = "rtu")]
pub fn rtu_frame(addr: u8, pdu: &[u8]) -> Vec<u8> {
    let mut frame = vec![addr];
    frame.extend_from_slice(pdu);
    let crc = modbus_master::codec::rtu::checksum(&frame);
    frame.push(crc as u8);
    frame.push((crc >> 8) as u8);
    frame
}

/// Builds an MBAP frame: `txn_id | proto_id | length | unit | pdu`.
#[cfg(feature = "tcp")]
pub fn mbap_frame(txn_id: u16, unit: u8, pdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(7 + pdu.len());
    frame.extend_from_slice(&txn_id.to_be_bytes());
    frame.extend_from_slice(&[0x00, 0x00]);
    frame.extend_from_slice(&(1 + pdu.len() as u16).to_be_bytes());
    frame.push(unit);
    frame.extend_from_slice(pdu);
    frame
}
