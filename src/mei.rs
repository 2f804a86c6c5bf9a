// SPDX-FileCopyrightText: Copyright (c) 2017-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus Encapsulated Interface transport (function code 0x2B).

use bytes::{BufMut, BytesMut};

use crate::{
    client::{Request, RequestOptions, Response},
    device::Device,
    error::{Error, MsgContext},
    frame::FunctionCode,
};

/// Function code of the encapsulated interface transport.
pub const FUNCTION_CODE: FunctionCode = 0x2B;

#[derive(Debug, Default)]
struct Msg {
    mei_type: u8,
    data: Vec<u8>,
}

impl Request for Msg {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), Error> {
        buf.put_u8(self.mei_type);
        buf.put_slice(&self.data);
        Ok(())
    }
}

impl Response for Msg {
    fn decode(&mut self, data: &[u8]) -> Result<(), Error> {
        // data starts with the MEI type, right after the function code
        if data.len() < 2 {
            return Err(Error::invalid_len(MsgContext::Data, data.len(), vec![2]));
        }
        if data[0] != self.mei_type {
            return Err(Error::Decode("wrong MEI type"));
        }
        self.data.clear();
        self.data.extend_from_slice(&data[1..]);
        Ok(())
    }
}

/// Transport for encapsulated-interface requests addressed to one device.
pub struct Transport<'a> {
    device: Device<'a>,
    mei_type: u8,
    resp: Msg,
}

impl<'a> Transport<'a> {
    #[must_use]
    pub fn new(device: Device<'a>, mei_type: u8) -> Self {
        Self {
            device,
            mei_type,
            resp: Msg {
                mei_type,
                ..Msg::default()
            },
        }
    }

    /// Issues an encapsulated request. Returns the response payload
    /// following the MEI type byte; the returned slice is only valid until
    /// the next request.
    pub async fn request(&mut self, req: &[u8], opts: &RequestOptions) -> Result<&[u8], Error> {
        let msg = Msg {
            mei_type: self.mei_type,
            data: req.to_vec(),
        };
        self.device
            .request(FUNCTION_CODE, Some(&msg), Some(&mut self.resp), opts)
            .await?;
        Ok(&self.resp.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_prepends_mei_type() {
        let msg = Msg {
            mei_type: 14,
            data: vec![0x01, 0x00],
        };
        let mut buf = BytesMut::new();
        msg.encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &[14, 0x01, 0x00]);
    }

    #[test]
    fn decode_verifies_mei_type() {
        let mut msg = Msg {
            mei_type: 14,
            data: Vec::new(),
        };
        msg.decode(&[14, 0x01, 0x02]).unwrap();
        assert_eq!(msg.data, vec![0x01, 0x02]);

        assert!(matches!(
            msg.decode(&[13, 0x01, 0x02]),
            Err(Error::Decode(_))
        ));
        assert!(matches!(msg.decode(&[14]), Err(Error::InvalidLen(_))));
    }
}
