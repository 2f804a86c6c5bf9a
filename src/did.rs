// SPDX-FileCopyrightText: Copyright (c) 2017-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Read Device Identification (function 0x2B, MEI type 14).

use crate::{
    client::RequestOptions,
    device::Device,
    error::Error,
    frame::VariableRespLenSpec,
    mei,
};

/// MEI type of the Read Device Identification transport.
pub const MEI_TYPE: u8 = 14;

/// Access categories of a Read Device Identification request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Category {
    Basic = 1,
    Regular = 2,
    Extended = 3,
    /// Access to one individual object.
    Single = 4,
}

/// Identifies an identification object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObjectId(pub u8);

impl ObjectId {
    pub const VENDOR_NAME: Self = Self(0x00);
    pub const PRODUCT_CODE: Self = Self(0x01);
    pub const MAJOR_MINOR_REVISION: Self = Self(0x02);
    pub const VENDOR_URL: Self = Self(0x03);
    pub const PRODUCT_NAME: Self = Self(0x04);
    pub const MODEL_NAME: Self = Self(0x05);
    pub const USER_APPLICATION_NAME: Self = Self(0x06);

    /// Standard name of the object, if it has one.
    #[must_use]
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::VENDOR_NAME => "VendorName",
            Self::PRODUCT_CODE => "ProductCode",
            Self::MAJOR_MINOR_REVISION => "MajorMinorRevision",
            Self::VENDOR_URL => "VendorURL",
            Self::PRODUCT_NAME => "ProductName",
            Self::MODEL_NAME => "ModelName",
            Self::USER_APPLICATION_NAME => "UserApplicationName",
            _ => return None,
        };
        Some(name)
    }
}

/// One identification object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Object {
    pub id: ObjectId,
    pub data: Vec<u8>,
}

impl Object {
    /// The object data as text, if it is valid UTF-8.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

/// Reads identification objects from one device.
pub struct Reader<'a> {
    transport: mei::Transport<'a>,
}

impl<'a> Reader<'a> {
    #[must_use]
    pub fn new(device: Device<'a>) -> Self {
        Self {
            transport: mei::Transport::new(device, MEI_TYPE),
        }
    }

    /// Reads one individual object.
    pub async fn read_object(
        &mut self,
        id: ObjectId,
        opts: &RequestOptions,
    ) -> Result<Object, Error> {
        let mut list = self.read(Category::Single, id, opts).await?;
        list.pop().ok_or(Error::Decode("empty object list"))
    }

    /// Reads a category of objects starting at `start_id`, following
    /// "more follows" continuations.
    pub async fn read(
        &mut self,
        category: Category,
        start_id: ObjectId,
        opts: &RequestOptions,
    ) -> Result<Vec<Object>, Error> {
        let len_spec = VariableRespLenSpec {
            num_items_index: 6,
            item_len_index: 1,
            ..VariableRespLenSpec::default()
        };
        let opts = opts.clone().variable_resp_len(len_spec);

        let mut list = Vec::new();
        let mut start_id = start_id;
        let mut force_id = false;
        loop {
            let req = [category as u8, start_id.0];
            let resp = self.transport.request(&req, &opts).await?;

            // read dev id code, conformity, more follows, next object id,
            // number of objects
            if resp.len() < 5 {
                return Err(Error::Decode("device identification header too short"));
            }
            let more_follows = resp[2];
            let next_obj_id = resp[3];
            let num_objects = resp[4];
            let mut data = &resp[5..];

            if num_objects == 0 {
                if !data.is_empty() {
                    return Err(Error::Decode("invalid number of objects"));
                }
                return Ok(list);
            }
            if category == Category::Single
                && (more_follows != 0 || next_obj_id != 0 || num_objects != 1)
            {
                return Err(Error::Decode(
                    "invalid header values in a response to an individual access",
                ));
            }

            for i in 0..num_objects {
                let (object, tail) = parse_object(data)?;
                if force_id && i == 0 && object.id != start_id {
                    return Err(Error::Decode("start ID of continuation does not match"));
                }
                data = tail;
                list.push(object);
            }
            if !data.is_empty() {
                return Err(Error::Decode("unexpected trailing bytes"));
            }
            if more_follows == 0 {
                return Ok(list);
            }
            force_id = true;
            start_id = ObjectId(next_obj_id);
        }
    }
}

fn parse_object(data: &[u8]) -> Result<(Object, &[u8]), Error> {
    if data.len() < 2 {
        return Err(Error::Decode("not enough bytes to parse an object"));
    }
    let id = ObjectId(data[0]);
    let len = usize::from(data[1]);
    let data = &data[2..];
    if data.len() < len {
        return Err(Error::Decode("invalid number of object bytes"));
    }
    let object = Object {
        id,
        data: data[..len].to_vec(),
    };
    Ok((object, &data[len..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_objects() {
        let data = [0x00, 0x03, b'a', b'b', b'c', 0x01, 0x00];
        let (object, tail) = parse_object(&data).unwrap();
        assert_eq!(object.id, ObjectId::VENDOR_NAME);
        assert_eq!(object.as_str(), Some("abc"));

        let (object, tail) = parse_object(tail).unwrap();
        assert_eq!(object.id, ObjectId::PRODUCT_CODE);
        assert!(object.data.is_empty());
        assert!(tail.is_empty());

        assert!(parse_object(&[0x00]).is_err());
        assert!(parse_object(&[0x00, 0x05, 0x01]).is_err());
    }

    #[test]
    fn object_names() {
        assert_eq!(ObjectId::VENDOR_NAME.name(), Some("VendorName"));
        assert_eq!(ObjectId(0x80).name(), None);
    }
}
