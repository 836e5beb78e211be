// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use byteorder::{BigEndian, WriteBytesExt};

use crate::byte_array::ByteArray;
use crate::error::{DecodeError, EncodeError};

/// A byte blob prefixed by a 2-byte big-endian length, same framing as
/// [`crate::string_data::StringData`] but without the UTF-8 requirement.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BytesData(Vec<u8>);

impl BytesData {
    pub fn new(data: Vec<u8>) -> Result<Self, EncodeError> {
        if data.len() > usize::from(u16::MAX) {
            return Err(EncodeError::InvalidLength);
        }
        Ok(BytesData(data))
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn bytes(&self) -> usize {
        2 + self.0.len()
    }

    pub fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let len = ba.read_u16()? as usize;
        let data = ba.read_bytes(len)?.to_vec();
        Ok(BytesData(data))
    }

    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.write_u16::<BigEndian>(self.0.len() as u16)
            .map_err(|_| EncodeError::InvalidLength)?;
        buf.extend_from_slice(&self.0);
        Ok(self.bytes())
    }
}

impl From<BytesData> for Vec<u8> {
    fn from(data: BytesData) -> Vec<u8> {
        data.0
    }
}
