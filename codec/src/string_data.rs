// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use byteorder::{BigEndian, WriteBytesExt};
use std::fmt;

use crate::byte_array::ByteArray;
use crate::error::{DecodeError, EncodeError};

/// A UTF-8 string prefixed by a 2-byte big-endian length.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StringData(String);

impl StringData {
    pub fn new(s: &str) -> Result<Self, EncodeError> {
        if s.len() > usize::from(u16::MAX) {
            return Err(EncodeError::InvalidLength);
        }
        Ok(StringData(s.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn bytes(&self) -> usize {
        2 + self.0.len()
    }

    pub fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let len = ba.read_u16()? as usize;
        let s = ba.read_string(len)?;
        Ok(StringData(s))
    }

    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.write_u16::<BigEndian>(self.0.len() as u16)
            .map_err(|_| EncodeError::InvalidLength)?;
        buf.extend_from_slice(self.0.as_bytes());
        Ok(self.bytes())
    }
}

impl fmt::Display for StringData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<StringData> for String {
    fn from(s: StringData) -> String {
        s.0
    }
}
