// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use byteorder::{BigEndian, WriteBytesExt};
use std::fmt;

use crate::byte_array::ByteArray;
use crate::error::{DecodeError, EncodeError};

/// Packet identifier used to pair `SUBSCRIBE`/`UNSUBSCRIBE`/`PUBLISH`
/// (QoS > 0) requests with their acknowledgements.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PacketId(u16);

impl PacketId {
    #[must_use]
    pub const fn new(value: u16) -> Self {
        PacketId(value)
    }

    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }

    #[must_use]
    pub const fn bytes(self) -> usize {
        2
    }

    pub fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        Ok(PacketId(ba.read_u16()?))
    }

    pub fn encode(self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.write_u16::<BigEndian>(self.0)
            .map_err(|_| EncodeError::InvalidLength)?;
        Ok(self.bytes())
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for PacketId {
    fn from(value: u16) -> Self {
        PacketId(value)
    }
}
