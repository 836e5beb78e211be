// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::byte_array::ByteArray;
use crate::error::{DecodeError, EncodeError};
use crate::fixed_header::PacketType;
use crate::packet::{DecodePacket, EncodePacket};
use crate::packet_id::PacketId;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UnsubAckPacket {
    pub packet_id: PacketId,
}

impl UnsubAckPacket {
    #[must_use]
    pub fn new(packet_id: PacketId) -> Self {
        UnsubAckPacket { packet_id }
    }
}

impl DecodePacket for UnsubAckPacket {
    fn decode(_flags: u8, ba: &mut ByteArray) -> Result<Self, DecodeError> {
        Ok(UnsubAckPacket {
            packet_id: PacketId::decode(ba)?,
        })
    }
}

impl EncodePacket for UnsubAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::UnsubAck
    }

    fn encode_body(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        self.packet_id.encode(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_packet_id() {
        let packet = UnsubAckPacket::new(PacketId::new(3));
        let mut buf = Vec::new();
        packet.encode_body(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        assert_eq!(UnsubAckPacket::decode(0, &mut ba).unwrap(), packet);
    }
}
