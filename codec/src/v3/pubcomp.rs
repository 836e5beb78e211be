// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::byte_array::ByteArray;
use crate::error::{DecodeError, EncodeError};
use crate::fixed_header::PacketType;
use crate::packet::{DecodePacket, EncodePacket};
use crate::packet_id::PacketId;

/// Final acknowledgement of a QoS 2 `PUBLISH`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PubCompPacket {
    pub packet_id: PacketId,
}

impl PubCompPacket {
    #[must_use]
    pub fn new(packet_id: PacketId) -> Self {
        PubCompPacket { packet_id }
    }
}

impl DecodePacket for PubCompPacket {
    fn decode(_flags: u8, ba: &mut ByteArray) -> Result<Self, DecodeError> {
        Ok(PubCompPacket {
            packet_id: PacketId::decode(ba)?,
        })
    }
}

impl EncodePacket for PubCompPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::PubComp
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
        let packet = PubCompPacket::new(PacketId::new(99));
        let mut buf = Vec::new();
        packet.encode_body(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        assert_eq!(PubCompPacket::decode(0, &mut ba).unwrap(), packet);
    }
}
