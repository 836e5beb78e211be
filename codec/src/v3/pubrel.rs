// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::byte_array::ByteArray;
use crate::error::{DecodeError, EncodeError};
use crate::fixed_header::PacketType;
use crate::packet::{DecodePacket, EncodePacket};
use crate::packet_id::PacketId;

/// Reserved flag bits fixed by the spec at `0b0010`.
const FIXED_FLAGS: u8 = 0x02;

/// Second step of a QoS 2 handshake, sender to receiver.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PubRelPacket {
    pub packet_id: PacketId,
}

impl PubRelPacket {
    #[must_use]
    pub fn new(packet_id: PacketId) -> Self {
        PubRelPacket { packet_id }
    }
}

impl DecodePacket for PubRelPacket {
    fn decode(flags: u8, ba: &mut ByteArray) -> Result<Self, DecodeError> {
        if flags != FIXED_FLAGS {
            return Err(DecodeError::InvalidFlags);
        }
        Ok(PubRelPacket {
            packet_id: PacketId::decode(ba)?,
        })
    }
}

impl EncodePacket for PubRelPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::PubRel
    }

    fn flags(&self) -> u8 {
        FIXED_FLAGS
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
        let packet = PubRelPacket::new(PacketId::new(5));
        let mut buf = Vec::new();
        packet.encode_body(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        assert_eq!(PubRelPacket::decode(FIXED_FLAGS, &mut ba).unwrap(), packet);
    }

    #[test]
    fn rejects_wrong_flags() {
        let packet = PubRelPacket::new(PacketId::new(5));
        let mut buf = Vec::new();
        packet.encode_body(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        assert!(PubRelPacket::decode(0, &mut ba).is_err());
    }
}
