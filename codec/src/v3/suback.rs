// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::byte_array::ByteArray;
use crate::error::{DecodeError, EncodeError};
use crate::fixed_header::PacketType;
use crate::packet::{DecodePacket, EncodePacket};
use crate::packet_id::PacketId;
use crate::qos::QoS;

/// Per-filter outcome of a `SUBSCRIBE` request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubscribeAck {
    /// Granted at the given QoS (may be lower than requested).
    Granted(QoS),
    /// Server refused this filter (e.g. malformed, not authorized).
    Failure,
}

impl SubscribeAck {
    fn to_byte(self) -> u8 {
        match self {
            SubscribeAck::Granted(qos) => qos.into(),
            SubscribeAck::Failure => 0x80,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        if byte == 0x80 {
            Ok(SubscribeAck::Failure)
        } else {
            Ok(SubscribeAck::Granted(QoS::try_from(byte)?))
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubAckPacket {
    pub packet_id: PacketId,
    pub acks: Vec<SubscribeAck>,
}

impl SubAckPacket {
    #[must_use]
    pub fn new(packet_id: PacketId, acks: Vec<SubscribeAck>) -> Self {
        SubAckPacket { packet_id, acks }
    }
}

impl DecodePacket for SubAckPacket {
    fn decode(_flags: u8, ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let packet_id = PacketId::decode(ba)?;
        let mut acks = Vec::new();
        while !ba.is_empty() {
            acks.push(SubscribeAck::from_byte(ba.read_byte()?)?);
        }
        Ok(SubAckPacket { packet_id, acks })
    }
}

impl EncodePacket for SubAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::SubAck
    }

    fn encode_body(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();
        self.packet_id.encode(buf)?;
        for ack in &self.acks {
            buf.push(ack.to_byte());
        }
        Ok(buf.len() - old_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_mixed_acks() {
        let packet = SubAckPacket::new(
            PacketId::new(1),
            vec![
                SubscribeAck::Granted(QoS::AtLeastOnce),
                SubscribeAck::Failure,
            ],
        );
        let mut buf = Vec::new();
        packet.encode_body(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        assert_eq!(SubAckPacket::decode(0, &mut ba).unwrap(), packet);
    }
}
