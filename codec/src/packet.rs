// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::byte_array::ByteArray;
use crate::error::{DecodeError, EncodeError};
use crate::fixed_header::{encode_remaining_length, FixedHeader, PacketType};
use crate::v3::{
    ConnAckPacket, ConnectPacket, PingReqPacket, PingRespPacket, PubAckPacket, PubCompPacket,
    PubRecPacket, PubRelPacket, PublishPacket, SubAckPacket, SubscribePacket, UnsubAckPacket,
    UnsubscribePacket,
};

/// A single packet type carries its own flags byte and body encoding.
pub trait EncodePacket {
    fn packet_type(&self) -> PacketType;

    /// Low nibble of byte 0.
    fn flags(&self) -> u8 {
        0
    }

    fn encode_body(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError>;

    /// Encode the full packet: fixed header, remaining length, body.
    fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut body = Vec::new();
        self.encode_body(&mut body)?;
        let mut out = Vec::new();
        let header = FixedHeader::new(self.packet_type(), self.flags());
        out.push(header.encode());
        encode_remaining_length(body.len(), &mut out)?;
        out.extend_from_slice(&body);
        Ok(out)
    }
}

/// A single packet type decodes its body against the already-framed
/// remaining-length bytes, with access to the flags nibble from byte 0.
pub trait DecodePacket: Sized {
    fn decode(flags: u8, ba: &mut ByteArray) -> Result<Self, DecodeError>;
}

/// Any one of the 13 control packets this codec understands, produced by
/// [`decode_packet`] once the fixed header and full body are in hand.
#[derive(Clone, Debug)]
pub enum Packet {
    Connect(ConnectPacket),
    ConnAck(ConnAckPacket),
    Publish(PublishPacket),
    PubAck(PubAckPacket),
    PubRec(PubRecPacket),
    PubRel(PubRelPacket),
    PubComp(PubCompPacket),
    Subscribe(SubscribePacket),
    SubAck(SubAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubAck(UnsubAckPacket),
    PingReq(PingReqPacket),
    PingResp(PingRespPacket),
}

impl Packet {
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::ConnAck(_) => PacketType::ConnAck,
            Packet::Publish(_) => PacketType::Publish,
            Packet::PubAck(_) => PacketType::PubAck,
            Packet::PubRec(_) => PacketType::PubRec,
            Packet::PubRel(_) => PacketType::PubRel,
            Packet::PubComp(_) => PacketType::PubComp,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::SubAck(_) => PacketType::SubAck,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::UnsubAck(_) => PacketType::UnsubAck,
            Packet::PingReq(_) => PacketType::PingReq,
            Packet::PingResp(_) => PacketType::PingResp,
        }
    }
}

/// Decode a complete packet body (the bytes named by the fixed header's
/// remaining-length) given the packet type inferred from byte 0.
pub fn decode_packet(packet_type: PacketType, flags: u8, body: &[u8]) -> Result<Packet, DecodeError> {
    let mut ba = ByteArray::new(body);
    Ok(match packet_type {
        PacketType::Connect => Packet::Connect(ConnectPacket::decode(flags, &mut ba)?),
        PacketType::ConnAck => Packet::ConnAck(ConnAckPacket::decode(flags, &mut ba)?),
        PacketType::Publish => Packet::Publish(PublishPacket::decode(flags, &mut ba)?),
        PacketType::PubAck => Packet::PubAck(PubAckPacket::decode(flags, &mut ba)?),
        PacketType::PubRec => Packet::PubRec(PubRecPacket::decode(flags, &mut ba)?),
        PacketType::PubRel => Packet::PubRel(PubRelPacket::decode(flags, &mut ba)?),
        PacketType::PubComp => Packet::PubComp(PubCompPacket::decode(flags, &mut ba)?),
        PacketType::Subscribe => Packet::Subscribe(SubscribePacket::decode(flags, &mut ba)?),
        PacketType::SubAck => Packet::SubAck(SubAckPacket::decode(flags, &mut ba)?),
        PacketType::Unsubscribe => Packet::Unsubscribe(UnsubscribePacket::decode(flags, &mut ba)?),
        PacketType::UnsubAck => Packet::UnsubAck(UnsubAckPacket::decode(flags, &mut ba)?),
        PacketType::PingReq => Packet::PingReq(PingReqPacket::decode(flags, &mut ba)?),
        PacketType::PingResp => Packet::PingResp(PingRespPacket::decode(flags, &mut ba)?),
    })
}
