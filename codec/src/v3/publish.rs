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
use crate::string_data::StringData;
use crate::topic::Topic;

const FLAG_RETAIN: u8 = 0x01;
const FLAG_QOS_MASK: u8 = 0x06;
const FLAG_QOS_SHIFT: u8 = 1;
const FLAG_DUP: u8 = 0x08;

/// `PUBLISH` carries application data to a topic. `packet_id` is only
/// present on the wire when `qos` is greater than `AtMostOnce`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PublishPacket {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    pub packet_id: Option<PacketId>,
    pub payload: Vec<u8>,
}

impl PublishPacket {
    pub fn new(topic: &str, qos: QoS, payload: Vec<u8>) -> Result<Self, DecodeError> {
        Topic::validate_publish(topic)?;
        Ok(PublishPacket {
            dup: false,
            qos,
            retain: false,
            topic: topic.to_string(),
            packet_id: None,
            payload,
        })
    }
}

impl DecodePacket for PublishPacket {
    fn decode(flags: u8, ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let retain = flags & FLAG_RETAIN != 0;
        let qos = QoS::try_from((flags & FLAG_QOS_MASK) >> FLAG_QOS_SHIFT)?;
        let dup = flags & FLAG_DUP != 0;

        let topic = StringData::decode(ba)?.into();
        let packet_id = if qos == QoS::AtMostOnce {
            None
        } else {
            Some(PacketId::decode(ba)?)
        };
        let payload = ba.read_remaining_bytes().to_vec();

        Ok(PublishPacket {
            dup,
            qos,
            retain,
            topic,
            packet_id,
            payload,
        })
    }
}

impl EncodePacket for PublishPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Publish
    }

    fn flags(&self) -> u8 {
        let mut flags = 0u8;
        if self.retain {
            flags |= FLAG_RETAIN;
        }
        flags |= (u8::from(self.qos) << FLAG_QOS_SHIFT) & FLAG_QOS_MASK;
        if self.dup {
            flags |= FLAG_DUP;
        }
        flags
    }

    fn encode_body(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();
        StringData::new(&self.topic)?.encode(buf)?;
        if self.qos != QoS::AtMostOnce {
            let packet_id = self.packet_id.ok_or(EncodeError::InvalidLength)?;
            packet_id.encode(buf)?;
        }
        buf.extend_from_slice(&self.payload);
        Ok(buf.len() - old_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_qos0_without_packet_id() {
        let packet = PublishPacket {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: "sensors/temp".to_string(),
            packet_id: None,
            payload: b"21.5".to_vec(),
        };
        let flags = packet.flags();
        let mut buf = Vec::new();
        packet.encode_body(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode(flags, &mut ba).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn round_trips_qos1_with_packet_id_and_retain() {
        let packet = PublishPacket {
            dup: true,
            qos: QoS::AtLeastOnce,
            retain: true,
            topic: "sensors/humidity".to_string(),
            packet_id: Some(PacketId::new(7)),
            payload: b"55".to_vec(),
        };
        let flags = packet.flags();
        let mut buf = Vec::new();
        packet.encode_body(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode(flags, &mut ba).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn refuses_to_encode_qos1_without_packet_id() {
        let packet = PublishPacket {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: "a".to_string(),
            packet_id: None,
            payload: Vec::new(),
        };
        let mut buf = Vec::new();
        assert!(packet.encode_body(&mut buf).is_err());
    }
}
