// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::byte_array::ByteArray;
use crate::error::{DecodeError, EncodeError};
use crate::fixed_header::PacketType;
use crate::packet::{DecodePacket, EncodePacket};
use crate::qos::QoS;
use crate::string_data::StringData;

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4;

const FLAG_CLEAN_SESSION: u8 = 0x02;
const FLAG_WILL: u8 = 0x04;
const FLAG_WILL_QOS_MASK: u8 = 0x18;
const FLAG_WILL_QOS_SHIFT: u8 = 3;
const FLAG_WILL_RETAIN: u8 = 0x20;
const FLAG_PASSWORD: u8 = 0x40;
const FLAG_USERNAME: u8 = 0x80;

/// Last-will declaration carried by a `CONNECT` packet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LastWill {
    pub topic: String,
    pub message: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// `CONNECT` is the first packet a client must send; the server treats any
/// other packet arriving first as a protocol violation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConnectPacket {
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub last_will: Option<LastWill>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl DecodePacket for ConnectPacket {
    fn decode(_flags: u8, ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let protocol_name = StringData::decode(ba)?;
        if protocol_name.as_str() != PROTOCOL_NAME {
            return Err(DecodeError::InvalidProtocol);
        }
        let protocol_level = ba.read_byte()?;
        if protocol_level != PROTOCOL_LEVEL {
            return Err(DecodeError::InvalidProtocol);
        }

        let connect_flags = ba.read_byte()?;
        let clean_session = connect_flags & FLAG_CLEAN_SESSION != 0;
        let has_will = connect_flags & FLAG_WILL != 0;
        let has_username = connect_flags & FLAG_USERNAME != 0;
        let has_password = connect_flags & FLAG_PASSWORD != 0;

        let keep_alive = ba.read_u16()?;
        let client_id = StringData::decode(ba)?.into();

        let last_will = if has_will {
            let topic = StringData::decode(ba)?.into();
            let message_len = ba.read_u16()? as usize;
            let message = ba.read_bytes(message_len)?.to_vec();
            let qos = QoS::try_from((connect_flags & FLAG_WILL_QOS_MASK) >> FLAG_WILL_QOS_SHIFT)?;
            let retain = connect_flags & FLAG_WILL_RETAIN != 0;
            Some(LastWill {
                topic,
                message,
                qos,
                retain,
            })
        } else {
            None
        };

        let username = has_username
            .then(|| StringData::decode(ba))
            .transpose()?
            .map(String::from);
        let password = has_password
            .then(|| StringData::decode(ba))
            .transpose()?
            .map(String::from);

        Ok(ConnectPacket {
            clean_session,
            keep_alive,
            client_id,
            last_will,
            username,
            password,
        })
    }
}

impl EncodePacket for ConnectPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Connect
    }

    fn encode_body(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();
        StringData::new(PROTOCOL_NAME)?.encode(buf)?;
        buf.push(PROTOCOL_LEVEL);

        let mut flags = 0u8;
        if self.clean_session {
            flags |= FLAG_CLEAN_SESSION;
        }
        if let Some(will) = &self.last_will {
            flags |= FLAG_WILL;
            flags |= (u8::from(will.qos) << FLAG_WILL_QOS_SHIFT) & FLAG_WILL_QOS_MASK;
            if will.retain {
                flags |= FLAG_WILL_RETAIN;
            }
        }
        if self.username.is_some() {
            flags |= FLAG_USERNAME;
        }
        if self.password.is_some() {
            flags |= FLAG_PASSWORD;
        }
        buf.push(flags);

        buf.extend_from_slice(&self.keep_alive.to_be_bytes());
        StringData::new(&self.client_id)?.encode(buf)?;

        if let Some(will) = &self.last_will {
            StringData::new(&will.topic)?.encode(buf)?;
            buf.extend_from_slice(&(will.message.len() as u16).to_be_bytes());
            buf.extend_from_slice(&will.message);
        }
        if let Some(username) = &self.username {
            StringData::new(username)?.encode(buf)?;
        }
        if let Some(password) = &self.password {
            StringData::new(password)?.encode(buf)?;
        }

        Ok(buf.len() - old_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_without_will() {
        let packet = ConnectPacket {
            clean_session: true,
            keep_alive: 60,
            client_id: "client-1".to_string(),
            last_will: None,
            username: None,
            password: None,
        };
        let bytes = packet.encode_body_for_test();
        let mut ba = ByteArray::new(&bytes);
        let decoded = ConnectPacket::decode(0, &mut ba).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn round_trips_with_will_and_credentials() {
        let packet = ConnectPacket {
            clean_session: false,
            keep_alive: 30,
            client_id: "client-2".to_string(),
            last_will: Some(LastWill {
                topic: "a/b".to_string(),
                message: b"bye".to_vec(),
                qos: QoS::AtLeastOnce,
                retain: true,
            }),
            username: Some("alice".to_string()),
            password: Some("secret".to_string()),
        };
        let bytes = packet.encode_body_for_test();
        let mut ba = ByteArray::new(&bytes);
        let decoded = ConnectPacket::decode(0, &mut ba).unwrap();
        assert_eq!(decoded, packet);
    }

    impl ConnectPacket {
        fn encode_body_for_test(&self) -> Vec<u8> {
            let mut buf = Vec::new();
            self.encode_body(&mut buf).unwrap();
            buf
        }
    }
}
