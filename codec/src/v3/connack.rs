// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::byte_array::ByteArray;
use crate::error::{DecodeError, EncodeError};
use crate::fixed_header::PacketType;
use crate::packet::{DecodePacket, EncodePacket};

/// Reason a `CONNECT` attempt was refused, or success.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadUsernameOrPassword = 4,
    NotAuthorized = 5,
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = DecodeError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0 => Ok(ConnectReturnCode::Accepted),
            1 => Ok(ConnectReturnCode::UnacceptableProtocolVersion),
            2 => Ok(ConnectReturnCode::IdentifierRejected),
            3 => Ok(ConnectReturnCode::ServerUnavailable),
            4 => Ok(ConnectReturnCode::BadUsernameOrPassword),
            5 => Ok(ConnectReturnCode::NotAuthorized),
            _ => Err(DecodeError::OutOfRange),
        }
    }
}

impl From<ConnectReturnCode> for u8 {
    fn from(code: ConnectReturnCode) -> u8 {
        code as u8
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConnAckPacket {
    pub session_present: bool,
    pub return_code: ConnectReturnCode,
}

impl ConnAckPacket {
    #[must_use]
    pub fn new(session_present: bool, return_code: ConnectReturnCode) -> Self {
        ConnAckPacket {
            session_present,
            return_code,
        }
    }
}

impl DecodePacket for ConnAckPacket {
    fn decode(_flags: u8, ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let ack_flags = ba.read_byte()?;
        let session_present = ack_flags & 0x01 != 0;
        let return_code = ConnectReturnCode::try_from(ba.read_byte()?)?;
        Ok(ConnAckPacket {
            session_present,
            return_code,
        })
    }
}

impl EncodePacket for ConnAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::ConnAck
    }

    fn encode_body(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.push(u8::from(self.session_present));
        buf.push(self.return_code.into());
        Ok(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_accepted() {
        let packet = ConnAckPacket::new(true, ConnectReturnCode::Accepted);
        let mut buf = Vec::new();
        packet.encode_body(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = ConnAckPacket::decode(0, &mut ba).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn rejects_unknown_return_code() {
        let buf = [0u8, 0xff];
        let mut ba = ByteArray::new(&buf);
        assert!(ConnAckPacket::decode(0, &mut ba).is_err());
    }
}
