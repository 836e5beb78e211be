// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::byte_array::ByteArray;
use crate::error::{DecodeError, EncodeError};
use crate::fixed_header::PacketType;
use crate::packet::{DecodePacket, EncodePacket};

/// Server's reply to a [`super::pingreq::PingReqPacket`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PingRespPacket;

impl DecodePacket for PingRespPacket {
    fn decode(_flags: u8, _ba: &mut ByteArray) -> Result<Self, DecodeError> {
        Ok(PingRespPacket)
    }
}

impl EncodePacket for PingRespPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::PingResp
    }

    fn encode_body(&self, _buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_empty_body() {
        let mut buf = Vec::new();
        assert_eq!(PingRespPacket.encode_body(&mut buf).unwrap(), 0);
        assert!(buf.is_empty());
    }
}
