// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::byte_array::ByteArray;
use crate::error::{DecodeError, EncodeError};
use crate::fixed_header::PacketType;
use crate::packet::{DecodePacket, EncodePacket};

/// Keep-alive heartbeat sent by the client when no other traffic has
/// crossed the connection within the negotiated interval.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PingReqPacket;

impl DecodePacket for PingReqPacket {
    fn decode(_flags: u8, _ba: &mut ByteArray) -> Result<Self, DecodeError> {
        Ok(PingReqPacket)
    }
}

impl EncodePacket for PingReqPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::PingReq
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
        assert_eq!(PingReqPacket.encode_body(&mut buf).unwrap(), 0);
        assert!(buf.is_empty());
    }
}
