// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Wire protocol codec for the Mote MQTT broker.
//!
//! Covers the MQTT 3.1.1 control packets the broker understands: fixed
//! header framing, the 1-4 byte remaining-length varint, and the 13
//! packet bodies under [`v3`]. Nothing here touches a socket; encoding
//! and decoding operate on in-memory byte slices, leaving the read loop
//! that frames a remaining-length off the wire to the broker crate.

pub mod byte_array;
pub mod bytes_data;
pub mod error;
pub mod fixed_header;
pub mod packet;
pub mod packet_id;
pub mod qos;
pub mod string_data;
pub mod topic;
pub mod v3;

pub use byte_array::ByteArray;
pub use error::{DecodeError, EncodeError};
pub use fixed_header::{FixedHeader, PacketType, VarIntDecoder};
pub use packet::{decode_packet, DecodePacket, EncodePacket, Packet};
pub use packet_id::PacketId;
pub use qos::QoS;
pub use topic::{Topic, TopicError};
