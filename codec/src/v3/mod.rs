// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! MQTT v3.1.1 control packets.

mod connack;
mod connect;
mod pingreq;
mod pingresp;
mod puback;
mod pubcomp;
mod pubrec;
mod pubrel;
mod publish;
mod suback;
mod subscribe;
mod unsuback;
mod unsubscribe;

pub use connack::{ConnAckPacket, ConnectReturnCode};
pub use connect::{ConnectPacket, LastWill};
pub use pingreq::PingReqPacket;
pub use pingresp::PingRespPacket;
pub use puback::PubAckPacket;
pub use pubcomp::PubCompPacket;
pub use pubrec::PubRecPacket;
pub use pubrel::PubRelPacket;
pub use publish::PublishPacket;
pub use suback::{SubAckPacket, SubscribeAck};
pub use subscribe::{SubscribePacket, SubscribeTopic};
pub use unsuback::UnsubAckPacket;
pub use unsubscribe::UnsubscribePacket;
