// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Per-connection protocol state machine. One task owns the transport
//! and drives both directions: it reads and decodes inbound packets and
//! drains the client's outbox, interleaved with `tokio::select!` rather
//! than split across a reader/writer task pair, since [`Stream`] is not
//! split and every write this task makes is already serialized by being
//! the sole writer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use mote_codec::v3::{
    ConnAckPacket, ConnectReturnCode, PubAckPacket, PubCompPacket, PubRecPacket, PubRelPacket,
    PublishPacket, SubAckPacket, SubscribeAck, UnsubAckPacket,
};
use mote_codec::{
    decode_packet, EncodePacket, FixedHeader, Packet, PacketId, QoS, Topic, VarIntDecoder,
};

use crate::broker::Broker;
use crate::client::{ClientHandle, Waiter};
use crate::error::{Error, ErrorKind};
use crate::messages::IncomingMessage;
use crate::session::SessionConfig;
use crate::stream::Stream;

/// How long the connection waits for a `PUBACK`/`PUBREC`/`PUBCOMP` it
/// sent a `PUBLISH` expecting, before giving up on the packet id.
const ACK_TIMEOUT: Duration = Duration::from_secs(20);

/// Drive a single accepted connection end to end: `CONNECT` handshake,
/// the packet loop, and broker cleanup on teardown. Every error is
/// already logged by the caller; this only reports whether the
/// handshake or loop ended abnormally.
pub async fn handle_connection(
    mut stream: Stream,
    broker: Arc<Broker>,
    session_config: SessionConfig,
) -> Result<(), Error> {
    let mut buf = Vec::new();

    let connect_packet = match read_packet(&mut stream, &mut buf, Some(session_config.connect_timeout())).await {
        Ok(Some(Packet::Connect(packet))) => packet,
        Ok(Some(_)) => {
            return Err(Error::new(ErrorKind::ProtocolError, "expected CONNECT as first packet"));
        }
        Ok(None) => return Ok(()),
        Err(err) => return Err(err),
    };

    let client_id = if connect_packet.client_id.is_empty() {
        if !session_config.allow_empty_client_id() {
            let ack = ConnAckPacket::new(false, ConnectReturnCode::IdentifierRejected);
            stream.write_all(&ack.encode()?).await.ok();
            return Ok(());
        }
        generate_client_id()
    } else {
        connect_packet.client_id.clone()
    };

    let last_will = match &connect_packet.last_will {
        Some(will) => {
            if Topic::validate_publish(&will.topic).is_err() {
                let ack = ConnAckPacket::new(false, ConnectReturnCode::NotAuthorized);
                stream.write_all(&ack.encode()?).await.ok();
                return Ok(());
            }
            Some(IncomingMessage {
                topic: Topic::parse(&will.topic)
                    .map_err(|_| Error::new(ErrorKind::TopicError, "invalid last-will topic"))?,
                qos: will.qos,
                retain: will.retain,
                tree: false,
                data: will.message.clone(),
            })
        }
        None => None,
    };

    let (outbox_tx, mut outbox_rx) = mpsc::channel(session_config.maximum_inflight_messages().max(1));
    let mut handle = ClientHandle::new(client_id.clone(), outbox_tx);
    handle.set_last_will(last_will);
    let evict_notify = handle.evict_notify();
    broker.add_client(handle).await;

    log::info!("connection: `{client_id}` connected");
    let ack = ConnAckPacket::new(false, ConnectReturnCode::Accepted);
    stream.write_all(&ack.encode()?).await?;

    let read_timeout = if connect_packet.keep_alive == 0 {
        None
    } else {
        Some(Duration::from_secs(u64::from(connect_packet.keep_alive)) + Duration::from_secs(1))
    };
    let mut qos2_pending: HashMap<u16, IncomingMessage> = HashMap::new();
    let mut evicted = false;

    loop {
        tokio::select! {
            biased;

            () = evict_notify.notified() => {
                log::info!("connection: `{client_id}` evicted by a newer CONNECT");
                evicted = true;
                break;
            }

            outgoing = outbox_rx.recv() => {
                match outgoing {
                    Some(message) => {
                        if let Err(err) = send_publish(
                            &mut stream,
                            &broker,
                            &client_id,
                            &message.topic,
                            message.qos,
                            message.data,
                            false,
                        )
                        .await
                        {
                            log::warn!("connection: `{client_id}` failed to deliver a message: {err}");
                            break;
                        }
                    }
                    None => break,
                }
            }

            read_result = read_packet(&mut stream, &mut buf, read_timeout) => {
                match read_result {
                    Ok(Some(packet)) => {
                        if let Err(err) = handle_inbound_packet(
                            packet,
                            &mut stream,
                            &broker,
                            &client_id,
                            &mut qos2_pending,
                        )
                        .await
                        {
                            log::warn!("connection: `{client_id}` protocol error: {err}");
                            break;
                        }
                    }
                    Ok(None) => {
                        log::info!("connection: `{client_id}` closed");
                        break;
                    }
                    Err(err) => {
                        log::debug!("connection: `{client_id}` read error: {err}");
                        break;
                    }
                }
            }
        }
    }

    if !evicted {
        if let Some(mut removed) = broker.remove_client(&client_id).await {
            let filters = removed.drain_subscriptions();
            broker.remove_client_subscriptions(&client_id, &filters).await;
            removed.cancel_all_waiters();
            if let Some(will) = removed.take_last_will() {
                broker.publish(will).await;
            }
        }
    }

    Ok(())
}

fn generate_client_id() -> String {
    let suffix: u64 = rand::random();
    format!("mote-{suffix:016x}")
}

/// Try to pull one complete packet off the front of `buf`. Leaves `buf`
/// untouched (returns `Ok(None)`) when the fixed header, the
/// remaining-length varint, or the body are not fully buffered yet.
fn try_decode_one(buf: &mut Vec<u8>) -> Result<Option<Packet>, Error> {
    if buf.is_empty() {
        return Ok(None);
    }
    let header = FixedHeader::decode(buf[0])?;

    let mut decoder = VarIntDecoder::new();
    let mut consumed = 1;
    let mut remaining_length = None;
    while consumed < buf.len() {
        let byte = buf[consumed];
        consumed += 1;
        if let Some(len) = decoder.feed(byte)? {
            remaining_length = Some(len);
            break;
        }
    }
    let Some(remaining_length) = remaining_length else {
        return Ok(None);
    };
    if buf.len() < consumed + remaining_length {
        return Ok(None);
    }

    let body_end = consumed + remaining_length;
    let packet = decode_packet(header.packet_type, header.flags, &buf[consumed..body_end])?;
    buf.drain(0..body_end);
    Ok(Some(packet))
}

/// Read bytes off `stream` into `buf` until a full packet can be
/// decoded, or the transport closes. `timeout`, when set, bounds each
/// individual read (the keep-alive contract: 1.5x the negotiated
/// interval, measured from the last byte received).
async fn read_packet(
    stream: &mut Stream,
    buf: &mut Vec<u8>,
    timeout: Option<Duration>,
) -> Result<Option<Packet>, Error> {
    loop {
        if let Some(packet) = try_decode_one(buf)? {
            return Ok(Some(packet));
        }
        let n = match timeout {
            Some(duration) => match tokio::time::timeout(duration, stream.read_buf(buf)).await {
                Ok(result) => result?,
                Err(_) => return Err(Error::new(ErrorKind::IoError, "keep-alive timeout elapsed")),
            },
            None => stream.read_buf(buf).await?,
        };
        if n == 0 {
            return Ok(None);
        }
    }
}

/// Strip the sync-dump leading separator convention off a filter/topic
/// string, reporting whether it was present.
fn strip_sync_marker(raw: &str) -> (bool, &str) {
    raw.strip_prefix(mote_codec::topic::TOPIC_SEP)
        .map_or((false, raw), |rest| (true, rest))
}

async fn handle_inbound_packet(
    packet: Packet,
    stream: &mut Stream,
    broker: &Arc<Broker>,
    client_id: &str,
    qos2_pending: &mut HashMap<u16, IncomingMessage>,
) -> Result<(), Error> {
    match packet {
        Packet::Publish(publish) => handle_publish(publish, stream, broker, client_id, qos2_pending).await,
        Packet::PubAck(ack) => {
            broker.with_client_mut(client_id, |c| c.resolve_ack(Waiter::PubAck, ack.packet_id)).await;
            Ok(())
        }
        Packet::PubRec(ack) => handle_pubrec(ack.packet_id, stream, broker, client_id).await,
        Packet::PubRel(rel) => handle_pubrel(rel.packet_id, stream, broker, client_id, qos2_pending).await,
        Packet::PubComp(ack) => {
            broker.with_client_mut(client_id, |c| c.resolve_ack(Waiter::PubComp, ack.packet_id)).await;
            Ok(())
        }
        Packet::Subscribe(subscribe) => handle_subscribe(subscribe, stream, broker, client_id).await,
        Packet::Unsubscribe(unsubscribe) => handle_unsubscribe(unsubscribe, stream, broker, client_id).await,
        Packet::PingReq(_) => {
            stream.write_all(&mote_codec::v3::PingRespPacket.encode()?).await?;
            Ok(())
        }
        Packet::Connect(_) => Err(Error::new(ErrorKind::ProtocolError, "unexpected second CONNECT")),
        Packet::ConnAck(_) | Packet::SubAck(_) | Packet::UnsubAck(_) | Packet::PingResp(_) => {
            Err(Error::new(ErrorKind::ProtocolError, "unexpected server-to-client packet from a client"))
        }
    }
}

async fn handle_publish(
    publish: PublishPacket,
    stream: &mut Stream,
    broker: &Arc<Broker>,
    client_id: &str,
    qos2_pending: &mut HashMap<u16, IncomingMessage>,
) -> Result<(), Error> {
    if !publish.retain {
        Topic::validate_publish(&publish.topic)
            .map_err(|_| Error::new(ErrorKind::TopicError, "publish topic carries a wildcard"))?;
    }

    let (tree, topic_str) = if publish.retain {
        let (has_marker, rest) = strip_sync_marker_trailing(&publish.topic);
        (has_marker, rest)
    } else {
        (false, publish.topic.as_str())
    };
    let topic = Topic::parse(topic_str).map_err(|_| Error::new(ErrorKind::TopicError, "empty publish topic"))?;
    let message = IncomingMessage {
        topic,
        qos: publish.qos,
        retain: publish.retain,
        tree,
        data: publish.payload,
    };

    match publish.qos {
        QoS::AtMostOnce => {
            broker.publish(message).await;
        }
        QoS::AtLeastOnce => {
            let packet_id = publish.packet_id.ok_or_else(|| Error::new(ErrorKind::ProtocolError, "QoS 1 PUBLISH missing packet id"))?;
            broker.publish(message).await;
            stream.write_all(&PubAckPacket::new(packet_id).encode()?).await?;
        }
        QoS::ExactlyOnce => {
            let packet_id = publish.packet_id.ok_or_else(|| Error::new(ErrorKind::ProtocolError, "QoS 2 PUBLISH missing packet id"))?;
            qos2_pending.insert(packet_id.value(), message);
            stream.write_all(&PubRecPacket::new(packet_id).encode()?).await?;
        }
    }
    Ok(())
}

/// `publish.topic` ending in the topic separator marks a tree-graft
/// retain publish; strip it so the parsed topic carries no trailing
/// empty node.
fn strip_sync_marker_trailing(topic: &str) -> (bool, &str) {
    topic
        .strip_suffix(mote_codec::topic::TOPIC_SEP)
        .map_or((false, topic), |rest| (true, rest))
}

async fn handle_pubrec(packet_id: PacketId, stream: &mut Stream, broker: &Arc<Broker>, client_id: &str) -> Result<(), Error> {
    if !broker.with_client_mut(client_id, |c| c.resolve_ack(Waiter::PubRec, packet_id)).await.unwrap_or(false) {
        log::debug!("connection: `{client_id}` PUBREC for unknown packet id {packet_id}");
        return Ok(());
    }
    stream.write_all(&PubRelPacket::new(packet_id).encode()?).await?;
    let ack_rx = broker.with_client_mut(client_id, |c| c.await_ack(Waiter::PubComp, packet_id)).await;
    spawn_ack_watcher(broker.clone(), client_id.to_string(), packet_id, ack_rx);
    Ok(())
}

async fn handle_pubrel(
    packet_id: PacketId,
    stream: &mut Stream,
    broker: &Arc<Broker>,
    client_id: &str,
    qos2_pending: &mut HashMap<u16, IncomingMessage>,
) -> Result<(), Error> {
    if let Some(message) = qos2_pending.remove(&packet_id.value()) {
        broker.publish(message).await;
    }
    stream.write_all(&PubCompPacket::new(packet_id).encode()?).await?;
    Ok(())
}

fn spawn_ack_watcher(
    broker: Arc<Broker>,
    client_id: String,
    packet_id: PacketId,
    ack_rx: Option<tokio::sync::oneshot::Receiver<()>>,
) {
    let Some(ack_rx) = ack_rx else { return };
    tokio::spawn(async move {
        if tokio::time::timeout(ACK_TIMEOUT, ack_rx).await.is_err() {
            log::debug!("connection: `{client_id}` ack for packet {packet_id} timed out");
        }
        broker.with_client_mut(&client_id, |c| c.release_packet_id(packet_id)).await;
    });
}

async fn handle_subscribe(
    subscribe: mote_codec::v3::SubscribePacket,
    stream: &mut Stream,
    broker: &Arc<Broker>,
    client_id: &str,
) -> Result<(), Error> {
    let mut acks = Vec::with_capacity(subscribe.topics.len());
    for requested in &subscribe.topics {
        let (sync, filter) = strip_sync_marker(&requested.topic);
        match broker.subscribe(client_id, filter, requested.qos, sync).await {
            Ok(dump) => {
                broker.with_client_mut(client_id, |c| c.record_subscription(filter.to_string())).await;
                for retained in dump {
                    send_publish(stream, broker, client_id, &retained.topic, retained.qos, retained.data, true).await?;
                }
                acks.push(SubscribeAck::Granted(requested.qos));
            }
            Err(_) => acks.push(SubscribeAck::Failure),
        }
    }
    let suback = SubAckPacket::new(subscribe.packet_id, acks);
    stream.write_all(&suback.encode()?).await?;
    Ok(())
}

async fn handle_unsubscribe(
    unsubscribe: mote_codec::v3::UnsubscribePacket,
    stream: &mut Stream,
    broker: &Arc<Broker>,
    client_id: &str,
) -> Result<(), Error> {
    for requested in &unsubscribe.topics {
        let (_, filter) = strip_sync_marker(requested);
        broker.unsubscribe(client_id, filter).await;
        broker.with_client_mut(client_id, |c| c.forget_subscription(filter)).await;
    }
    let unsuback = UnsubAckPacket::new(unsubscribe.packet_id);
    stream.write_all(&unsuback.encode()?).await?;
    Ok(())
}

/// Send a single `PUBLISH` to this connection's peer, allocating a
/// packet id and registering the ack waiter when `qos` calls for one.
async fn send_publish(
    stream: &mut Stream,
    broker: &Arc<Broker>,
    client_id: &str,
    topic: &str,
    qos: QoS,
    payload: Vec<u8>,
    retain: bool,
) -> Result<(), Error> {
    let packet_id = if qos == QoS::AtMostOnce {
        None
    } else {
        let allocated = broker.with_client_mut(client_id, ClientHandle::alloc_packet_id).await.flatten();
        if allocated.is_none() {
            log::warn!("connection: `{client_id}` packet id space exhausted, closing connection");
            return Err(Error::new(ErrorKind::PacketIdError, "packet id space exhausted"));
        }
        allocated
    };

    let mut publish = PublishPacket::new(topic, qos, payload)
        .map_err(|_| Error::new(ErrorKind::TopicError, "outgoing topic carries a wildcard"))?;
    publish.retain = retain;
    publish.packet_id = packet_id;
    stream.write_all(&publish.encode()?).await?;

    if let Some(packet_id) = packet_id {
        let waiter = if qos == QoS::ExactlyOnce { Waiter::PubRec } else { Waiter::PubAck };
        let ack_rx = broker.with_client_mut(client_id, |c| c.await_ack(waiter, packet_id)).await;
        spawn_ack_watcher(broker.clone(), client_id.to_string(), packet_id, ack_rx);
    }
    Ok(())
}
