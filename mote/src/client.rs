// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Per-client state held by the broker core: the outbox a connection
//! handler drains, in-flight packet-id bookkeeping and the client's
//! last will.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Notify};

use mote_codec::PacketId;

use crate::messages::{IncomingMessage, OutgoingMessage};

/// Which handshake a pending packet id is waiting on. A single id can be
/// in flight for at most one of these at a time.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Waiter {
    /// Outbound QoS 1 publish awaiting `PUBACK`.
    PubAck,
    /// Outbound QoS 2 publish awaiting `PUBREC`.
    PubRec,
    /// Outbound QoS 2 publish awaiting `PUBCOMP` (after we sent `PUBREL`).
    PubComp,
}

/// Handle the broker core keeps per connected client. The connection
/// handler owns the paired receiver end of `outbox` and is the only
/// writer of bytes to the socket.
pub struct ClientHandle {
    id: String,
    outbox: mpsc::Sender<OutgoingMessage>,
    used_ids: HashSet<u16>,
    pending: Vec<(Waiter, u16, oneshot::Sender<()>)>,
    last_will: Option<IncomingMessage>,
    subscriptions: HashSet<String>,
    alive: bool,
    evict_notify: Arc<Notify>,
}

impl ClientHandle {
    #[must_use]
    pub fn new(id: String, outbox: mpsc::Sender<OutgoingMessage>) -> Self {
        ClientHandle {
            id,
            outbox,
            used_ids: HashSet::new(),
            pending: Vec::new(),
            last_will: None,
            subscriptions: HashSet::new(),
            alive: true,
            evict_notify: Arc::new(Notify::new()),
        }
    }

    /// A handle a connection task can hold onto and `.notified().await`
    /// on to learn it has been replaced by a later `CONNECT` for the
    /// same client id.
    #[must_use]
    pub fn evict_notify(&self) -> Arc<Notify> {
        self.evict_notify.clone()
    }

    /// Wake whoever is holding this handle's `evict_notify`.
    pub fn notify_evict(&self) {
        self.evict_notify.notify_one();
    }

    pub fn record_subscription(&mut self, filter: String) {
        self.subscriptions.insert(filter);
    }

    pub fn forget_subscription(&mut self, filter: &str) {
        self.subscriptions.remove(filter);
    }

    /// Remove and return every filter this client is still subscribed
    /// to, for disconnect cleanup.
    pub fn drain_subscriptions(&mut self) -> Vec<String> {
        self.subscriptions.drain().collect()
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn mark_dead(&mut self) {
        self.alive = false;
    }

    pub async fn send(&self, message: OutgoingMessage) -> Result<(), mpsc::error::SendError<OutgoingMessage>> {
        self.outbox.send(message).await
    }

    pub fn set_last_will(&mut self, will: Option<IncomingMessage>) {
        self.last_will = will;
    }

    pub fn take_last_will(&mut self) -> Option<IncomingMessage> {
        self.last_will.take()
    }

    /// Allocate the smallest packet id not already in flight, scanning
    /// `used_ids` from 0 upward.
    #[must_use]
    pub fn alloc_packet_id(&mut self) -> Option<PacketId> {
        for candidate in 0..=u16::MAX {
            if self.used_ids.insert(candidate) {
                return Some(PacketId::new(candidate));
            }
        }
        None
    }

    pub fn release_packet_id(&mut self, id: PacketId) {
        self.used_ids.remove(&id.value());
    }

    /// Register that `id` is now waiting on `waiter`, returning the
    /// receiver the caller should await (with its own timeout).
    pub fn await_ack(&mut self, waiter: Waiter, id: PacketId) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.pending.push((waiter, id.value(), tx));
        rx
    }

    /// Resolve a pending wait when the matching ack packet arrives.
    /// Returns whether a waiter was actually found and resolved.
    pub fn resolve_ack(&mut self, waiter: Waiter, id: PacketId) -> bool {
        if let Some(index) = self
            .pending
            .iter()
            .position(|(w, pid, _)| *w == waiter && *pid == id.value())
        {
            let (_, _, tx) = self.pending.remove(index);
            let _ = tx.send(());
            true
        } else {
            false
        }
    }

    /// Cancel every outstanding waiter, waking their receivers with a
    /// dropped-sender error. Called on disconnect so in-flight sends
    /// don't hang forever.
    pub fn cancel_all_waiters(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_id_allocation_reuses_released_ids() {
        let (tx, _rx) = mpsc::channel(8);
        let mut client = ClientHandle::new("c1".to_string(), tx);
        let a = client.alloc_packet_id().unwrap();
        let b = client.alloc_packet_id().unwrap();
        assert_eq!(a.value(), 0);
        assert_eq!(b.value(), 1);
        client.release_packet_id(a);
        let c = client.alloc_packet_id().unwrap();
        assert_eq!(c.value(), 0);
    }

    #[tokio::test]
    async fn resolve_ack_wakes_the_matching_waiter_only() {
        let (tx, _rx) = mpsc::channel(8);
        let mut client = ClientHandle::new("c1".to_string(), tx);
        let id = PacketId::new(7);
        let rx = client.await_ack(Waiter::PubAck, id);
        assert!(!client.resolve_ack(Waiter::PubRec, id));
        assert!(client.resolve_ack(Waiter::PubAck, id));
        assert!(rx.await.is_ok());
    }
}
