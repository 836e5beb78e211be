// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Broker core: owns the client table, the subscription trie and the
//! retained tree, and runs the single broadcast worker that drains
//! published rows through the routing engine.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex, RwLock};

use mote_codec::topic::Topic;
use mote_codec::QoS;

use crate::client::ClientHandle;
use crate::messages::{IncomingMessage, OutgoingMessage, Row};
use crate::persistence::PersistenceTask;
use crate::retained::RetainedTree;
use crate::routing;
use crate::subscriptions::SubscriptionTrie;

const BROADCAST_QUEUE_SIZE: usize = 1024;
const PERSISTENCE_QUEUE_SIZE: usize = 256;

/// Shared broker state, handed to every listener and connection handler
/// as `Arc<Broker>`. No process-wide singleton: this value is
/// constructed once in `server::run_server`.
pub struct Broker {
    clients: Mutex<HashMap<String, ClientHandle>>,
    subscriptions: RwLock<SubscriptionTrie>,
    retained: Mutex<RetainedTree>,
    broadcast_tx: mpsc::Sender<Vec<Row>>,
    persistence_tx: Option<mpsc::Sender<PersistenceTask>>,
}

impl Broker {
    /// Build a broker and spawn its broadcast worker. `persistence_tx`
    /// is `None` when running without a backing store (tests, or a
    /// `--test` config-check run).
    #[must_use]
    pub fn new(persistence_tx: Option<mpsc::Sender<PersistenceTask>>) -> Arc<Self> {
        let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_QUEUE_SIZE);
        let broker = Arc::new(Broker {
            clients: Mutex::new(HashMap::new()),
            subscriptions: RwLock::new(SubscriptionTrie::new()),
            retained: Mutex::new(RetainedTree::new()),
            broadcast_tx,
            persistence_tx,
        });
        broker.clone().spawn_broadcast_worker(broadcast_rx);
        broker
    }

    /// Seed the retained tree from persisted records before any
    /// listener starts accepting connections.
    pub async fn load_retained(&self, records: Vec<(String, Vec<u8>, QoS)>) {
        let mut retained = self.retained.lock().await;
        retained.load(records);
    }

    fn spawn_broadcast_worker(self: Arc<Self>, mut rx: mpsc::Receiver<Vec<Row>>) {
        tokio::spawn(async move {
            while let Some(rows) = rx.recv().await {
                let routed = {
                    let subscriptions = self.subscriptions.read().await;
                    routing::route(subscriptions.root(), &rows)
                };
                let clients = self.clients.lock().await;
                for routed_message in routed {
                    if let Some(client) = clients.get(&routed_message.client_id) {
                        if client.send(routed_message.message).await.is_err() {
                            log::warn!(
                                "broker: client `{}` outbox closed, dropping message",
                                routed_message.client_id
                            );
                        }
                    }
                }
            }
            log::info!("broker: broadcast worker exiting, queue closed");
        });
    }

    /// Register a newly-CONNECTed client, evicting any prior client
    /// with the same id (connection override, spec.md S6).
    pub async fn add_client(&self, handle: ClientHandle) -> Option<ClientHandle> {
        let mut clients = self.clients.lock().await;
        let previous = clients.insert(handle.id().to_string(), handle);
        if let Some(prior) = previous.as_ref() {
            log::info!("broker: client `{}` evicted by a new CONNECT", prior.id());
            prior.notify_evict();
        }
        previous
    }

    pub async fn remove_client(&self, client_id: &str) -> Option<ClientHandle> {
        let mut clients = self.clients.lock().await;
        clients.remove(client_id)
    }

    pub async fn client_is_current(&self, client_id: &str) -> bool {
        let clients = self.clients.lock().await;
        clients.get(client_id).is_some_and(ClientHandle::is_alive)
    }

    /// Run `f` against a connected client's handle under the client
    /// table lock. Used by the connection handler for packet-id and
    /// waiter bookkeeping it cannot own itself, since the handle lives
    /// in the broker's table.
    pub async fn with_client_mut<R>(
        &self,
        client_id: &str,
        f: impl FnOnce(&mut ClientHandle) -> R,
    ) -> Option<R> {
        let mut clients = self.clients.lock().await;
        clients.get_mut(client_id).map(f)
    }

    /// Publish a non-retain message: wildcard-free topics only (enforced
    /// at codec/decode time by `Topic::validate_publish`), expanding to
    /// exactly one row.
    pub async fn publish(&self, message: IncomingMessage) {
        if message.retain {
            self.publish_retained(message).await;
            return;
        }
        let row = Row::new(
            message.topic.node_strs().into_iter().map(str::to_string).collect(),
            message.data,
            message.qos,
        );
        self.enqueue_rows(vec![row]).await;
    }

    async fn publish_retained(&self, message: IncomingMessage) {
        let topic_nodes: Vec<String> = message
            .topic
            .node_strs()
            .into_iter()
            .map(str::to_string)
            .collect();
        let is_wildcard_topic = topic_nodes
            .iter()
            .any(|n| n == mote_codec::topic::SINGLE_WILDCARD || n == mote_codec::topic::MULTI_WILDCARD);

        if message.tree {
            let rows = match serde_json::from_slice::<Value>(&message.data) {
                Ok(document) => {
                    let retained = self.retained.lock().await;
                    match retained.graft_tree(&topic_nodes, &document, message.qos) {
                        Ok(rows) => rows,
                        Err(err) => {
                            log::error!("broker: tree-graft publish rejected: {err}");
                            return;
                        }
                    }
                }
                Err(err) => {
                    log::error!("broker: tree publish payload is not a JSON document: {err}");
                    return;
                }
            };
            self.apply_and_persist(rows).await;
            return;
        }

        if is_wildcard_topic {
            // A retain-publish whose topic itself carries a wildcard
            // carries no new data: it re-broadcasts every currently
            // retained value matching the wildcard to live subscribers,
            // without altering the retained tree or touching
            // persistence. The payload on the wire is ignored.
            let rows = {
                let retained = self.retained.lock().await;
                retained.get_applicable_rows(&topic_nodes, None)
            };
            self.enqueue_rows(rows).await;
            return;
        }

        let row = Row::new(topic_nodes, message.data, message.qos);
        self.apply_and_persist(vec![row]).await;
    }

    async fn apply_and_persist(&self, rows: Vec<Row>) {
        {
            let mut retained = self.retained.lock().await;
            for row in &rows {
                retained.apply_row(row);
            }
        }
        self.enqueue_persistence(rows.clone()).await;
        self.enqueue_rows(rows).await;
    }

    async fn enqueue_rows(&self, rows: Vec<Row>) {
        if self.broadcast_tx.send(rows).await.is_err() {
            log::error!("broker: broadcast worker gone, dropping publish");
        }
    }

    async fn enqueue_persistence(&self, rows: Vec<Row>) {
        if let Some(tx) = &self.persistence_tx {
            if tx.send(rows).await.is_err() {
                log::error!("broker: persistence writer gone, retained tree stays authoritative");
            }
        }
    }

    /// Record a subscription. Returns a sync-dump (see spec's leading
    /// separator convention) when `sync` is set, to be pushed to the
    /// client's outbox by the caller before SUBACK.
    pub async fn subscribe(
        &self,
        client_id: &str,
        filter: &str,
        qos: QoS,
        sync: bool,
    ) -> Result<Vec<OutgoingMessage>, mote_codec::TopicError> {
        {
            let mut subscriptions = self.subscriptions.write().await;
            subscriptions.subscribe(client_id, filter, qos)?;
        }
        if !sync {
            return Ok(Vec::new());
        }
        Topic::validate_filter(filter)?;
        let nodes: Vec<String> = filter.split(mote_codec::topic::TOPIC_SEP).map(str::to_string).collect();
        let retained = self.retained.lock().await;
        let rows = if nodes.iter().any(|n| n == mote_codec::topic::EVERYTHING) {
            retained.dump_everything()
        } else {
            retained.get_applicable_rows(&nodes, None)
        };
        Ok(rows
            .into_iter()
            .map(|row| OutgoingMessage::new(row.topic_string(), row.qos, row.data))
            .collect())
    }

    pub async fn unsubscribe(&self, client_id: &str, filter: &str) {
        let mut subscriptions = self.subscriptions.write().await;
        subscriptions.unsubscribe(client_id, filter);
    }

    pub async fn remove_client_subscriptions(&self, client_id: &str, filters: &[String]) {
        let mut subscriptions = self.subscriptions.write().await;
        subscriptions.remove_client(client_id, filters);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_fans_out_to_subscribers() {
        let broker = Broker::new(None);
        let (tx, mut rx) = mpsc::channel(8);
        broker
            .add_client(ClientHandle::new("c1".to_string(), tx))
            .await;
        broker
            .subscribe("c1", "a/b", QoS::AtMostOnce, false)
            .await
            .unwrap();

        let message = IncomingMessage {
            topic: Topic::parse("a/b").unwrap(),
            qos: QoS::AtMostOnce,
            retain: false,
            tree: false,
            data: b"hello".to_vec(),
        };
        broker.publish(message).await;

        let received = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.data, b"hello");
        assert_eq!(received.topic, "a/b");
    }

    #[tokio::test]
    async fn sync_subscribe_dumps_retained_value_first() {
        let broker = Broker::new(None);
        let retain_message = IncomingMessage {
            topic: Topic::parse("a/b").unwrap(),
            qos: QoS::AtLeastOnce,
            retain: true,
            tree: false,
            data: b"X".to_vec(),
        };
        broker.publish(retain_message).await;
        // Let the broadcast worker drain so the retained write is visible.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let dump = broker
            .subscribe("c1", "a/b", QoS::AtMostOnce, true)
            .await
            .unwrap();
        assert_eq!(dump.len(), 1);
        assert_eq!(dump[0].data, b"X");
    }

    #[tokio::test]
    async fn second_connect_evicts_prior_client() {
        let broker = Broker::new(None);
        let (tx1, _rx1) = mpsc::channel(8);
        let (tx2, _rx2) = mpsc::channel(8);
        broker
            .add_client(ClientHandle::new("dup".to_string(), tx1))
            .await;
        let evicted = broker
            .add_client(ClientHandle::new("dup".to_string(), tx2))
            .await;
        assert!(evicted.is_some());
        assert!(broker.client_is_current("dup").await);
    }
}
