// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Message shapes passed between the connection handler, the broker core,
//! the routing engine and the persistence channel.

use mote_codec::topic::Topic;
use mote_codec::QoS;

/// A publish as received from a client, before retain/fan-out processing.
#[derive(Clone, Debug)]
pub struct IncomingMessage {
    pub topic: Topic,
    pub qos: QoS,
    pub retain: bool,
    /// Set when the raw topic ended with a trailing separator on a retain
    /// publish: "the payload is a sub-tree to graft in", not a leaf value.
    pub tree: bool,
    pub data: Vec<u8>,
}

/// A message ready to hand to a single subscriber's outbox.
#[derive(Clone, Debug)]
pub struct OutgoingMessage {
    pub topic: String,
    pub qos: QoS,
    pub data: Vec<u8>,
}

impl OutgoingMessage {
    #[must_use]
    pub fn new(topic: String, qos: QoS, data: Vec<u8>) -> Self {
        OutgoingMessage { topic, qos, data }
    }
}

/// The unit the broadcast queue and the persistence channel operate on: a
/// single publish expands to one row (literal, non-tree) or many (wildcard
/// expansion against the retained tree, or tree-graft flattening).
#[derive(Clone, Debug)]
pub struct Row {
    pub nodes: Vec<String>,
    pub data: Vec<u8>,
    pub qos: QoS,
}

impl Row {
    #[must_use]
    pub fn new(nodes: Vec<String>, data: Vec<u8>, qos: QoS) -> Self {
        Row { nodes, data, qos }
    }

    /// A row is a tombstone (retain-delete) when its payload is empty.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn topic_string(&self) -> String {
        Topic::join(&self.nodes)
    }
}

/// Render a nested tree-delivery document (leaf bytes decoded lossily as
/// UTF-8 text) the way `original_source/protocols/stringify.py` does, so a
/// tree-delivery `OutgoingMessage` payload is stable, human-readable JSON.
#[must_use]
pub fn stringify_document(document: &serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(document).unwrap_or_default()
}

/// Decode bytes lossily as UTF-8, matching the codec's own string decode
/// fallback rather than failing tree-document construction on binary data.
#[must_use]
pub fn bytes_to_text(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}
