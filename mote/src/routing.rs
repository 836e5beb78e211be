// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! The routing engine: depth-first walk over the subscription trie,
//! matching a batch of rows and producing one [`OutgoingMessage`] per
//! matching client.

use std::cmp::min;
use std::collections::HashMap;

use serde_json::{Map, Value};

use mote_codec::topic;
use mote_codec::QoS;

use crate::messages::{bytes_to_text, stringify_document, OutgoingMessage, Row};
use crate::subscriptions::ClientQosMap;
use crate::trie::Node;

/// One routed delivery: which client's outbox it belongs on.
#[derive(Clone, Debug)]
pub struct RoutedMessage {
    pub client_id: String,
    pub message: OutgoingMessage,
}

/// Route a batch of rows (from a single `publish` call, in order) against
/// the subscription trie.
#[must_use]
pub fn route(trie: &Node<ClientQosMap>, rows: &[Row]) -> Vec<RoutedMessage> {
    let mut out = Vec::new();
    let mut path = Vec::new();
    walk(trie, rows, 0, &mut path, false, &mut out);
    out
}

fn walk(
    node: &Node<ClientQosMap>,
    rows: &[Row],
    depth: usize,
    path: &mut Vec<String>,
    wildcard_bearing: bool,
    out: &mut Vec<RoutedMessage>,
) {
    if let Some(client_map) = node.leaf() {
        let leaf_rows: Vec<&Row> = rows.iter().filter(|r| r.nodes.len() == depth).collect();
        if !leaf_rows.is_empty() {
            emit(path, &leaf_rows, depth, wildcard_bearing, client_map, out);
        }
    }

    for (key, child) in node.children() {
        match key.as_str() {
            topic::MULTI_WILDCARD => {
                let matching: Vec<&Row> = rows.iter().filter(|r| r.nodes.len() >= depth).collect();
                if matching.is_empty() {
                    continue;
                }
                if let Some(client_map) = child.leaf() {
                    emit(path, &matching, depth, true, client_map, out);
                }
            }
            topic::SINGLE_WILDCARD => {
                let mut groups: HashMap<&str, Vec<Row>> = HashMap::new();
                for row in rows.iter().filter(|r| r.nodes.len() > depth) {
                    groups
                        .entry(row.nodes[depth].as_str())
                        .or_default()
                        .push(row.clone());
                }
                for (node_val, group_rows) in groups {
                    path.push(node_val.to_string());
                    walk(child, &group_rows, depth + 1, path, true, out);
                    path.pop();
                }
            }
            literal => {
                let matching: Vec<Row> = rows
                    .iter()
                    .filter(|r| r.nodes.get(depth).map(String::as_str) == Some(literal))
                    .cloned()
                    .collect();
                if matching.is_empty() {
                    continue;
                }
                path.push(literal.to_string());
                walk(child, &matching, depth + 1, path, wildcard_bearing, out);
                path.pop();
            }
        }
    }
}

fn emit(
    path: &[String],
    leaf_rows: &[&Row],
    depth: usize,
    wildcard_bearing: bool,
    client_map: &ClientQosMap,
    out: &mut Vec<RoutedMessage>,
) {
    let topic_str = mote_codec::topic::Topic::join(path);
    let (payload, native_qos) = if wildcard_bearing {
        let document = build_tree_document(leaf_rows, depth);
        let max_qos = leaf_rows.iter().map(|r| r.qos).max().unwrap_or_default();
        (stringify_document(&document), max_qos)
    } else {
        let last = leaf_rows.last().expect("leaf_rows is non-empty");
        (last.data.clone(), last.qos)
    };

    for (client_id, subscribed_qos) in client_map {
        let delivered_qos = min(native_qos, *subscribed_qos);
        out.push(RoutedMessage {
            client_id: client_id.clone(),
            message: OutgoingMessage::new(topic_str.clone(), delivered_qos, payload.clone()),
        });
    }
}

/// Build `{b: {leaf: "1", c: {leaf: "2"}}, e: {leaf: "3"}}`-shaped
/// documents out of the leaf rows collected under a wildcard-bearing
/// match path, per `original_source/protocols/stringify.py`.
fn build_tree_document(rows: &[&Row], depth: usize) -> Value {
    let mut map = Map::new();
    for row in rows {
        let suffix = &row.nodes[depth..];
        if suffix.is_empty() {
            // A row matching exactly at the wildcard node itself (e.g. `a/#`
            // matching retained key `a`) has no nested keys to build.
            map.insert("leaf".to_string(), Value::String(bytes_to_text(&row.data)));
            continue;
        }
        insert_leaf(&mut map, suffix, &bytes_to_text(&row.data));
    }
    Value::Object(map)
}

fn insert_leaf(map: &mut Map<String, Value>, suffix: &[String], data: &str) {
    let key = suffix[0].clone();
    let entry = map
        .entry(key)
        .or_insert_with(|| Value::Object(Map::new()));
    if suffix.len() == 1 {
        if let Value::Object(inner) = entry {
            inner.insert("leaf".to_string(), Value::String(data.to_string()));
        }
    } else if let Value::Object(inner) = entry {
        insert_leaf(inner, &suffix[1..], data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(s: &str) -> Vec<String> {
        s.split('/').map(str::to_string).collect()
    }

    #[test]
    fn literal_subscription_receives_single_row() {
        let mut trie: Node<ClientQosMap> = Node::new();
        trie.upsert(&nodes("a/b"), |leaf| {
            leaf.get_or_insert_with(ClientQosMap::new)
                .insert("c1".to_string(), QoS::AtMostOnce);
        });
        let rows = vec![Row::new(nodes("a/b"), b"hello".to_vec(), QoS::AtMostOnce)];
        let routed = route(&trie, &rows);
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].client_id, "c1");
        assert_eq!(routed[0].message.data, b"hello");
        assert_eq!(routed[0].message.topic, "a/b");
    }

    #[test]
    fn plus_wildcard_subscription_gets_each_branch() {
        let mut trie: Node<ClientQosMap> = Node::new();
        trie.upsert(&nodes("a/+/c"), |leaf| {
            leaf.get_or_insert_with(ClientQosMap::new)
                .insert("c1".to_string(), QoS::AtMostOnce);
        });
        let rows = vec![
            Row::new(nodes("a/b/c"), b"1".to_vec(), QoS::AtMostOnce),
            Row::new(nodes("a/d/c"), b"2".to_vec(), QoS::AtMostOnce),
        ];
        let routed = route(&trie, &rows);
        assert_eq!(routed.len(), 2);
        let topics: Vec<&str> = routed.iter().map(|r| r.message.topic.as_str()).collect();
        assert!(topics.contains(&"a/b/c"));
        assert!(topics.contains(&"a/d/c"));
    }

    #[test]
    fn hash_wildcard_builds_nested_document() {
        let mut trie: Node<ClientQosMap> = Node::new();
        trie.upsert(&nodes("a/#"), |leaf| {
            leaf.get_or_insert_with(ClientQosMap::new)
                .insert("c1".to_string(), QoS::AtMostOnce);
        });
        let rows = vec![
            Row::new(nodes("a/b"), b"1".to_vec(), QoS::AtMostOnce),
            Row::new(nodes("a/b/c"), b"2".to_vec(), QoS::AtMostOnce),
            Row::new(nodes("a/e"), b"3".to_vec(), QoS::AtMostOnce),
        ];
        let routed = route(&trie, &rows);
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].message.topic, "a");
        let doc: Value = serde_json::from_slice(&routed[0].message.data).unwrap();
        assert_eq!(doc["b"]["leaf"], "1");
        assert_eq!(doc["b"]["c"]["leaf"], "2");
        assert_eq!(doc["e"]["leaf"], "3");
    }

    #[test]
    fn downgrades_delivered_qos_to_subscriber_request() {
        let mut trie: Node<ClientQosMap> = Node::new();
        trie.upsert(&nodes("a/b"), |leaf| {
            leaf.get_or_insert_with(ClientQosMap::new)
                .insert("c1".to_string(), QoS::AtMostOnce);
        });
        let rows = vec![Row::new(nodes("a/b"), b"x".to_vec(), QoS::ExactlyOnce)];
        let routed = route(&trie, &rows);
        assert_eq!(routed[0].message.qos, QoS::AtMostOnce);
    }
}
