// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! The subscription trie: topic node → sub-trie, leaves hold a
//! `client_id → qos` map. Wildcards `+`/`#` are stored as ordinary
//! literal child keys; they are only interpreted as wildcards by the
//! routing engine's walk, never at insert time.

use std::collections::HashMap;

use mote_codec::topic::Topic;
use mote_codec::{QoS, TopicError};

use crate::trie::Node;

/// `client_id -> qos` map held by every subscription-trie leaf.
pub type ClientQosMap = HashMap<String, QoS>;

#[derive(Clone, Debug, Default)]
pub struct SubscriptionTrie {
    root: Node<ClientQosMap>,
}

impl SubscriptionTrie {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn root(&self) -> &Node<ClientQosMap> {
        &self.root
    }

    /// Insert/update a subscription. Upserts `qos` into the terminal
    /// node's client map.
    pub fn subscribe(&mut self, client_id: &str, filter: &str, qos: QoS) -> Result<(), TopicError> {
        Topic::validate_filter(filter)?;
        let path = split_path(filter);
        self.root.upsert(&path, |leaf| {
            leaf.get_or_insert_with(ClientQosMap::new)
                .insert(client_id.to_string(), qos);
        });
        Ok(())
    }

    /// Remove `client_id` from the filter's leaf, cascading the delete up
    /// through now-empty ancestors when the leaf's client map becomes
    /// empty.
    pub fn unsubscribe(&mut self, client_id: &str, filter: &str) {
        let path = split_path(filter);
        if let Some(node) = find_mut(&mut self.root, &path) {
            if let Some(map) = node.leaf_mut() {
                map.remove(client_id);
                if map.is_empty() {
                    self.root.remove(&path);
                }
            }
        }
    }

    /// Remove `client_id` from every filter it is subscribed to.
    pub fn remove_client(&mut self, client_id: &str, filters: &[String]) {
        for filter in filters {
            self.unsubscribe(client_id, filter);
        }
    }
}

fn split_path(topic: &str) -> Vec<String> {
    topic.split('/').map(str::to_string).collect()
}

fn find_mut<'a, L>(node: &'a mut Node<L>, path: &[String]) -> Option<&'a mut Node<L>> {
    if path.is_empty() {
        return Some(node);
    }
    find_mut(node.child_mut(&path[0])?, &path[1..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_then_unsubscribe_is_structurally_identical() {
        let mut trie = SubscriptionTrie::new();
        trie.subscribe("c1", "a/b", QoS::AtMostOnce).unwrap();
        trie.unsubscribe("c1", "a/b");
        assert!(trie.root().child("a").is_none());
    }

    #[test]
    fn two_clients_share_a_leaf() {
        let mut trie = SubscriptionTrie::new();
        trie.subscribe("c1", "a/b", QoS::AtMostOnce).unwrap();
        trie.subscribe("c2", "a/b", QoS::AtLeastOnce).unwrap();
        trie.unsubscribe("c1", "a/b");
        let node = trie.root().find(&["a".to_string(), "b".to_string()]).unwrap();
        assert!(node.leaf().unwrap().contains_key("c2"));
        assert!(!node.leaf().unwrap().contains_key("c1"));
    }

    #[test]
    fn rejects_misplaced_multi_wildcard() {
        let mut trie = SubscriptionTrie::new();
        assert!(trie.subscribe("c1", "a/#/b", QoS::AtMostOnce).is_err());
    }
}
