// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! The retained tree: same shape as the subscription trie, but each leaf
//! holds the last-retained payload (and the qos it was retained at,
//! needed to rebuild a faithful [`Row`]/persistence record — a detail
//! spec.md's data model elides but §6's persistence columns require).

use serde_json::Value;

use mote_codec::topic;
use mote_codec::QoS;

use crate::error::{Error, ErrorKind};
use crate::messages::Row;
use crate::trie::Node;

type RetainedLeaf = (Vec<u8>, QoS);

#[derive(Clone, Debug, Default)]
pub struct RetainedTree {
    root: Node<RetainedLeaf>,
}

impl RetainedTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a single row: a tombstone (empty payload) deletes the leaf,
    /// otherwise the leaf is created/overwritten.
    pub fn apply_row(&mut self, row: &Row) {
        if row.is_tombstone() {
            self.root.remove(&row.nodes);
        } else {
            let data = row.data.clone();
            let qos = row.qos;
            self.root.upsert(&row.nodes, |leaf| *leaf = Some((data, qos)));
        }
    }

    /// Rebuild the tree from stored `(topic, data, qos)` records, used on
    /// startup before listeners are started.
    pub fn load(&mut self, records: impl IntoIterator<Item = (String, Vec<u8>, QoS)>) {
        for (topic_str, data, qos) in records {
            let nodes: Vec<String> = topic_str.split(topic::TOPIC_SEP).map(str::to_string).collect();
            self.root.upsert(&nodes, |leaf| *leaf = Some((data, qos)));
        }
    }

    /// Every `(topic, data, qos)` record currently retained, for a
    /// persistence compaction pass.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, Vec<u8>, QoS)> {
        let mut out = Vec::new();
        let mut prefix = Vec::new();
        collect_all(&self.root, &mut prefix, &mut out);
        out
            .into_iter()
            .map(|row| (row.topic_string(), row.data, row.qos))
            .collect()
    }

    /// Walk the retained tree against `nodes` (a topic or a subscription
    /// filter's node list): literal nodes descend directly, `+` expands
    /// across every direct child, `#`/`*` (terminal) enumerate every leaf
    /// below. When `synthesize` is given, a literal path with no matching
    /// retained child (first-ever retain of that exact topic) produces
    /// one row carrying `synthesize`'s payload instead of contributing no
    /// rows — this only applies before any wildcard has been crossed.
    #[must_use]
    pub fn get_applicable_rows(
        &self,
        nodes: &[String],
        synthesize: Option<(&[u8], QoS)>,
    ) -> Vec<Row> {
        let mut out = Vec::new();
        let mut prefix = Vec::new();
        walk(&self.root, nodes, &mut prefix, false, synthesize, &mut out);
        out
    }

    /// Dump the entire retained tree, used when a sync-subscribe's
    /// remainder is exactly the "everything" marker.
    #[must_use]
    pub fn dump_everything(&self) -> Vec<Row> {
        let mut out = Vec::new();
        let mut prefix = Vec::new();
        collect_all(&self.root, &mut prefix, &mut out);
        out
    }

    /// Flatten a tree-graft publish: `doc` is the structured (JSON-shaped)
    /// payload of a retain publish whose topic ended in a trailing
    /// separator. Returns the rows to apply to this tree and push onto
    /// the broadcast queue.
    pub fn graft_tree(
        &self,
        topic_nodes: &[String],
        doc: &Value,
        qos: QoS,
    ) -> Result<Vec<Row>, Error> {
        let mut out = Vec::new();
        let mut prefix: Vec<String> = Vec::new();
        let retained_node = self.root.find(topic_nodes);
        graft_flatten(topic_nodes, doc, retained_node, &mut prefix, &mut out, qos)?;
        Ok(out)
    }
}

fn collect_all(node: &Node<RetainedLeaf>, prefix: &mut Vec<String>, out: &mut Vec<Row>) {
    if let Some((data, qos)) = node.leaf() {
        out.push(Row::new(prefix.clone(), data.clone(), *qos));
    }
    for (key, child) in node.children() {
        prefix.push(key.clone());
        collect_all(child, prefix, out);
        prefix.pop();
    }
}

#[allow(clippy::too_many_arguments)]
fn walk(
    node: &Node<RetainedLeaf>,
    remaining: &[String],
    prefix: &mut Vec<String>,
    wildcard_crossed: bool,
    synthesize: Option<(&[u8], QoS)>,
    out: &mut Vec<Row>,
) {
    let Some(part) = remaining.first() else {
        if let Some((data, qos)) = node.leaf() {
            out.push(Row::new(prefix.clone(), data.clone(), *qos));
        }
        return;
    };
    let rest = &remaining[1..];

    if (part == topic::MULTI_WILDCARD || part == topic::EVERYTHING) && rest.is_empty() {
        collect_all(node, prefix, out);
        return;
    }

    if part == topic::SINGLE_WILDCARD {
        for (key, child) in node.children() {
            prefix.push(key.clone());
            walk(child, rest, prefix, true, synthesize, out);
            prefix.pop();
        }
        return;
    }

    match node.child(part) {
        Some(child) => {
            prefix.push(part.clone());
            walk(child, rest, prefix, wildcard_crossed, synthesize, out);
            prefix.pop();
        }
        None => {
            if wildcard_crossed {
                return;
            }
            let Some((data, qos)) = synthesize else {
                return;
            };
            if rest.iter().any(|n| n == topic::SINGLE_WILDCARD || n == topic::MULTI_WILDCARD) {
                return;
            }
            let mut full_path = prefix.clone();
            full_path.push(part.clone());
            full_path.extend(rest.iter().cloned());
            out.push(Row::new(full_path, data.to_vec(), qos));
        }
    }
}

fn graft_flatten(
    topic_remaining: &[String],
    doc: &Value,
    retained_node: Option<&Node<RetainedLeaf>>,
    prefix: &mut Vec<String>,
    out: &mut Vec<Row>,
    qos: QoS,
) -> Result<(), Error> {
    if let Some(first) = topic_remaining.first() {
        if first == topic::MULTI_WILDCARD {
            return Err(Error::new(
                ErrorKind::TopicError,
                "multi-level wildcard is not valid inside a tree-graft payload",
            ));
        }
        if first != topic::SINGLE_WILDCARD {
            prefix.push(first.clone());
            let child_retained = retained_node.and_then(|n| n.child(first));
            graft_flatten(
                &topic_remaining[1..],
                doc,
                child_retained,
                prefix,
                out,
                qos,
            )?;
            prefix.pop();
            return Ok(());
        }
    }

    let rest: &[String] = if topic_remaining.is_empty() {
        &[]
    } else {
        &topic_remaining[1..]
    };

    match doc {
        Value::String(s) => {
            out.push(Row::new(prefix.clone(), s.clone().into_bytes(), qos));
            Ok(())
        }
        Value::Object(map) => {
            let has_marker = map.contains_key(topic::SINGLE_WILDCARD);
            for (key, value) in map {
                if key == topic::SINGLE_WILDCARD {
                    continue;
                }
                prefix.push(key.clone());
                let child_retained = retained_node.and_then(|n| n.child(key));
                graft_flatten(rest, value, child_retained, prefix, out, qos)?;
                prefix.pop();
            }
            if has_marker && rest.is_empty() {
                if let Some(node) = retained_node {
                    for (key, _child) in node.children() {
                        if !map.contains_key(key) {
                            let mut tomb = prefix.clone();
                            tomb.push(key.clone());
                            out.push(Row::new(tomb, Vec::new(), qos));
                        }
                    }
                }
            }
            Ok(())
        }
        _ => Err(Error::new(
            ErrorKind::TopicError,
            "tree-graft document leaves must be strings",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(s: &str) -> Vec<String> {
        s.split('/').map(str::to_string).collect()
    }

    #[test]
    fn literal_put_and_sync_read() {
        let mut tree = RetainedTree::new();
        tree.apply_row(&Row::new(path("a/b"), b"X".to_vec(), QoS::AtMostOnce));
        let rows = tree.get_applicable_rows(&path("a/b"), None);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].data, b"X");
    }

    #[test]
    fn empty_payload_deletes_leaf() {
        let mut tree = RetainedTree::new();
        tree.apply_row(&Row::new(path("a/b"), b"X".to_vec(), QoS::AtMostOnce));
        tree.apply_row(&Row::new(path("a/b"), Vec::new(), QoS::AtMostOnce));
        let rows = tree.get_applicable_rows(&path("a/b"), None);
        assert!(rows.is_empty());
    }

    #[test]
    fn plus_wildcard_expands_children() {
        let mut tree = RetainedTree::new();
        tree.apply_row(&Row::new(path("a/b/c"), b"1".to_vec(), QoS::AtMostOnce));
        tree.apply_row(&Row::new(path("a/d/c"), b"2".to_vec(), QoS::AtMostOnce));
        let mut rows = tree.get_applicable_rows(&path("a/+/c"), None);
        rows.sort_by(|a, b| a.data.cmp(&b.data));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].data, b"1");
        assert_eq!(rows[1].data, b"2");
    }

    #[test]
    fn hash_wildcard_enumerates_everything_below() {
        let mut tree = RetainedTree::new();
        tree.apply_row(&Row::new(path("a/b"), b"1".to_vec(), QoS::AtMostOnce));
        tree.apply_row(&Row::new(path("a/b/c"), b"2".to_vec(), QoS::AtMostOnce));
        tree.apply_row(&Row::new(path("a/e"), b"3".to_vec(), QoS::AtMostOnce));
        let rows = tree.get_applicable_rows(&path("a/#"), None);
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn first_ever_literal_retain_is_synthesized() {
        let tree = RetainedTree::new();
        let rows = tree.get_applicable_rows(&path("a/b"), Some((b"new", QoS::AtLeastOnce)));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].data, b"new");
        assert_eq!(rows[0].nodes, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn graft_tree_flattens_nested_document() {
        let tree = RetainedTree::new();
        let doc = json!({"b": "1", "c": {"leaf": "2"}});
        let rows = tree
            .graft_tree(&path("a"), &doc, QoS::AtMostOnce)
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn graft_tree_rejects_multi_wildcard_in_topic() {
        let tree = RetainedTree::new();
        let doc = json!({"b": "1"});
        assert!(tree.graft_tree(&path("a/#"), &doc, QoS::AtMostOnce).is_err());
    }

    #[test]
    fn graft_tree_marker_tombstones_missing_keys() {
        let mut tree = RetainedTree::new();
        tree.apply_row(&Row::new(path("a/b"), b"1".to_vec(), QoS::AtMostOnce));
        tree.apply_row(&Row::new(path("a/c"), b"2".to_vec(), QoS::AtMostOnce));
        let doc = json!({"b": "1", "+": true});
        let rows = tree.graft_tree(&path("a"), &doc, QoS::AtMostOnce).unwrap();
        assert!(rows.iter().any(|r| r.nodes == path("a/c") && r.is_tombstone()));
    }
}
