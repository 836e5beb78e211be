// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Write-behind persistence for the retained tree: a bounded channel from
//! the broker to a single writer task, and the `RetainStore` trait its
//! backing store must implement.

mod file_store;

pub use file_store::FileRetainStore;

use mote_codec::QoS;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::messages::Row;

/// Persistence backend behind the retained tree. The core only ever
/// needs a load-on-startup and a batched upsert/delete pass; the
/// concrete schema is an external collaborator's business.
pub trait RetainStore: Send + Sync {
    fn load_all(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<(String, Vec<u8>, QoS)>, Error>> + Send;
    fn upsert_many(
        &self,
        rows: &[(String, Vec<u8>, QoS)],
    ) -> impl std::future::Future<Output = Result<(), Error>> + Send;
    fn delete_many(
        &self,
        topics: &[String],
    ) -> impl std::future::Future<Output = Result<(), Error>> + Send;
}

/// One batch handed from the broker to the persistence writer task.
pub type PersistenceTask = Vec<Row>;

/// Spawn the writer task: drains `rx`, splits each batch into tombstone
/// topics and live upserts, applies them to `store` in one pass per
/// batch. Persistence failures are logged and do not affect the
/// in-memory retained tree, which remains authoritative for live
/// traffic.
pub fn spawn_writer<S>(store: std::sync::Arc<S>, mut rx: mpsc::Receiver<PersistenceTask>) -> tokio::task::JoinHandle<()>
where
    S: RetainStore + 'static,
{
    tokio::spawn(async move {
        while let Some(batch) = rx.recv().await {
            let mut deletes = Vec::new();
            let mut upserts = Vec::new();
            for row in batch {
                if row.is_tombstone() {
                    deletes.push(row.topic_string());
                } else {
                    upserts.push((row.topic_string(), row.data, row.qos));
                }
            }
            if !deletes.is_empty() {
                if let Err(err) = store.delete_many(&deletes).await {
                    log::error!("persistence: failed to delete retained rows: {err}");
                }
            }
            if !upserts.is_empty() {
                if let Err(err) = store.upsert_many(&upserts).await {
                    log::error!("persistence: failed to upsert retained rows: {err}");
                }
            }
        }
        log::info!("persistence: writer task exiting, channel closed");
    })
}
