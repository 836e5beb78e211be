// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! A dependency-light `RetainStore`: an append/compact JSON-lines file.
//! Any real deployment is expected to swap this for the table/object
//! store extension the core does not cover.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use mote_codec::QoS;

use crate::error::{Error, ErrorKind};
use crate::persistence::RetainStore;

#[derive(Serialize, Deserialize)]
struct Record {
    topic: String,
    data: Vec<u8>,
    qos: QoS,
}

pub struct FileRetainStore {
    path: PathBuf,
    // Serializes compaction writes; `load_all` and reads happen before
    // listeners start, so concurrent readers are not a concern.
    write_lock: Mutex<()>,
}

impl FileRetainStore {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        FileRetainStore {
            path,
            write_lock: Mutex::new(()),
        }
    }

    async fn read_all_records(&self) -> Result<Vec<Record>, Error> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let mut records = Vec::new();
                for line in contents.lines() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let record: Record = serde_json::from_str(line).map_err(|err| {
                        Error::from_string(ErrorKind::StorageError, format!("corrupt retained record: {err}"))
                    })?;
                    records.push(record);
                }
                Ok(records)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_all_records(&self, records: &[Record]) -> Result<(), Error> {
        let mut buf = String::new();
        for record in records {
            let line = serde_json::to_string(record)
                .map_err(|err| Error::from_string(ErrorKind::StorageError, format!("{err}")))?;
            buf.push_str(&line);
            buf.push('\n');
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.ok();
        }
        let tmp_path = self.path.with_extension("jsonl.tmp");
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;
        fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

impl RetainStore for FileRetainStore {
    async fn load_all(&self) -> Result<Vec<(String, Vec<u8>, QoS)>, Error> {
        let records = self.read_all_records().await?;
        Ok(records
            .into_iter()
            .map(|record| (record.topic, record.data, record.qos))
            .collect())
    }

    async fn upsert_many(&self, rows: &[(String, Vec<u8>, QoS)]) -> Result<(), Error> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read_all_records().await?;
        for (topic, data, qos) in rows {
            if let Some(existing) = records.iter_mut().find(|r| &r.topic == topic) {
                existing.data = data.clone();
                existing.qos = *qos;
            } else {
                records.push(Record {
                    topic: topic.clone(),
                    data: data.clone(),
                    qos: *qos,
                });
            }
        }
        self.write_all_records(&records).await
    }

    async fn delete_many(&self, topics: &[String]) -> Result<(), Error> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read_all_records().await?;
        records.retain(|r| !topics.contains(&r.topic));
        self.write_all_records(&records).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_then_load_round_trips() {
        let dir = std::env::temp_dir().join(format!("mote-retain-test-{}", std::process::id()));
        let path = dir.join("retained.jsonl");
        let store = FileRetainStore::new(path.clone());
        store
            .upsert_many(&[("a/b".to_string(), b"X".to_vec(), QoS::AtLeastOnce)])
            .await
            .unwrap();
        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0, "a/b");
        assert_eq!(loaded[0].1, b"X");
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn delete_removes_matching_topic() {
        let dir = std::env::temp_dir().join(format!("mote-retain-test-del-{}", std::process::id()));
        let path = dir.join("retained.jsonl");
        let store = FileRetainStore::new(path.clone());
        store
            .upsert_many(&[("a/b".to_string(), b"X".to_vec(), QoS::AtMostOnce)])
            .await
            .unwrap();
        store.delete_many(&["a/b".to_string()]).await.unwrap();
        let loaded = store.load_all().await.unwrap();
        assert!(loaded.is_empty());
        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
