use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::{Bucket, Object, ObjectInfo, ObjectStorage};
use crate::error::{Error, Result};

/// In-memory object storage for tests.
#[derive(Default)]
pub struct MemoryStorage {
    // bucket -> key -> (data, mtime)
    buckets: Mutex<BTreeMap<String, BTreeMap<String, (Bytes, DateTime<Utc>)>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn bucket_handle(name: &str) -> Bucket {
    Bucket {
        name: name.to_string(),
        path: name.into(),
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn get_bucket(&self, name: &str) -> Result<Bucket> {
        let buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        if !buckets.contains_key(name) {
            return Err(Error::Storage(format!("bucket not found: {name}")));
        }
        Ok(bucket_handle(name))
    }

    async fn upsert_bucket(&self, name: &str) -> Result<Bucket> {
        self.buckets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(name.to_string())
            .or_default();
        Ok(bucket_handle(name))
    }

    async fn list_objects(
        &self,
        bucket: &Bucket,
        prefix: &str,
        _recursive: bool,
    ) -> Result<Vec<ObjectInfo>> {
        let buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let Some(objects) = buckets.get(&bucket.name) else {
            return Ok(Vec::new());
        };
        Ok(objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, (data, mtime))| ObjectInfo {
                name: key[prefix.len()..].to_string(),
                size: data.len() as i64,
                mtime: *mtime,
            })
            .collect())
    }

    async fn get_object(&self, bucket: &Bucket, key: &str) -> Result<Object> {
        let buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let (data, mtime) = buckets
            .get(&bucket.name)
            .and_then(|objects| objects.get(key.trim_start_matches('/')))
            .cloned()
            .ok_or(Error::NotFound)?;

        Ok(Object {
            size: data.len() as i64,
            mtime,
            content_type: None,
            reader: Box::pin(Cursor::new(data.to_vec())),
        })
    }

    async fn put_object(&self, bucket: &Bucket, key: &str, data: Bytes) -> Result<()> {
        self.buckets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(bucket.name.clone())
            .or_default()
            .insert(key.trim_start_matches('/').to_string(), (data, Utc::now()));
        Ok(())
    }

    async fn delete_object(&self, bucket: &Bucket, key: &str) -> Result<()> {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let removed = buckets
            .get_mut(&bucket.name)
            .and_then(|objects| objects.remove(key.trim_start_matches('/')));
        if removed.is_none() {
            return Err(Error::NotFound);
        }
        Ok(())
    }
}
