use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufReader};

use super::{Bucket, Object, ObjectInfo, ObjectStorage};
use crate::error::{Error, Result};

/// Filesystem-backed object storage: `<base>/<bucket>/<key>`.
pub struct FsStorage {
    base_dir: PathBuf,
}

impl FsStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn object_path(&self, bucket: &Bucket, key: &str) -> Result<PathBuf> {
        let key = sanitize_key(key)?;
        Ok(bucket.path.join(key))
    }
}

/// Keys are caller-assembled from URL paths; refuse anything that
/// could climb out of the bucket.
fn sanitize_key(key: &str) -> Result<&str> {
    let trimmed = key.trim_matches('/');
    if trimmed.is_empty() {
        return Err(Error::validation("empty object key"));
    }
    for segment in trimmed.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(Error::validation(format!("invalid object key: {key}")));
        }
    }
    Ok(trimmed)
}

fn systime_to_utc(t: std::io::Result<std::time::SystemTime>) -> DateTime<Utc> {
    t.map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now())
}

async fn walk(
    dir: &Path,
    rel: &Path,
    recursive: bool,
    out: &mut Vec<ObjectInfo>,
) -> std::io::Result<()> {
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let meta = entry.metadata().await?;
        let name = rel.join(entry.file_name());
        if meta.is_dir() {
            if recursive {
                Box::pin(walk(&entry.path(), &name, recursive, out)).await?;
            }
        } else {
            out.push(ObjectInfo {
                name: name.to_string_lossy().replace('\\', "/"),
                size: meta.len() as i64,
                mtime: systime_to_utc(meta.modified()),
            });
        }
    }
    Ok(())
}

#[async_trait]
impl ObjectStorage for FsStorage {
    async fn get_bucket(&self, name: &str) -> Result<Bucket> {
        let path = self.base_dir.join(name);
        if !fs::try_exists(&path).await? {
            return Err(Error::Storage(format!("bucket not found: {name}")));
        }
        Ok(Bucket {
            name: name.to_string(),
            path,
        })
    }

    async fn upsert_bucket(&self, name: &str) -> Result<Bucket> {
        let path = self.base_dir.join(name);
        fs::create_dir_all(&path).await?;
        Ok(Bucket {
            name: name.to_string(),
            path,
        })
    }

    async fn list_objects(
        &self,
        bucket: &Bucket,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<ObjectInfo>> {
        let root = match prefix.trim_matches('/') {
            "" => bucket.path.clone(),
            p => bucket.path.join(sanitize_key(p)?),
        };
        if !fs::try_exists(&root).await? {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        walk(&root, Path::new(""), recursive, &mut out).await?;
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn get_object(&self, bucket: &Bucket, key: &str) -> Result<Object> {
        let path = self.object_path(bucket, key)?;
        let file = match File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(Error::NotFound),
            Err(e) => return Err(e.into()),
        };
        let meta = file.metadata().await?;
        if meta.is_dir() {
            return Err(Error::NotFound);
        }

        Ok(Object {
            reader: Box::pin(BufReader::new(file)),
            size: meta.len() as i64,
            mtime: systime_to_utc(meta.modified()),
            content_type: None,
        })
    }

    async fn put_object(&self, bucket: &Bucket, key: &str, data: Bytes) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = File::create(&path).await?;
        file.write_all(&data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &Bucket, key: &str) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NotFound),
            Err(e) => Err(e.into()),
        }
    }
}
