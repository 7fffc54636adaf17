mod fs;
mod img;
mod memory;

pub use fs::FsStorage;
pub use img::{Fit, ImageProcessor, ImgFormat, ImgProcessOpts, PassthroughProcessor, uri_to_img_opts};
pub use memory::MemoryStorage;

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;

use crate::error::Result;

/// Asset bucket for a user's sites.
pub fn asset_bucket_name(user_id: &str) -> String {
    format!("static-{user_id}")
}

/// Bucket holding image originals uploaded outside any project.
pub fn imgs_bucket_name(user_id: &str) -> String {
    user_id.to_string()
}

#[derive(Debug, Clone)]
pub struct Bucket {
    pub name: String,
    pub(crate) path: std::path::PathBuf,
}

#[derive(Debug, Clone)]
pub struct ObjectInfo {
    /// Key relative to the listing prefix.
    pub name: String,
    pub size: i64,
    pub mtime: DateTime<Utc>,
}

/// A resolved object ready for streaming. `content_type`, when stored,
/// is advisory; callers prefer the file-extension table.
pub struct Object {
    pub reader: Pin<Box<dyn AsyncRead + Send>>,
    pub size: i64,
    pub mtime: DateTime<Utc>,
    pub content_type: Option<String>,
}

/// Opaque blob storage addressed by bucket + key. Backed by the local
/// filesystem in production and by a map in tests; a real blob system
/// slots in behind the same trait.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Fails when the bucket does not exist.
    async fn get_bucket(&self, name: &str) -> Result<Bucket>;
    /// Creates the bucket when missing.
    async fn upsert_bucket(&self, name: &str) -> Result<Bucket>;
    async fn list_objects(
        &self,
        bucket: &Bucket,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<ObjectInfo>>;
    async fn get_object(&self, bucket: &Bucket, key: &str) -> Result<Object>;
    async fn put_object(&self, bucket: &Bucket, key: &str, data: Bytes) -> Result<()>;
    async fn delete_object(&self, bucket: &Bucket, key: &str) -> Result<()>;
}
