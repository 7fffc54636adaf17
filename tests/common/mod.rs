//! Shared fixture: a full router over in-memory stores, with the
//! purge coordinator running, serving `pgs.sh` like production would.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use bytes::Bytes;
use chrono::Utc;
use tower::ServiceExt;
use uuid::Uuid;

use plinth::cache::{HttpCache, PurgePublisher, cache_mgmt, purge_bus};
use plinth::config::ConfigSite;
use plinth::error::Result;
use plinth::resolver::StaticTxtResolver;
use plinth::server::{AppState, create_router};
use plinth::storage::{
    ImageProcessor, ImgProcessOpts, MemoryStorage, ObjectStorage, asset_bucket_name,
};
use plinth::store::{MemoryStore, Store};
use plinth::types::{FeatureData, User};

/// Stand-in image pipeline: uppercases the bytes so transformation is
/// observable without a codec.
pub struct UppercaseProcessor;

#[async_trait]
impl ImageProcessor for UppercaseProcessor {
    async fn process(
        &self,
        data: Bytes,
        content_type: &str,
        opts: &ImgProcessOpts,
    ) -> Result<(Bytes, String)> {
        let upper = data.iter().map(|b| b.to_ascii_uppercase()).collect::<Vec<_>>();
        let ct = opts
            .format
            .map(|f| f.content_type().to_string())
            .unwrap_or_else(|| content_type.to_string());
        Ok((Bytes::from(upper), ct))
    }
}

pub struct TestEnv {
    pub store: Arc<MemoryStore>,
    pub storage: Arc<MemoryStorage>,
    pub cache: Arc<HttpCache>,
    pub purge: PurgePublisher,
    pub router: Router,
}

pub fn test_config() -> ConfigSite {
    ConfigSite {
        domain: "pgs.sh".to_string(),
        txt_prefix: "pgs".to_string(),
        ..ConfigSite::default()
    }
}

pub async fn env() -> TestEnv {
    env_with_txt(StaticTxtResolver::new()).await
}

pub async fn env_with_txt(txt: StaticTxtResolver) -> TestEnv {
    let store = Arc::new(MemoryStore::new());
    let storage = Arc::new(MemoryStorage::new());
    let cache = Arc::new(HttpCache::new(Duration::from_secs(600)));
    let (purge, purge_rx) = purge_bus();
    tokio::spawn(cache_mgmt(cache.clone(), purge_rx));

    let state = Arc::new(AppState {
        cfg: test_config(),
        store: store.clone(),
        storage: storage.clone(),
        txt: Arc::new(txt),
        img: Arc::new(UppercaseProcessor),
        cache: cache.clone(),
        purge: purge.clone(),
    });

    TestEnv {
        store,
        storage,
        cache,
        purge,
        router: create_router(state),
    }
}

impl TestEnv {
    pub async fn create_user(&self, name: &str) -> User {
        let user = User {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        self.store.create_user(&user).expect("create user");
        self.storage
            .upsert_bucket(&asset_bucket_name(&user.id))
            .await
            .expect("create bucket");
        user
    }

    pub fn create_project(&self, user: &User, name: &str) {
        self.store
            .insert_project(&user.id, name, name)
            .expect("insert project");
    }

    pub async fn put_asset(&self, user: &User, key: &str, body: &str) {
        let bucket = self
            .storage
            .get_bucket(&asset_bucket_name(&user.id))
            .await
            .expect("bucket");
        self.storage
            .put_object(&bucket, key, Bytes::from(body.to_string()))
            .await
            .expect("put object");
    }

    pub fn give_plus(&self, user: &User) {
        self.store
            .set_feature(
                &user.id,
                &FeatureData::new(
                    vec!["write".into(), "plus".into()],
                    25 * 1024 * 1024,
                    10 * 1024 * 1024,
                    5 * 1024,
                ),
            )
            .expect("set feature");
    }

    pub async fn get(&self, host: &str, path: &str) -> Response {
        self.request(Method::GET, host, path, &[]).await
    }

    pub async fn request(
        &self,
        method: Method,
        host: &str,
        path: &str,
        headers: &[(&str, &str)],
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(path).header("host", host);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.router
            .clone()
            .oneshot(builder.body(Body::empty()).expect("request"))
            .await
            .expect("infallible service")
    }
}

pub async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024 * 1024)
        .await
        .expect("read body");
    String::from_utf8_lossy(&bytes).into_owned()
}

pub fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}
