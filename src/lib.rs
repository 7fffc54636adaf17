//! # Plinth
//!
//! Multi-tenant static-site hosting, usable both as a standalone
//! binary and as a library.
//!
//! Each user owns named projects served at `<user>.<domain>` (the
//! apex project) or `<user>-<project>.<domain>`, with custom domains
//! mapped through TXT records. Projects can link to each other,
//! responses are cached per project under a surrogate key, and admin
//! commands arrive as an SSH command vector.
//!
//! ## Library Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use plinth::cache::{HttpCache, purge_bus, cache_mgmt};
//! use plinth::config::ConfigSite;
//! use plinth::server::{AppState, create_router};
//! use plinth::store::{SqliteStore, Store};
//!
//! let cfg = ConfigSite::from_env();
//! let store = SqliteStore::new(&cfg.db_path).unwrap();
//! store.initialize().unwrap();
//!
//! let cache = Arc::new(HttpCache::new(cfg.cache_ttl));
//! let (purge, rx) = purge_bus();
//! tokio::spawn(cache_mgmt(cache.clone(), rx));
//! // assemble AppState and serve create_router(state) with axum...
//! ```

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod project;
pub mod resolver;
pub mod server;
pub mod special;
pub mod storage;
pub mod store;
pub mod types;
