use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use percent_encoding::percent_decode_str;

use super::HttpCache;

const SURROGATE_KEY: &str = "surrogate-key";
const X_CACHE: &str = "x-cache";

/// Largest response body the cache will hold; bigger payloads are
/// streamed through uncached.
const MAX_CACHEABLE_BODY: usize = 10 * 1024 * 1024;

/// Cache key: host plus percent-decoded path and query, so encoded
/// and literal spellings of the same URL share an entry.
fn cache_key(req: &Request) -> String {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");
    let path = percent_decode_str(req.uri().path()).decode_utf8_lossy();
    match req.uri().query() {
        Some(q) => format!("{host}{path}?{q}"),
        None => format!("{host}{path}"),
    }
}

/// Serves GETs from the HTTP cache and records cacheable responses.
/// Only 200s carrying a `Surrogate-Key` header are stored; `Range`
/// requests bypass the cache entirely because entries hold full
/// bodies.
pub async fn cache_middleware(
    State(cache): State<Arc<HttpCache>>,
    req: Request,
    next: Next,
) -> Response {
    let cacheable = req.method() == Method::GET && !req.headers().contains_key(header::RANGE);
    if !cacheable {
        return next.run(req).await;
    }

    let key = cache_key(&req);
    if let Some(entry) = cache.get(&key) {
        let mut response = Response::builder().status(entry.status);
        for (name, value) in &entry.headers {
            response = response.header(name, value);
        }
        // header names/values were valid when stored
        return response
            .header(X_CACHE, "hit")
            .body(Body::from(entry.body.clone()))
            .expect("cached response rebuilds");
    }

    let response = next.run(req).await;

    let surrogate = response
        .headers()
        .get(SURROGATE_KEY)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let Some(surrogate) = surrogate else {
        return response;
    };
    if response.status() != StatusCode::OK {
        return response;
    }

    // oversize or unsized bodies stream through uncached
    let content_length = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    match content_length {
        Some(len) if len <= MAX_CACHEABLE_BODY => {}
        _ => return response,
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_CACHEABLE_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(key = key, err = %e, "failed reading response body for cache");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    let stored_headers: Vec<(String, String)> = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            Some((name.as_str().to_string(), value.to_str().ok()?.to_string()))
        })
        .collect();

    cache.insert(
        key,
        surrogate,
        parts.status.as_u16(),
        stored_headers,
        bytes.clone(),
    );

    parts.headers.insert(
        HeaderName::from_static(X_CACHE),
        HeaderValue::from_static("miss"),
    );
    Response::from_parts(parts, Body::from(bytes))
}
