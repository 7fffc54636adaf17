use std::sync::LazyLock;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::Response;
use bytes::Bytes;
use percent_encoding::percent_decode_str;
use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;

use super::error_response;
use super::router::AppState;
use crate::error::{Error, Result};
use crate::resolver::{has_project_access, project_from_subdomain, resolve_effective_dir};
use crate::special::{find_redirect, match_headers, parse_headers, parse_redirects};
use crate::storage::{Bucket, ImgProcessOpts, asset_bucket_name, uri_to_img_opts};
use crate::types::User;

static IMG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+\.(?:jpg|jpeg|png|gif|webp|svg))(/.+)$").expect("static regex")
});

/// Everything the asset handler needs from the transport layer.
pub struct AssetContext {
    pub subdomain: String,
    pub method: Method,
    /// Percent-decoded request path, with leading slash.
    pub path: String,
    pub range: Option<String>,
    /// Authenticated identity from the SSH tunnel bridge, if any.
    pub requester: Option<User>,
    pub pubkey: Option<String>,
    /// Set by the tunnel bridge after it has already evaluated the
    /// ACL for this session.
    pub pre_authorized: bool,
}

impl AssetContext {
    pub fn from_request(subdomain: String, request: &Request) -> Self {
        Self {
            subdomain,
            method: request.method().clone(),
            path: percent_decode_str(request.uri().path())
                .decode_utf8_lossy()
                .into_owned(),
            range: request
                .headers()
                .get(header::RANGE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string()),
            requester: None,
            pubkey: None,
            pre_authorized: false,
        }
    }
}

pub async fn serve_asset(state: &AppState, ctx: AssetContext) -> Response {
    match resolve_and_serve(state, &ctx).await {
        Ok(response) => response,
        Err(err) => error_response(err),
    }
}

async fn resolve_and_serve(state: &AppState, ctx: &AssetContext) -> Result<Response> {
    let props = project_from_subdomain(&ctx.subdomain)?;

    let mut fname = ctx.path.trim_start_matches('/').to_string();

    // image fast path: /photo.jpg/w:200/fmt:webp
    let mut img_opts: Option<ImgProcessOpts> = None;
    if let Some(captures) = IMG_REGEX.captures(&fname) {
        let asset = captures.get(1).map(|m| m.as_str().to_string());
        let opts_path = captures.get(2).map(|m| m.as_str().to_string());
        if let (Some(asset), Some(opts_path)) = (asset, opts_path) {
            img_opts = Some(uri_to_img_opts(&opts_path)?);
            fname = asset;
        }
    }

    let user = state
        .store
        .find_user_by_name(&props.username)?
        .ok_or(Error::NotFound)?;

    let project = state
        .store
        .find_project_by_name(&user.id, &props.project_name)?
        .ok_or(Error::NotFound)?;

    if !project.blocked.is_empty() {
        tracing::error!(
            user = %user.name,
            project = %project.name,
            "project has been blocked"
        );
        return Err(Error::Blocked(project.blocked.clone()));
    }

    if !ctx.pre_authorized
        && !has_project_access(&project, &user, ctx.requester.as_ref(), ctx.pubkey.as_deref())
    {
        return Err(Error::Unauthorized);
    }

    let effective_dir = resolve_effective_dir(state.store.as_ref(), &user.id, &project)?;

    let bucket = state
        .storage
        .get_bucket(&asset_bucket_name(&user.id))
        .await
        .map_err(|_| Error::NotFound)?;

    let feature = state.store.find_feature(&user.id)?;
    let has_plus = feature.has_perm("plus");
    let special_file_max = if feature.special_file_max > 0 {
        feature.special_file_max
    } else {
        state.cfg.max_special_file_size
    };

    let handler = AssetHandler {
        state,
        username: &props.username,
        project_name: &props.project_name,
        effective_dir: &effective_dir,
        bucket: &bucket,
        special_file_max,
    };

    handler.serve(ctx, &fname, img_opts.filter(|_| has_plus)).await
}

struct AssetHandler<'a> {
    state: &'a AppState,
    username: &'a str,
    project_name: &'a str,
    effective_dir: &'a str,
    bucket: &'a Bucket,
    special_file_max: i64,
}

/// One blob-lookup attempt and the status to serve it with.
struct RouteAttempt {
    key: String,
    status: StatusCode,
}

impl AssetHandler<'_> {
    async fn serve(
        &self,
        ctx: &AssetContext,
        fname: &str,
        img_opts: Option<ImgProcessOpts>,
    ) -> Result<Response> {
        let url_path = ensure_leading_slash(&ctx.path);

        // _redirects runs before any blob lookup; first match wins
        let mut lookup_path = fname.to_string();
        let mut forced_status: Option<StatusCode> = None;

        if let Some(rules) = self.load_special_file("_redirects").await {
            if let Some(m) = find_redirect(&parse_redirects(&rules), &url_path) {
                match m.status {
                    200 => lookup_path = m.to.trim_start_matches('/').to_string(),
                    404 => {
                        lookup_path = m.to.trim_start_matches('/').to_string();
                        forced_status = Some(StatusCode::NOT_FOUND);
                    }
                    status => {
                        // a 3xx terminates resolution; no _headers apply
                        return Ok(Response::builder()
                            .status(StatusCode::from_u16(status).unwrap_or(StatusCode::MOVED_PERMANENTLY))
                            .header(header::LOCATION, m.to.as_str())
                            .body(Body::empty())
                            .map_err(|e| Error::Fatal(e.to_string()))?);
                    }
                }
            }
        }

        let (object, attempt) = self.lookup_blob(&lookup_path, forced_status).await?;

        let content_type = content_type_for(&attempt.key)
            .map(|ct| ct.to_string())
            .or(object.content_type.clone())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let mut headers: Vec<(String, String)> = vec![
            (header::CONTENT_TYPE.as_str().to_string(), content_type.clone()),
            (
                header::CACHE_CONTROL.as_str().to_string(),
                self.state.cfg.cache_control.clone(),
            ),
            (
                "surrogate-key".to_string(),
                crate::cache::surrogate_key(self.username, self.project_name),
            ),
        ];

        if let Some(sections) = self.load_special_file("_headers").await {
            for (name, value) in match_headers(&parse_headers(&sections), &url_path) {
                match headers
                    .iter_mut()
                    .find(|(n, _)| n.eq_ignore_ascii_case(&name))
                {
                    Some(slot) => slot.1 = value,
                    None => headers.push((name, value)),
                }
            }
        }

        let status = attempt.status;
        let is_head = ctx.method == Method::HEAD;

        // image variants and range slices need the body in hand;
        // plain hits stream straight from the store
        let transformable = object.size <= self.state.cfg.max_asset_size;
        if !transformable && img_opts.is_some() {
            tracing::warn!(
                filename = %attempt.key,
                size = object.size,
                "image exceeds max asset size, serving original"
            );
        }
        if let Some(opts) = img_opts.filter(|o| !o.is_empty() && transformable) {
            let mut reader = object.reader;
            let mut data = Vec::with_capacity(object.size.max(0) as usize);
            reader.read_to_end(&mut data).await?;

            let (bytes, ct) = self
                .state
                .img
                .process(Bytes::from(data), &content_type, &opts)
                .await?;
            set_header(&mut headers, header::CONTENT_TYPE.as_str(), &ct);
            return body_response(status, headers, bytes, ctx.range.as_deref(), is_head);
        }

        if let Some(range) = ctx.range.as_deref() {
            let total = object.size.max(0) as u64;
            let Some((start, end)) = parse_range(range, total) else {
                set_header(
                    &mut headers,
                    header::CONTENT_RANGE.as_str(),
                    &format!("bytes */{total}"),
                );
                return build_response(StatusCode::RANGE_NOT_SATISFIABLE, headers, Body::empty());
            };

            let mut reader = object.reader;
            tokio::io::copy(&mut (&mut reader).take(start), &mut tokio::io::sink()).await?;
            let len = end - start + 1;

            set_header(
                &mut headers,
                header::CONTENT_RANGE.as_str(),
                &format!("bytes {start}-{end}/{total}"),
            );
            set_header(&mut headers, header::CONTENT_LENGTH.as_str(), &len.to_string());

            let body = if is_head {
                Body::empty()
            } else {
                Body::from_stream(ReaderStream::new(reader.take(len)))
            };
            return build_response(StatusCode::PARTIAL_CONTENT, headers, body);
        }

        set_header(
            &mut headers,
            header::CONTENT_LENGTH.as_str(),
            &object.size.max(0).to_string(),
        );
        let body = if is_head {
            Body::empty()
        } else {
            Body::from_stream(ReaderStream::new(object.reader))
        };
        build_response(status, headers, body)
    }

    /// Tries the candidate keys in order; the last resort is the
    /// project's 404 page served with status 404.
    async fn lookup_blob(
        &self,
        fname: &str,
        forced_status: Option<StatusCode>,
    ) -> Result<(crate::storage::Object, RouteAttempt)> {
        let mut attempts = Vec::new();
        let status = forced_status.unwrap_or(StatusCode::OK);

        if fname.is_empty() || fname.ends_with('/') {
            attempts.push(RouteAttempt {
                key: format!("{}/{}index.html", self.effective_dir, fname),
                status,
            });
        } else {
            attempts.push(RouteAttempt {
                key: format!("{}/{}", self.effective_dir, fname),
                status,
            });
            let last = fname.rsplit('/').next().unwrap_or(fname);
            if !last.contains('.') {
                attempts.push(RouteAttempt {
                    key: format!("{}/{}/index.html", self.effective_dir, fname),
                    status,
                });
            }
        }
        attempts.push(RouteAttempt {
            key: format!("{}/404.html", self.effective_dir),
            status: StatusCode::NOT_FOUND,
        });

        for attempt in attempts {
            match self.state.storage.get_object(self.bucket, &attempt.key).await {
                Ok(object) => {
                    tracing::info!(
                        filename = %attempt.key,
                        status = attempt.status.as_u16(),
                        "serving asset"
                    );
                    return Ok((object, attempt));
                }
                Err(Error::NotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::NotFound)
    }

    /// Reads a `_redirects`/`_headers` style file from the effective
    /// directory. Oversize files are ignored with a warning.
    async fn load_special_file(&self, name: &str) -> Option<String> {
        let key = format!("{}/{}", self.effective_dir, name);
        let object = match self.state.storage.get_object(self.bucket, &key).await {
            Ok(object) => object,
            Err(Error::NotFound) => return None,
            Err(e) => {
                tracing::warn!(filename = %key, err = %e, "could not read special file");
                return None;
            }
        };

        if object.size > self.special_file_max {
            tracing::warn!(
                filename = %key,
                size = object.size,
                max = self.special_file_max,
                "special file exceeds max size, ignoring"
            );
            return None;
        }

        let mut text = String::new();
        let mut reader = object.reader.take(self.special_file_max.max(0) as u64);
        match reader.read_to_string(&mut text).await {
            Ok(_) => Some(text),
            Err(e) => {
                tracing::warn!(filename = %key, err = %e, "special file is not utf-8, ignoring");
                None
            }
        }
    }
}

fn ensure_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    match headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
        Some(slot) => slot.1 = value.to_string(),
        None => headers.push((name.to_string(), value.to_string())),
    }
}

fn build_response(
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: Body,
) -> Result<Response> {
    let mut response = Response::builder().status(status);
    for (name, value) in headers {
        let Ok(name) = name.parse::<HeaderName>() else {
            tracing::warn!(header = %name, "dropping invalid header name");
            continue;
        };
        let Ok(value) = value.parse::<HeaderValue>() else {
            tracing::warn!(header = %name, "dropping invalid header value");
            continue;
        };
        response = response.header(name, value);
    }
    response
        .body(body)
        .map_err(|e| Error::Fatal(e.to_string()))
}

/// Serves an in-memory body, honoring Range and HEAD.
fn body_response(
    status: StatusCode,
    mut headers: Vec<(String, String)>,
    bytes: Bytes,
    range: Option<&str>,
    is_head: bool,
) -> Result<Response> {
    if let Some(range) = range {
        let total = bytes.len() as u64;
        let Some((start, end)) = parse_range(range, total) else {
            set_header(
                &mut headers,
                header::CONTENT_RANGE.as_str(),
                &format!("bytes */{total}"),
            );
            return build_response(StatusCode::RANGE_NOT_SATISFIABLE, headers, Body::empty());
        };
        let slice = bytes.slice(start as usize..=end as usize);
        set_header(
            &mut headers,
            header::CONTENT_RANGE.as_str(),
            &format!("bytes {start}-{end}/{total}"),
        );
        set_header(
            &mut headers,
            header::CONTENT_LENGTH.as_str(),
            &slice.len().to_string(),
        );
        let body = if is_head { Body::empty() } else { Body::from(slice) };
        return build_response(StatusCode::PARTIAL_CONTENT, headers, body);
    }

    set_header(
        &mut headers,
        header::CONTENT_LENGTH.as_str(),
        &bytes.len().to_string(),
    );
    let body = if is_head { Body::empty() } else { Body::from(bytes) };
    build_response(status, headers, body)
}

/// Single-range `bytes=` parser; returns an inclusive byte window.
fn parse_range(raw: &str, total: u64) -> Option<(u64, u64)> {
    if total == 0 {
        return None;
    }
    let raw = raw.strip_prefix("bytes=")?;
    // multiple ranges are not supported
    if raw.contains(',') {
        return None;
    }
    let (start, end) = raw.split_once('-')?;

    if start.is_empty() {
        // suffix form: last N bytes
        let n: u64 = end.parse().ok()?;
        if n == 0 {
            return None;
        }
        let n = n.min(total);
        return Some((total - n, total - 1));
    }

    let start: u64 = start.parse().ok()?;
    if start >= total {
        return None;
    }
    let end = if end.is_empty() {
        total - 1
    } else {
        end.parse::<u64>().ok()?.min(total - 1)
    };
    if end < start {
        return None;
    }
    Some((start, end))
}

/// Content type by file extension; unknown extensions defer to the
/// stored type, then octet-stream.
fn content_type_for(filename: &str) -> Option<&'static str> {
    let ext = std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())?
        .to_lowercase();

    Some(match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "xml" => "application/xml",
        "txt" => "text/plain; charset=utf-8",
        "md" => "text/markdown; charset=utf-8",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        "ico" => "image/x-icon",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "svg" => "image/svg+xml",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        _ => return None,
    })
}
