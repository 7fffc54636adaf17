use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::{Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;

use super::asset::{AssetContext, serve_asset};
use super::feed;
use crate::cache::{HttpCache, PurgePublisher, cache_middleware};
use crate::config::ConfigSite;
use crate::resolver::{
    TxtResolver, custom_domain_subdomain, project_from_subdomain, subdomain_from_host,
};
use crate::storage::{ImageProcessor, ObjectStorage};
use crate::store::Store;

/// Hard deadline for one request, resolution and streaming included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct AppState {
    pub cfg: ConfigSite,
    pub store: Arc<dyn Store>,
    pub storage: Arc<dyn ObjectStorage>,
    pub txt: Arc<dyn TxtResolver>,
    pub img: Arc<dyn ImageProcessor>,
    pub cache: Arc<HttpCache>,
    pub purge: PurgePublisher,
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
        .to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    tracing::info!(
        "{} {}{} {} {}ms",
        method,
        host,
        uri.path(),
        response.status().as_u16(),
        start.elapsed().as_millis()
    );

    response
}

/// Chooses the root router or the asset path from the request Host.
/// Everything below this middleware runs under the request deadline.
async fn dispatch_by_host(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
        .to_string();

    let served = tokio::time::timeout(REQUEST_TIMEOUT, async {
        let subdomain = subdomain_from_host(
            state.txt.as_ref(),
            &host,
            &state.cfg.domain,
            &state.cfg.txt_prefix,
        )
        .await;

        match subdomain {
            None => next.run(request).await,
            Some(subdomain) => {
                if request.method() != Method::GET && request.method() != Method::HEAD {
                    return StatusCode::METHOD_NOT_ALLOWED.into_response();
                }
                let ctx = AssetContext::from_request(subdomain, &request);
                serve_asset(&state, ctx).await
            }
        }
    })
    .await;

    match served {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(host = %host, "request deadline exceeded");
            StatusCode::GATEWAY_TIMEOUT.into_response()
        }
    }
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Deserialize)]
struct CheckParams {
    #[serde(default)]
    domain: String,
}

/// Custom-domain vetting for the ingress: 200 iff the TXT record maps
/// to an existing user and project.
async fn check_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CheckParams>,
) -> StatusCode {
    let app_domain = state.cfg.domain.split(':').next().unwrap_or_default();
    if params.domain.contains(app_domain) {
        return StatusCode::NOT_FOUND;
    }

    let Some(subdomain) =
        custom_domain_subdomain(state.txt.as_ref(), &params.domain, &state.cfg.txt_prefix).await
    else {
        return StatusCode::NOT_FOUND;
    };

    let Ok(props) = project_from_subdomain(&subdomain) else {
        return StatusCode::NOT_FOUND;
    };
    let Ok(Some(user)) = state.store.find_user_by_name(&props.username) else {
        tracing::info!(subdomain = %subdomain, "check: user not found");
        return StatusCode::NOT_FOUND;
    };
    match state.store.find_project_by_name(&user.id, &props.project_name) {
        Ok(Some(_)) => StatusCode::OK,
        _ => {
            tracing::info!(
                user = %user.name,
                project = %props.project_name,
                "check: project not found"
            );
            StatusCode::NOT_FOUND
        }
    }
}

/// Root-domain files served from the local `public/` directory.
fn serve_public_file(file: &'static str, content_type: &'static str) -> axum::routing::MethodRouter<Arc<AppState>> {
    get(move || async move {
        match tokio::fs::read(format!("public/{file}")).await {
            Ok(contents) => Response::builder()
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from(contents))
                .expect("static response"),
            Err(e) => {
                tracing::error!(fname = file, err = %e, "could not read file");
                (StatusCode::NOT_FOUND, "file not found").into_response()
            }
        }
    })
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/check", get(check_handler))
        .route("/robots.txt", serve_public_file("robots.txt", "text/plain"))
        .route("/", serve_public_file("index.html", "text/html"))
        .route("/rss", get(feed::rss_created))
        .route("/rss/updated", get(feed::rss_updated))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            dispatch_by_host,
        ))
        .layer(middleware::from_fn_with_state(
            state.cache.clone(),
            cache_middleware,
        ))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}
