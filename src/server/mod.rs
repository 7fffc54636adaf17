mod asset;
mod feed;
mod router;
mod tunnel;

pub use asset::{AssetContext, serve_asset};
pub use router::{AppState, create_router};
pub use tunnel::tunnel_router;

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::Response;

use crate::error::Error;

/// Converts a resolution error into the plain-text HTTP response the
/// client sees. Invariant violations are logged here and degraded to
/// a generic 404.
pub(crate) fn error_response(err: Error) -> Response {
    let (status, message) = match err {
        Error::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
        Error::Unauthorized => (
            StatusCode::UNAUTHORIZED,
            "You do not have access to this site".to_string(),
        ),
        Error::Blocked(reason) => (StatusCode::FORBIDDEN, reason),
        Error::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
        Error::Fatal(msg) => {
            tracing::error!(err = %msg, "invariant violation during resolution");
            (StatusCode::NOT_FOUND, "not found".to_string())
        }
        err if err.is_transient() => {
            tracing::error!(err = %err, "transient failure during resolution");
            (StatusCode::BAD_GATEWAY, "upstream failure".to_string())
        }
        err => (StatusCode::NOT_FOUND, err.to_string()),
    };

    Response::builder()
        .status(status)
        .header("content-type", "text/plain; charset=utf-8")
        .body(Body::from(message))
        .expect("static response")
}
