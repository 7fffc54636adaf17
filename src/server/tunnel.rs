use std::sync::Arc;

use axum::Router;
use axum::extract::Request;
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::any;

use super::asset::{AssetContext, serve_asset};
use super::router::AppState;
use crate::error::{Error, Result};
use crate::resolver::{has_project_access, parse_ssh_user, project_from_subdomain};

/// Builds the router served over an authenticated SSH forward for a
/// single subdomain. The ACL is evaluated once here, against the
/// session's public key; admins may impersonate another requester
/// with a `<as_user>__<subdomain>` SSH username.
pub async fn tunnel_router(
    state: Arc<AppState>,
    ssh_user: &str,
    pubkey: &str,
) -> Result<Router> {
    let (as_user, subdomain) = parse_ssh_user(ssh_user);
    let props = project_from_subdomain(subdomain)?;

    let owner = state
        .store
        .find_user_by_name(&props.username)?
        .ok_or(Error::Unauthorized)?;
    let project = state
        .store
        .find_project_by_name(&owner.id, &props.project_name)?
        .ok_or(Error::Unauthorized)?;

    let mut requester = state.store.find_user_by_pubkey(ssh_user, pubkey)?;

    if let Some(as_user) = as_user {
        let caller = requester.as_ref().ok_or(Error::Unauthorized)?;
        if !state.store.has_feature_for_user(&caller.id, "admin")? {
            tracing::error!(
                impersonating = as_user,
                subdomain = subdomain,
                "impersonation attempt failed"
            );
            return Err(Error::Unauthorized);
        }
        requester = Some(
            state
                .store
                .find_user_by_name(as_user)?
                .ok_or(Error::Unauthorized)?,
        );
    }

    if !has_project_access(&project, &owner, requester.as_ref(), Some(pubkey)) {
        tracing::error!(
            subdomain = subdomain,
            owner = %owner.name,
            "tunnel session has no access to site"
        );
        return Err(Error::Unauthorized);
    }

    tracing::info!(subdomain = subdomain, owner = %owner.name, "tunnel session authorized");

    let subdomain = subdomain.to_string();
    let pubkey = pubkey.to_string();
    let router = Router::new().fallback(any(move |request: Request| {
        let state = state.clone();
        let subdomain = subdomain.clone();
        let requester = requester.clone();
        let pubkey = pubkey.clone();
        async move {
            if request.method() != Method::GET && request.method() != Method::HEAD {
                return StatusCode::METHOD_NOT_ALLOWED.into_response();
            }
            let mut ctx = AssetContext::from_request(subdomain, &request);
            ctx.requester = requester;
            ctx.pubkey = Some(pubkey);
            ctx.pre_authorized = true;
            serve_asset(&state, ctx).await
        }
    }));

    Ok(router)
}
