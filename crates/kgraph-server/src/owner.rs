//! Request owner extraction.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use kgraph_core::{Error, OwnerKey};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the authenticated user id, set by the upstream auth layer.
pub const USER_HEADER: &str = "x-user-id";

#[derive(Debug, Default, Deserialize)]
struct ScopeParam {
    scope: Option<String>,
}

/// The graph document a request operates on.
#[derive(Debug, Clone)]
pub struct Owner(pub OwnerKey);

impl FromRequestParts<Arc<AppState>> for Owner {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::Unauthorized(format!("missing {} header", USER_HEADER)))?;

        let scope = Query::<ScopeParam>::try_from_uri(&parts.uri)
            .map(|q| q.0)
            .unwrap_or_default();

        let owner = OwnerKey::resolve(user_id, scope.scope.as_deref(), state.config.scope_mode)?;
        Ok(Self(owner))
    }
}
