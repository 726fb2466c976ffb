use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
    Json,
};

use crate::api::handlers::{api_error, AppState, ErrorResponse};
use crate::model::{RequestContext, UserContext};
use crate::store::VersionedEngine;

/// Axum extractor for the per-request context
///
/// The active branch comes from the configured branch header (default
/// `x-dolt-branch`); a missing or unknown branch means the primary branch.
/// User information comes from:
/// - X-User-Id: Required user identifier
/// - X-User-Email: Optional user email
/// - X-User-Name: Optional user display name
///
/// If no user headers are present, a default development user is used.
#[async_trait]
impl<E> FromRequestParts<AppState<E>> for RequestContext
where
    E: VersionedEngine + 'static,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(
        parts: &mut Parts,
        vc: &AppState<E>,
    ) -> Result<Self, Self::Rejection> {
        let requested = extract_header_value(&parts.headers, &vc.branch_header);
        let branch = vc
            .branches
            .resolve_active(requested.as_deref())
            .await
            .map_err(api_error)?;
        Ok(RequestContext::new(branch, user_from_headers(&parts.headers)))
    }
}

fn user_from_headers(headers: &HeaderMap) -> UserContext {
    match extract_header_value(headers, "x-user-id") {
        Some(user_id) => UserContext::with_details(
            user_id,
            extract_header_value(headers, "x-user-email"),
            extract_header_value(headers, "x-user-name"),
        ),
        None => UserContext::default_user(),
    }
}

/// Extract header value as string
fn extract_header_value(headers: &HeaderMap, header_name: &str) -> Option<String> {
    headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
