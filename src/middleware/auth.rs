//! Credential gates in front of the route handlers.
//!
//! Token verification belongs to the identity provider and the ingress in
//! front of these services. [`require_bearer`] only refuses requests that
//! carry no credential at all, and [`identity_gate`] drops forwarded
//! identity headers unless the ingress secret came with them.

use crate::context::{INGRESS_TOKEN_HEADER, USER_ID_HEADER, USER_ROLES_HEADER};
use crate::error::{AppError, AppErrorKind, ValidationError};
use crate::middleware::error::get_request_id_from_headers;
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::warn;

/// Returns the token part of an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub async fn require_bearer(request: Request, next: Next) -> Result<Response, AppError> {
    if bearer_token(request.headers()).is_none() {
        let mut err = AppError::new(AppErrorKind::Validation(
            ValidationError::MissingCredentials,
        ));
        if let Some(request_id) = get_request_id_from_headers(request.headers()) {
            err = err.with_request_id(request_id);
        }
        return Err(err);
    }

    Ok(next.run(request).await)
}

/// Comparison time depends only on the lengths
fn secrets_match(presented: &[u8], expected: &[u8]) -> bool {
    presented.len() == expected.len()
        && presented
            .iter()
            .zip(expected)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// Strips `x-user-id` and `x-user-roles` unless the request carries the
/// ingress secret. The secret header itself never reaches handlers.
pub async fn identity_gate(
    State(secret): State<Arc<str>>,
    mut request: Request,
    next: Next,
) -> Response {
    let headers = request.headers_mut();
    let vouched = headers
        .remove(INGRESS_TOKEN_HEADER)
        .is_some_and(|token| secrets_match(token.as_bytes(), secret.as_bytes()));

    if !vouched {
        let had_identity = headers.remove(USER_ID_HEADER).is_some();
        let had_roles = headers.remove(USER_ROLES_HEADER).is_some();
        if had_identity || had_roles {
            warn!(
                request_id = get_request_id_from_headers(headers).as_deref().unwrap_or("-"),
                "identity headers without ingress token dropped"
            );
        }
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer abc.def".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def"));
    }

    #[test]
    fn rejects_other_schemes_and_blank_tokens() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Basic dXNlcjpwYXNz".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, "Bearer   ".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }

    mod gate {
        use super::super::*;
        use crate::context::RequestContext;
        use axum::{body::Body, routing::get, Router};
        use tower::util::ServiceExt;

        async fn whoami(ctx: RequestContext) -> String {
            format!("{}:{}", ctx.user_id.is_some(), ctx.is_admin())
        }

        fn app() -> Router {
            let secret: Arc<str> = Arc::from("ingress-secret");
            Router::new()
                .route("/whoami", get(whoami))
                .layer(axum::middleware::from_fn_with_state(secret, identity_gate))
        }

        async fn whoami_with(token: Option<&str>) -> String {
            let mut builder = http::Request::builder()
                .uri("/whoami")
                .header(USER_ID_HEADER, "0b6f3a9e-8d2c-4f51-9e7a-1c3d5b7f9a20")
                .header(USER_ROLES_HEADER, "admin");
            if let Some(token) = token {
                builder = builder.header(INGRESS_TOKEN_HEADER, token);
            }
            let response = app()
                .oneshot(builder.body(Body::empty()).unwrap())
                .await
                .unwrap();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            String::from_utf8(bytes.to_vec()).unwrap()
        }

        #[tokio::test]
        async fn vouched_identity_reaches_handlers() {
            assert_eq!(whoami_with(Some("ingress-secret")).await, "true:true");
        }

        #[tokio::test]
        async fn self_asserted_admin_is_dropped() {
            assert_eq!(whoami_with(None).await, "false:false");
            assert_eq!(whoami_with(Some("guess")).await, "false:false");
        }

        #[test]
        fn secret_comparison_requires_exact_match() {
            assert!(secrets_match(b"abc", b"abc"));
            assert!(!secrets_match(b"abd", b"abc"));
            assert!(!secrets_match(b"abcd", b"abc"));
        }
    }
}
