//! Per-request caller context handed to services explicitly
//!
//! Identity arrives as headers set by the authenticating ingress. Nothing
//! here verifies them; deployments that accept traffic from anywhere else
//! must configure an ingress secret so [`crate::middleware::auth::identity_gate`]
//! drops identity headers the ingress did not vouch for.

use axum::extract::FromRequestParts;
use http::request::Parts;
use http::HeaderMap;
use std::convert::Infallible;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLES_HEADER: &str = "x-user-roles";
pub const ADMIN_ROLE: &str = "admin";
/// Carries the ingress shared secret; removed before handlers run
pub const INGRESS_TOKEN_HEADER: &str = "x-ingress-token";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: Option<String>,
    /// Authenticated end user, as forwarded by the gateway in front of us
    pub user_id: Option<Uuid>,
    pub roles: Vec<String>,
}

impl RequestContext {
    /// Context for calls that originate inside the process
    pub fn internal() -> Self {
        Self {
            request_id: Some(format!("internal-{}", Uuid::new_v4())),
            user_id: None,
            roles: vec![ADMIN_ROLE.to_string()],
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        Self {
            request_id: text("x-request-id").map(str::to_string),
            user_id: text(USER_ID_HEADER).and_then(|v| Uuid::parse_str(v).ok()),
            roles: text(USER_ROLES_HEADER)
                .map(|v| {
                    v.split(',')
                        .map(|r| r.trim().to_lowercase())
                        .filter(|r| !r.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == ADMIN_ROLE)
    }

    /// Owners and admins may read a user's resources
    pub fn can_access_user(&self, owner: Uuid) -> bool {
        self.is_admin() || self.user_id == Some(owner)
    }

    pub fn request_id_or_default(&self) -> &str {
        self.request_id.as_deref().unwrap_or("-")
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}
