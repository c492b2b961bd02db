//! The auth gate: turns a cookie-carried access token into a resolved family.

use std::str::FromStr as _;

use axum::extract::FromRequestParts;
use axum::http::request;
use babylog_core::{AccessToken, AccessTokenValue, FamilyId};
use tower_cookies::Cookies;

use crate::SharedAppState;
use crate::error::{RequestError, RequestResult};

pub const TOKEN_COOKIE: &str = "babylog_token";
const ADMIN_BEARER_PREFIX: &str = "Bearer ";

/// Proof that the request carried a still-usable access token, resolved to
/// the family it grants access to.
#[derive(Debug, Clone)]
pub struct AuthenticatedFamily {
    pub family_id: FamilyId,
    pub token: AccessToken,
}

impl FromRequestParts<SharedAppState> for AuthenticatedFamily {
    type Rejection = RequestError;

    async fn from_request_parts(
        parts: &mut request::Parts,
        state: &SharedAppState,
    ) -> RequestResult<Self> {
        let cookies = Cookies::from_request_parts(parts, state)
            .await
            .map_err(|_| RequestError::Unauthorized)?;

        let token_value = cookies
            .get(TOKEN_COOKIE)
            .ok_or(RequestError::Unauthorized)?;
        let token = AccessTokenValue::from_str(token_value.value())
            .map_err(|_| RequestError::Unauthorized)?;

        let token = state
            .db
            .resolve_token(token)
            .await?
            .ok_or(RequestError::Unauthorized)?;

        Ok(AuthenticatedFamily {
            family_id: token.family_id,
            token,
        })
    }
}

/// Proof that the request carried the operator bearer token configured at
/// startup, separate from the per-family access-link cookie: the admin
/// surface is not reachable with a regular family token.
#[derive(Debug, Clone, Copy)]
pub struct AdminAuth;

impl FromRequestParts<SharedAppState> for AdminAuth {
    type Rejection = RequestError;

    async fn from_request_parts(
        parts: &mut request::Parts,
        state: &SharedAppState,
    ) -> RequestResult<Self> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(RequestError::Unauthorized)?;
        let presented = header
            .strip_prefix(ADMIN_BEARER_PREFIX)
            .ok_or(RequestError::Unauthorized)?;

        if presented == state.admin_token {
            Ok(AdminAuth)
        } else {
            Err(RequestError::Unauthorized)
        }
    }
}
